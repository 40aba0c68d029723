// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::mechanism::{FlatParams, MarshaledParams, ParamsBuilder, ReadBack};

use pkcs11::layout::{StructDef, StructView};
use pkcs11::structs::*;
use pkcs11::*;

/// `CK_RSA_PKCS_OAEP_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RsaOaepParams {
    pub hash_alg: CK_MECHANISM_TYPE,
    pub mgf: CK_RSA_PKCS_MGF_TYPE,
    pub source: CK_RSA_PKCS_OAEP_SOURCE_TYPE,
    pub source_data: Vec<u8>,
}

impl RsaOaepParams {
    /// OAEP with the same hash for the label and MGF1 and an optional
    /// label
    pub fn new(
        hash_alg: CK_MECHANISM_TYPE,
        mgf: CK_RSA_PKCS_MGF_TYPE,
        label: &[u8],
    ) -> RsaOaepParams {
        RsaOaepParams {
            hash_alg: hash_alg,
            mgf: mgf,
            source: if label.is_empty() {
                0
            } else {
                CKZ_DATA_SPECIFIED
            },
            source_data: label.to_vec(),
        }
    }

    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_RSA_PKCS_OAEP_PARAMS::DEF, profile)?;
        b.set_data(
            CK_RSA_PKCS_OAEP_PARAMS::pSourceData,
            CK_RSA_PKCS_OAEP_PARAMS::ulSourceDataLen,
            &self.source_data,
        )?;
        let mut view = b.view();
        view.set_ulong(CK_RSA_PKCS_OAEP_PARAMS::hashAlg, self.hash_alg)?;
        view.set_ulong(CK_RSA_PKCS_OAEP_PARAMS::mgf, self.mgf)?;
        view.set_ulong(CK_RSA_PKCS_OAEP_PARAMS::source, self.source)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_RSA_PKCS_PSS_PARAMS`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RsaPssParams {
    pub hash_alg: CK_MECHANISM_TYPE,
    pub mgf: CK_RSA_PKCS_MGF_TYPE,
    pub salt_len: CK_ULONG,
}

impl RsaPssParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_RSA_PKCS_PSS_PARAMS::DEF, profile)?;
        let mut view = b.view();
        view.set_ulong(CK_RSA_PKCS_PSS_PARAMS::hashAlg, self.hash_alg)?;
        view.set_ulong(CK_RSA_PKCS_PSS_PARAMS::mgf, self.mgf)?;
        view.set_ulong(CK_RSA_PKCS_PSS_PARAMS::sLen, self.salt_len)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

impl FlatParams for RsaPssParams {
    fn def() -> &'static StructDef {
        &CK_RSA_PKCS_PSS_PARAMS::DEF
    }

    fn read<B: AsRef<[u8]>>(view: &StructView<B>) -> RsaPssParams {
        RsaPssParams {
            hash_alg: view.ulong(CK_RSA_PKCS_PSS_PARAMS::hashAlg),
            mgf: view.ulong(CK_RSA_PKCS_PSS_PARAMS::mgf),
            salt_len: view.ulong(CK_RSA_PKCS_PSS_PARAMS::sLen),
        }
    }
}

/// `CK_KEY_WRAP_SET_OAEP_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyWrapSetOaepParams {
    pub bc: u8,
    pub x: Vec<u8>,
}

impl KeyWrapSetOaepParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b =
            ParamsBuilder::new(&CK_KEY_WRAP_SET_OAEP_PARAMS::DEF, profile)?;
        b.set_data(
            CK_KEY_WRAP_SET_OAEP_PARAMS::pX,
            CK_KEY_WRAP_SET_OAEP_PARAMS::ulXLen,
            &self.x,
        )?;
        b.view().set_byte(CK_KEY_WRAP_SET_OAEP_PARAMS::bBC, self.bc);
        Ok(b.finish(ReadBack::Nothing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AllocationStats;

    #[test]
    fn pss_round_trip() {
        let pss = RsaPssParams {
            hash_alg: CKM_SHA256,
            mgf: CKG_MGF1_SHA256,
            salt_len: 32,
        };
        for profile in PlatformProfile::ALL {
            let m = pss.marshal(profile).unwrap();
            assert_eq!(m.unmarshal::<RsaPssParams>().unwrap(), pss);
        }
    }

    #[test]
    fn oaep_label() {
        let start = AllocationStats::current();
        let oaep = RsaOaepParams::new(CKM_SHA_1, CKG_MGF1_SHA1, b"label");
        let mut m = oaep.marshal(PlatformProfile::W4_PACKED).unwrap();
        /* struct and label */
        assert_eq!(m.allocations(), 2);
        assert!(m.unmarshal::<RsaPssParams>().is_err());
        m.dispose();
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);

        let none = RsaOaepParams::new(CKM_SHA_1, CKG_MGF1_SHA1, b"");
        assert_eq!(none.source, 0);
        assert_eq!(none.marshal(PlatformProfile::W8).unwrap().allocations(), 1);
    }
}
