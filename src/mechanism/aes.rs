// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Block cipher mode parameters

use crate::error::Result;
use crate::mechanism::{FlatParams, MarshaledParams, ParamsBuilder, ReadBack};

use pkcs11::layout::{StructDef, StructView};
use pkcs11::structs::*;
use pkcs11::*;

/// `CK_AES_CTR_PARAMS`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AesCtrParams {
    pub counter_bits: CK_ULONG,
    pub cb: [u8; 16],
}

impl AesCtrParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_AES_CTR_PARAMS::DEF, profile)?;
        let mut view = b.view();
        view.set_ulong(CK_AES_CTR_PARAMS::ulCounterBits, self.counter_bits)?;
        view.set_bytes(CK_AES_CTR_PARAMS::cb, &self.cb)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

impl FlatParams for AesCtrParams {
    fn def() -> &'static StructDef {
        &CK_AES_CTR_PARAMS::DEF
    }

    fn read<B: AsRef<[u8]>>(view: &StructView<B>) -> AesCtrParams {
        let mut cb = [0u8; 16];
        cb.copy_from_slice(view.bytes(CK_AES_CTR_PARAMS::cb));
        AesCtrParams {
            counter_bits: view.ulong(CK_AES_CTR_PARAMS::ulCounterBits),
            cb: cb,
        }
    }
}

/// `CK_GCM_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcmParams {
    pub iv: Vec<u8>,
    pub iv_bits: CK_ULONG,
    pub aad: Vec<u8>,
    pub tag_bits: CK_ULONG,
}

impl GcmParams {
    pub fn new(iv: &[u8], aad: &[u8], tag_bits: CK_ULONG) -> GcmParams {
        GcmParams {
            iv: iv.to_vec(),
            iv_bits: (iv.len() as CK_ULONG) * 8,
            aad: aad.to_vec(),
            tag_bits: tag_bits,
        }
    }

    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_GCM_PARAMS::DEF, profile)?;
        b.set_data(CK_GCM_PARAMS::pIv, CK_GCM_PARAMS::ulIvLen, &self.iv)?;
        b.set_data(CK_GCM_PARAMS::pAAD, CK_GCM_PARAMS::ulAADLen, &self.aad)?;
        let mut view = b.view();
        view.set_ulong(CK_GCM_PARAMS::ulIvBits, self.iv_bits)?;
        view.set_ulong(CK_GCM_PARAMS::ulTagBits, self.tag_bits)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_CCM_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CcmParams {
    pub data_len: CK_ULONG,
    pub nonce: Vec<u8>,
    pub aad: Vec<u8>,
    pub mac_len: CK_ULONG,
}

impl CcmParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_CCM_PARAMS::DEF, profile)?;
        b.set_data(
            CK_CCM_PARAMS::pNonce,
            CK_CCM_PARAMS::ulNonceLen,
            &self.nonce,
        )?;
        b.set_data(CK_CCM_PARAMS::pAAD, CK_CCM_PARAMS::ulAADLen, &self.aad)?;
        let mut view = b.view();
        view.set_ulong(CK_CCM_PARAMS::ulDataLen, self.data_len)?;
        view.set_ulong(CK_CCM_PARAMS::ulMACLen, self.mac_len)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_AES_CBC_ENCRYPT_DATA_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AesCbcEncryptDataParams {
    pub iv: [u8; 16],
    pub data: Vec<u8>,
}

impl AesCbcEncryptDataParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(
            &CK_AES_CBC_ENCRYPT_DATA_PARAMS::DEF,
            profile,
        )?;
        b.set_data(
            CK_AES_CBC_ENCRYPT_DATA_PARAMS::pData,
            CK_AES_CBC_ENCRYPT_DATA_PARAMS::length,
            &self.data,
        )?;
        b.view()
            .set_bytes(CK_AES_CBC_ENCRYPT_DATA_PARAMS::iv, &self.iv)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_DES_CBC_ENCRYPT_DATA_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesCbcEncryptDataParams {
    pub iv: [u8; 8],
    pub data: Vec<u8>,
}

impl DesCbcEncryptDataParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(
            &CK_DES_CBC_ENCRYPT_DATA_PARAMS::DEF,
            profile,
        )?;
        b.set_data(
            CK_DES_CBC_ENCRYPT_DATA_PARAMS::pData,
            CK_DES_CBC_ENCRYPT_DATA_PARAMS::length,
            &self.data,
        )?;
        b.view()
            .set_bytes(CK_DES_CBC_ENCRYPT_DATA_PARAMS::iv, &self.iv)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_RC2_CBC_PARAMS`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Rc2CbcParams {
    pub effective_bits: CK_ULONG,
    pub iv: [u8; 8],
}

impl Rc2CbcParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_RC2_CBC_PARAMS::DEF, profile)?;
        let mut view = b.view();
        view.set_ulong(
            CK_RC2_CBC_PARAMS::ulEffectiveBits,
            self.effective_bits,
        )?;
        view.set_bytes(CK_RC2_CBC_PARAMS::iv, &self.iv)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

impl FlatParams for Rc2CbcParams {
    fn def() -> &'static StructDef {
        &CK_RC2_CBC_PARAMS::DEF
    }

    fn read<B: AsRef<[u8]>>(view: &StructView<B>) -> Rc2CbcParams {
        let mut iv = [0u8; 8];
        iv.copy_from_slice(view.bytes(CK_RC2_CBC_PARAMS::iv));
        Rc2CbcParams {
            effective_bits: view.ulong(CK_RC2_CBC_PARAMS::ulEffectiveBits),
            iv: iv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctr_round_trip() {
        let ctr = AesCtrParams {
            counter_bits: 32,
            cb: [0xa5; 16],
        };
        for profile in PlatformProfile::ALL {
            let m = ctr.marshal(profile).unwrap();
            assert_eq!(m.unmarshal::<AesCtrParams>().unwrap(), ctr);
            assert!(m.unmarshal::<Rc2CbcParams>().is_err());
        }
    }

    #[test]
    fn gcm_layout() {
        let gcm = GcmParams::new(&[1u8; 12], b"", 128);
        assert_eq!(gcm.iv_bits, 96);
        let m = gcm.marshal(PlatformProfile::W8).unwrap();
        /* no AAD buffer */
        assert_eq!(m.allocations(), 2);
        assert_eq!(
            m.ptr().unwrap().1 as usize,
            CK_GCM_PARAMS::DEF.size(PlatformProfile::W8)
        );
    }
}
