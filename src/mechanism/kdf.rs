// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Key derivation function parameters

use crate::error::Result;
use crate::memory::UnmanagedBuffer;
use crate::mechanism::{MarshaledParams, ParamsBuilder, ReadBack};

use pkcs11::structs::*;
use pkcs11::*;
use zeroize::Zeroizing;

/// `CK_KEY_DERIVATION_STRING_DATA`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyDerivationStringData {
    pub data: Vec<u8>,
}

impl KeyDerivationStringData {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b =
            ParamsBuilder::new(&CK_KEY_DERIVATION_STRING_DATA::DEF, profile)?;
        b.set_data(
            CK_KEY_DERIVATION_STRING_DATA::pData,
            CK_KEY_DERIVATION_STRING_DATA::ulLen,
            &self.data,
        )?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// The salt of an HKDF extract step
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HkdfSalt {
    Null,
    Data(Vec<u8>),
    Key(CK_OBJECT_HANDLE),
}

/// `CK_HKDF_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HkdfParams {
    pub extract: bool,
    pub expand: bool,
    pub prf_hash_mechanism: CK_MECHANISM_TYPE,
    pub salt: HkdfSalt,
    pub info: Vec<u8>,
}

impl HkdfParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_HKDF_PARAMS::DEF, profile)?;
        let salt_type = match self.salt {
            HkdfSalt::Null => CKF_HKDF_SALT_NULL,
            HkdfSalt::Data(ref data) => {
                b.set_data(
                    CK_HKDF_PARAMS::pSalt,
                    CK_HKDF_PARAMS::ulSaltLen,
                    data,
                )?;
                CKF_HKDF_SALT_DATA
            }
            HkdfSalt::Key(handle) => {
                b.view().set_ulong(CK_HKDF_PARAMS::hSaltKey, handle)?;
                CKF_HKDF_SALT_KEY
            }
        };
        b.set_data(
            CK_HKDF_PARAMS::pInfo,
            CK_HKDF_PARAMS::ulInfoLen,
            &self.info,
        )?;
        let mut view = b.view();
        view.set_byte(CK_HKDF_PARAMS::bExtract, self.extract as u8);
        view.set_byte(CK_HKDF_PARAMS::bExpand, self.expand as u8);
        view.set_ulong(
            CK_HKDF_PARAMS::prfHashMechanism,
            self.prf_hash_mechanism,
        )?;
        view.set_ulong(CK_HKDF_PARAMS::ulSaltType, salt_type)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// PKCS #5 PBKDF2 parameters, marshaled either as the v2.20
/// `CK_PKCS5_PBKD2_PARAMS` or as `CK_PKCS5_PBKD2_PARAMS2`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pbkdf2Params {
    pub salt_source: CK_PKCS5_PBKD2_SALT_SOURCE_TYPE,
    pub salt: Vec<u8>,
    pub iterations: CK_ULONG,
    pub prf: CK_PKCS5_PBKDF2_PSEUDO_RANDOM_FUNCTION_TYPE,
    pub prf_data: Vec<u8>,
    pub password: Zeroizing<Vec<u8>>,
}

impl Pbkdf2Params {
    pub fn new(
        password: &[u8],
        salt: &[u8],
        iterations: CK_ULONG,
        prf: CK_PKCS5_PBKDF2_PSEUDO_RANDOM_FUNCTION_TYPE,
    ) -> Pbkdf2Params {
        Pbkdf2Params {
            salt_source: CKZ_SALT_SPECIFIED,
            salt: salt.to_vec(),
            iterations: iterations,
            prf: prf,
            prf_data: Vec::new(),
            password: Zeroizing::new(password.to_vec()),
        }
    }

    fn fill(&self, b: &mut ParamsBuilder) -> Result<()> {
        /* the field indexes are the same in both structures */
        b.set_data(
            CK_PKCS5_PBKD2_PARAMS2::pSaltSourceData,
            CK_PKCS5_PBKD2_PARAMS2::ulSaltSourceDataLen,
            &self.salt,
        )?;
        b.set_data(
            CK_PKCS5_PBKD2_PARAMS2::pPrfData,
            CK_PKCS5_PBKD2_PARAMS2::ulPrfDataLen,
            &self.prf_data,
        )?;
        let password = b.data(&self.password)?;
        let mut view = b.view();
        view.set_ulong(CK_PKCS5_PBKD2_PARAMS2::saltSource, self.salt_source)?;
        view.set_ulong(CK_PKCS5_PBKD2_PARAMS2::iterations, self.iterations)?;
        view.set_ulong(CK_PKCS5_PBKD2_PARAMS2::prf, self.prf)?;
        view.set_ptr(CK_PKCS5_PBKD2_PARAMS2::pPassword, password);
        Ok(())
    }

    pub(crate) fn marshal_v1(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_PKCS5_PBKD2_PARAMS::DEF, profile)?;
        self.fill(&mut b)?;
        let mut len = UnmanagedBuffer::new(profile.word.size())?;
        profile.word.write(
            CK_ULONG::try_from(self.password.len())?,
            len.as_mut_slice(),
        )?;
        b.view().set_ptr(
            CK_PKCS5_PBKD2_PARAMS::ulPasswordLen,
            len.as_ptr() as *const _,
        );
        Ok(b.finish(ReadBack::Nothing).with_buffer(len))
    }

    pub(crate) fn marshal_v2(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_PKCS5_PBKD2_PARAMS2::DEF, profile)?;
        self.fill(&mut b)?;
        b.view().set_ulong(
            CK_PKCS5_PBKD2_PARAMS2::ulPasswordLen,
            CK_ULONG::try_from(self.password.len())?,
        )?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{fail_allocation_after, AllocationStats};

    #[test]
    fn pbkdf2_password_length_pointer() {
        let params = Pbkdf2Params::new(
            b"secret",
            b"NaCl",
            1000,
            CKP_PKCS5_PBKD2_HMAC_SHA256,
        );
        let profile = PlatformProfile::W8_PACKED;
        let m = params.marshal_v1(profile).unwrap();
        /* struct, salt, password, length */
        assert_eq!(m.allocations(), 4);
        let (ptr, _) = m.ptr().unwrap();
        let layout = CK_PKCS5_PBKD2_PARAMS::DEF.layout(profile);
        let view = unsafe {
            pkcs11::layout::StructView::from_raw(layout, ptr as *const u8)
        };
        let lenp = view.ptr(CK_PKCS5_PBKD2_PARAMS::ulPasswordLen);
        let raw =
            unsafe { std::slice::from_raw_parts(lenp as *const u8, 8) };
        assert_eq!(profile.word.read(raw), 6);

        let m2 = params.marshal_v2(profile).unwrap();
        assert_eq!(m2.allocations(), 3);
    }

    #[test]
    fn failure_rolls_back() {
        let params = HkdfParams {
            extract: true,
            expand: true,
            prf_hash_mechanism: CKM_SHA256,
            salt: HkdfSalt::Data(vec![1u8; 16]),
            info: b"info".to_vec(),
        };
        let start = AllocationStats::current();
        /* fail on the info buffer, after struct and salt */
        fail_allocation_after(Some(2));
        assert!(params.marshal(PlatformProfile::W4).is_err());
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);
        fail_allocation_after(None);
        assert_eq!(
            params.marshal(PlatformProfile::W4).unwrap().allocations(),
            3
        );
    }
}
