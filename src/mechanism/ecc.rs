// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::mechanism::{MarshaledParams, ParamsBuilder, ReadBack};

use pkcs11::structs::*;
use pkcs11::*;

/// `CK_ECDH1_DERIVE_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ecdh1DeriveParams {
    pub kdf: CK_EC_KDF_TYPE,
    pub shared_data: Vec<u8>,
    pub public_data: Vec<u8>,
}

impl Ecdh1DeriveParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_ECDH1_DERIVE_PARAMS::DEF, profile)?;
        b.set_data(
            CK_ECDH1_DERIVE_PARAMS::pSharedData,
            CK_ECDH1_DERIVE_PARAMS::ulSharedDataLen,
            &self.shared_data,
        )?;
        b.set_data(
            CK_ECDH1_DERIVE_PARAMS::pPublicData,
            CK_ECDH1_DERIVE_PARAMS::ulPublicDataLen,
            &self.public_data,
        )?;
        b.view().set_ulong(CK_ECDH1_DERIVE_PARAMS::kdf, self.kdf)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_X9_42_DH1_DERIVE_PARAMS`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct X942Dh1DeriveParams {
    pub kdf: CK_X9_42_DH_KDF_TYPE,
    pub other_info: Vec<u8>,
    pub public_data: Vec<u8>,
}

impl X942Dh1DeriveParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b =
            ParamsBuilder::new(&CK_X9_42_DH1_DERIVE_PARAMS::DEF, profile)?;
        b.set_data(
            CK_X9_42_DH1_DERIVE_PARAMS::pOtherInfo,
            CK_X9_42_DH1_DERIVE_PARAMS::ulOtherInfoLen,
            &self.other_info,
        )?;
        b.set_data(
            CK_X9_42_DH1_DERIVE_PARAMS::pPublicData,
            CK_X9_42_DH1_DERIVE_PARAMS::ulPublicDataLen,
            &self.public_data,
        )?;
        b.view().set_ulong(CK_X9_42_DH1_DERIVE_PARAMS::kdf, self.kdf)?;
        Ok(b.finish(ReadBack::Nothing))
    }
}

/// `CK_EDDSA_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EddsaParams {
    pub ph_flag: bool,
    pub context_data: Vec<u8>,
}

impl EddsaParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_EDDSA_PARAMS::DEF, profile)?;
        b.set_data(
            CK_EDDSA_PARAMS::pContextData,
            CK_EDDSA_PARAMS::ulContextDataLen,
            &self.context_data,
        )?;
        b.view().set_byte(
            CK_EDDSA_PARAMS::phFlag,
            if self.ph_flag { CK_TRUE } else { CK_FALSE },
        );
        Ok(b.finish(ReadBack::Nothing))
    }
}
