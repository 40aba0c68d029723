// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! SSL3, TLS and WTLS derivation parameters
//!
//! These are the parameters the module writes back into: the master key
//! derivations return the negotiated protocol version, the key material
//! derivations fill an output structure with object handles and IVs, and
//! the PRF returns its output and length.

use crate::error::Result;
use crate::memory::{StructBuffer, UnmanagedBuffer};
use crate::mechanism::{
    bits_to_bytes, KeyMatRegion, MarshaledParams, OutputOwnership,
    ParamsBuilder, ReadBack,
};

use pkcs11::layout::StructDef;
use pkcs11::structs::*;
use pkcs11::*;

/// Client and server random values, `CK_SSL3_RANDOM_DATA` or
/// `CK_WTLS_RANDOM_DATA`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RandomData {
    pub client_random: Vec<u8>,
    pub server_random: Vec<u8>,
}

impl RandomData {
    /* both random data structures share the same field order */
    fn fill(&self, b: &mut ParamsBuilder, field: usize) -> Result<()> {
        let client = b.data(&self.client_random)?;
        let server = b.data(&self.server_random)?;
        let mut view = b.view();
        let mut random = view.nested_mut(field);
        random.set_ptr(CK_SSL3_RANDOM_DATA::pClientRandom, client);
        random.set_ulong(
            CK_SSL3_RANDOM_DATA::ulClientRandomLen,
            CK_ULONG::try_from(self.client_random.len())?,
        )?;
        random.set_ptr(CK_SSL3_RANDOM_DATA::pServerRandom, server);
        random.set_ulong(
            CK_SSL3_RANDOM_DATA::ulServerRandomLen,
            CK_ULONG::try_from(self.server_random.len())?,
        )?;
        Ok(())
    }
}

fn marshal_master_key(
    def: &'static StructDef,
    profile: PlatformProfile,
    random: &RandomData,
    prf: Option<CK_MECHANISM_TYPE>,
) -> Result<MarshaledParams> {
    let mut b = ParamsBuilder::new(def, profile)?;
    /* TLS 1.2 extends the SSL3 structure, the shared fields match */
    random.fill(&mut b, CK_SSL3_MASTER_KEY_DERIVE_PARAMS::RandomInfo)?;
    let version = UnmanagedBuffer::new(CK_VERSION::DEF.size(profile))?;
    let mut view = b.view();
    view.set_ptr(
        CK_SSL3_MASTER_KEY_DERIVE_PARAMS::pVersion,
        version.as_ptr() as *const _,
    );
    if let Some(mech) = prf {
        view.set_ulong(
            CK_TLS12_MASTER_KEY_DERIVE_PARAMS::prfHashMechanism,
            mech,
        )?;
    }
    Ok(b.finish(ReadBack::Version(version)))
}

/// `CK_SSL3_MASTER_KEY_DERIVE_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ssl3MasterKeyDeriveParams {
    pub random: RandomData,
}

impl Ssl3MasterKeyDeriveParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        marshal_master_key(
            &CK_SSL3_MASTER_KEY_DERIVE_PARAMS::DEF,
            profile,
            &self.random,
            None,
        )
    }
}

/// `CK_TLS12_MASTER_KEY_DERIVE_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tls12MasterKeyDeriveParams {
    pub random: RandomData,
    pub prf_hash_mechanism: CK_MECHANISM_TYPE,
}

impl Tls12MasterKeyDeriveParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        marshal_master_key(
            &CK_TLS12_MASTER_KEY_DERIVE_PARAMS::DEF,
            profile,
            &self.random,
            Some(self.prf_hash_mechanism),
        )
    }
}

impl KeyMatRegion {
    /// Allocates the output structure and `ivs` IV buffers of `iv_len`
    /// bytes each, pointed to by the `iv_fields` of the structure. With
    /// a zero IV length no IV buffer exists and the pointers stay NULL.
    fn new(
        def: &'static StructDef,
        profile: PlatformProfile,
        iv_len: usize,
        iv_fields: &[usize],
    ) -> Result<KeyMatRegion> {
        let mut out = StructBuffer::new(def, profile)?;
        let mut ivs = [None, None];
        if iv_len > 0 {
            for (slot, field) in ivs.iter_mut().zip(iv_fields) {
                let iv = UnmanagedBuffer::new(iv_len)?;
                out.view_mut().set_ptr(*field, iv.as_ptr() as *const _);
                *slot = Some(iv);
            }
        }
        Ok(KeyMatRegion { out: out, ivs: ivs })
    }
}

struct KeyMatSizes {
    mac_bits: CK_ULONG,
    key_bits: CK_ULONG,
    iv_bits: CK_ULONG,
}

impl KeyMatSizes {
    /// Checks every size before anything is allocated, returns the IV
    /// length in bytes
    fn iv_len(&self) -> Result<usize> {
        bits_to_bytes("MAC size", self.mac_bits)?;
        bits_to_bytes("key size", self.key_bits)?;
        bits_to_bytes("IV size", self.iv_bits)
    }
}

fn marshal_ssl3_key_mat(
    def: &'static StructDef,
    profile: PlatformProfile,
    sizes: KeyMatSizes,
    is_export: bool,
    random: &RandomData,
    prf: Option<CK_MECHANISM_TYPE>,
) -> Result<MarshaledParams> {
    let iv_len = sizes.iv_len()?;
    let mut b = ParamsBuilder::new(def, profile)?;
    random.fill(&mut b, CK_SSL3_KEY_MAT_PARAMS::RandomInfo)?;
    let region = KeyMatRegion::new(
        &CK_SSL3_KEY_MAT_OUT::DEF,
        profile,
        iv_len,
        &[CK_SSL3_KEY_MAT_OUT::pIVClient, CK_SSL3_KEY_MAT_OUT::pIVServer],
    )?;
    let mut view = b.view();
    view.set_ulong(CK_SSL3_KEY_MAT_PARAMS::ulMacSizeInBits, sizes.mac_bits)?;
    view.set_ulong(CK_SSL3_KEY_MAT_PARAMS::ulKeySizeInBits, sizes.key_bits)?;
    view.set_ulong(CK_SSL3_KEY_MAT_PARAMS::ulIVSizeInBits, sizes.iv_bits)?;
    view.set_byte(CK_SSL3_KEY_MAT_PARAMS::bIsExport, is_export as u8);
    view.set_ptr(
        CK_SSL3_KEY_MAT_PARAMS::pReturnedKeyMaterial,
        region.out.as_ptr() as *const _,
    );
    if let Some(mech) = prf {
        view.set_ulong(CK_TLS12_KEY_MAT_PARAMS::prfHashMechanism, mech)?;
    }
    Ok(b.finish(ReadBack::KeyMat {
        ownership: OutputOwnership::NotYetRead(region),
        field: CK_SSL3_KEY_MAT_PARAMS::pReturnedKeyMaterial,
        wtls: false,
    }))
}

/// `CK_SSL3_KEY_MAT_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ssl3KeyMatParams {
    pub mac_size_bits: CK_ULONG,
    pub key_size_bits: CK_ULONG,
    pub iv_size_bits: CK_ULONG,
    pub is_export: bool,
    pub random: RandomData,
}

impl Ssl3KeyMatParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        marshal_ssl3_key_mat(
            &CK_SSL3_KEY_MAT_PARAMS::DEF,
            profile,
            KeyMatSizes {
                mac_bits: self.mac_size_bits,
                key_bits: self.key_size_bits,
                iv_bits: self.iv_size_bits,
            },
            self.is_export,
            &self.random,
            None,
        )
    }
}

/// `CK_TLS12_KEY_MAT_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tls12KeyMatParams {
    pub mac_size_bits: CK_ULONG,
    pub key_size_bits: CK_ULONG,
    pub iv_size_bits: CK_ULONG,
    pub is_export: bool,
    pub random: RandomData,
    pub prf_hash_mechanism: CK_MECHANISM_TYPE,
}

impl Tls12KeyMatParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        marshal_ssl3_key_mat(
            &CK_TLS12_KEY_MAT_PARAMS::DEF,
            profile,
            KeyMatSizes {
                mac_bits: self.mac_size_bits,
                key_bits: self.key_size_bits,
                iv_bits: self.iv_size_bits,
            },
            self.is_export,
            &self.random,
            Some(self.prf_hash_mechanism),
        )
    }
}

/// `CK_WTLS_KEY_MAT_PARAMS`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WtlsKeyMatParams {
    pub digest_mechanism: CK_MECHANISM_TYPE,
    pub mac_size_bits: CK_ULONG,
    pub key_size_bits: CK_ULONG,
    pub iv_size_bits: CK_ULONG,
    pub sequence_number: CK_ULONG,
    pub is_export: bool,
    pub random: RandomData,
}

impl WtlsKeyMatParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let iv_len = KeyMatSizes {
            mac_bits: self.mac_size_bits,
            key_bits: self.key_size_bits,
            iv_bits: self.iv_size_bits,
        }
        .iv_len()?;
        let mut b = ParamsBuilder::new(&CK_WTLS_KEY_MAT_PARAMS::DEF, profile)?;
        self.random
            .fill(&mut b, CK_WTLS_KEY_MAT_PARAMS::RandomInfo)?;
        let region = KeyMatRegion::new(
            &CK_WTLS_KEY_MAT_OUT::DEF,
            profile,
            iv_len,
            &[CK_WTLS_KEY_MAT_OUT::pIV],
        )?;
        let mut view = b.view();
        view.set_ulong(
            CK_WTLS_KEY_MAT_PARAMS::DigestMechanism,
            self.digest_mechanism,
        )?;
        view.set_ulong(
            CK_WTLS_KEY_MAT_PARAMS::ulMacSizeInBits,
            self.mac_size_bits,
        )?;
        view.set_ulong(
            CK_WTLS_KEY_MAT_PARAMS::ulKeySizeInBits,
            self.key_size_bits,
        )?;
        view.set_ulong(
            CK_WTLS_KEY_MAT_PARAMS::ulIVSizeInBits,
            self.iv_size_bits,
        )?;
        view.set_ulong(
            CK_WTLS_KEY_MAT_PARAMS::ulSequenceNumber,
            self.sequence_number,
        )?;
        view.set_byte(CK_WTLS_KEY_MAT_PARAMS::bIsExport, self.is_export as u8);
        view.set_ptr(
            CK_WTLS_KEY_MAT_PARAMS::pReturnedKeyMaterial,
            region.out.as_ptr() as *const _,
        );
        Ok(b.finish(ReadBack::KeyMat {
            ownership: OutputOwnership::NotYetRead(region),
            field: CK_WTLS_KEY_MAT_PARAMS::pReturnedKeyMaterial,
            wtls: true,
        }))
    }
}

/// `CK_TLS_PRF_PARAMS`, `output_len` bytes of output are requested
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlsPrfParams {
    pub seed: Vec<u8>,
    pub label: Vec<u8>,
    pub output_len: usize,
}

impl TlsPrfParams {
    pub(crate) fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledParams> {
        let mut b = ParamsBuilder::new(&CK_TLS_PRF_PARAMS::DEF, profile)?;
        b.set_data(
            CK_TLS_PRF_PARAMS::pSeed,
            CK_TLS_PRF_PARAMS::ulSeedLen,
            &self.seed,
        )?;
        b.set_data(
            CK_TLS_PRF_PARAMS::pLabel,
            CK_TLS_PRF_PARAMS::ulLabelLen,
            &self.label,
        )?;
        let output = UnmanagedBuffer::new(self.output_len)?;
        let mut len = UnmanagedBuffer::new(profile.word.size())?;
        profile
            .word
            .write(CK_ULONG::try_from(self.output_len)?, len.as_mut_slice())?;
        let mut view = b.view();
        view.set_ptr(CK_TLS_PRF_PARAMS::pOutput, output.as_ptr() as *const _);
        view.set_ptr(
            CK_TLS_PRF_PARAMS::pulOutputLen,
            len.as_ptr() as *const _,
        );
        Ok(b.finish(ReadBack::Prf {
            output: output,
            len: len,
        }))
    }
}

/// Handles and IVs returned by an SSL3 or TLS key material derivation.
/// The IV memory the module wrote into is owned by this value.
#[derive(Debug)]
pub struct KeyMatOutput {
    pub client_mac_secret: CK_OBJECT_HANDLE,
    pub server_mac_secret: CK_OBJECT_HANDLE,
    pub client_key: CK_OBJECT_HANDLE,
    pub server_key: CK_OBJECT_HANDLE,
    region: KeyMatRegion,
}

impl KeyMatOutput {
    pub(crate) fn from_region(region: KeyMatRegion) -> KeyMatOutput {
        let view = region.out.view();
        KeyMatOutput {
            client_mac_secret: view
                .ulong(CK_SSL3_KEY_MAT_OUT::hClientMacSecret),
            server_mac_secret: view
                .ulong(CK_SSL3_KEY_MAT_OUT::hServerMacSecret),
            client_key: view.ulong(CK_SSL3_KEY_MAT_OUT::hClientKey),
            server_key: view.ulong(CK_SSL3_KEY_MAT_OUT::hServerKey),
            region: region,
        }
    }

    pub fn iv_client(&self) -> Option<&[u8]> {
        self.region.iv(0)
    }

    pub fn iv_server(&self) -> Option<&[u8]> {
        self.region.iv(1)
    }
}

/// Handles and IV returned by a WTLS key material derivation
#[derive(Debug)]
pub struct WtlsKeyMatOutput {
    pub mac_secret: CK_OBJECT_HANDLE,
    pub key: CK_OBJECT_HANDLE,
    region: KeyMatRegion,
}

impl WtlsKeyMatOutput {
    pub(crate) fn from_region(region: KeyMatRegion) -> WtlsKeyMatOutput {
        let view = region.out.view();
        WtlsKeyMatOutput {
            mac_secret: view.ulong(CK_WTLS_KEY_MAT_OUT::hMacSecret),
            key: view.ulong(CK_WTLS_KEY_MAT_OUT::hKey),
            region: region,
        }
    }

    pub fn iv(&self) -> Option<&[u8]> {
        self.region.iv(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::AllocationStats;

    fn key_mat(iv_bits: CK_ULONG) -> Ssl3KeyMatParams {
        Ssl3KeyMatParams {
            mac_size_bits: 160,
            key_size_bits: 128,
            iv_size_bits: iv_bits,
            is_export: false,
            random: RandomData {
                client_random: vec![1u8; 32],
                server_random: vec![2u8; 32],
            },
        }
    }

    #[test]
    fn key_material_read_once() {
        let start = AllocationStats::current();
        let mut m = key_mat(128).marshal(PlatformProfile::W4).unwrap();
        /* struct, 2 randoms, output struct, 2 IVs */
        assert_eq!(m.allocations(), 6);
        let out = m.take_key_material().unwrap();
        assert_eq!(out.iv_client(), Some(&[0u8; 16][..]));
        assert_eq!(m.allocations(), 3);
        let err = m.take_key_material().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(m.take_wtls_key_material().is_err());
        m.dispose();
        /* the output still owns its region */
        assert_eq!(AllocationStats::current().outstanding_since(&start), 3);
        drop(out);
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);
    }

    #[test]
    fn zero_iv() {
        let mut m = key_mat(0).marshal(PlatformProfile::W8_PACKED).unwrap();
        assert_eq!(m.allocations(), 4);
        let out = m.take_key_material().unwrap();
        assert_eq!(out.iv_client(), None);
        assert_eq!(out.iv_server(), None);
    }

    #[test]
    fn partial_byte_iv_allocates_nothing() {
        let start = AllocationStats::current();
        let err = key_mat(13).marshal(PlatformProfile::W8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(AllocationStats::current().allocations, start.allocations);
    }

    #[test]
    fn master_key_version() {
        let params = Tls12MasterKeyDeriveParams {
            random: RandomData::default(),
            prf_hash_mechanism: CKM_SHA256,
        };
        let m = params.marshal(PlatformProfile::W4_PACKED).unwrap();
        assert_eq!(m.version().unwrap().major, 0);
        assert!(m.prf_output().is_err());
    }

    #[test]
    fn prf_output_length() {
        let params = TlsPrfParams {
            seed: b"seed".to_vec(),
            label: b"label".to_vec(),
            output_len: 12,
        };
        let m = params.marshal(PlatformProfile::W8).unwrap();
        assert_eq!(m.prf_output().unwrap(), vec![0u8; 12]);
    }
}
