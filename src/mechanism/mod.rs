// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Mechanisms and the marshaling of their parameters
//!
//! A [Mechanism] carries its parameters as plain Rust values
//! ([MechanismParams]), which own no native memory. Before a call the
//! parameters are marshaled for the profile of the module into a
//! [MarshaledParams], which owns every unmanaged buffer the native
//! structure points to until it is disposed or dropped. Parameters the
//! module writes back into (the negotiated TLS version, PRF output, key
//! material) are read through accessors of [MarshaledParams].

use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::memory::{StructBuffer, UnmanagedBuffer};
use crate::types::Version;

use log::trace;

use pkcs11::layout::{StructDef, StructView};
use pkcs11::structs::CK_MECHANISM;
use pkcs11::*;

mod aes;
mod ecc;
mod kdf;
mod rsa;
mod tls;

pub use aes::*;
pub use ecc::*;
pub use kdf::*;
pub use rsa::*;
pub use tls::*;

/// Parameters of a mechanism, one variant per parameter structure
#[derive(Clone, Debug, PartialEq)]
pub enum MechanismParams {
    None,
    /// A single `CK_ULONG`, for example a MAC length
    Ulong(CK_ULONG),
    /// An opaque byte string, for example a CBC IV
    Bytes(Vec<u8>),
    RsaOaep(RsaOaepParams),
    RsaPss(RsaPssParams),
    KeyWrapSetOaep(KeyWrapSetOaepParams),
    AesCtr(AesCtrParams),
    Gcm(GcmParams),
    Ccm(CcmParams),
    AesCbcEncryptData(AesCbcEncryptDataParams),
    DesCbcEncryptData(DesCbcEncryptDataParams),
    Rc2Cbc(Rc2CbcParams),
    KeyDerivationString(KeyDerivationStringData),
    Ecdh1Derive(Ecdh1DeriveParams),
    X942Dh1Derive(X942Dh1DeriveParams),
    Eddsa(EddsaParams),
    Hkdf(HkdfParams),
    /// `CK_PKCS5_PBKD2_PARAMS`, the password length is passed by pointer
    Pbkdf2(Pbkdf2Params),
    /// `CK_PKCS5_PBKD2_PARAMS2`
    Pbkdf2V2(Pbkdf2Params),
    Ssl3MasterKeyDerive(Ssl3MasterKeyDeriveParams),
    Tls12MasterKeyDerive(Tls12MasterKeyDeriveParams),
    Ssl3KeyMat(Ssl3KeyMatParams),
    Tls12KeyMat(Tls12KeyMatParams),
    WtlsKeyMat(WtlsKeyMatParams),
    TlsPrf(TlsPrfParams),
}

impl MechanismParams {
    pub fn marshal(&self, profile: PlatformProfile) -> Result<MarshaledParams> {
        match self {
            MechanismParams::None => Ok(MarshaledParams::new(
                profile,
                Block::Empty,
                Vec::new(),
                ReadBack::Nothing,
            )),
            MechanismParams::Ulong(v) => {
                let mut buf = UnmanagedBuffer::new(profile.word.size())?;
                profile.word.write(*v, buf.as_mut_slice())?;
                Ok(MarshaledParams::new(
                    profile,
                    Block::Raw(buf),
                    Vec::new(),
                    ReadBack::Nothing,
                ))
            }
            MechanismParams::Bytes(b) => {
                let block = if b.is_empty() {
                    Block::Empty
                } else {
                    Block::Raw(UnmanagedBuffer::from_slice(b)?)
                };
                Ok(MarshaledParams::new(
                    profile,
                    block,
                    Vec::new(),
                    ReadBack::Nothing,
                ))
            }
            MechanismParams::RsaOaep(p) => p.marshal(profile),
            MechanismParams::RsaPss(p) => p.marshal(profile),
            MechanismParams::KeyWrapSetOaep(p) => p.marshal(profile),
            MechanismParams::AesCtr(p) => p.marshal(profile),
            MechanismParams::Gcm(p) => p.marshal(profile),
            MechanismParams::Ccm(p) => p.marshal(profile),
            MechanismParams::AesCbcEncryptData(p) => p.marshal(profile),
            MechanismParams::DesCbcEncryptData(p) => p.marshal(profile),
            MechanismParams::Rc2Cbc(p) => p.marshal(profile),
            MechanismParams::KeyDerivationString(p) => p.marshal(profile),
            MechanismParams::Ecdh1Derive(p) => p.marshal(profile),
            MechanismParams::X942Dh1Derive(p) => p.marshal(profile),
            MechanismParams::Eddsa(p) => p.marshal(profile),
            MechanismParams::Hkdf(p) => p.marshal(profile),
            MechanismParams::Pbkdf2(p) => p.marshal_v1(profile),
            MechanismParams::Pbkdf2V2(p) => p.marshal_v2(profile),
            MechanismParams::Ssl3MasterKeyDerive(p) => p.marshal(profile),
            MechanismParams::Tls12MasterKeyDerive(p) => p.marshal(profile),
            MechanismParams::Ssl3KeyMat(p) => p.marshal(profile),
            MechanismParams::Tls12KeyMat(p) => p.marshal(profile),
            MechanismParams::WtlsKeyMat(p) => p.marshal(profile),
            MechanismParams::TlsPrf(p) => p.marshal(profile),
        }
    }

    /// Whether the module writes results into these parameters, to be
    /// read back after the call
    pub fn writes_back(&self) -> bool {
        matches!(
            self,
            MechanismParams::Ssl3MasterKeyDerive(_)
                | MechanismParams::Tls12MasterKeyDerive(_)
                | MechanismParams::Ssl3KeyMat(_)
                | MechanismParams::Tls12KeyMat(_)
                | MechanismParams::WtlsKeyMat(_)
                | MechanismParams::TlsPrf(_)
        )
    }
}

/// Converts a size in bits to bytes, sizes must be whole bytes
pub(crate) fn bits_to_bytes(what: &str, bits: CK_ULONG) -> Result<usize> {
    if bits % 8 != 0 {
        return Err(Error::usage(format!(
            "{} of {} bits is not a multiple of 8",
            what, bits
        )));
    }
    Ok(usize::try_from(bits / 8)?)
}

/// Parameter structures made only of scalar fields, which can be read
/// back from their marshaled form
pub trait FlatParams: Sized {
    fn def() -> &'static StructDef;

    fn read<B: AsRef<[u8]>>(view: &StructView<B>) -> Self;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamsState {
    Live,
    Disposed,
}

/// The module's output region of a key material derivation
#[derive(Debug)]
pub struct KeyMatRegion {
    pub(crate) out: StructBuffer,
    pub(crate) ivs: [Option<UnmanagedBuffer>; 2],
}

impl KeyMatRegion {
    pub(crate) fn iv(&self, idx: usize) -> Option<&[u8]> {
        self.ivs[idx].as_ref().map(|b| b.as_slice())
    }
}

/// Who owns the key material output region
#[derive(Debug)]
pub enum OutputOwnership {
    /// Still owned by the parameters, freed with them
    NotYetRead(KeyMatRegion),
    /// Moved to the caller with the read result
    ReadAndTransferred,
}

#[derive(Debug)]
pub(crate) enum Block {
    Empty,
    Raw(UnmanagedBuffer),
    Struct(StructBuffer),
}

#[derive(Debug)]
pub(crate) enum ReadBack {
    Nothing,
    Version(UnmanagedBuffer),
    Prf {
        output: UnmanagedBuffer,
        len: UnmanagedBuffer,
    },
    KeyMat {
        ownership: OutputOwnership,
        field: usize,
        wtls: bool,
    },
}

/// Mechanism parameters laid out in unmanaged memory
#[derive(Debug)]
pub struct MarshaledParams {
    state: ParamsState,
    profile: PlatformProfile,
    block: Block,
    buffers: Vec<UnmanagedBuffer>,
    readback: ReadBack,
}

impl MarshaledParams {
    pub(crate) fn new(
        profile: PlatformProfile,
        block: Block,
        buffers: Vec<UnmanagedBuffer>,
        readback: ReadBack,
    ) -> MarshaledParams {
        MarshaledParams {
            state: ParamsState::Live,
            profile: profile,
            block: block,
            buffers: buffers,
            readback: readback,
        }
    }

    /// Adds a buffer the structure points to
    pub(crate) fn with_buffer(mut self, buf: UnmanagedBuffer) -> Self {
        self.buffers.push(buf);
        self
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    pub fn state(&self) -> ParamsState {
        self.state
    }

    fn check_live(&self) -> Result<()> {
        match self.state {
            ParamsState::Live => Ok(()),
            ParamsState::Disposed => {
                Err(Error::disposed("mechanism parameters"))
            }
        }
    }

    /// The `pParameter`, `ulParameterLen` pair to hand to the module
    pub fn ptr(&self) -> Result<(*mut c_void, CK_ULONG)> {
        self.check_live()?;
        let (ptr, len) = match self.block {
            Block::Empty => return Ok((std::ptr::null_mut(), 0)),
            Block::Raw(ref b) => (b.as_ptr(), b.len()),
            Block::Struct(ref s) => (s.as_ptr(), s.len()),
        };
        Ok((ptr as *mut c_void, CK_ULONG::try_from(len)?))
    }

    /// The parameter block as the module sees it
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.check_live()?;
        Ok(match self.block {
            Block::Empty => &[],
            Block::Raw(ref b) => b.as_slice(),
            Block::Struct(ref s) => s.as_slice(),
        })
    }

    /// Releases all unmanaged memory, further use is an error
    pub fn dispose(&mut self) {
        if self.state == ParamsState::Disposed {
            return;
        }
        self.block = Block::Empty;
        self.buffers.clear();
        self.readback = ReadBack::Nothing;
        self.state = ParamsState::Disposed;
    }

    /// Number of unmanaged allocations currently owned
    pub fn allocations(&self) -> usize {
        let block = match self.block {
            Block::Empty => 0,
            _ => 1,
        };
        let readback = match self.readback {
            ReadBack::Nothing => 0,
            ReadBack::Version(_) => 1,
            ReadBack::Prf { .. } => 2,
            ReadBack::KeyMat {
                ownership: OutputOwnership::NotYetRead(ref r),
                ..
            } => 1 + r.ivs.iter().filter(|i| i.is_some()).count(),
            ReadBack::KeyMat { .. } => 0,
        };
        block + self.buffers.len() + readback
    }

    fn struct_view(&self) -> Result<StructView<&[u8]>> {
        match self.block {
            Block::Struct(ref s) => Ok(s.view()),
            _ => Err(Error::usage(
                "parameters are not a structure".to_string(),
            )),
        }
    }

    /// The protocol version the module negotiated in a master key
    /// derivation
    pub fn version(&self) -> Result<Version> {
        self.check_live()?;
        match self.readback {
            ReadBack::Version(ref v) => {
                let raw = v.as_slice();
                Ok(Version::new(raw[0], raw[1]))
            }
            _ => Err(Error::usage(
                "parameters carry no version output".to_string(),
            )),
        }
    }

    /// The output of a `CKM_TLS_PRF` derivation
    pub fn prf_output(&self) -> Result<Vec<u8>> {
        self.check_live()?;
        match self.readback {
            ReadBack::Prf { ref output, ref len } => {
                let len = self.profile.word.read(len.as_slice());
                let len = usize::try_from(len)?;
                if len > output.len() {
                    return Err(Error::usage(format!(
                        "module reported {} bytes of PRF output, {} available",
                        len,
                        output.len()
                    )));
                }
                Ok(output.as_slice()[..len].to_vec())
            }
            _ => Err(Error::usage(
                "parameters carry no PRF output".to_string(),
            )),
        }
    }

    fn take_region(&mut self, want_wtls: bool) -> Result<KeyMatRegion> {
        self.check_live()?;
        let (region, field) = match self.readback {
            ReadBack::KeyMat {
                ref mut ownership,
                field,
                wtls,
            } if wtls == want_wtls => {
                match std::mem::replace(
                    ownership,
                    OutputOwnership::ReadAndTransferred,
                ) {
                    OutputOwnership::NotYetRead(r) => (r, field),
                    OutputOwnership::ReadAndTransferred => {
                        return Err(Error::usage(
                            "key material was already read".to_string(),
                        ))
                    }
                }
            }
            _ => {
                return Err(Error::usage(
                    "parameters carry no such key material output"
                        .to_string(),
                ))
            }
        };
        /* the region now belongs to the caller, do not leave a pointer
         * to it behind */
        if let Block::Struct(ref mut s) = self.block {
            s.view_mut().set_ptr(field, std::ptr::null());
        }
        Ok(region)
    }

    /// Reads the SSL3/TLS key material output, only once
    pub fn take_key_material(&mut self) -> Result<KeyMatOutput> {
        let region = self.take_region(false)?;
        Ok(KeyMatOutput::from_region(region))
    }

    /// Reads the WTLS key material output, only once
    pub fn take_wtls_key_material(&mut self) -> Result<WtlsKeyMatOutput> {
        let region = self.take_region(true)?;
        Ok(WtlsKeyMatOutput::from_region(region))
    }

    /// Reads back the scalar fields of flat parameters
    pub fn unmarshal<T: FlatParams>(&self) -> Result<T> {
        self.check_live()?;
        let view = self.struct_view()?;
        if !std::ptr::eq(view.layout().def(), T::def()) {
            return Err(Error::usage(format!(
                "parameters hold a {}, not a {}",
                view.layout().def().name,
                T::def().name
            )));
        }
        Ok(T::read(&view))
    }

    /// Reads back a single `CK_ULONG` parameter
    pub fn unmarshal_ulong(&self) -> Result<CK_ULONG> {
        self.check_live()?;
        match self.block {
            Block::Raw(ref b) if b.len() == self.profile.word.size() => {
                Ok(self.profile.word.read(b.as_slice()))
            }
            _ => Err(Error::usage(
                "parameters are not a CK_ULONG".to_string(),
            )),
        }
    }
}

/// Collects the buffers of a parameter structure while it is filled in;
/// anything allocated is released if marshaling fails part way
pub(crate) struct ParamsBuilder {
    profile: PlatformProfile,
    block: StructBuffer,
    buffers: Vec<UnmanagedBuffer>,
}

impl ParamsBuilder {
    pub(crate) fn new(
        def: &'static StructDef,
        profile: PlatformProfile,
    ) -> Result<ParamsBuilder> {
        Ok(ParamsBuilder {
            profile: profile,
            block: StructBuffer::new(def, profile)?,
            buffers: Vec::new(),
        })
    }

    /// Copies `data` into a new buffer, NULL for empty data
    pub(crate) fn data(&mut self, data: &[u8]) -> Result<*const c_void> {
        if data.is_empty() {
            return Ok(std::ptr::null());
        }
        let buf = UnmanagedBuffer::from_slice(data)?;
        let ptr = buf.as_ptr() as *const c_void;
        self.buffers.push(buf);
        Ok(ptr)
    }

    /// Sets a pointer and length field pair to a copy of `data`
    pub(crate) fn set_data(
        &mut self,
        ptr_field: usize,
        len_field: usize,
        data: &[u8],
    ) -> Result<()> {
        let ptr = self.data(data)?;
        let mut view = self.view();
        view.set_ptr(ptr_field, ptr);
        view.set_ulong(len_field, CK_ULONG::try_from(data.len())?)?;
        Ok(())
    }

    pub(crate) fn view(&mut self) -> StructView<&mut [u8]> {
        self.block.view_mut()
    }

    pub(crate) fn finish(self, readback: ReadBack) -> MarshaledParams {
        MarshaledParams::new(
            self.profile,
            Block::Struct(self.block),
            self.buffers,
            readback,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mechanism {
    pub mechanism: CK_MECHANISM_TYPE,
    pub params: MechanismParams,
}

impl Mechanism {
    pub fn new(mechanism: CK_MECHANISM_TYPE) -> Mechanism {
        Mechanism {
            mechanism: mechanism,
            params: MechanismParams::None,
        }
    }

    pub fn with_params(
        mechanism: CK_MECHANISM_TYPE,
        params: MechanismParams,
    ) -> Mechanism {
        Mechanism {
            mechanism: mechanism,
            params: params,
        }
    }

    pub fn name(&self) -> &'static str {
        mech_name(self.mechanism)
    }

    pub fn marshal(
        &self,
        profile: PlatformProfile,
    ) -> Result<MarshaledMechanism> {
        let params = self.params.marshal(profile)?;
        MarshaledMechanism::from_params(self.mechanism, params)
    }
}

/// A `CK_MECHANISM` in unmanaged memory with its marshaled parameters
#[derive(Debug)]
pub struct MarshaledMechanism {
    mechanism: CK_MECHANISM_TYPE,
    block: StructBuffer,
    params: MarshaledParams,
}

impl MarshaledMechanism {
    pub fn from_params(
        mechanism: CK_MECHANISM_TYPE,
        params: MarshaledParams,
    ) -> Result<MarshaledMechanism> {
        let (ptr, len) = params.ptr()?;
        trace!(
            "{} parameters for {}: {}",
            mech_name(mechanism),
            params.profile,
            hex::encode(params.as_bytes()?)
        );
        let mut block = StructBuffer::new(&CK_MECHANISM::DEF, params.profile)?;
        let mut view = block.view_mut();
        view.set_ulong(CK_MECHANISM::mechanism, mechanism)?;
        view.set_ptr(CK_MECHANISM::pParameter, ptr);
        view.set_ulong(CK_MECHANISM::ulParameterLen, len)?;
        Ok(MarshaledMechanism {
            mechanism: mechanism,
            block: block,
            params: params,
        })
    }

    pub fn mechanism(&self) -> CK_MECHANISM_TYPE {
        self.mechanism
    }

    pub fn profile(&self) -> PlatformProfile {
        self.params.profile
    }

    /// Address of the `CK_MECHANISM`, fails once the parameters are
    /// disposed
    pub fn as_ptr(&self) -> Result<*mut u8> {
        self.params.check_live()?;
        Ok(self.block.as_ptr())
    }

    pub fn params(&self) -> &MarshaledParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut MarshaledParams {
        &mut self.params
    }

    pub fn into_params(self) -> MarshaledParams {
        self.params
    }
}
