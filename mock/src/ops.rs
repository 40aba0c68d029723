// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The cryptoki entry points of the mock module
//!
//! Every function is generic over the native word `W` and the structure
//! packing `P` of the caller, so one implementation serves the four
//! profiles. Cryptography is fake: ciphers XOR with the first key byte
//! and digests and MACs use [mock_digest].

use std::ffi::{c_void, CStr};

use crate::state::*;

use pkcs11::layout::{StructDef, StructLayout, StructView};
use pkcs11::profile::profile_of;
use pkcs11::structs::*;
use pkcs11::*;

/// Records the call, runs the body and turns its result into a native
/// return value
macro_rules! ck_entry {
    ($name:literal, $w:ty, $body:block) => {{
        lock().record_call($name);
        let result: MockResult<()> = (|| -> MockResult<()> { $body })();
        to_rv::<$w>(result)
    }};
}

fn to_rv<W: Word>(result: MockResult<()>) -> W {
    let rv = match result {
        Ok(()) => CKR_OK,
        Err(rv) => rv,
    };
    /* return values fit any width */
    W::narrow(rv).unwrap_or_default()
}

fn usize_of(value: CK_ULONG) -> MockResult<usize> {
    usize::try_from(value).map_err(|_| CKR_ARGUMENTS_BAD)
}

fn ulong_of(value: usize) -> MockResult<CK_ULONG> {
    CK_ULONG::try_from(value).map_err(|_| CKR_GENERAL_ERROR)
}

fn narrow<W: Word>(value: CK_ULONG) -> MockResult<W> {
    W::narrow(value).ok_or(CKR_GENERAL_ERROR)
}

unsafe fn read_word<W: Word>(ptr: *const W) -> MockResult<CK_ULONG> {
    if ptr.is_null() {
        return Err(CKR_ARGUMENTS_BAD);
    }
    Ok(ptr.read_unaligned().widen())
}

unsafe fn write_word<W: Word>(ptr: *mut W, value: CK_ULONG) -> MockResult<()> {
    if ptr.is_null() {
        return Err(CKR_ARGUMENTS_BAD);
    }
    ptr.write_unaligned(narrow::<W>(value)?);
    Ok(())
}

unsafe fn input_n<'a>(ptr: *const u8, len: usize) -> MockResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(CKR_ARGUMENTS_BAD);
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

unsafe fn input<'a, W: Word>(ptr: *const u8, len: W) -> MockResult<&'a [u8]> {
    input_n(ptr, usize_of(len.widen())?)
}

/* a NULL pin means the protected authentication path */
unsafe fn pin<'a, W: Word>(
    ptr: *const u8,
    len: W,
) -> MockResult<Option<&'a [u8]>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        Ok(Some(input(ptr, len)?))
    }
}

/// What happened to variable length output
#[derive(Debug, Eq, PartialEq)]
enum Output {
    /// Only the length was returned
    Length,
    Written,
}

unsafe fn output<W: Word>(
    data: &[u8],
    out: *mut u8,
    out_len: *mut W,
) -> MockResult<Output> {
    let needed = ulong_of(data.len())?;
    if out.is_null() {
        write_word(out_len, needed)?;
        return Ok(Output::Length);
    }
    let available = usize_of(read_word(out_len)?)?;
    write_word(out_len, needed)?;
    if available < data.len() {
        return Err(CKR_BUFFER_TOO_SMALL);
    }
    std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
    Ok(Output::Written)
}

unsafe fn output_list<W: Word>(
    items: &[CK_ULONG],
    list: *mut W,
    count: *mut W,
) -> MockResult<()> {
    let n = ulong_of(items.len())?;
    if list.is_null() {
        return write_word(count, n);
    }
    let available = usize_of(read_word(count)?)?;
    write_word(count, n)?;
    if available < items.len() {
        return Err(CKR_BUFFER_TOO_SMALL);
    }
    for (i, item) in items.iter().enumerate() {
        list.add(i).write_unaligned(narrow::<W>(*item)?);
    }
    Ok(())
}

/* A single part operation ends unless only the length was asked for or
 * the buffer was too small */
fn single_part<T>(
    op: &mut Option<T>,
    result: MockResult<Output>,
) -> MockResult<()> {
    match result {
        Ok(Output::Length) | Err(CKR_BUFFER_TOO_SMALL) => (),
        _ => *op = None,
    }
    result.map(|_| ())
}

fn set_ulong<B: AsRef<[u8]> + AsMut<[u8]>>(
    view: &mut StructView<B>,
    field: usize,
    value: CK_ULONG,
) -> MockResult<()> {
    view.set_ulong(field, value).map_err(|_| CKR_GENERAL_ERROR)
}

fn set_bytes<B: AsRef<[u8]> + AsMut<[u8]>>(
    view: &mut StructView<B>,
    field: usize,
    value: &[u8],
) -> MockResult<()> {
    view.set_bytes(field, value).map_err(|_| CKR_GENERAL_ERROR)
}

fn set_version<B: AsRef<[u8]> + AsMut<[u8]>>(
    view: &mut StructView<B>,
    field: usize,
    major: u8,
    minor: u8,
) {
    let mut version = view.nested_mut(field);
    version.set_byte(CK_VERSION::major, major);
    version.set_byte(CK_VERSION::minor, minor);
}

unsafe fn out_struct<'a>(
    def: &'static StructDef,
    profile: PlatformProfile,
    ptr: *mut u8,
) -> MockResult<StructView<&'a mut [u8]>> {
    if ptr.is_null() {
        return Err(CKR_ARGUMENTS_BAD);
    }
    Ok(StructView::from_raw_mut(def.layout(profile), ptr))
}

/* Pointer and length fields of a parameter structure */
unsafe fn param_data<'a, B: AsRef<[u8]>>(
    view: &StructView<B>,
    ptr_field: usize,
    len_field: usize,
) -> MockResult<&'a [u8]> {
    let len = usize_of(view.ulong(len_field))
        .map_err(|_| CKR_MECHANISM_PARAM_INVALID)?;
    input_n(view.ptr(ptr_field) as *const u8, len)
        .map_err(|_| CKR_MECHANISM_PARAM_INVALID)
}

fn attribute_layout(profile: PlatformProfile) -> StructLayout {
    CK_ATTRIBUTE::DEF.layout(profile)
}

unsafe fn read_attributes(
    profile: PlatformProfile,
    ptr: *const u8,
    count: usize,
) -> MockResult<StoredTemplate> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(CKR_ARGUMENTS_BAD);
    }
    let layout = attribute_layout(profile);
    let mut attrs = Vec::with_capacity(count);
    for i in 0..count {
        let view = StructView::from_raw(layout, ptr.add(i * layout.size()));
        let t = view.ulong(CK_ATTRIBUTE::type_);
        let len = usize_of(view.ulong(CK_ATTRIBUTE::ulValueLen))?;
        let value = view.ptr(CK_ATTRIBUTE::pValue) as *const u8;
        let stored = if is_template_attribute(t) {
            if len % layout.size() != 0 {
                return Err(CKR_ATTRIBUTE_VALUE_INVALID);
            }
            StoredValue::Template(read_attributes(
                profile,
                value,
                len / layout.size(),
            )?)
        } else {
            StoredValue::Raw(input_n(value, len)?.to_vec())
        };
        attrs.push((t, stored));
    }
    Ok(attrs)
}

unsafe fn read_template<W: Word, P: Packing>(
    ptr: *const u8,
    count: W,
) -> MockResult<StoredTemplate> {
    read_attributes(profile_of::<W, P>(), ptr, usize_of(count.widen())?)
}

/* Nested templates come back as CK_ATTRIBUTE entries with types and
 * lengths only */
fn encode_value(
    profile: PlatformProfile,
    value: &StoredValue,
) -> MockResult<Vec<u8>> {
    let template = match value {
        StoredValue::Raw(r) => return Ok(r.clone()),
        StoredValue::Template(t) => t,
    };
    let layout = attribute_layout(profile);
    let size = layout.size();
    let mut out = vec![0u8; size * template.len()];
    for (chunk, (t, inner)) in out.chunks_mut(size).zip(template.iter()) {
        let len = encode_value(profile, inner)?.len();
        let mut view =
            StructView::new(layout, chunk).map_err(|_| CKR_GENERAL_ERROR)?;
        set_ulong(&mut view, CK_ATTRIBUTE::type_, *t)?;
        view.set_ptr(CK_ATTRIBUTE::pValue, std::ptr::null());
        set_ulong(&mut view, CK_ATTRIBUTE::ulValueLen, ulong_of(len)?)?;
    }
    Ok(out)
}

fn ulong_value(profile: PlatformProfile, value: CK_ULONG) -> StoredValue {
    let mut raw = vec![0u8; profile.word.size()];
    /* object classes and key types always fit */
    let _ = profile.word.write(value, &mut raw);
    StoredValue::Raw(raw)
}

fn read_ulong_attr(
    profile: PlatformProfile,
    template: &StoredTemplate,
    t: CK_ATTRIBUTE_TYPE,
) -> Option<CK_ULONG> {
    template.iter().find(|(a, _)| *a == t).and_then(|(_, v)| match v {
        StoredValue::Raw(r) if r.len() == profile.word.size() => {
            Some(profile.word.read(r))
        }
        _ => None,
    })
}

/// A key built from a template plus the attributes the module sets
fn new_key(
    profile: PlatformProfile,
    template: StoredTemplate,
    class: CK_OBJECT_CLASS,
    key_type: CK_KEY_TYPE,
    value: Vec<u8>,
) -> Object {
    let mut key = Object::new(template);
    if key.get(CKA_CLASS).is_none() {
        key.set(CKA_CLASS, ulong_value(profile, class));
    }
    if key.get(CKA_KEY_TYPE).is_none() {
        key.set(CKA_KEY_TYPE, ulong_value(profile, key_type));
    }
    key.set_raw(CKA_LOCAL, &[CK_TRUE]);
    key.set_raw(CKA_VALUE, &value);
    key
}

fn value_len(
    profile: PlatformProfile,
    template: &StoredTemplate,
    default: usize,
) -> MockResult<usize> {
    match read_ulong_attr(profile, template, CKA_VALUE_LEN) {
        Some(v) => usize_of(v).map_err(|_| CKR_ATTRIBUTE_VALUE_INVALID),
        None => Ok(default),
    }
}

/* stretches or cuts mock digests to the requested length */
fn expand(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block = mock_digest(seed);
    while out.len() < len {
        out.extend_from_slice(&block);
        block = mock_digest(&block);
    }
    out.truncate(len);
    out
}

struct MechanismSpec {
    mechanism: CK_MECHANISM_TYPE,
    min_key: CK_ULONG,
    max_key: CK_ULONG,
    flags: CK_FLAGS,
}

macro_rules! mech {
    ($m:ident, $min:expr, $max:expr, $flags:expr) => {
        MechanismSpec {
            mechanism: $m,
            min_key: $min,
            max_key: $max,
            flags: $flags,
        }
    };
}

static MECHANISMS: [MechanismSpec; 26] = [
    mech!(CKM_RSA_PKCS_KEY_PAIR_GEN, 1024, 4096, CKF_GENERATE_KEY_PAIR),
    mech!(
        CKM_RSA_X_509,
        1024,
        4096,
        CKF_ENCRYPT | CKF_DECRYPT | CKF_SIGN_RECOVER | CKF_VERIFY_RECOVER
    ),
    mech!(
        CKM_RSA_PKCS_OAEP,
        1024,
        4096,
        CKF_ENCRYPT | CKF_DECRYPT | CKF_WRAP | CKF_UNWRAP
    ),
    mech!(CKM_RSA_PKCS_PSS, 1024, 4096, CKF_SIGN | CKF_VERIFY),
    mech!(CKM_SHA256, 0, 0, CKF_DIGEST),
    mech!(CKM_SHA256_HMAC, 16, 64, CKF_SIGN | CKF_VERIFY),
    mech!(CKM_GENERIC_SECRET_KEY_GEN, 1, 512, CKF_GENERATE),
    mech!(CKM_CONCATENATE_BASE_AND_DATA, 0, 0, CKF_DERIVE),
    mech!(CKM_SSL3_MASTER_KEY_DERIVE, 48, 48, CKF_DERIVE),
    mech!(CKM_SSL3_KEY_AND_MAC_DERIVE, 48, 48, CKF_DERIVE),
    mech!(CKM_TLS_PRF, 0, 0, CKF_DERIVE),
    mech!(CKM_PKCS5_PBKD2, 0, 0, CKF_GENERATE),
    mech!(CKM_WTLS_SERVER_KEY_AND_MAC_DERIVE, 20, 20, CKF_DERIVE),
    mech!(CKM_WTLS_CLIENT_KEY_AND_MAC_DERIVE, 20, 20, CKF_DERIVE),
    mech!(CKM_TLS12_MASTER_KEY_DERIVE, 48, 48, CKF_DERIVE),
    mech!(CKM_TLS12_KEY_AND_MAC_DERIVE, 48, 48, CKF_DERIVE),
    mech!(CKM_EC_KEY_PAIR_GEN, 256, 521, CKF_GENERATE_KEY_PAIR),
    mech!(CKM_ECDH1_DERIVE, 256, 521, CKF_DERIVE),
    mech!(CKM_AES_KEY_GEN, 16, 32, CKF_GENERATE),
    mech!(CKM_AES_ECB, 16, 32, CKF_ENCRYPT | CKF_DECRYPT),
    mech!(CKM_AES_CBC_PAD, 16, 32, CKF_ENCRYPT | CKF_DECRYPT),
    mech!(CKM_AES_GCM, 16, 32, CKF_ENCRYPT | CKF_DECRYPT),
    mech!(CKM_AES_KEY_WRAP, 16, 32, CKF_WRAP | CKF_UNWRAP),
    mech!(CKM_HKDF_DERIVE, 1, 64, CKF_DERIVE),
    mech!(CKM_EC_EDWARDS_KEY_PAIR_GEN, 255, 448, CKF_GENERATE_KEY_PAIR),
    mech!(CKM_EDDSA, 255, 448, CKF_SIGN | CKF_VERIFY),
];

/// A `CK_MECHANISM` as received
struct MechanismArg {
    mechanism: CK_MECHANISM_TYPE,
    param: *mut u8,
    len: usize,
}

impl MechanismArg {
    unsafe fn read(
        profile: PlatformProfile,
        ptr: *const u8,
    ) -> MockResult<MechanismArg> {
        if ptr.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let view = StructView::from_raw(CK_MECHANISM::DEF.layout(profile), ptr);
        Ok(MechanismArg {
            mechanism: view.ulong(CK_MECHANISM::mechanism),
            param: view.ptr(CK_MECHANISM::pParameter) as *mut u8,
            len: usize_of(view.ulong(CK_MECHANISM::ulParameterLen))?,
        })
    }

    fn no_params(&self) -> MockResult<()> {
        if self.len == 0 {
            Ok(())
        } else {
            Err(CKR_MECHANISM_PARAM_INVALID)
        }
    }

    unsafe fn bytes<'a>(&self) -> MockResult<&'a [u8]> {
        input_n(self.param, self.len).map_err(|_| CKR_MECHANISM_PARAM_INVALID)
    }

    /// The parameters as a structure, which must have the exact size
    unsafe fn view<'a>(
        &self,
        def: &'static StructDef,
        profile: PlatformProfile,
    ) -> MockResult<StructView<&'a mut [u8]>> {
        if self.param.is_null() || self.len != def.size(profile) {
            return Err(CKR_MECHANISM_PARAM_INVALID);
        }
        Ok(StructView::from_raw_mut(def.layout(profile), self.param))
    }
}

/* Checks cipher parameters, remembers what GCM was given */
unsafe fn check_cipher(
    state: &mut MockState,
    profile: PlatformProfile,
    mech: &MechanismArg,
) -> MockResult<()> {
    match mech.mechanism {
        CKM_AES_ECB | CKM_RSA_X_509 => mech.no_params(),
        CKM_AES_CBC_PAD => {
            if mech.bytes()?.len() != 16 {
                return Err(CKR_MECHANISM_PARAM_INVALID);
            }
            Ok(())
        }
        CKM_AES_CTR => {
            let view = mech.view(&CK_AES_CTR_PARAMS::DEF, profile)?;
            match view.ulong(CK_AES_CTR_PARAMS::ulCounterBits) {
                1..=128 => Ok(()),
                _ => Err(CKR_MECHANISM_PARAM_INVALID),
            }
        }
        CKM_AES_GCM => {
            let view = mech.view(&CK_GCM_PARAMS::DEF, profile)?;
            let iv = param_data(
                &view,
                CK_GCM_PARAMS::pIv,
                CK_GCM_PARAMS::ulIvLen,
            )?;
            let aad = param_data(
                &view,
                CK_GCM_PARAMS::pAAD,
                CK_GCM_PARAMS::ulAADLen,
            )?;
            state.last_gcm = Some(GcmSeen {
                iv: iv.to_vec(),
                iv_bits: view.ulong(CK_GCM_PARAMS::ulIvBits),
                aad: aad.to_vec(),
                tag_bits: view.ulong(CK_GCM_PARAMS::ulTagBits),
            });
            Ok(())
        }
        CKM_AES_CCM => {
            let view = mech.view(&CK_CCM_PARAMS::DEF, profile)?;
            let nonce = param_data(
                &view,
                CK_CCM_PARAMS::pNonce,
                CK_CCM_PARAMS::ulNonceLen,
            )?;
            match nonce.len() {
                7..=13 => Ok(()),
                _ => Err(CKR_MECHANISM_PARAM_INVALID),
            }
        }
        CKM_RSA_PKCS_OAEP => {
            let view = mech.view(&CK_RSA_PKCS_OAEP_PARAMS::DEF, profile)?;
            param_data(
                &view,
                CK_RSA_PKCS_OAEP_PARAMS::pSourceData,
                CK_RSA_PKCS_OAEP_PARAMS::ulSourceDataLen,
            )?;
            Ok(())
        }
        _ => Err(CKR_MECHANISM_INVALID),
    }
}

unsafe fn check_signature(
    profile: PlatformProfile,
    mech: &MechanismArg,
) -> MockResult<()> {
    match mech.mechanism {
        CKM_SHA256_HMAC => mech.no_params(),
        CKM_RSA_PKCS_PSS => {
            let view = mech.view(&CK_RSA_PKCS_PSS_PARAMS::DEF, profile)?;
            match view.ulong(CK_RSA_PKCS_PSS_PARAMS::mgf) {
                CKG_MGF1_SHA1..=CKG_MGF1_SHA224 => Ok(()),
                _ => Err(CKR_MECHANISM_PARAM_INVALID),
            }
        }
        CKM_EDDSA => {
            if mech.len == 0 {
                return Ok(());
            }
            let view = mech.view(&CK_EDDSA_PARAMS::DEF, profile)?;
            param_data(
                &view,
                CK_EDDSA_PARAMS::pContextData,
                CK_EDDSA_PARAMS::ulContextDataLen,
            )?;
            Ok(())
        }
        _ => Err(CKR_MECHANISM_INVALID),
    }
}

type OpSlot<T> = fn(&mut SessionState) -> &mut Option<T>;

unsafe fn cipher_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
    op: OpSlot<u8>,
) -> MockResult<()> {
    let profile = profile_of::<W, P>();
    let mech = MechanismArg::read(profile, mechanism)?;
    let mut state = lock();
    state.session(session.widen())?;
    let key_byte = state.key(key.widen())?.key_byte();
    check_cipher(&mut state, profile, &mech)?;
    let slot = op(state.session_mut(session.widen())?);
    if slot.is_some() {
        return Err(CKR_OPERATION_ACTIVE);
    }
    *slot = Some(key_byte);
    Ok(())
}

unsafe fn cipher_single<W: Word>(
    session: W,
    op: OpSlot<u8>,
    data: *const u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> MockResult<()> {
    let mut state = lock();
    let slot = op(state.session_mut(session.widen())?);
    let key = slot.ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
    let result = xor(input(data, data_len)?, key);
    single_part(slot, output(&result, out, out_len))
}

unsafe fn cipher_update<W: Word>(
    session: W,
    op: OpSlot<u8>,
    part: *const u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> MockResult<()> {
    let mut state = lock();
    let slot = op(state.session_mut(session.widen())?);
    let key = slot.ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
    let result = xor(input(part, part_len)?, key);
    output(&result, out, out_len).map(|_| ())
}

/* the toy ciphers are stream ciphers, nothing is left at the end */
unsafe fn cipher_final<W: Word>(
    session: W,
    op: OpSlot<u8>,
    out: *mut u8,
    out_len: *mut W,
) -> MockResult<()> {
    let mut state = lock();
    let slot = op(state.session_mut(session.widen())?);
    slot.ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
    single_part(slot, output(&[], out, out_len))
}

unsafe fn mac_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
    op: OpSlot<MacOp>,
) -> MockResult<()> {
    let profile = profile_of::<W, P>();
    let mech = MechanismArg::read(profile, mechanism)?;
    check_signature(profile, &mech)?;
    let mut state = lock();
    state.session(session.widen())?;
    let key = state.key(key.widen())?.value().to_vec();
    let slot = op(state.session_mut(session.widen())?);
    if slot.is_some() {
        return Err(CKR_OPERATION_ACTIVE);
    }
    *slot = Some(MacOp {
        key: key,
        data: Vec::new(),
    });
    Ok(())
}

unsafe fn mac_update<W: Word>(
    session: W,
    op: OpSlot<MacOp>,
    part: *const u8,
    part_len: W,
) -> MockResult<()> {
    let mut state = lock();
    let slot = op(state.session_mut(session.widen())?);
    match slot {
        Some(mac) => {
            mac.data.extend_from_slice(input(part, part_len)?);
            Ok(())
        }
        None => Err(CKR_OPERATION_NOT_INITIALIZED),
    }
}

/* verification always ends the operation */
unsafe fn verify_mac<W: Word>(
    session: W,
    data: Option<(*const u8, W)>,
    signature: *const u8,
    signature_len: W,
) -> MockResult<()> {
    let mut state = lock();
    let s = state.session_mut(session.widen())?;
    let mut mac = s.verify.take().ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
    if let Some((ptr, len)) = data {
        mac.data.extend_from_slice(input(ptr, len)?);
    }
    if mock_mac(&mac.key, &mac.data) == input(signature, signature_len)? {
        Ok(())
    } else {
        Err(CKR_SIGNATURE_INVALID)
    }
}

fn find_mechanism(
    mechanism: CK_MECHANISM_TYPE,
) -> Option<&'static MechanismSpec> {
    MECHANISMS.iter().find(|m| m.mechanism == mechanism)
}

pub(crate) extern "C" fn fn_initialize<W: Word, P: Packing>(
    init_args: *mut c_void,
) -> W {
    ck_entry!("C_Initialize", W, {
        let mut state = lock();
        if state.initialized {
            return Err(CKR_CRYPTOKI_ALREADY_INITIALIZED);
        }
        let (flags, reserved) = if init_args.is_null() {
            (0, None)
        } else {
            let view = unsafe {
                StructView::from_raw(
                    CK_C_INITIALIZE_ARGS::DEF.layout(profile_of::<W, P>()),
                    init_args as *const u8,
                )
            };
            let mutex_fns = [
                CK_C_INITIALIZE_ARGS::CreateMutex,
                CK_C_INITIALIZE_ARGS::DestroyMutex,
                CK_C_INITIALIZE_ARGS::LockMutex,
                CK_C_INITIALIZE_ARGS::UnlockMutex,
            ];
            let set = mutex_fns.iter().filter(|f| !view.ptr(**f).is_null());
            match set.count() {
                0 | 4 => (),
                _ => return Err(CKR_ARGUMENTS_BAD),
            }
            let reserved = view.ptr(CK_C_INITIALIZE_ARGS::pReserved);
            let reserved = if reserved.is_null() {
                None
            } else {
                let s = unsafe { CStr::from_ptr(reserved as *const _) };
                match s.to_str() {
                    Ok(s) => Some(s.to_string()),
                    Err(_) => return Err(CKR_ARGUMENTS_BAD),
                }
            };
            (view.ulong(CK_C_INITIALIZE_ARGS::flags), reserved)
        };
        state.initialized = true;
        state.init_flags = flags;
        state.init_reserved = reserved;
        Ok(())
    })
}

pub(crate) extern "C" fn fn_finalize<W: Word, P: Packing>(
    reserved: *mut c_void,
) -> W {
    ck_entry!("C_Finalize", W, {
        if !reserved.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.check_initialized()?;
        state.sessions.clear();
        state.login = None;
        state.initialized = false;
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_info<W: Word, P: Packing>(info: *mut u8) -> W {
    ck_entry!("C_GetInfo", W, {
        lock().check_initialized()?;
        let mut view =
            unsafe { out_struct(&CK_INFO::DEF, profile_of::<W, P>(), info)? };
        set_version(
            &mut view,
            CK_INFO::cryptokiVersion,
            CRYPTOKI_VERSION_MAJOR,
            CRYPTOKI_VERSION_MINOR,
        );
        set_bytes(&mut view, CK_INFO::manufacturerID, &padded::<32>("ckbind"))?;
        set_ulong(&mut view, CK_INFO::flags, 0)?;
        set_bytes(
            &mut view,
            CK_INFO::libraryDescription,
            &padded::<32>("ckbind mock module"),
        )?;
        set_version(&mut view, CK_INFO::libraryVersion, 0, 4);
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_slot_list<W: Word, P: Packing>(
    token_present: u8,
    slot_list: *mut W,
    count: *mut W,
) -> W {
    ck_entry!("C_GetSlotList", W, {
        let state = lock();
        state.check_initialized()?;
        let mut slots = Vec::new();
        if state.token_present || token_present == CK_FALSE {
            slots.push(SLOT_ID);
        }
        if token_present == CK_FALSE {
            slots.push(EMPTY_SLOT_ID);
        }
        unsafe { output_list(&slots, slot_list, count) }
    })
}

pub(crate) extern "C" fn fn_get_slot_info<W: Word, P: Packing>(
    slot: W,
    info: *mut u8,
) -> W {
    ck_entry!("C_GetSlotInfo", W, {
        let state = lock();
        state.check_initialized()?;
        let slot = slot.widen();
        let mut flags = CKF_REMOVABLE_DEVICE;
        match slot {
            SLOT_ID if state.token_present => flags |= CKF_TOKEN_PRESENT,
            SLOT_ID | EMPTY_SLOT_ID => (),
            _ => return Err(CKR_SLOT_ID_INVALID),
        }
        let mut view = unsafe {
            out_struct(&CK_SLOT_INFO::DEF, profile_of::<W, P>(), info)?
        };
        set_bytes(
            &mut view,
            CK_SLOT_INFO::slotDescription,
            &padded::<64>(&format!("ckbind mock slot {}", slot)),
        )?;
        set_bytes(
            &mut view,
            CK_SLOT_INFO::manufacturerID,
            &padded::<32>("ckbind"),
        )?;
        set_ulong(&mut view, CK_SLOT_INFO::flags, flags)?;
        set_version(&mut view, CK_SLOT_INFO::hardwareVersion, 1, 0);
        set_version(&mut view, CK_SLOT_INFO::firmwareVersion, 0, 4);
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_token_info<W: Word, P: Packing>(
    slot: W,
    info: *mut u8,
) -> W {
    ck_entry!("C_GetTokenInfo", W, {
        let state = lock();
        state.check_token(slot.widen())?;
        let rw = state.sessions.values().filter(|s| s.read_write()).count();
        let mut view = unsafe {
            out_struct(&CK_TOKEN_INFO::DEF, profile_of::<W, P>(), info)?
        };
        set_bytes(&mut view, CK_TOKEN_INFO::label, &state.label)?;
        set_bytes(
            &mut view,
            CK_TOKEN_INFO::manufacturerID,
            &padded::<32>("ckbind"),
        )?;
        set_bytes(&mut view, CK_TOKEN_INFO::model, &padded::<16>("mock"))?;
        set_bytes(
            &mut view,
            CK_TOKEN_INFO::serialNumber,
            &padded::<16>("0001"),
        )?;
        set_ulong(
            &mut view,
            CK_TOKEN_INFO::flags,
            CKF_RNG
                | CKF_LOGIN_REQUIRED
                | CKF_USER_PIN_INITIALIZED
                | CKF_TOKEN_INITIALIZED
                | CKF_PROTECTED_AUTHENTICATION_PATH
                | CKF_DUAL_CRYPTO_OPERATIONS,
        )?;
        let counters = [
            (CK_TOKEN_INFO::ulMaxSessionCount, CK_EFFECTIVELY_INFINITE),
            (CK_TOKEN_INFO::ulSessionCount, ulong_of(state.sessions.len())?),
            (CK_TOKEN_INFO::ulMaxRwSessionCount, CK_EFFECTIVELY_INFINITE),
            (CK_TOKEN_INFO::ulRwSessionCount, ulong_of(rw)?),
            (CK_TOKEN_INFO::ulMaxPinLen, 64),
            (CK_TOKEN_INFO::ulMinPinLen, 4),
            (CK_TOKEN_INFO::ulTotalPublicMemory, CK_UNAVAILABLE_INFORMATION),
            (CK_TOKEN_INFO::ulFreePublicMemory, CK_UNAVAILABLE_INFORMATION),
            (CK_TOKEN_INFO::ulTotalPrivateMemory, CK_UNAVAILABLE_INFORMATION),
            (CK_TOKEN_INFO::ulFreePrivateMemory, CK_UNAVAILABLE_INFORMATION),
        ];
        for (field, value) in counters {
            set_ulong(&mut view, field, value)?;
        }
        set_version(&mut view, CK_TOKEN_INFO::hardwareVersion, 1, 0);
        set_version(&mut view, CK_TOKEN_INFO::firmwareVersion, 0, 4);
        set_bytes(&mut view, CK_TOKEN_INFO::utcTime, b"2025010100000000")?;
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_mechanism_list<W: Word, P: Packing>(
    slot: W,
    list: *mut W,
    count: *mut W,
) -> W {
    ck_entry!("C_GetMechanismList", W, {
        lock().check_token(slot.widen())?;
        let mechs: Vec<CK_ULONG> =
            MECHANISMS.iter().map(|m| m.mechanism).collect();
        unsafe { output_list(&mechs, list, count) }
    })
}

pub(crate) extern "C" fn fn_get_mechanism_info<W: Word, P: Packing>(
    slot: W,
    mechanism: W,
    info: *mut u8,
) -> W {
    ck_entry!("C_GetMechanismInfo", W, {
        lock().check_token(slot.widen())?;
        let spec =
            find_mechanism(mechanism.widen()).ok_or(CKR_MECHANISM_INVALID)?;
        let mut view = unsafe {
            out_struct(&CK_MECHANISM_INFO::DEF, profile_of::<W, P>(), info)?
        };
        set_ulong(&mut view, CK_MECHANISM_INFO::ulMinKeySize, spec.min_key)?;
        set_ulong(&mut view, CK_MECHANISM_INFO::ulMaxKeySize, spec.max_key)?;
        set_ulong(&mut view, CK_MECHANISM_INFO::flags, spec.flags)?;
        Ok(())
    })
}

pub(crate) extern "C" fn fn_init_token<W: Word, P: Packing>(
    slot: W,
    so_pin: *mut u8,
    so_pin_len: W,
    label: *mut u8,
) -> W {
    ck_entry!("C_InitToken", W, {
        let mut state = lock();
        let slot = slot.widen();
        state.check_token(slot)?;
        if state.sessions.values().any(|s| s.slot == slot) {
            return Err(CKR_SESSION_EXISTS);
        }
        if let Some(pin) = unsafe { pin(so_pin, so_pin_len)? } {
            if pin != state.so_pin.as_slice() {
                return Err(CKR_PIN_INCORRECT);
            }
        }
        let label = unsafe { input_n(label, 32)? };
        state.label.copy_from_slice(label);
        state.objects.clear();
        Ok(())
    })
}

pub(crate) extern "C" fn fn_init_pin<W: Word, P: Packing>(
    session: W,
    pin_ptr: *mut u8,
    pin_len: W,
) -> W {
    ck_entry!("C_InitPIN", W, {
        let mut state = lock();
        if !state.session(session.widen())?.read_write() {
            return Err(CKR_SESSION_READ_ONLY);
        }
        if state.login != Some(CKU_SO) {
            return Err(CKR_USER_NOT_LOGGED_IN);
        }
        if let Some(p) = unsafe { pin(pin_ptr, pin_len)? } {
            state.user_pin = p.to_vec();
        }
        Ok(())
    })
}

pub(crate) extern "C" fn fn_set_pin<W: Word, P: Packing>(
    session: W,
    old_pin: *mut u8,
    old_len: W,
    new_pin: *mut u8,
    new_len: W,
) -> W {
    ck_entry!("C_SetPIN", W, {
        let mut state = lock();
        if !state.session(session.widen())?.read_write() {
            return Err(CKR_SESSION_READ_ONLY);
        }
        let old = unsafe { input(old_pin, old_len)? };
        let new = unsafe { input(new_pin, new_len)? }.to_vec();
        let login = state.login;
        let current = match login {
            Some(CKU_SO) => &mut state.so_pin,
            _ => &mut state.user_pin,
        };
        if old != current.as_slice() {
            return Err(CKR_PIN_INCORRECT);
        }
        *current = new;
        Ok(())
    })
}

pub(crate) extern "C" fn fn_open_session<W: Word, P: Packing>(
    slot: W,
    flags: W,
    _application: *mut c_void,
    _notify: *mut c_void,
    session: *mut W,
) -> W {
    ck_entry!("C_OpenSession", W, {
        let mut state = lock();
        let slot = slot.widen();
        let flags = flags.widen();
        state.check_token(slot)?;
        if flags & CKF_SERIAL_SESSION == 0 {
            return Err(CKR_SESSION_PARALLEL_NOT_SUPPORTED);
        }
        if session.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let handle = state.open_session(slot, flags);
        unsafe { write_word(session, handle) }
    })
}

pub(crate) extern "C" fn fn_close_session<W: Word, P: Packing>(
    session: W,
) -> W {
    ck_entry!("C_CloseSession", W, {
        let mut state = lock();
        state.check_initialized()?;
        if state.sessions.remove(&session.widen()).is_none() {
            return Err(CKR_SESSION_HANDLE_INVALID);
        }
        if state.sessions.is_empty() {
            state.login = None;
        }
        Ok(())
    })
}

pub(crate) extern "C" fn fn_close_all_sessions<W: Word, P: Packing>(
    slot: W,
) -> W {
    ck_entry!("C_CloseAllSessions", W, {
        let mut state = lock();
        state.check_initialized()?;
        match slot.widen() {
            s @ (SLOT_ID | EMPTY_SLOT_ID) => state.close_slot_sessions(s),
            _ => return Err(CKR_SLOT_ID_INVALID),
        }
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_session_info<W: Word, P: Packing>(
    session: W,
    info: *mut u8,
) -> W {
    ck_entry!("C_GetSessionInfo", W, {
        let state = lock();
        let s = state.session(session.widen())?;
        let mut view = unsafe {
            out_struct(&CK_SESSION_INFO::DEF, profile_of::<W, P>(), info)?
        };
        set_ulong(&mut view, CK_SESSION_INFO::slotID, s.slot)?;
        set_ulong(&mut view, CK_SESSION_INFO::state, state.session_state(s))?;
        set_ulong(&mut view, CK_SESSION_INFO::flags, s.flags)?;
        set_ulong(&mut view, CK_SESSION_INFO::ulDeviceError, 0)?;
        Ok(())
    })
}

const STATE_MAGIC: &[u8] = b"MOCKDGST";

pub(crate) extern "C" fn fn_get_operation_state<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_GetOperationState", W, {
        let state = lock();
        let s = state.session(session.widen())?;
        let digest = match s.digest {
            Some(ref d) => d,
            None => return Err(CKR_OPERATION_NOT_INITIALIZED),
        };
        let mut saved = STATE_MAGIC.to_vec();
        saved.extend_from_slice(digest);
        unsafe { output(&saved, out, out_len) }.map(|_| ())
    })
}

pub(crate) extern "C" fn fn_set_operation_state<W: Word, P: Packing>(
    session: W,
    saved: *mut u8,
    saved_len: W,
    _encryption_key: W,
    _authentication_key: W,
) -> W {
    ck_entry!("C_SetOperationState", W, {
        let saved = unsafe { input(saved, saved_len)? };
        if !saved.starts_with(STATE_MAGIC) {
            return Err(CKR_SAVED_STATE_INVALID);
        }
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        s.digest = Some(saved[STATE_MAGIC.len()..].to_vec());
        Ok(())
    })
}

pub(crate) extern "C" fn fn_login<W: Word, P: Packing>(
    session: W,
    user_type: W,
    pin_ptr: *mut u8,
    pin_len: W,
) -> W {
    ck_entry!("C_Login", W, {
        let mut state = lock();
        state.session(session.widen())?;
        let user = user_type.widen();
        match user {
            CKU_SO | CKU_USER | CKU_CONTEXT_SPECIFIC => (),
            _ => return Err(CKR_USER_TYPE_INVALID),
        }
        match state.login {
            Some(u) if u == user => return Err(CKR_USER_ALREADY_LOGGED_IN),
            Some(_) if user != CKU_CONTEXT_SPECIFIC => {
                return Err(CKR_USER_ANOTHER_ALREADY_LOGGED_IN)
            }
            None if user == CKU_CONTEXT_SPECIFIC => {
                return Err(CKR_USER_NOT_LOGGED_IN)
            }
            _ => (),
        }
        if user == CKU_SO && state.sessions.values().any(|s| !s.read_write())
        {
            return Err(CKR_SESSION_READ_ONLY_EXISTS);
        }
        if let Some(p) = unsafe { pin(pin_ptr, pin_len)? } {
            let expected = match user {
                CKU_SO => &state.so_pin,
                _ => &state.user_pin,
            };
            if p != expected.as_slice() {
                return Err(CKR_PIN_INCORRECT);
            }
        }
        if user != CKU_CONTEXT_SPECIFIC {
            state.login = Some(user);
        }
        Ok(())
    })
}

pub(crate) extern "C" fn fn_logout<W: Word, P: Packing>(session: W) -> W {
    ck_entry!("C_Logout", W, {
        let mut state = lock();
        state.session(session.widen())?;
        if state.login.take().is_none() {
            return Err(CKR_USER_NOT_LOGGED_IN);
        }
        Ok(())
    })
}

fn check_writable(
    state: &MockState,
    session: CK_SESSION_HANDLE,
    template: &StoredTemplate,
) -> MockResult<()> {
    let token = template
        .iter()
        .any(|(t, v)| *t == CKA_TOKEN && v.as_raw() == Some(&[CK_TRUE][..]));
    if token && !state.session(session)?.read_write() {
        return Err(CKR_SESSION_READ_ONLY);
    }
    Ok(())
}

pub(crate) extern "C" fn fn_create_object<W: Word, P: Packing>(
    session: W,
    template: *mut u8,
    count: W,
    object: *mut W,
) -> W {
    ck_entry!("C_CreateObject", W, {
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &attrs)?;
        if !attrs.iter().any(|(t, _)| *t == CKA_CLASS) {
            return Err(CKR_TEMPLATE_INCOMPLETE);
        }
        if object.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let handle = state.add_object(Object::new(attrs));
        unsafe { write_word(object, handle) }
    })
}

pub(crate) extern "C" fn fn_copy_object<W: Word, P: Packing>(
    session: W,
    object: W,
    template: *mut u8,
    count: W,
    new_object: *mut W,
) -> W {
    ck_entry!("C_CopyObject", W, {
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &attrs)?;
        let mut copy = state.object(object.widen())?.clone();
        for (t, v) in attrs {
            copy.set(t, v);
        }
        if new_object.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let handle = state.add_object(copy);
        unsafe { write_word(new_object, handle) }
    })
}

pub(crate) extern "C" fn fn_destroy_object<W: Word, P: Packing>(
    session: W,
    object: W,
) -> W {
    ck_entry!("C_DestroyObject", W, {
        let mut state = lock();
        state.session(session.widen())?;
        match state.objects.remove(&object.widen()) {
            Some(_) => Ok(()),
            None => Err(CKR_OBJECT_HANDLE_INVALID),
        }
    })
}

pub(crate) extern "C" fn fn_get_object_size<W: Word, P: Packing>(
    session: W,
    object: W,
    size: *mut W,
) -> W {
    ck_entry!("C_GetObjectSize", W, {
        let state = lock();
        state.session(session.widen())?;
        let n = state.object(object.widen())?.size();
        unsafe { write_word(size, ulong_of(n)?) }
    })
}

/* Fills the values of a caller supplied nested CK_ATTRIBUTE array in
 * place, None when it has no value buffers and the array itself is
 * being fetched */
unsafe fn fill_nested(
    profile: PlatformProfile,
    stored: &StoredTemplate,
    ptr: *mut u8,
    count: usize,
) -> MockResult<Option<CK_RV>> {
    let layout = attribute_layout(profile);
    let has_buffers = (0..count).any(|i| {
        let view = StructView::from_raw(layout, ptr.add(i * layout.size()));
        !view.ptr(CK_ATTRIBUTE::pValue).is_null()
    });
    if !has_buffers {
        return Ok(None);
    }
    let mut rv = CKR_OK;
    for i in 0..count {
        let mut view =
            StructView::from_raw_mut(layout, ptr.add(i * layout.size()));
        let t = view.ulong(CK_ATTRIBUTE::type_);
        let value = match stored.iter().find(|(a, _)| *a == t) {
            Some((_, v)) => encode_value(profile, v)?,
            None => {
                set_ulong(
                    &mut view,
                    CK_ATTRIBUTE::ulValueLen,
                    CK_UNAVAILABLE_INFORMATION,
                )?;
                rv = attribute_error(rv, CKR_ATTRIBUTE_TYPE_INVALID);
                continue;
            }
        };
        let dst = view.ptr(CK_ATTRIBUTE::pValue) as *mut u8;
        let available = usize_of(view.ulong(CK_ATTRIBUTE::ulValueLen))?;
        let len = if dst.is_null() {
            ulong_of(value.len())?
        } else if available < value.len() {
            rv = attribute_error(rv, CKR_BUFFER_TOO_SMALL);
            CK_UNAVAILABLE_INFORMATION
        } else {
            std::ptr::copy_nonoverlapping(value.as_ptr(), dst, value.len());
            ulong_of(value.len())?
        };
        set_ulong(&mut view, CK_ATTRIBUTE::ulValueLen, len)?;
    }
    Ok(Some(rv))
}

/* the most relevant code wins when several attributes fail */
fn attribute_error(current: CK_RV, new: CK_RV) -> CK_RV {
    fn rank(rv: CK_RV) -> u8 {
        match rv {
            CKR_BUFFER_TOO_SMALL => 3,
            CKR_ATTRIBUTE_SENSITIVE => 2,
            CKR_ATTRIBUTE_TYPE_INVALID => 1,
            _ => 0,
        }
    }
    if rank(new) > rank(current) {
        new
    } else {
        current
    }
}

pub(crate) extern "C" fn fn_get_attribute_value<W: Word, P: Packing>(
    session: W,
    object: W,
    template: *mut u8,
    count: W,
) -> W {
    ck_entry!("C_GetAttributeValue", W, {
        let profile = profile_of::<W, P>();
        let count = usize_of(count.widen())?;
        if count > 0 && template.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.session(session.widen())?;
        let object = object.widen();
        let obj = state.object(object)?.clone();
        let layout = attribute_layout(profile);
        let mut rv = CKR_OK;
        let mut queried = Vec::new();
        for i in 0..count {
            let mut view = unsafe {
                StructView::from_raw_mut(
                    layout,
                    template.add(i * layout.size()),
                )
            };
            let t = view.ulong(CK_ATTRIBUTE::type_);
            let value = match obj.get(t) {
                None => {
                    rv = attribute_error(rv, CKR_ATTRIBUTE_TYPE_INVALID);
                    None
                }
                Some(_) if obj.is_sensitive(t) => {
                    rv = attribute_error(rv, CKR_ATTRIBUTE_SENSITIVE);
                    None
                }
                Some(v) => Some(encode_value(profile, v)?),
            };
            let value = match value {
                Some(v) => v,
                None => {
                    set_ulong(
                        &mut view,
                        CK_ATTRIBUTE::ulValueLen,
                        CK_UNAVAILABLE_INFORMATION,
                    )?;
                    continue;
                }
            };
            let ptr = view.ptr(CK_ATTRIBUTE::pValue) as *mut u8;
            if ptr.is_null() {
                set_ulong(
                    &mut view,
                    CK_ATTRIBUTE::ulValueLen,
                    ulong_of(value.len())?,
                )?;
                queried.push(t);
                continue;
            }
            let available = usize_of(view.ulong(CK_ATTRIBUTE::ulValueLen))?;
            if let Some(StoredValue::Template(inner)) = obj.get(t) {
                let count = available / layout.size();
                let filled =
                    unsafe { fill_nested(profile, inner, ptr, count)? };
                if let Some(nested_rv) = filled {
                    rv = attribute_error(rv, nested_rv);
                    continue;
                }
            }
            if available < value.len() {
                set_ulong(
                    &mut view,
                    CK_ATTRIBUTE::ulValueLen,
                    CK_UNAVAILABLE_INFORMATION,
                )?;
                rv = attribute_error(rv, CKR_BUFFER_TOO_SMALL);
                continue;
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    value.as_ptr(),
                    ptr,
                    value.len(),
                );
            }
            set_ulong(
                &mut view,
                CK_ATTRIBUTE::ulValueLen,
                ulong_of(value.len())?,
            )?;
        }
        for t in queried {
            state.length_queried(object, t);
        }
        match rv {
            CKR_OK => Ok(()),
            _ => Err(rv),
        }
    })
}

pub(crate) extern "C" fn fn_set_attribute_value<W: Word, P: Packing>(
    session: W,
    object: W,
    template: *mut u8,
    count: W,
) -> W {
    ck_entry!("C_SetAttributeValue", W, {
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        if attrs.iter().any(|(t, _)| *t == CKA_CLASS) {
            return Err(CKR_ATTRIBUTE_READ_ONLY);
        }
        let obj = state
            .objects
            .get_mut(&object.widen())
            .ok_or(CKR_OBJECT_HANDLE_INVALID)?;
        for (t, v) in attrs {
            obj.set(t, v);
        }
        Ok(())
    })
}

pub(crate) extern "C" fn fn_find_objects_init<W: Word, P: Packing>(
    session: W,
    template: *mut u8,
    count: W,
) -> W {
    ck_entry!("C_FindObjectsInit", W, {
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        let mut found: Vec<CK_OBJECT_HANDLE> = state
            .objects
            .iter()
            .filter(|(_, o)| o.matches(&attrs))
            .map(|(h, _)| *h)
            .collect();
        found.sort_unstable();
        let s = state.session_mut(session.widen())?;
        if s.find.is_some() {
            return Err(CKR_OPERATION_ACTIVE);
        }
        s.find = Some(found.into());
        Ok(())
    })
}

pub(crate) extern "C" fn fn_find_objects<W: Word, P: Packing>(
    session: W,
    objects: *mut W,
    max: W,
    count: *mut W,
) -> W {
    ck_entry!("C_FindObjects", W, {
        let max = usize_of(max.widen())?;
        if max > 0 && objects.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        let pending = s.find.as_mut().ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
        let mut n = 0;
        while n < max {
            match pending.pop_front() {
                Some(h) => {
                    unsafe { objects.add(n).write_unaligned(narrow::<W>(h)?) };
                    n += 1;
                }
                None => break,
            }
        }
        unsafe { write_word(count, ulong_of(n)?) }
    })
}

pub(crate) extern "C" fn fn_find_objects_final<W: Word, P: Packing>(
    session: W,
) -> W {
    ck_entry!("C_FindObjectsFinal", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        match s.find.take() {
            Some(_) => Ok(()),
            None => Err(CKR_OPERATION_NOT_INITIALIZED),
        }
    })
}

pub(crate) extern "C" fn fn_encrypt_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_EncryptInit", W, {
        unsafe {
            cipher_init::<W, P>(session, mechanism, key, |s| &mut s.encrypt)
        }
    })
}

pub(crate) extern "C" fn fn_encrypt<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_Encrypt", W, {
        unsafe {
            cipher_single(
                session,
                |s| &mut s.encrypt,
                data,
                data_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_encrypt_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_EncryptUpdate", W, {
        unsafe {
            cipher_update(
                session,
                |s| &mut s.encrypt,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_encrypt_final<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_EncryptFinal", W, {
        unsafe { cipher_final(session, |s| &mut s.encrypt, out, out_len) }
    })
}

pub(crate) extern "C" fn fn_decrypt_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_DecryptInit", W, {
        unsafe {
            cipher_init::<W, P>(session, mechanism, key, |s| &mut s.decrypt)
        }
    })
}

pub(crate) extern "C" fn fn_decrypt<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_Decrypt", W, {
        unsafe {
            cipher_single(
                session,
                |s| &mut s.decrypt,
                data,
                data_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_decrypt_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DecryptUpdate", W, {
        unsafe {
            cipher_update(
                session,
                |s| &mut s.decrypt,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_decrypt_final<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DecryptFinal", W, {
        unsafe { cipher_final(session, |s| &mut s.decrypt, out, out_len) }
    })
}

pub(crate) extern "C" fn fn_digest_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
) -> W {
    ck_entry!("C_DigestInit", W, {
        let mech = unsafe {
            MechanismArg::read(profile_of::<W, P>(), mechanism)?
        };
        if mech.mechanism != CKM_SHA256 {
            return Err(CKR_MECHANISM_INVALID);
        }
        mech.no_params()?;
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        if s.digest.is_some() {
            return Err(CKR_OPERATION_ACTIVE);
        }
        s.digest = Some(Vec::new());
        Ok(())
    })
}

pub(crate) extern "C" fn fn_digest<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_Digest", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        let mut input_data = match s.digest {
            Some(ref d) => d.clone(),
            None => return Err(CKR_OPERATION_NOT_INITIALIZED),
        };
        input_data.extend_from_slice(unsafe { input(data, data_len)? });
        let digest = mock_digest(&input_data);
        single_part(&mut s.digest, unsafe { output(&digest, out, out_len) })
    })
}

pub(crate) extern "C" fn fn_digest_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
) -> W {
    ck_entry!("C_DigestUpdate", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        match s.digest {
            Some(ref mut d) => {
                d.extend_from_slice(unsafe { input(part, part_len)? });
                Ok(())
            }
            None => Err(CKR_OPERATION_NOT_INITIALIZED),
        }
    })
}

pub(crate) extern "C" fn fn_digest_key<W: Word, P: Packing>(
    session: W,
    key: W,
) -> W {
    ck_entry!("C_DigestKey", W, {
        let mut state = lock();
        state.session(session.widen())?;
        let value = state.key(key.widen())?.value().to_vec();
        let s = state.session_mut(session.widen())?;
        match s.digest {
            Some(ref mut d) => {
                d.extend_from_slice(&value);
                Ok(())
            }
            None => Err(CKR_OPERATION_NOT_INITIALIZED),
        }
    })
}

pub(crate) extern "C" fn fn_digest_final<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DigestFinal", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        let digest = match s.digest {
            Some(ref d) => mock_digest(d),
            None => return Err(CKR_OPERATION_NOT_INITIALIZED),
        };
        single_part(&mut s.digest, unsafe { output(&digest, out, out_len) })
    })
}

pub(crate) extern "C" fn fn_sign_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_SignInit", W, {
        unsafe { mac_init::<W, P>(session, mechanism, key, |s| &mut s.sign) }
    })
}

pub(crate) extern "C" fn fn_sign<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_Sign", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        let signature = match s.sign {
            Some(ref mac) => {
                let mut all = mac.data.clone();
                all.extend_from_slice(unsafe { input(data, data_len)? });
                mock_mac(&mac.key, &all)
            }
            None => return Err(CKR_OPERATION_NOT_INITIALIZED),
        };
        single_part(&mut s.sign, unsafe { output(&signature, out, out_len) })
    })
}

pub(crate) extern "C" fn fn_sign_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
) -> W {
    ck_entry!("C_SignUpdate", W, {
        unsafe { mac_update(session, |s| &mut s.sign, part, part_len) }
    })
}

pub(crate) extern "C" fn fn_sign_final<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_SignFinal", W, {
        let mut state = lock();
        let s = state.session_mut(session.widen())?;
        let signature = match s.sign {
            Some(ref mac) => mock_mac(&mac.key, &mac.data),
            None => return Err(CKR_OPERATION_NOT_INITIALIZED),
        };
        single_part(&mut s.sign, unsafe { output(&signature, out, out_len) })
    })
}

pub(crate) extern "C" fn fn_sign_recover_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_SignRecoverInit", W, {
        unsafe {
            cipher_init::<W, P>(session, mechanism, key, |s| {
                &mut s.sign_recover
            })
        }
    })
}

pub(crate) extern "C" fn fn_sign_recover<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_SignRecover", W, {
        unsafe {
            cipher_single(
                session,
                |s| &mut s.sign_recover,
                data,
                data_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_verify_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_VerifyInit", W, {
        unsafe {
            mac_init::<W, P>(session, mechanism, key, |s| &mut s.verify)
        }
    })
}

pub(crate) extern "C" fn fn_verify<W: Word, P: Packing>(
    session: W,
    data: *mut u8,
    data_len: W,
    signature: *mut u8,
    signature_len: W,
) -> W {
    ck_entry!("C_Verify", W, {
        unsafe {
            verify_mac(
                session,
                Some((data as *const u8, data_len)),
                signature,
                signature_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_verify_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
) -> W {
    ck_entry!("C_VerifyUpdate", W, {
        unsafe { mac_update(session, |s| &mut s.verify, part, part_len) }
    })
}

pub(crate) extern "C" fn fn_verify_final<W: Word, P: Packing>(
    session: W,
    signature: *mut u8,
    signature_len: W,
) -> W {
    ck_entry!("C_VerifyFinal", W, {
        unsafe { verify_mac(session, None, signature, signature_len) }
    })
}

pub(crate) extern "C" fn fn_verify_recover_init<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    key: W,
) -> W {
    ck_entry!("C_VerifyRecoverInit", W, {
        unsafe {
            cipher_init::<W, P>(session, mechanism, key, |s| {
                &mut s.verify_recover
            })
        }
    })
}

pub(crate) extern "C" fn fn_verify_recover<W: Word, P: Packing>(
    session: W,
    signature: *mut u8,
    signature_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_VerifyRecover", W, {
        unsafe {
            cipher_single(
                session,
                |s| &mut s.verify_recover,
                signature,
                signature_len,
                out,
                out_len,
            )
        }
    })
}

/// Which side of a dual function update consumes what
#[derive(Clone, Copy)]
enum Dual {
    DigestEncrypt,
    DecryptDigest,
    SignEncrypt,
    DecryptVerify,
}

unsafe fn dual_update<W: Word>(
    session: W,
    dual: Dual,
    part: *const u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> MockResult<()> {
    let part = input(part, part_len)?;
    let mut state = lock();
    let s = state.session_mut(session.widen())?;
    let key = match dual {
        Dual::DigestEncrypt | Dual::SignEncrypt => s.encrypt,
        Dual::DecryptDigest | Dual::DecryptVerify => s.decrypt,
    }
    .ok_or(CKR_OPERATION_NOT_INITIALIZED)?;
    let active = match dual {
        Dual::DigestEncrypt | Dual::DecryptDigest => s.digest.is_some(),
        Dual::SignEncrypt => s.sign.is_some(),
        Dual::DecryptVerify => s.verify.is_some(),
    };
    if !active {
        return Err(CKR_OPERATION_NOT_INITIALIZED);
    }
    let result = xor(part, key);
    if output(&result, out, out_len)? == Output::Length {
        return Ok(());
    }
    /* digests and signatures always see the plaintext */
    let plain = match dual {
        Dual::DigestEncrypt | Dual::SignEncrypt => part,
        Dual::DecryptDigest | Dual::DecryptVerify => result.as_slice(),
    };
    match dual {
        Dual::DigestEncrypt | Dual::DecryptDigest => {
            if let Some(ref mut d) = s.digest {
                d.extend_from_slice(plain);
            }
        }
        Dual::SignEncrypt => {
            if let Some(ref mut mac) = s.sign {
                mac.data.extend_from_slice(plain);
            }
        }
        Dual::DecryptVerify => {
            if let Some(ref mut mac) = s.verify {
                mac.data.extend_from_slice(plain);
            }
        }
    }
    Ok(())
}

pub(crate) extern "C" fn fn_digest_encrypt_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DigestEncryptUpdate", W, {
        unsafe {
            dual_update(
                session,
                Dual::DigestEncrypt,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_decrypt_digest_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DecryptDigestUpdate", W, {
        unsafe {
            dual_update(
                session,
                Dual::DecryptDigest,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_sign_encrypt_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_SignEncryptUpdate", W, {
        unsafe {
            dual_update(
                session,
                Dual::SignEncrypt,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

pub(crate) extern "C" fn fn_decrypt_verify_update<W: Word, P: Packing>(
    session: W,
    part: *mut u8,
    part_len: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_DecryptVerifyUpdate", W, {
        unsafe {
            dual_update(
                session,
                Dual::DecryptVerify,
                part,
                part_len,
                out,
                out_len,
            )
        }
    })
}

/* Both PBKDF2 parameter structures end with the password length: a
 * pointer to it in the original version, the value itself in the
 * second. When both have the same size the field is told apart by its
 * magnitude, no password is as long as a user space address. */
unsafe fn pbkdf2_key(
    profile: PlatformProfile,
    mech: &MechanismArg,
) -> MockResult<Vec<u8>> {
    let v1_size = CK_PKCS5_PBKD2_PARAMS::DEF.size(profile);
    let v2_size = CK_PKCS5_PBKD2_PARAMS2::DEF.size(profile);
    let v2 = if mech.len == v2_size && mech.len != v1_size {
        true
    } else if mech.len == v1_size && mech.len != v2_size {
        false
    } else {
        let view = mech.view(&CK_PKCS5_PBKD2_PARAMS2::DEF, profile)?;
        view.ulong(CK_PKCS5_PBKD2_PARAMS2::ulPasswordLen) < 0x10000
    };
    let (password, salt, iterations) = if v2 {
        let view = mech.view(&CK_PKCS5_PBKD2_PARAMS2::DEF, profile)?;
        (
            param_data(
                &view,
                CK_PKCS5_PBKD2_PARAMS2::pPassword,
                CK_PKCS5_PBKD2_PARAMS2::ulPasswordLen,
            )?,
            param_data(
                &view,
                CK_PKCS5_PBKD2_PARAMS2::pSaltSourceData,
                CK_PKCS5_PBKD2_PARAMS2::ulSaltSourceDataLen,
            )?,
            view.ulong(CK_PKCS5_PBKD2_PARAMS2::iterations),
        )
    } else {
        let view = mech.view(&CK_PKCS5_PBKD2_PARAMS::DEF, profile)?;
        let len_ptr = view.ptr(CK_PKCS5_PBKD2_PARAMS::ulPasswordLen);
        if len_ptr.is_null() {
            return Err(CKR_MECHANISM_PARAM_INVALID);
        }
        let len = profile.word.read(std::slice::from_raw_parts(
            len_ptr as *const u8,
            profile.word.size(),
        ));
        let password = input_n(
            view.ptr(CK_PKCS5_PBKD2_PARAMS::pPassword) as *const u8,
            usize_of(len)?,
        )
        .map_err(|_| CKR_MECHANISM_PARAM_INVALID)?;
        (
            password,
            param_data(
                &view,
                CK_PKCS5_PBKD2_PARAMS::pSaltSourceData,
                CK_PKCS5_PBKD2_PARAMS::ulSaltSourceDataLen,
            )?,
            view.ulong(CK_PKCS5_PBKD2_PARAMS::iterations),
        )
    };
    if iterations == 0 {
        return Err(CKR_MECHANISM_PARAM_INVALID);
    }
    let mut seed = password.to_vec();
    seed.extend_from_slice(salt);
    seed.extend_from_slice(&iterations.to_be_bytes());
    Ok(mock_digest(&seed))
}

pub(crate) extern "C" fn fn_generate_key<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    template: *mut u8,
    count: W,
    key: *mut W,
) -> W {
    ck_entry!("C_GenerateKey", W, {
        let profile = profile_of::<W, P>();
        let mech = unsafe { MechanismArg::read(profile, mechanism)? };
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &attrs)?;
        let (key_type, value) = match mech.mechanism {
            CKM_AES_KEY_GEN | CKM_GENERIC_SECRET_KEY_GEN => {
                mech.no_params()?;
                let len = value_len(profile, &attrs, 16)?;
                let key_type = match mech.mechanism {
                    CKM_AES_KEY_GEN => CKK_AES,
                    _ => CKK_GENERIC_SECRET,
                };
                (key_type, state.random_bytes(len))
            }
            CKM_PKCS5_PBKD2 => {
                let len = value_len(profile, &attrs, 32)?;
                let seed = unsafe { pbkdf2_key(profile, &mech)? };
                (CKK_GENERIC_SECRET, expand(&seed, len))
            }
            _ => return Err(CKR_MECHANISM_INVALID),
        };
        if key.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let object = new_key(profile, attrs, CKO_SECRET_KEY, key_type, value);
        let handle = state.add_object(object);
        unsafe { write_word(key, handle) }
    })
}

pub(crate) extern "C" fn fn_generate_key_pair<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    public_template: *mut u8,
    public_count: W,
    private_template: *mut u8,
    private_count: W,
    public_key: *mut W,
    private_key: *mut W,
) -> W {
    ck_entry!("C_GenerateKeyPair", W, {
        let profile = profile_of::<W, P>();
        let mech = unsafe { MechanismArg::read(profile, mechanism)? };
        let public_attrs =
            unsafe { read_template::<W, P>(public_template, public_count)? };
        let mut private_attrs =
            unsafe { read_template::<W, P>(private_template, private_count)? };
        let key_type = match mech.mechanism {
            CKM_RSA_PKCS_KEY_PAIR_GEN => CKK_RSA,
            CKM_EC_KEY_PAIR_GEN => CKK_EC,
            CKM_EC_EDWARDS_KEY_PAIR_GEN => CKK_EC_EDWARDS,
            _ => return Err(CKR_MECHANISM_INVALID),
        };
        mech.no_params()?;
        if public_key.is_null() || private_key.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &public_attrs)?;
        check_writable(&state, session.widen(), &private_attrs)?;
        if !private_attrs.iter().any(|(t, _)| *t == CKA_SENSITIVE) {
            private_attrs
                .push((CKA_SENSITIVE, StoredValue::Raw(vec![CK_TRUE])));
        }
        let value = state.random_bytes(32);
        let public = new_key(
            profile,
            public_attrs,
            CKO_PUBLIC_KEY,
            key_type,
            value.clone(),
        );
        let private =
            new_key(profile, private_attrs, CKO_PRIVATE_KEY, key_type, value);
        let public = state.add_object(public);
        let private = state.add_object(private);
        unsafe {
            write_word(public_key, public)?;
            write_word(private_key, private)
        }
    })
}

unsafe fn check_wrap(
    profile: PlatformProfile,
    mech: &MechanismArg,
) -> MockResult<()> {
    match mech.mechanism {
        CKM_AES_KEY_WRAP => mech.no_params(),
        CKM_RSA_PKCS_OAEP => {
            mech.view(&CK_RSA_PKCS_OAEP_PARAMS::DEF, profile)?;
            Ok(())
        }
        _ => Err(CKR_MECHANISM_INVALID),
    }
}

pub(crate) extern "C" fn fn_wrap_key<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    wrapping_key: W,
    key: W,
    out: *mut u8,
    out_len: *mut W,
) -> W {
    ck_entry!("C_WrapKey", W, {
        let profile = profile_of::<W, P>();
        let mech = unsafe { MechanismArg::read(profile, mechanism)? };
        unsafe { check_wrap(profile, &mech)? };
        let state = lock();
        state.session(session.widen())?;
        let wrapping = state.key(wrapping_key.widen())?.key_byte();
        let key = state.key(key.widen())?;
        if key.is_false(CKA_EXTRACTABLE) {
            return Err(CKR_KEY_UNEXTRACTABLE);
        }
        let wrapped = xor(key.value(), wrapping);
        unsafe { output(&wrapped, out, out_len) }.map(|_| ())
    })
}

pub(crate) extern "C" fn fn_unwrap_key<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    unwrapping_key: W,
    wrapped: *mut u8,
    wrapped_len: W,
    template: *mut u8,
    count: W,
    key: *mut W,
) -> W {
    ck_entry!("C_UnwrapKey", W, {
        let profile = profile_of::<W, P>();
        let mech = unsafe { MechanismArg::read(profile, mechanism)? };
        unsafe { check_wrap(profile, &mech)? };
        let wrapped = unsafe { input(wrapped, wrapped_len)? };
        if wrapped.is_empty() {
            return Err(CKR_WRAPPED_KEY_INVALID);
        }
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        if key.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &attrs)?;
        let unwrapping = state.key(unwrapping_key.widen())?.key_byte();
        let object = new_key(
            profile,
            attrs,
            CKO_SECRET_KEY,
            CKK_GENERIC_SECRET,
            xor(wrapped, unwrapping),
        );
        let handle = state.add_object(object);
        unsafe { write_word(key, handle) }
    })
}

/// Output of a derivation: either one new key or handles already written
/// into the parameters
enum Derived {
    Key(Vec<u8>),
    Written,
}

unsafe fn random_info<'a, B: AsRef<[u8]>>(
    view: &StructView<B>,
    field: usize,
) -> MockResult<(&'a [u8], &'a [u8])> {
    /* SSL3 and WTLS random data share the same layout */
    let random = view.nested(field);
    let client = param_data(
        &random,
        CK_SSL3_RANDOM_DATA::pClientRandom,
        CK_SSL3_RANDOM_DATA::ulClientRandomLen,
    )?;
    let server = param_data(
        &random,
        CK_SSL3_RANDOM_DATA::pServerRandom,
        CK_SSL3_RANDOM_DATA::ulServerRandomLen,
    )?;
    if client.is_empty() || server.is_empty() {
        return Err(CKR_MECHANISM_PARAM_INVALID);
    }
    Ok((client, server))
}

fn bytes_of_bits(bits: CK_ULONG) -> MockResult<usize> {
    if bits % 8 != 0 {
        return Err(CKR_MECHANISM_PARAM_INVALID);
    }
    usize_of(bits / 8)
}

/* Creates the derived secrets and writes their handles and the IVs into
 * the key material output of SSL3 and TLS 1.2 derivations */
unsafe fn ssl3_key_material(
    state: &mut MockState,
    profile: PlatformProfile,
    mech: &MechanismArg,
    base: &[u8],
) -> MockResult<()> {
    let def = match mech.mechanism {
        CKM_TLS12_KEY_AND_MAC_DERIVE => &CK_TLS12_KEY_MAT_PARAMS::DEF,
        _ => &CK_SSL3_KEY_MAT_PARAMS::DEF,
    };
    /* TLS 1.2 only appends the PRF mechanism, field indexes match */
    let view = mech.view(def, profile)?;
    let bits = |field| bytes_of_bits(view.ulong(field));
    let mac_len = bits(CK_SSL3_KEY_MAT_PARAMS::ulMacSizeInBits)?;
    let key_len = bits(CK_SSL3_KEY_MAT_PARAMS::ulKeySizeInBits)?;
    let iv_len = bits(CK_SSL3_KEY_MAT_PARAMS::ulIVSizeInBits)?;
    let (client, server) =
        random_info(&view, CK_SSL3_KEY_MAT_PARAMS::RandomInfo)?;
    let out = view.ptr(CK_SSL3_KEY_MAT_PARAMS::pReturnedKeyMaterial);
    let mut out =
        out_struct(&CK_SSL3_KEY_MAT_OUT::DEF, profile, out as *mut u8)
            .map_err(|_| CKR_MECHANISM_PARAM_INVALID)?;
    let mut seed = base.to_vec();
    seed.extend_from_slice(client);
    seed.extend_from_slice(server);
    let block = expand(&seed, 2 * (mac_len + key_len + iv_len));
    let mut rest = block.as_slice();
    let mut take = |n: usize| -> Vec<u8> {
        let (head, tail) = rest.split_at(n);
        rest = tail;
        head.to_vec()
    };
    let secrets = [
        (CK_SSL3_KEY_MAT_OUT::hClientMacSecret, take(mac_len)),
        (CK_SSL3_KEY_MAT_OUT::hServerMacSecret, take(mac_len)),
        (CK_SSL3_KEY_MAT_OUT::hClientKey, take(key_len)),
        (CK_SSL3_KEY_MAT_OUT::hServerKey, take(key_len)),
    ];
    for (field, value) in secrets {
        let key = new_key(
            profile,
            Vec::new(),
            CKO_SECRET_KEY,
            CKK_GENERIC_SECRET,
            value,
        );
        let handle = state.add_object(key);
        set_ulong(&mut out, field, handle)?;
    }
    if iv_len > 0 {
        let ivs =
            [CK_SSL3_KEY_MAT_OUT::pIVClient, CK_SSL3_KEY_MAT_OUT::pIVServer];
        for field in ivs {
            let iv = out.ptr(field) as *mut u8;
            if iv.is_null() {
                return Err(CKR_MECHANISM_PARAM_INVALID);
            }
            let value = take(iv_len);
            std::ptr::copy_nonoverlapping(value.as_ptr(), iv, value.len());
        }
    }
    Ok(())
}

unsafe fn wtls_key_material(
    state: &mut MockState,
    profile: PlatformProfile,
    mech: &MechanismArg,
    base: &[u8],
) -> MockResult<()> {
    let view = mech.view(&CK_WTLS_KEY_MAT_PARAMS::DEF, profile)?;
    let bits = |field| bytes_of_bits(view.ulong(field));
    let mac_len = bits(CK_WTLS_KEY_MAT_PARAMS::ulMacSizeInBits)?;
    let key_len = bits(CK_WTLS_KEY_MAT_PARAMS::ulKeySizeInBits)?;
    let iv_len = bits(CK_WTLS_KEY_MAT_PARAMS::ulIVSizeInBits)?;
    let (client, server) =
        random_info(&view, CK_WTLS_KEY_MAT_PARAMS::RandomInfo)?;
    let out = view.ptr(CK_WTLS_KEY_MAT_PARAMS::pReturnedKeyMaterial);
    let mut out =
        out_struct(&CK_WTLS_KEY_MAT_OUT::DEF, profile, out as *mut u8)
            .map_err(|_| CKR_MECHANISM_PARAM_INVALID)?;
    let mut seed = base.to_vec();
    seed.extend_from_slice(client);
    seed.extend_from_slice(server);
    seed.extend_from_slice(
        &view.ulong(CK_WTLS_KEY_MAT_PARAMS::ulSequenceNumber).to_be_bytes(),
    );
    let block = expand(&seed, mac_len + key_len + iv_len);
    let (mac, rest) = block.split_at(mac_len);
    let (key, iv) = rest.split_at(key_len);
    for (field, value) in [
        (CK_WTLS_KEY_MAT_OUT::hMacSecret, mac),
        (CK_WTLS_KEY_MAT_OUT::hKey, key),
    ] {
        let object = new_key(
            profile,
            Vec::new(),
            CKO_SECRET_KEY,
            CKK_GENERIC_SECRET,
            value.to_vec(),
        );
        let handle = state.add_object(object);
        set_ulong(&mut out, field, handle)?;
    }
    if iv_len > 0 {
        let ptr = out.ptr(CK_WTLS_KEY_MAT_OUT::pIV) as *mut u8;
        if ptr.is_null() {
            return Err(CKR_MECHANISM_PARAM_INVALID);
        }
        std::ptr::copy_nonoverlapping(iv.as_ptr(), ptr, iv.len());
    }
    Ok(())
}

unsafe fn master_key(
    profile: PlatformProfile,
    mech: &MechanismArg,
    base: &[u8],
) -> MockResult<Vec<u8>> {
    let (def, minor) = match mech.mechanism {
        CKM_TLS12_MASTER_KEY_DERIVE => {
            (&CK_TLS12_MASTER_KEY_DERIVE_PARAMS::DEF, 3)
        }
        _ => (&CK_SSL3_MASTER_KEY_DERIVE_PARAMS::DEF, 0),
    };
    let view = mech.view(def, profile)?;
    let (client, server) =
        random_info(&view, CK_SSL3_MASTER_KEY_DERIVE_PARAMS::RandomInfo)?;
    let version = view.ptr(CK_SSL3_MASTER_KEY_DERIVE_PARAMS::pVersion);
    if !version.is_null() {
        let mut v = out_struct(&CK_VERSION::DEF, profile, version as *mut u8)?;
        v.set_byte(CK_VERSION::major, 3);
        v.set_byte(CK_VERSION::minor, minor);
    }
    let mut seed = base.to_vec();
    seed.extend_from_slice(client);
    seed.extend_from_slice(server);
    Ok(expand(&seed, 48))
}

unsafe fn tls_prf(
    profile: PlatformProfile,
    mech: &MechanismArg,
    base: &[u8],
) -> MockResult<()> {
    let view = mech.view(&CK_TLS_PRF_PARAMS::DEF, profile)?;
    let seed = param_data(
        &view,
        CK_TLS_PRF_PARAMS::pSeed,
        CK_TLS_PRF_PARAMS::ulSeedLen,
    )?;
    let label = param_data(
        &view,
        CK_TLS_PRF_PARAMS::pLabel,
        CK_TLS_PRF_PARAMS::ulLabelLen,
    )?;
    let out = view.ptr(CK_TLS_PRF_PARAMS::pOutput) as *mut u8;
    let len_ptr = view.ptr(CK_TLS_PRF_PARAMS::pulOutputLen) as *mut u8;
    if out.is_null() || len_ptr.is_null() {
        return Err(CKR_MECHANISM_PARAM_INVALID);
    }
    let len_bytes =
        std::slice::from_raw_parts_mut(len_ptr, profile.word.size());
    let len = usize_of(profile.word.read(len_bytes))?;
    let mut input_data = base.to_vec();
    input_data.extend_from_slice(label);
    input_data.extend_from_slice(seed);
    let result = expand(&input_data, len);
    std::ptr::copy_nonoverlapping(result.as_ptr(), out, result.len());
    profile
        .word
        .write(ulong_of(result.len())?, len_bytes)
        .map_err(|_| CKR_GENERAL_ERROR)
}

unsafe fn derive(
    state: &mut MockState,
    profile: PlatformProfile,
    mech: &MechanismArg,
    base: &[u8],
) -> MockResult<Derived> {
    let value = match mech.mechanism {
        CKM_SSL3_KEY_AND_MAC_DERIVE | CKM_TLS12_KEY_AND_MAC_DERIVE => {
            ssl3_key_material(state, profile, mech, base)?;
            return Ok(Derived::Written);
        }
        CKM_WTLS_SERVER_KEY_AND_MAC_DERIVE
        | CKM_WTLS_CLIENT_KEY_AND_MAC_DERIVE => {
            wtls_key_material(state, profile, mech, base)?;
            return Ok(Derived::Written);
        }
        CKM_TLS_PRF => {
            tls_prf(profile, mech, base)?;
            return Ok(Derived::Written);
        }
        CKM_SSL3_MASTER_KEY_DERIVE | CKM_TLS12_MASTER_KEY_DERIVE => {
            master_key(profile, mech, base)?
        }
        CKM_CONCATENATE_BASE_AND_DATA => {
            let view =
                mech.view(&CK_KEY_DERIVATION_STRING_DATA::DEF, profile)?;
            let data = param_data(
                &view,
                CK_KEY_DERIVATION_STRING_DATA::pData,
                CK_KEY_DERIVATION_STRING_DATA::ulLen,
            )?;
            let mut value = base.to_vec();
            value.extend_from_slice(data);
            value
        }
        CKM_AES_CBC_ENCRYPT_DATA => {
            let view =
                mech.view(&CK_AES_CBC_ENCRYPT_DATA_PARAMS::DEF, profile)?;
            let data = param_data(
                &view,
                CK_AES_CBC_ENCRYPT_DATA_PARAMS::pData,
                CK_AES_CBC_ENCRYPT_DATA_PARAMS::length,
            )?;
            xor(data, base.first().copied().unwrap_or(0x5a))
        }
        CKM_ECDH1_DERIVE => {
            let view = mech.view(&CK_ECDH1_DERIVE_PARAMS::DEF, profile)?;
            let public = param_data(
                &view,
                CK_ECDH1_DERIVE_PARAMS::pPublicData,
                CK_ECDH1_DERIVE_PARAMS::ulPublicDataLen,
            )?;
            if public.is_empty() {
                return Err(CKR_MECHANISM_PARAM_INVALID);
            }
            mock_mac(base, public)
        }
        CKM_HKDF_DERIVE => {
            let view = mech.view(&CK_HKDF_PARAMS::DEF, profile)?;
            if view.byte(CK_HKDF_PARAMS::bExtract) == CK_FALSE
                && view.byte(CK_HKDF_PARAMS::bExpand) == CK_FALSE
            {
                return Err(CKR_MECHANISM_PARAM_INVALID);
            }
            let salt = match view.ulong(CK_HKDF_PARAMS::ulSaltType) {
                CKF_HKDF_SALT_NULL | CKF_HKDF_SALT_KEY => &[][..],
                CKF_HKDF_SALT_DATA => param_data(
                    &view,
                    CK_HKDF_PARAMS::pSalt,
                    CK_HKDF_PARAMS::ulSaltLen,
                )?,
                _ => return Err(CKR_MECHANISM_PARAM_INVALID),
            };
            let info = param_data(
                &view,
                CK_HKDF_PARAMS::pInfo,
                CK_HKDF_PARAMS::ulInfoLen,
            )?;
            let mut seed = salt.to_vec();
            seed.extend_from_slice(info);
            mock_mac(base, &seed)
        }
        _ => return Err(CKR_MECHANISM_INVALID),
    };
    Ok(Derived::Key(value))
}

pub(crate) extern "C" fn fn_derive_key<W: Word, P: Packing>(
    session: W,
    mechanism: *mut u8,
    base_key: W,
    template: *mut u8,
    count: W,
    key: *mut W,
) -> W {
    ck_entry!("C_DeriveKey", W, {
        let profile = profile_of::<W, P>();
        let mech = unsafe { MechanismArg::read(profile, mechanism)? };
        let attrs = unsafe { read_template::<W, P>(template, count)? };
        let mut state = lock();
        state.session(session.widen())?;
        check_writable(&state, session.widen(), &attrs)?;
        let base = state.key(base_key.widen())?.value().to_vec();
        match unsafe { derive(&mut state, profile, &mech, &base)? } {
            Derived::Written => Ok(()),
            Derived::Key(value) => {
                if key.is_null() {
                    return Err(CKR_ARGUMENTS_BAD);
                }
                let len = value_len(profile, &attrs, value.len())?;
                let value = expand(&value, len);
                let object = new_key(
                    profile,
                    attrs,
                    CKO_SECRET_KEY,
                    CKK_GENERIC_SECRET,
                    value,
                );
                let handle = state.add_object(object);
                unsafe { write_word(key, handle) }
            }
        }
    })
}

pub(crate) extern "C" fn fn_seed_random<W: Word, P: Packing>(
    session: W,
    seed: *mut u8,
    seed_len: W,
) -> W {
    ck_entry!("C_SeedRandom", W, {
        let seed = unsafe { input(seed, seed_len)? };
        let mut state = lock();
        state.session(session.widen())?;
        state.seed.extend_from_slice(seed);
        Ok(())
    })
}

pub(crate) extern "C" fn fn_generate_random<W: Word, P: Packing>(
    session: W,
    out: *mut u8,
    out_len: W,
) -> W {
    ck_entry!("C_GenerateRandom", W, {
        let len = usize_of(out_len.widen())?;
        if len > 0 && out.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.session(session.widen())?;
        let bytes = state.random_bytes(len);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, len) };
        Ok(())
    })
}

pub(crate) extern "C" fn fn_get_function_status<W: Word, P: Packing>(
    session: W,
) -> W {
    ck_entry!("C_GetFunctionStatus", W, {
        lock().session(session.widen())?;
        Err(CKR_FUNCTION_NOT_PARALLEL)
    })
}

pub(crate) extern "C" fn fn_cancel_function<W: Word, P: Packing>(
    session: W,
) -> W {
    ck_entry!("C_CancelFunction", W, {
        lock().session(session.widen())?;
        Err(CKR_FUNCTION_NOT_PARALLEL)
    })
}

pub(crate) extern "C" fn fn_wait_for_slot_event<W: Word, P: Packing>(
    flags: W,
    slot: *mut W,
    reserved: *mut c_void,
) -> W {
    ck_entry!("C_WaitForSlotEvent", W, {
        if !reserved.is_null() || slot.is_null() {
            return Err(CKR_ARGUMENTS_BAD);
        }
        let mut state = lock();
        state.check_initialized()?;
        match state.events.pop_front() {
            Some(s) => unsafe { write_word(slot, s) },
            /* nothing would ever wake a blocking wait up */
            None if flags.widen() & CKF_DONT_BLOCK != 0 => Err(CKR_NO_EVENT),
            None => Err(CKR_FUNCTION_NOT_SUPPORTED),
        }
    })
}

pub(crate) extern "C" fn fn_eject_token<W: Word, P: Packing>(slot: W) -> W {
    ck_entry!("C_EjectToken", W, {
        let mut state = lock();
        let slot = slot.widen();
        state.check_token(slot)?;
        state.token_present = false;
        state.close_slot_sessions(slot);
        state.events.push_back(slot);
        Ok(())
    })
}

pub(crate) extern "C" fn fn_interactive_login<W: Word, P: Packing>(
    session: W,
) -> W {
    ck_entry!("C_InteractiveLogin", W, {
        let mut state = lock();
        state.session(session.widen())?;
        match state.login {
            Some(_) => Err(CKR_USER_ALREADY_LOGGED_IN),
            None => {
                state.login = Some(CKU_USER);
                Ok(())
            }
        }
    })
}

pub(crate) extern "C" fn fn_get_unmanaged_struct_size_list<
    W: Word,
    P: Packing,
>(
    list: *mut W,
    count: *mut W,
) -> W {
    ck_entry!("C_GetUnmanagedStructSizeList", W, {
        let profile = profile_of::<W, P>();
        let mut sizes = Vec::with_capacity(UNMANAGED_STRUCTS.len());
        for def in UNMANAGED_STRUCTS.iter() {
            sizes.push(ulong_of(def.size(profile))?);
        }
        unsafe { output_list(&sizes, list, count) }
    })
}
