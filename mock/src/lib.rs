// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! A software cryptoki module for testing ckbind
//!
//! The module keeps one token in slot [SLOT_ID] and a second, empty slot.
//! All entry points are generic over the native `CK_ULONG` and the
//! structure packing, so the same module can be bound with each of the
//! four profiles through [entry_points]. Built as a `cdylib` it also
//! exports the usual `C_*` symbols for the profile of the host.
//!
//! The functions outside the `fn_*` entry points are hooks for tests to
//! inspect or tweak the module state.

use std::ffi::c_void;

use once_cell::sync::Lazy;
use pkcs11::layout::{function_list_size, function_pointer_offset, PTR_SIZE};
use pkcs11::profile::profile_of;
use pkcs11::*;

mod ops;
mod state;

use ops::*;
use state::{lock, MockState};

pub use state::{
    mock_digest, mock_mac, GcmSeen, StoredValue, EMPTY_SLOT_ID, SLOT_ID,
    SO_PIN, TOKEN_LABEL, USER_PIN,
};

/// Number of entries in a `CK_FUNCTION_LIST`
const LIST_ENTRIES: usize = 68;

macro_rules! entries {
    ($w:ty, $p:ty; $($name:literal => $func:ident,)*) => {
        vec![$(($name, $func::<$w, $p> as *const c_void),)*]
    };
}

/// Every entry point of the module, standard ones in `CK_FUNCTION_LIST`
/// order followed by the vendor ones, for the profile `(W, P)`
pub fn entry_points<W: Word, P: Packing>(
) -> Vec<(&'static str, *const c_void)> {
    entries!(W, P;
        "C_Initialize" => fn_initialize,
        "C_Finalize" => fn_finalize,
        "C_GetInfo" => fn_get_info,
        "C_GetFunctionList" => fn_get_function_list,
        "C_GetSlotList" => fn_get_slot_list,
        "C_GetSlotInfo" => fn_get_slot_info,
        "C_GetTokenInfo" => fn_get_token_info,
        "C_GetMechanismList" => fn_get_mechanism_list,
        "C_GetMechanismInfo" => fn_get_mechanism_info,
        "C_InitToken" => fn_init_token,
        "C_InitPIN" => fn_init_pin,
        "C_SetPIN" => fn_set_pin,
        "C_OpenSession" => fn_open_session,
        "C_CloseSession" => fn_close_session,
        "C_CloseAllSessions" => fn_close_all_sessions,
        "C_GetSessionInfo" => fn_get_session_info,
        "C_GetOperationState" => fn_get_operation_state,
        "C_SetOperationState" => fn_set_operation_state,
        "C_Login" => fn_login,
        "C_Logout" => fn_logout,
        "C_CreateObject" => fn_create_object,
        "C_CopyObject" => fn_copy_object,
        "C_DestroyObject" => fn_destroy_object,
        "C_GetObjectSize" => fn_get_object_size,
        "C_GetAttributeValue" => fn_get_attribute_value,
        "C_SetAttributeValue" => fn_set_attribute_value,
        "C_FindObjectsInit" => fn_find_objects_init,
        "C_FindObjects" => fn_find_objects,
        "C_FindObjectsFinal" => fn_find_objects_final,
        "C_EncryptInit" => fn_encrypt_init,
        "C_Encrypt" => fn_encrypt,
        "C_EncryptUpdate" => fn_encrypt_update,
        "C_EncryptFinal" => fn_encrypt_final,
        "C_DecryptInit" => fn_decrypt_init,
        "C_Decrypt" => fn_decrypt,
        "C_DecryptUpdate" => fn_decrypt_update,
        "C_DecryptFinal" => fn_decrypt_final,
        "C_DigestInit" => fn_digest_init,
        "C_Digest" => fn_digest,
        "C_DigestUpdate" => fn_digest_update,
        "C_DigestKey" => fn_digest_key,
        "C_DigestFinal" => fn_digest_final,
        "C_SignInit" => fn_sign_init,
        "C_Sign" => fn_sign,
        "C_SignUpdate" => fn_sign_update,
        "C_SignFinal" => fn_sign_final,
        "C_SignRecoverInit" => fn_sign_recover_init,
        "C_SignRecover" => fn_sign_recover,
        "C_VerifyInit" => fn_verify_init,
        "C_Verify" => fn_verify,
        "C_VerifyUpdate" => fn_verify_update,
        "C_VerifyFinal" => fn_verify_final,
        "C_VerifyRecoverInit" => fn_verify_recover_init,
        "C_VerifyRecover" => fn_verify_recover,
        "C_DigestEncryptUpdate" => fn_digest_encrypt_update,
        "C_DecryptDigestUpdate" => fn_decrypt_digest_update,
        "C_SignEncryptUpdate" => fn_sign_encrypt_update,
        "C_DecryptVerifyUpdate" => fn_decrypt_verify_update,
        "C_GenerateKey" => fn_generate_key,
        "C_GenerateKeyPair" => fn_generate_key_pair,
        "C_WrapKey" => fn_wrap_key,
        "C_UnwrapKey" => fn_unwrap_key,
        "C_DeriveKey" => fn_derive_key,
        "C_SeedRandom" => fn_seed_random,
        "C_GenerateRandom" => fn_generate_random,
        "C_GetFunctionStatus" => fn_get_function_status,
        "C_CancelFunction" => fn_cancel_function,
        "C_WaitForSlotEvent" => fn_wait_for_slot_event,
        "C_EjectToken" => fn_eject_token,
        "C_InteractiveLogin" => fn_interactive_login,
        "C_GetUnmanagedStructSizeList" => fn_get_unmanaged_struct_size_list,
    )
}

/// [entry_points] for a profile known only at runtime
pub fn entries_for(
    profile: PlatformProfile,
) -> Vec<(&'static str, *const c_void)> {
    match (profile.word, profile.packing) {
        (NativeWord::Width4, PackingMode::Default) => {
            entry_points::<u32, DefaultPacking>()
        }
        (NativeWord::Width4, PackingMode::OneByte) => {
            entry_points::<u32, OneBytePacking>()
        }
        (NativeWord::Width8, PackingMode::Default) => {
            entry_points::<u64, DefaultPacking>()
        }
        (NativeWord::Width8, PackingMode::OneByte) => {
            entry_points::<u64, OneBytePacking>()
        }
    }
}

/* One CK_FUNCTION_LIST per profile, laid out with that profile's
 * packing. Pointers are stored as raw bytes, so read them unaligned. */
static FUNCTION_LISTS: Lazy<Vec<(PlatformProfile, Box<[u8]>)>> =
    Lazy::new(|| {
        PlatformProfile::ALL
            .iter()
            .map(|p| (*p, build_function_list(*p)))
            .collect()
    });

fn build_function_list(profile: PlatformProfile) -> Box<[u8]> {
    let packing = profile.packing;
    let mut list = vec![0u8; function_list_size(packing, LIST_ENTRIES)];
    list[0] = CRYPTOKI_VERSION_MAJOR;
    list[1] = CRYPTOKI_VERSION_MINOR;
    let entries = entries_for(profile);
    for (idx, (_, func)) in entries.iter().take(LIST_ENTRIES).enumerate() {
        let offset = function_pointer_offset(packing, idx);
        let bytes = (*func as usize).to_ne_bytes();
        list[offset..offset + PTR_SIZE].copy_from_slice(&bytes[..PTR_SIZE]);
    }
    list.into_boxed_slice()
}

extern "C" fn fn_get_function_list<W: Word, P: Packing>(
    list: *mut *mut c_void,
) -> W {
    lock().record_call("C_GetFunctionList");
    let profile = profile_of::<W, P>();
    let rv = if list.is_null() {
        CKR_ARGUMENTS_BAD
    } else {
        match FUNCTION_LISTS.iter().find(|(p, _)| *p == profile) {
            Some((_, bytes)) => {
                unsafe { *list = bytes.as_ptr() as *mut c_void };
                CKR_OK
            }
            None => CKR_GENERAL_ERROR,
        }
    };
    W::narrow(rv).unwrap_or_default()
}

type HostWord = std::os::raw::c_ulong;

#[cfg(windows)]
type HostPacking = OneBytePacking;
#[cfg(not(windows))]
type HostPacking = DefaultPacking;

macro_rules! host_exports {
    ($($name:ident => $func:ident ( $($arg:ident : $ty:ty),* );)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $name($($arg: $ty),*) -> HostWord {
                $func::<HostWord, HostPacking>($($arg),*)
            }
        )*
    };
}

type Ulong = HostWord;

host_exports! {
    C_Initialize => fn_initialize(args: *mut c_void);
    C_Finalize => fn_finalize(reserved: *mut c_void);
    C_GetInfo => fn_get_info(info: *mut u8);
    C_GetFunctionList => fn_get_function_list(list: *mut *mut c_void);
    C_GetSlotList => fn_get_slot_list(
        present: u8, list: *mut Ulong, n: *mut Ulong);
    C_GetSlotInfo => fn_get_slot_info(slot: Ulong, info: *mut u8);
    C_GetTokenInfo => fn_get_token_info(slot: Ulong, info: *mut u8);
    C_GetMechanismList => fn_get_mechanism_list(
        slot: Ulong, list: *mut Ulong, n: *mut Ulong);
    C_GetMechanismInfo => fn_get_mechanism_info(
        slot: Ulong, mech: Ulong, info: *mut u8);
    C_InitToken => fn_init_token(
        slot: Ulong, pin: *mut u8, pin_len: Ulong, label: *mut u8);
    C_InitPIN => fn_init_pin(s: Ulong, pin: *mut u8, pin_len: Ulong);
    C_SetPIN => fn_set_pin(
        s: Ulong, old: *mut u8, old_len: Ulong, new: *mut u8, new_len: Ulong);
    C_OpenSession => fn_open_session(
        slot: Ulong, flags: Ulong, app: *mut c_void, notify: *mut c_void,
        s: *mut Ulong);
    C_CloseSession => fn_close_session(s: Ulong);
    C_CloseAllSessions => fn_close_all_sessions(slot: Ulong);
    C_GetSessionInfo => fn_get_session_info(s: Ulong, info: *mut u8);
    C_GetOperationState => fn_get_operation_state(
        s: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_SetOperationState => fn_set_operation_state(
        s: Ulong, state: *mut u8, len: Ulong, enc: Ulong, auth: Ulong);
    C_Login => fn_login(s: Ulong, user: Ulong, pin: *mut u8, pin_len: Ulong);
    C_Logout => fn_logout(s: Ulong);
    C_CreateObject => fn_create_object(
        s: Ulong, tmpl: *mut u8, n: Ulong, obj: *mut Ulong);
    C_CopyObject => fn_copy_object(
        s: Ulong, obj: Ulong, tmpl: *mut u8, n: Ulong, new: *mut Ulong);
    C_DestroyObject => fn_destroy_object(s: Ulong, obj: Ulong);
    C_GetObjectSize => fn_get_object_size(
        s: Ulong, obj: Ulong, size: *mut Ulong);
    C_GetAttributeValue => fn_get_attribute_value(
        s: Ulong, obj: Ulong, tmpl: *mut u8, n: Ulong);
    C_SetAttributeValue => fn_set_attribute_value(
        s: Ulong, obj: Ulong, tmpl: *mut u8, n: Ulong);
    C_FindObjectsInit => fn_find_objects_init(
        s: Ulong, tmpl: *mut u8, n: Ulong);
    C_FindObjects => fn_find_objects(
        s: Ulong, objs: *mut Ulong, max: Ulong, n: *mut Ulong);
    C_FindObjectsFinal => fn_find_objects_final(s: Ulong);
    C_EncryptInit => fn_encrypt_init(s: Ulong, mech: *mut u8, key: Ulong);
    C_Encrypt => fn_encrypt(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_EncryptUpdate => fn_encrypt_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_EncryptFinal => fn_encrypt_final(
        s: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DecryptInit => fn_decrypt_init(s: Ulong, mech: *mut u8, key: Ulong);
    C_Decrypt => fn_decrypt(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DecryptUpdate => fn_decrypt_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DecryptFinal => fn_decrypt_final(
        s: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DigestInit => fn_digest_init(s: Ulong, mech: *mut u8);
    C_Digest => fn_digest(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DigestUpdate => fn_digest_update(s: Ulong, data: *mut u8, len: Ulong);
    C_DigestKey => fn_digest_key(s: Ulong, key: Ulong);
    C_DigestFinal => fn_digest_final(
        s: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_SignInit => fn_sign_init(s: Ulong, mech: *mut u8, key: Ulong);
    C_Sign => fn_sign(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_SignUpdate => fn_sign_update(s: Ulong, data: *mut u8, len: Ulong);
    C_SignFinal => fn_sign_final(s: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_SignRecoverInit => fn_sign_recover_init(
        s: Ulong, mech: *mut u8, key: Ulong);
    C_SignRecover => fn_sign_recover(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_VerifyInit => fn_verify_init(s: Ulong, mech: *mut u8, key: Ulong);
    C_Verify => fn_verify(
        s: Ulong, data: *mut u8, len: Ulong, sig: *mut u8, sig_len: Ulong);
    C_VerifyUpdate => fn_verify_update(s: Ulong, data: *mut u8, len: Ulong);
    C_VerifyFinal => fn_verify_final(s: Ulong, sig: *mut u8, sig_len: Ulong);
    C_VerifyRecoverInit => fn_verify_recover_init(
        s: Ulong, mech: *mut u8, key: Ulong);
    C_VerifyRecover => fn_verify_recover(
        s: Ulong, sig: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DigestEncryptUpdate => fn_digest_encrypt_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DecryptDigestUpdate => fn_decrypt_digest_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_SignEncryptUpdate => fn_sign_encrypt_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_DecryptVerifyUpdate => fn_decrypt_verify_update(
        s: Ulong, data: *mut u8, len: Ulong, out: *mut u8, out_len: *mut Ulong);
    C_GenerateKey => fn_generate_key(
        s: Ulong, mech: *mut u8, tmpl: *mut u8, n: Ulong, key: *mut Ulong);
    C_GenerateKeyPair => fn_generate_key_pair(
        s: Ulong, mech: *mut u8, pub_tmpl: *mut u8, pub_n: Ulong,
        priv_tmpl: *mut u8, priv_n: Ulong, pub_key: *mut Ulong,
        priv_key: *mut Ulong);
    C_WrapKey => fn_wrap_key(
        s: Ulong, mech: *mut u8, wrapping: Ulong, key: Ulong, out: *mut u8,
        out_len: *mut Ulong);
    C_UnwrapKey => fn_unwrap_key(
        s: Ulong, mech: *mut u8, unwrapping: Ulong, wrapped: *mut u8,
        len: Ulong,
        tmpl: *mut u8, n: Ulong, key: *mut Ulong);
    C_DeriveKey => fn_derive_key(
        s: Ulong, mech: *mut u8, base: Ulong, tmpl: *mut u8, n: Ulong,
        key: *mut Ulong);
    C_SeedRandom => fn_seed_random(s: Ulong, seed: *mut u8, len: Ulong);
    C_GenerateRandom => fn_generate_random(s: Ulong, out: *mut u8, len: Ulong);
    C_GetFunctionStatus => fn_get_function_status(s: Ulong);
    C_CancelFunction => fn_cancel_function(s: Ulong);
    C_WaitForSlotEvent => fn_wait_for_slot_event(
        flags: Ulong, slot: *mut Ulong, reserved: *mut c_void);
    C_EjectToken => fn_eject_token(slot: Ulong);
    C_InteractiveLogin => fn_interactive_login(s: Ulong);
    C_GetUnmanagedStructSizeList => fn_get_unmanaged_struct_size_list(
        list: *mut Ulong, n: *mut Ulong);
}

/// Puts the module back in its pristine, uninitialized state
pub fn reset() {
    *lock() = MockState::new();
}

/// How many times the named function was called since the last [reset]
pub fn calls(name: &str) -> usize {
    lock().calls(name)
}

pub fn is_initialized() -> bool {
    lock().initialized
}

/// Flags and reserved string of the last successful `C_Initialize`
pub fn initialize_args() -> (CK_FLAGS, Option<String>) {
    let state = lock();
    (state.init_flags, state.init_reserved.clone())
}

pub fn open_sessions() -> usize {
    lock().sessions.len()
}

pub fn logged_in() -> Option<CK_USER_TYPE> {
    lock().login
}

/// Makes attribute `attr` of `object` grow by `extra` bytes right after
/// its length is queried, the next `times` times
pub fn grow_attribute(
    object: CK_OBJECT_HANDLE,
    attr: CK_ATTRIBUTE_TYPE,
    extra: usize,
    times: usize,
) {
    lock().set_growth(object, attr, extra, times);
}

/// Parameters of the last `CKM_AES_GCM` operation, as the module read them
pub fn last_gcm() -> Option<GcmSeen> {
    lock().last_gcm.clone()
}

pub fn object_attribute(
    object: CK_OBJECT_HANDLE,
    attr: CK_ATTRIBUTE_TYPE,
) -> Option<StoredValue> {
    let state = lock();
    state.objects.get(&object).and_then(|o| o.get(attr).cloned())
}

pub fn object_count() -> usize {
    lock().objects.len()
}

pub fn push_slot_event(slot: CK_SLOT_ID) {
    lock().events.push_back(slot);
}

/// Puts the token back after an eject
pub fn insert_token() {
    let mut state = lock();
    state.token_present = true;
    state.events.push_back(SLOT_ID);
}

pub fn token_label() -> String {
    let state = lock();
    String::from_utf8_lossy(&state.label).trim_end().to_string()
}
