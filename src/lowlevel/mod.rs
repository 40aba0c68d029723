// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The low level call surface
//!
//! [Cryptoki] mirrors the cryptoki API one function at a time. Arguments
//! and results use logical values (`CK_ULONG` is always 64 bit here) and
//! the implementation, [LowLevel], narrows them to the native word of the
//! module and lays structures out with the packing of the module.
//!
//! Every method returns the raw `CK_RV` of the module as `Ok(rv)`, an
//! `Err` means the call never reached the module: a value did not fit the
//! native word, the entry point is missing, the module was unloaded or
//! the marshaled arguments were built for a different profile.
//!
//! Functions with variable length output take an optional buffer and a
//! length: without a buffer the module reports the length it needs, with
//! a buffer the length in is the buffer size and the length out is what
//! the module wrote (or needs, with `CKR_BUFFER_TOO_SMALL`).

use std::ffi::CString;
use std::sync::Arc;

use crate::attribute::{AttributeSlot, MarshaledTemplate};
use crate::error::Result;
use crate::functions::VendorFunctions;
use crate::mechanism::MarshaledMechanism;
use crate::types::{
    Info, InitializeFlags, MechanismInfo, SessionInfo, SlotInfo, TokenInfo,
};

use pkcs11::*;

mod calls;

pub use calls::LowLevel;

pub type LowLevel4 = LowLevel<u32, DefaultPacking>;
pub type LowLevel4Packed = LowLevel<u32, OneBytePacking>;
pub type LowLevel8 = LowLevel<u64, DefaultPacking>;
pub type LowLevel8Packed = LowLevel<u64, OneBytePacking>;

/// Contents of `CK_C_INITIALIZE_ARGS`, the mutex callbacks are never
/// provided
#[derive(Clone, Debug, Default)]
pub struct InitializeArgs {
    pub flags: InitializeFlags,
    pub reserved: Option<CString>,
}

pub trait Cryptoki: Send + Sync {
    /// The profile structures are laid out with
    fn profile(&self) -> PlatformProfile;

    fn is_loaded(&self) -> bool;

    /// Releases the module, every further call fails
    fn unload(&self) -> Result<()>;

    /// Optional entry points resolved at load time
    fn vendor(&self) -> Result<Arc<VendorFunctions>>;

    fn c_initialize(&self, args: Option<&InitializeArgs>) -> Result<CK_RV>;
    fn c_finalize(&self) -> Result<CK_RV>;
    fn c_get_info(&self, info: &mut Info) -> Result<CK_RV>;

    fn c_get_slot_list(
        &self,
        token_present: bool,
        list: Option<&mut [CK_SLOT_ID]>,
        count: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_get_slot_info(
        &self,
        slot: CK_SLOT_ID,
        info: &mut SlotInfo,
    ) -> Result<CK_RV>;
    fn c_get_token_info(
        &self,
        slot: CK_SLOT_ID,
        info: &mut TokenInfo,
    ) -> Result<CK_RV>;
    fn c_get_mechanism_list(
        &self,
        slot: CK_SLOT_ID,
        list: Option<&mut [CK_MECHANISM_TYPE]>,
        count: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_get_mechanism_info(
        &self,
        slot: CK_SLOT_ID,
        mechanism: CK_MECHANISM_TYPE,
        info: &mut MechanismInfo,
    ) -> Result<CK_RV>;
    fn c_init_token(
        &self,
        slot: CK_SLOT_ID,
        pin: Option<&[u8]>,
        label: &[u8; 32],
    ) -> Result<CK_RV>;
    fn c_init_pin(
        &self,
        session: CK_SESSION_HANDLE,
        pin: Option<&[u8]>,
    ) -> Result<CK_RV>;
    fn c_set_pin(
        &self,
        session: CK_SESSION_HANDLE,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<CK_RV>;

    fn c_open_session(
        &self,
        slot: CK_SLOT_ID,
        flags: CK_FLAGS,
        session: &mut CK_SESSION_HANDLE,
    ) -> Result<CK_RV>;
    fn c_close_session(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV>;
    fn c_close_all_sessions(&self, slot: CK_SLOT_ID) -> Result<CK_RV>;
    fn c_get_session_info(
        &self,
        session: CK_SESSION_HANDLE,
        info: &mut SessionInfo,
    ) -> Result<CK_RV>;
    fn c_get_operation_state(
        &self,
        session: CK_SESSION_HANDLE,
        state: Option<&mut [u8]>,
        state_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_set_operation_state(
        &self,
        session: CK_SESSION_HANDLE,
        state: &[u8],
        encryption_key: CK_OBJECT_HANDLE,
        authentication_key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_login(
        &self,
        session: CK_SESSION_HANDLE,
        user_type: CK_USER_TYPE,
        pin: Option<&[u8]>,
    ) -> Result<CK_RV>;
    fn c_logout(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV>;

    fn c_create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &MarshaledTemplate,
        object: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
        new_object: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_destroy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_get_object_size(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        size: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    /// Each slot without a buffer queries the value length, each slot
    /// with a buffer fetches the value into it
    fn c_get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [AttributeSlot],
    ) -> Result<CK_RV>;
    fn c_set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
    ) -> Result<CK_RV>;
    fn c_find_objects_init(
        &self,
        session: CK_SESSION_HANDLE,
        template: &MarshaledTemplate,
    ) -> Result<CK_RV>;
    fn c_find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        objects: &mut [CK_OBJECT_HANDLE],
        count: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_find_objects_final(&self, session: CK_SESSION_HANDLE)
        -> Result<CK_RV>;

    fn c_encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_encrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_encrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_decrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_decrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;

    fn c_digest_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
    ) -> Result<CK_RV>;
    fn c_digest(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV>;
    fn c_digest_key(
        &self,
        session: CK_SESSION_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_digest_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;

    fn c_sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_sign_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV>;
    fn c_sign_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_sign_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_sign_recover(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;

    fn c_verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_verify(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<CK_RV>;
    fn c_verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV>;
    fn c_verify_final(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
    ) -> Result<CK_RV>;
    fn c_verify_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_verify_recover(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;

    fn c_digest_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_decrypt_digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_sign_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_decrypt_verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;

    fn c_generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        public_template: &MarshaledTemplate,
        private_template: &MarshaledTemplate,
        public_key: &mut CK_OBJECT_HANDLE,
        private_key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV>;
    fn c_unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;
    fn c_derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV>;

    fn c_seed_random(
        &self,
        session: CK_SESSION_HANDLE,
        seed: &[u8],
    ) -> Result<CK_RV>;
    fn c_generate_random(
        &self,
        session: CK_SESSION_HANDLE,
        out: &mut [u8],
    ) -> Result<CK_RV>;
    fn c_get_function_status(&self, session: CK_SESSION_HANDLE)
        -> Result<CK_RV>;
    fn c_cancel_function(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV>;
    fn c_wait_for_slot_event(
        &self,
        flags: CK_FLAGS,
        slot: &mut CK_SLOT_ID,
    ) -> Result<CK_RV>;
}
