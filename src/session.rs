// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Sessions and the operations run on them
//!
//! Operations that return data of unknown length use the two call
//! protocol: the module is first asked for the length with a NULL buffer,
//! then called again with a buffer of that size.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::attribute::{
    AttrType, Attribute, AttributeSlot, MarshaledTemplate,
};
use crate::context::Inner;
use crate::error::{ck_ok, Result};
use crate::lowlevel::Cryptoki;
use crate::mechanism::{
    KeyMatOutput, MarshaledMechanism, MarshaledParams, Mechanism,
    MechanismParams, WtlsKeyMatOutput,
};
use crate::types::{SessionInfo, Version};
use crate::{err_rv, usage_err};

use log::{debug, error, warn};
use pkcs11::*;
use zeroize::Zeroizing;

const FIND_BATCH: usize = 32;

/// Two-phase fetch of a byte string
fn fetch_bytes(
    function: &'static str,
    mut call: impl FnMut(Option<&mut [u8]>, &mut CK_ULONG) -> Result<CK_RV>,
) -> Result<Vec<u8>> {
    let mut len: CK_ULONG = 0;
    ck_ok(function, call(None, &mut len)?)?;
    let mut out = vec![0u8; usize::try_from(len)?];
    ck_ok(function, call(Some(&mut out), &mut len)?)?;
    let len = usize::try_from(len)?;
    if len > out.len() {
        return usage_err!(
            "{} reported {} bytes written into a {} bytes buffer",
            function,
            len,
            out.len()
        );
    }
    out.truncate(len);
    Ok(out)
}

/* Per attribute failures still return the other attributes */
fn attribute_rv(rv: CK_RV) -> Result<()> {
    match rv {
        CKR_OK | CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID => Ok(()),
        _ => err_rv!("C_GetAttributeValue", rv),
    }
}

/// An open session, closed on drop
pub struct Session {
    inner: Arc<Inner>,
    handle: CK_SESSION_HANDLE,
    slot: CK_SLOT_ID,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("slot", &self.slot)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        inner: Arc<Inner>,
        handle: CK_SESSION_HANDLE,
        slot: CK_SLOT_ID,
        closed: Arc<AtomicBool>,
    ) -> Session {
        Session {
            inner: inner,
            handle: handle,
            slot: slot,
            closed: closed,
        }
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn slot_id(&self) -> CK_SLOT_ID {
        self.slot
    }

    pub fn profile(&self) -> PlatformProfile {
        self.inner.profile()
    }

    pub fn low_level(&self) -> &dyn Cryptoki {
        self.inner.raw()
    }

    /// The call surface, refused once the module is finalized
    pub(crate) fn ll(&self) -> Result<&dyn Cryptoki> {
        self.inner.ll()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The handle, as long as the session is open: a closed handle may
    /// have been reused by the module for somebody else's session
    pub(crate) fn live_handle(&self) -> Result<CK_SESSION_HANDLE> {
        if self.is_closed() {
            return usage_err!("session {} is closed", self.handle);
        }
        Ok(self.handle)
    }

    /// Closes the session, closing again is a no-op
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.unregister(self.handle);
        debug!("closing session {}", self.handle);
        ck_ok(
            "C_CloseSession",
            self.inner.ll()?.c_close_session(self.handle)?,
        )
    }

    /// Marshals a mechanism for the profile of this session
    pub fn marshal(
        &self,
        mechanism: &Mechanism,
    ) -> Result<MarshaledMechanism> {
        mechanism.marshal(self.profile())
    }

    fn template(&self, attrs: &[Attribute]) -> Result<MarshaledTemplate> {
        MarshaledTemplate::new(attrs, self.profile())
    }

    fn mechanism_call(
        &self,
        function: &'static str,
        mechanism: &Mechanism,
        call: impl FnOnce(
            &dyn Cryptoki,
            CK_SESSION_HANDLE,
            &MarshaledMechanism,
        ) -> Result<CK_RV>,
    ) -> Result<()> {
        let handle = self.live_handle()?;
        let marshaled = self.marshal(mechanism)?;
        ck_ok(function, call(self.inner.ll()?, handle, &marshaled)?)
    }

    fn output_call(
        &self,
        function: &'static str,
        mut call: impl FnMut(
            &dyn Cryptoki,
            CK_SESSION_HANDLE,
            Option<&mut [u8]>,
            &mut CK_ULONG,
        ) -> Result<CK_RV>,
    ) -> Result<Vec<u8>> {
        let handle = self.live_handle()?;
        let ll = self.inner.ll()?;
        fetch_bytes(function, |out, len| call(ll, handle, out, len))
    }

    fn input_call(
        &self,
        function: &'static str,
        call: impl FnOnce(&dyn Cryptoki, CK_SESSION_HANDLE) -> Result<CK_RV>,
    ) -> Result<()> {
        let handle = self.live_handle()?;
        ck_ok(function, call(self.inner.ll()?, handle)?)
    }

    pub fn get_session_info(&self) -> Result<SessionInfo> {
        let mut info = SessionInfo::default();
        self.input_call("C_GetSessionInfo", |ll, h| {
            ll.c_get_session_info(h, &mut info)
        })?;
        Ok(info)
    }

    /// Logs in, `None` as PIN uses the protected authentication path
    pub fn login(
        &self,
        user_type: CK_USER_TYPE,
        pin: Option<&str>,
    ) -> Result<()> {
        let pin = pin.map(|p| Zeroizing::new(p.as_bytes().to_vec()));
        self.input_call("C_Login", |ll, h| {
            ll.c_login(h, user_type, pin.as_ref().map(|p| p.as_slice()))
        })
    }

    pub fn logout(&self) -> Result<()> {
        self.input_call("C_Logout", |ll, h| ll.c_logout(h))
    }

    pub fn init_pin(&self, pin: Option<&str>) -> Result<()> {
        let pin = pin.map(|p| Zeroizing::new(p.as_bytes().to_vec()));
        self.input_call("C_InitPIN", |ll, h| {
            ll.c_init_pin(h, pin.as_ref().map(|p| p.as_slice()))
        })
    }

    pub fn set_pin(&self, old_pin: &str, new_pin: &str) -> Result<()> {
        let old = Zeroizing::new(old_pin.as_bytes().to_vec());
        let new = Zeroizing::new(new_pin.as_bytes().to_vec());
        self.input_call("C_SetPIN", |ll, h| ll.c_set_pin(h, &old, &new))
    }

    pub fn get_operation_state(&self) -> Result<Vec<u8>> {
        self.output_call("C_GetOperationState", |ll, h, out, len| {
            ll.c_get_operation_state(h, out, len)
        })
    }

    pub fn set_operation_state(
        &self,
        state: &[u8],
        encryption_key: CK_OBJECT_HANDLE,
        authentication_key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.input_call("C_SetOperationState", |ll, h| {
            ll.c_set_operation_state(
                h,
                state,
                encryption_key,
                authentication_key,
            )
        })
    }

    pub fn create_object(
        &self,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let tmpl = self.template(template)?;
        let mut object = CK_INVALID_HANDLE;
        self.input_call("C_CreateObject", |ll, h| {
            ll.c_create_object(h, &tmpl, &mut object)
        })?;
        Ok(object)
    }

    pub fn copy_object(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let tmpl = self.template(template)?;
        let mut copy = CK_INVALID_HANDLE;
        self.input_call("C_CopyObject", |ll, h| {
            ll.c_copy_object(h, object, &tmpl, &mut copy)
        })?;
        Ok(copy)
    }

    pub fn destroy_object(&self, object: CK_OBJECT_HANDLE) -> Result<()> {
        self.input_call("C_DestroyObject", |ll, h| {
            ll.c_destroy_object(h, object)
        })
    }

    pub fn get_object_size(
        &self,
        object: CK_OBJECT_HANDLE,
    ) -> Result<CK_ULONG> {
        let mut size: CK_ULONG = 0;
        self.input_call("C_GetObjectSize", |ll, h| {
            ll.c_get_object_size(h, object, &mut size)
        })?;
        Ok(size)
    }

    /* Length query, slots get a buffer of the reported size */
    fn query_attributes(
        &self,
        handle: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<AttributeSlot>> {
        let mut slots: Vec<AttributeSlot> =
            types.iter().map(|t| AttributeSlot::query(*t)).collect();
        attribute_rv(self.inner.ll()?.c_get_attribute_value(
            handle,
            object,
            &mut slots,
        )?)?;
        for slot in slots.iter_mut() {
            if slot.is_available() {
                let len = usize::try_from(slot.len)?;
                slot.buffer = Some(Zeroizing::new(vec![0u8; len]));
            }
        }
        Ok(slots)
    }

    /* A nested template comes back as a CK_ATTRIBUTE array of types and
     * lengths, its values are fetched in a second round */
    fn fetch_nested(
        &self,
        handle: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        slots: &mut [AttributeSlot],
    ) -> Result<()> {
        let profile = self.profile();
        let mut index = Vec::new();
        let mut nested = Vec::new();
        for (i, slot) in slots.iter().enumerate() {
            if slot.is_available()
                && slot.buffer.is_some()
                && AttrType::attr_id_to_attrtype(slot.attr_type)
                    == Some(AttrType::TemplateType)
            {
                index.push(i);
                nested.push(slot.expand_nested(profile)?);
            }
        }
        if nested.is_empty() {
            return Ok(());
        }
        attribute_rv(self.inner.ll()?.c_get_attribute_value(
            handle,
            object,
            &mut nested,
        )?)?;
        for (i, slot) in index.into_iter().zip(nested) {
            slots[i] = slot;
        }
        Ok(())
    }

    /// Raw attribute values, unavailable ones (sensitive or invalid) have
    /// no buffer and a length of `CK_UNAVAILABLE_INFORMATION`
    ///
    /// If the module reports a buffer too small on the fetch, the lengths
    /// are queried again and the fetch repeated once. Nested templates
    /// have their entries in `nested` rather than a buffer.
    pub fn get_attribute_slots(
        &self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<AttributeSlot>> {
        let handle = self.live_handle()?;
        let ll = self.inner.ll()?;
        let mut slots = self.query_attributes(handle, object, types)?;
        let mut rv = ll.c_get_attribute_value(handle, object, &mut slots)?;
        if rv == CKR_BUFFER_TOO_SMALL {
            warn!(
                "attribute lengths of object {} changed, retrying once",
                object
            );
            slots = self.query_attributes(handle, object, types)?;
            rv = ll.c_get_attribute_value(handle, object, &mut slots)?;
        }
        attribute_rv(rv)?;
        self.fetch_nested(handle, object, &mut slots)?;
        Ok(slots)
    }

    /// Decoded attribute values, unavailable attributes are left out
    pub fn get_attribute_value(
        &self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<Attribute>> {
        let word = self.profile().word;
        let mut attrs = Vec::with_capacity(types.len());
        for slot in self.get_attribute_slots(object, types)? {
            if !slot.is_available() {
                continue;
            }
            attrs.push(Attribute::decode(&slot, word)?);
        }
        Ok(attrs)
    }

    pub fn set_attribute_value(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<()> {
        let tmpl = self.template(template)?;
        self.input_call("C_SetAttributeValue", |ll, h| {
            ll.c_set_attribute_value(h, object, &tmpl)
        })
    }

    fn find_batches(
        &self,
        handle: CK_SESSION_HANDLE,
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let ll = self.inner.ll()?;
        let mut objects = Vec::new();
        let mut batch = [CK_INVALID_HANDLE; FIND_BATCH];
        while objects.len() < max {
            let want = FIND_BATCH.min(max - objects.len());
            let mut count: CK_ULONG = 0;
            ck_ok(
                "C_FindObjects",
                ll.c_find_objects(handle, &mut batch[..want], &mut count)?,
            )?;
            let found = usize::try_from(count)?.min(want);
            objects.extend_from_slice(&batch[..found]);
            if found < want {
                break;
            }
        }
        Ok(objects)
    }

    /// Up to `max` objects matching the template, the search is always
    /// finalized
    pub fn find_objects(
        &self,
        template: &[Attribute],
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let handle = self.live_handle()?;
        let tmpl = self.template(template)?;
        let ll = self.inner.ll()?;
        ck_ok("C_FindObjectsInit", ll.c_find_objects_init(handle, &tmpl)?)?;
        let found = self.find_batches(handle, max);
        let final_rv = ll.c_find_objects_final(handle);
        let objects = found?;
        ck_ok("C_FindObjectsFinal", final_rv?)?;
        Ok(objects)
    }

    pub fn encrypt_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_EncryptInit", mechanism, |ll, h, m| {
            ll.c_encrypt_init(h, m, key)
        })
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_Encrypt", |ll, h, out, len| {
            ll.c_encrypt(h, data, out, len)
        })
    }

    pub fn encrypt_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_EncryptUpdate", |ll, h, out, len| {
            ll.c_encrypt_update(h, part, out, len)
        })
    }

    pub fn encrypt_final(&self) -> Result<Vec<u8>> {
        self.output_call("C_EncryptFinal", |ll, h, out, len| {
            ll.c_encrypt_final(h, out, len)
        })
    }

    pub fn decrypt_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_DecryptInit", mechanism, |ll, h, m| {
            ll.c_decrypt_init(h, m, key)
        })
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_Decrypt", |ll, h, out, len| {
            ll.c_decrypt(h, data, out, len)
        })
    }

    pub fn decrypt_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_DecryptUpdate", |ll, h, out, len| {
            ll.c_decrypt_update(h, part, out, len)
        })
    }

    pub fn decrypt_final(&self) -> Result<Vec<u8>> {
        self.output_call("C_DecryptFinal", |ll, h, out, len| {
            ll.c_decrypt_final(h, out, len)
        })
    }

    pub fn digest_init(&self, mechanism: &Mechanism) -> Result<()> {
        self.mechanism_call("C_DigestInit", mechanism, |ll, h, m| {
            ll.c_digest_init(h, m)
        })
    }

    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_Digest", |ll, h, out, len| {
            ll.c_digest(h, data, out, len)
        })
    }

    pub fn digest_update(&self, part: &[u8]) -> Result<()> {
        self.input_call("C_DigestUpdate", |ll, h| ll.c_digest_update(h, part))
    }

    pub fn digest_key(&self, key: CK_OBJECT_HANDLE) -> Result<()> {
        self.input_call("C_DigestKey", |ll, h| ll.c_digest_key(h, key))
    }

    pub fn digest_final(&self) -> Result<Vec<u8>> {
        self.output_call("C_DigestFinal", |ll, h, out, len| {
            ll.c_digest_final(h, out, len)
        })
    }

    pub fn sign_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_SignInit", mechanism, |ll, h, m| {
            ll.c_sign_init(h, m, key)
        })
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_Sign", |ll, h, out, len| {
            ll.c_sign(h, data, out, len)
        })
    }

    pub fn sign_update(&self, part: &[u8]) -> Result<()> {
        self.input_call("C_SignUpdate", |ll, h| ll.c_sign_update(h, part))
    }

    pub fn sign_final(&self) -> Result<Vec<u8>> {
        self.output_call("C_SignFinal", |ll, h, out, len| {
            ll.c_sign_final(h, out, len)
        })
    }

    pub fn sign_recover_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_SignRecoverInit", mechanism, |ll, h, m| {
            ll.c_sign_recover_init(h, m, key)
        })
    }

    pub fn sign_recover(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_SignRecover", |ll, h, out, len| {
            ll.c_sign_recover(h, data, out, len)
        })
    }

    pub fn verify_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_VerifyInit", mechanism, |ll, h, m| {
            ll.c_verify_init(h, m, key)
        })
    }

    /// A bad signature is an error with `CKR_SIGNATURE_INVALID`
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        self.input_call("C_Verify", |ll, h| ll.c_verify(h, data, signature))
    }

    pub fn verify_update(&self, part: &[u8]) -> Result<()> {
        self.input_call("C_VerifyUpdate", |ll, h| ll.c_verify_update(h, part))
    }

    pub fn verify_final(&self, signature: &[u8]) -> Result<()> {
        self.input_call("C_VerifyFinal", |ll, h| {
            ll.c_verify_final(h, signature)
        })
    }

    pub fn verify_recover_init(
        &self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.mechanism_call("C_VerifyRecoverInit", mechanism, |ll, h, m| {
            ll.c_verify_recover_init(h, m, key)
        })
    }

    pub fn verify_recover(&self, signature: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_VerifyRecover", |ll, h, out, len| {
            ll.c_verify_recover(h, signature, out, len)
        })
    }

    pub fn digest_encrypt_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_DigestEncryptUpdate", |ll, h, out, len| {
            ll.c_digest_encrypt_update(h, part, out, len)
        })
    }

    pub fn decrypt_digest_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_DecryptDigestUpdate", |ll, h, out, len| {
            ll.c_decrypt_digest_update(h, part, out, len)
        })
    }

    pub fn sign_encrypt_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_SignEncryptUpdate", |ll, h, out, len| {
            ll.c_sign_encrypt_update(h, part, out, len)
        })
    }

    pub fn decrypt_verify_update(&self, part: &[u8]) -> Result<Vec<u8>> {
        self.output_call("C_DecryptVerifyUpdate", |ll, h, out, len| {
            ll.c_decrypt_verify_update(h, part, out, len)
        })
    }

    pub fn generate_key(
        &self,
        mechanism: &Mechanism,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let tmpl = self.template(template)?;
        let mut key = CK_INVALID_HANDLE;
        self.mechanism_call("C_GenerateKey", mechanism, |ll, h, m| {
            ll.c_generate_key(h, m, &tmpl, &mut key)
        })?;
        Ok(key)
    }

    /// Returns the public and the private key handles
    pub fn generate_key_pair(
        &self,
        mechanism: &Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let pub_tmpl = self.template(public_template)?;
        let priv_tmpl = self.template(private_template)?;
        let mut public_key = CK_INVALID_HANDLE;
        let mut private_key = CK_INVALID_HANDLE;
        self.mechanism_call("C_GenerateKeyPair", mechanism, |ll, h, m| {
            ll.c_generate_key_pair(
                h,
                m,
                &pub_tmpl,
                &priv_tmpl,
                &mut public_key,
                &mut private_key,
            )
        })?;
        Ok((public_key, private_key))
    }

    pub fn wrap_key(
        &self,
        mechanism: &Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> Result<Vec<u8>> {
        let marshaled = self.marshal(mechanism)?;
        self.output_call("C_WrapKey", |ll, h, out, len| {
            ll.c_wrap_key(h, &marshaled, wrapping_key, key, out, len)
        })
    }

    pub fn unwrap_key(
        &self,
        mechanism: &Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let tmpl = self.template(template)?;
        let mut key = CK_INVALID_HANDLE;
        self.mechanism_call("C_UnwrapKey", mechanism, |ll, h, m| {
            ll.c_unwrap_key(h, m, unwrapping_key, wrapped_key, &tmpl, &mut key)
        })?;
        Ok(key)
    }

    /// Derives a key. Mechanisms that return results through their
    /// parameters are refused here, they have dedicated calls that read
    /// those results back
    pub fn derive_key(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        if mechanism.params.writes_back() {
            return usage_err!(
                "{} returns its results in the parameters",
                mechanism.name()
            );
        }
        let marshaled = self.marshal(mechanism)?;
        self.derive_key_with(&marshaled, base_key, template)
    }

    fn derive_and_read<T>(
        &self,
        mechanism: &Mechanism,
        accepted: bool,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
        read: impl FnOnce(&mut MarshaledParams) -> Result<T>,
    ) -> Result<(CK_OBJECT_HANDLE, T)> {
        if !accepted {
            return usage_err!(
                "{} parameters do not fit this derivation",
                mechanism.name()
            );
        }
        let mut marshaled = self.marshal(mechanism)?;
        let key = self.derive_key_with(&marshaled, base_key, template)?;
        let output = read(marshaled.params_mut())?;
        Ok((key, output))
    }

    /// SSL3 or TLS 1.2 master key derivation, returns the key and the
    /// protocol version the module reported
    pub fn derive_master_key(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<(CK_OBJECT_HANDLE, Version)> {
        let accepted = matches!(
            mechanism.params,
            MechanismParams::Ssl3MasterKeyDerive(_)
                | MechanismParams::Tls12MasterKeyDerive(_)
        );
        self.derive_and_read(mechanism, accepted, base_key, template, |p| {
            p.version()
        })
    }

    /// SSL3 or TLS 1.2 key and MAC derivation
    pub fn derive_key_material(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<KeyMatOutput> {
        let accepted = matches!(
            mechanism.params,
            MechanismParams::Ssl3KeyMat(_) | MechanismParams::Tls12KeyMat(_)
        );
        let (_, out) = self.derive_and_read(
            mechanism,
            accepted,
            base_key,
            template,
            |p| p.take_key_material(),
        )?;
        Ok(out)
    }

    pub fn derive_wtls_key_material(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<WtlsKeyMatOutput> {
        let accepted =
            matches!(mechanism.params, MechanismParams::WtlsKeyMat(_));
        let (_, out) = self.derive_and_read(
            mechanism,
            accepted,
            base_key,
            template,
            |p| p.take_wtls_key_material(),
        )?;
        Ok(out)
    }

    /// Runs `CKM_TLS_PRF` and returns its output
    pub fn tls_prf(
        &self,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
    ) -> Result<Vec<u8>> {
        let accepted = matches!(mechanism.params, MechanismParams::TlsPrf(_));
        let (_, out) =
            self.derive_and_read(mechanism, accepted, base_key, &[], |p| {
                p.prf_output()
            })?;
        Ok(out)
    }

    /// Derives with parameters marshaled by the caller, for mechanisms
    /// the module writes results back into (see [Session::marshal])
    pub fn derive_key_with(
        &self,
        mechanism: &MarshaledMechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let tmpl = self.template(template)?;
        let mut key = CK_INVALID_HANDLE;
        self.input_call("C_DeriveKey", |ll, h| {
            ll.c_derive_key(h, mechanism, base_key, &tmpl, &mut key)
        })?;
        Ok(key)
    }

    pub fn seed_random(&self, seed: &[u8]) -> Result<()> {
        self.input_call("C_SeedRandom", |ll, h| ll.c_seed_random(h, seed))
    }

    pub fn generate_random(&self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.input_call("C_GenerateRandom", |ll, h| {
            ll.c_generate_random(h, &mut out)
        })?;
        Ok(out)
    }

    /// Legacy parallel function management, the status is returned as is
    pub fn get_function_status(&self) -> Result<CK_RV> {
        self.inner.ll()?.c_get_function_status(self.live_handle()?)
    }

    pub fn cancel_function(&self) -> Result<CK_RV> {
        self.inner.ll()?.c_cancel_function(self.live_handle()?)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close session {}: {}", self.handle, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_bytes_two_calls() {
        let payload = b"ciphertext";
        let mut calls = 0;
        let out = fetch_bytes("C_Encrypt", |out, len| {
            calls += 1;
            match out {
                None => *len = payload.len() as CK_ULONG,
                Some(buf) => {
                    buf[..payload.len()].copy_from_slice(payload);
                    *len = payload.len() as CK_ULONG;
                }
            }
            Ok(CKR_OK)
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(out, payload);
    }

    #[test]
    fn fetch_bytes_error_names_function() {
        let err = fetch_bytes("C_Sign", |_, _| Ok(CKR_KEY_HANDLE_INVALID))
            .unwrap_err();
        assert!(err.is_rv(CKR_KEY_HANDLE_INVALID));
        assert_eq!(err.function(), Some("C_Sign"));
    }

    #[test]
    fn attribute_statuses() {
        assert!(attribute_rv(CKR_ATTRIBUTE_SENSITIVE).is_ok());
        assert!(attribute_rv(CKR_BUFFER_TOO_SMALL)
            .unwrap_err()
            .is_rv(CKR_BUFFER_TOO_SMALL));
    }
}
