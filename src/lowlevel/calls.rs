// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::ffi::c_void;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::null_mut;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::attribute::{AttributeSlot, FetchArray, MarshaledTemplate};
use crate::config::BindMode;
use crate::error::{Error, Result};
use crate::functions::{
    FunctionTable, StaticModule, SymbolSource, VendorFunctions,
};
use crate::loader::NativeLibrary;
use crate::lowlevel::{Cryptoki, InitializeArgs};
use crate::mechanism::MarshaledMechanism;
use crate::memory::{StructBuffer, WordArray};
use crate::types::{Info, MechanismInfo, SessionInfo, SlotInfo, TokenInfo};

use log::{debug, trace};
use pkcs11::layout::{StructDef, StructView};
use pkcs11::profile::profile_of;
use pkcs11::structs::*;
use pkcs11::*;

struct Bound<W: Word> {
    table: FunctionTable<W>,
    vendor: Arc<VendorFunctions>,
    library: Option<NativeLibrary>,
    source: String,
}

/// The binding of one module for the native word `W` and packing `P`
pub struct LowLevel<W: Word, P: Packing> {
    bound: RwLock<Option<Bound<W>>>,
    packing: PhantomData<P>,
}

fn narrow<W: Word>(value: CK_ULONG) -> Result<W> {
    match W::narrow(value) {
        Some(w) => Ok(w),
        None => Err(Error::usage(format!(
            "value {:#x} does not fit a {} byte CK_ULONG",
            value,
            W::WIDTH.size()
        ))),
    }
}

fn narrow_len<W: Word>(len: usize) -> Result<W> {
    narrow(CK_ULONG::try_from(len)?)
}

/* cryptoki takes non-const pointers even for input data */
fn in_ptr(data: &[u8]) -> *mut u8 {
    data.as_ptr() as *mut u8
}

fn out_args<W: Word>(out: Option<&mut [u8]>) -> Result<(*mut u8, W)> {
    match out {
        Some(buf) => Ok((buf.as_mut_ptr(), narrow_len(buf.len())?)),
        None => Ok((null_mut(), W::default())),
    }
}

fn pin_args<W: Word>(pin: Option<&[u8]>) -> Result<(*mut u8, W)> {
    match pin {
        Some(p) => Ok((in_ptr(p), narrow_len(p.len())?)),
        None => Ok((null_mut(), W::default())),
    }
}

fn word_out<W: Word>(
    word: NativeWord,
    list: &Option<&mut [CK_ULONG]>,
) -> Result<(Option<WordArray>, W)> {
    match list {
        Some(l) => {
            let array = WordArray::new(word, l.len())?;
            Ok((Some(array), narrow_len(l.len())?))
        }
        None => Ok((None, W::default())),
    }
}

fn word_ptr<W>(array: &Option<WordArray>) -> *mut W {
    match array {
        Some(a) => a.as_ptr() as *mut W,
        None => null_mut(),
    }
}

fn copy_words(
    list: Option<&mut [CK_ULONG]>,
    array: &Option<WordArray>,
    count: CK_ULONG,
) {
    if let (Some(l), Some(a)) = (list, array) {
        let n = usize::try_from(count).unwrap_or(usize::MAX).min(l.len());
        a.copy_to(&mut l[..n]);
    }
}

/// Calls an entry point of the bound module, evaluates to the `CK_RV`
macro_rules! ck_call {
    ($self:ident, $func:ident ( $($arg:expr),* $(,)? )) => {{
        let guard = $self.bound()?;
        let bound = match guard.as_ref() {
            Some(b) => b,
            None => {
                return Err(Error::usage(format!(
                    "{}: the module was unloaded",
                    stringify!($func)
                )))
            }
        };
        let func = match bound.table.$func {
            Some(f) => f,
            None => {
                return Err(Error::symbol_not_found(
                    stringify!($func),
                    format!("no entry point in {}", bound.source),
                ))
            }
        };
        let rv = unsafe { func($($arg),*) }.widen();
        trace!("{}() = {}", stringify!($func), rv_name(rv));
        rv
    }};
}

/// Functions with a session, some input and a variable length output
macro_rules! output_call {
    ($self:ident, $func:ident, $session:expr, [$($input:expr),*],
     $out:expr, $out_len:expr) => {{
        let session = narrow::<W>($session)?;
        let (optr, mut olen) = out_args::<W>($out)?;
        let rv = ck_call!($self, $func(session, $($input,)* optr, &mut olen));
        *$out_len = olen.widen();
        Ok(rv)
    }};
}

impl<W: Word, P: Packing> LowLevel<W, P> {
    fn with_bound(bound: Bound<W>) -> LowLevel<W, P> {
        debug!(
            "{} bound with the {} profile",
            bound.source,
            profile_of::<W, P>()
        );
        LowLevel {
            bound: RwLock::new(Some(bound)),
            packing: PhantomData,
        }
    }

    /// Loads a module from a shared object
    pub fn load<Q: AsRef<Path>>(
        path: Q,
        mode: BindMode,
        vendor_symbols: &[&'static str],
    ) -> Result<LowLevel<W, P>> {
        let library = NativeLibrary::load(path)?;
        let table = FunctionTable::bind(&library, mode, P::MODE)?;
        let vendor = VendorFunctions::resolve(&library, vendor_symbols);
        Ok(Self::with_bound(Bound {
            table: table,
            vendor: Arc::new(vendor),
            source: library.describe(),
            library: Some(library),
        }))
    }

    /// Binds a module whose entry points are already in the process
    pub fn from_static(
        module: &StaticModule,
        mode: BindMode,
        vendor_symbols: &[&'static str],
    ) -> Result<LowLevel<W, P>> {
        let table = FunctionTable::bind(module, mode, P::MODE)?;
        let vendor = VendorFunctions::resolve(module, vendor_symbols);
        Ok(Self::with_bound(Bound {
            table: table,
            vendor: Arc::new(vendor),
            source: module.describe(),
            library: None,
        }))
    }

    fn bound(&self) -> Result<RwLockReadGuard<'_, Option<Bound<W>>>> {
        self.bound
            .read()
            .map_err(|_| Error::ck_rv(CKR_GENERAL_ERROR))
    }

    fn check_profile(
        &self,
        profile: PlatformProfile,
        what: &str,
    ) -> Result<()> {
        if profile != self.profile() {
            return Err(Error::usage(format!(
                "{} marshaled for the {} profile, the module uses {}",
                what,
                profile,
                self.profile()
            )));
        }
        Ok(())
    }

    fn mechanism_ptr(&self, mechanism: &MarshaledMechanism) -> Result<*mut u8> {
        self.check_profile(mechanism.profile(), "mechanism")?;
        mechanism.as_ptr()
    }

    fn template_args(
        &self,
        template: &MarshaledTemplate,
    ) -> Result<(*mut u8, W)> {
        self.check_profile(template.profile(), "template")?;
        Ok((template.as_ptr(), narrow_len(template.count())?))
    }

    fn info_call<T>(
        &self,
        def: &'static StructDef,
        call: impl FnOnce(*mut u8) -> Result<CK_RV>,
        decode: impl FnOnce(&StructView<&[u8]>) -> T,
        info: &mut T,
    ) -> Result<CK_RV> {
        let buf = StructBuffer::new(def, self.profile())?;
        let rv = call(buf.as_ptr())?;
        if rv == CKR_OK {
            *info = decode(&buf.view());
        }
        Ok(rv)
    }
}

impl<W: Word, P: Packing> Cryptoki for LowLevel<W, P> {
    fn profile(&self) -> PlatformProfile {
        profile_of::<W, P>()
    }

    fn is_loaded(&self) -> bool {
        match self.bound.read() {
            Ok(b) => b.is_some(),
            Err(_) => false,
        }
    }

    fn unload(&self) -> Result<()> {
        let mut guard = self
            .bound
            .write()
            .map_err(|_| Error::ck_rv(CKR_GENERAL_ERROR))?;
        match guard.take() {
            Some(mut bound) => {
                debug!("releasing {}", bound.source);
                match bound.library.take() {
                    Some(mut lib) => lib.unload(),
                    None => Ok(()),
                }
            }
            None => Ok(()),
        }
    }

    fn vendor(&self) -> Result<Arc<VendorFunctions>> {
        match self.bound()?.as_ref() {
            Some(b) => Ok(b.vendor.clone()),
            None => Err(Error::usage(
                "vendor functions of an unloaded module".to_string(),
            )),
        }
    }

    fn c_initialize(&self, args: Option<&InitializeArgs>) -> Result<CK_RV> {
        let block = match args {
            Some(a) => {
                let mut b = StructBuffer::new(
                    &CK_C_INITIALIZE_ARGS::DEF,
                    self.profile(),
                )?;
                let mut view = b.view_mut();
                view.set_ulong(CK_C_INITIALIZE_ARGS::flags, a.flags.bits())?;
                if let Some(ref r) = a.reserved {
                    view.set_ptr(
                        CK_C_INITIALIZE_ARGS::pReserved,
                        r.as_ptr() as *const c_void,
                    );
                }
                Some(b)
            }
            None => None,
        };
        let ptr = match block {
            Some(ref b) => b.as_ptr() as *mut c_void,
            None => null_mut(),
        };
        Ok(ck_call!(self, C_Initialize(ptr)))
    }

    fn c_finalize(&self) -> Result<CK_RV> {
        Ok(ck_call!(self, C_Finalize(null_mut())))
    }

    fn c_get_info(&self, info: &mut Info) -> Result<CK_RV> {
        self.info_call(
            &CK_INFO::DEF,
            |p| Ok(ck_call!(self, C_GetInfo(p))),
            |v| Info::decode(v),
            info,
        )
    }

    fn c_get_slot_list(
        &self,
        token_present: bool,
        list: Option<&mut [CK_SLOT_ID]>,
        count: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let (array, mut n) = word_out::<W>(self.profile().word, &list)?;
        let rv = ck_call!(
            self,
            C_GetSlotList(token_present as u8, word_ptr(&array), &mut n)
        );
        *count = n.widen();
        if rv == CKR_OK {
            copy_words(list, &array, *count);
        }
        Ok(rv)
    }

    fn c_get_slot_info(
        &self,
        slot: CK_SLOT_ID,
        info: &mut SlotInfo,
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        self.info_call(
            &CK_SLOT_INFO::DEF,
            |p| Ok(ck_call!(self, C_GetSlotInfo(slot, p))),
            |v| SlotInfo::decode(v),
            info,
        )
    }

    fn c_get_token_info(
        &self,
        slot: CK_SLOT_ID,
        info: &mut TokenInfo,
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        self.info_call(
            &CK_TOKEN_INFO::DEF,
            |p| Ok(ck_call!(self, C_GetTokenInfo(slot, p))),
            |v| TokenInfo::decode(v),
            info,
        )
    }

    fn c_get_mechanism_list(
        &self,
        slot: CK_SLOT_ID,
        list: Option<&mut [CK_MECHANISM_TYPE]>,
        count: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        let (array, mut n) = word_out::<W>(self.profile().word, &list)?;
        let rv = ck_call!(
            self,
            C_GetMechanismList(slot, word_ptr(&array), &mut n)
        );
        *count = n.widen();
        if rv == CKR_OK {
            copy_words(list, &array, *count);
        }
        Ok(rv)
    }

    fn c_get_mechanism_info(
        &self,
        slot: CK_SLOT_ID,
        mechanism: CK_MECHANISM_TYPE,
        info: &mut MechanismInfo,
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        let mech = narrow::<W>(mechanism)?;
        self.info_call(
            &CK_MECHANISM_INFO::DEF,
            |p| Ok(ck_call!(self, C_GetMechanismInfo(slot, mech, p))),
            |v| MechanismInfo::decode(v),
            info,
        )
    }

    fn c_init_token(
        &self,
        slot: CK_SLOT_ID,
        pin: Option<&[u8]>,
        label: &[u8; 32],
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        let (pin, pin_len) = pin_args::<W>(pin)?;
        Ok(ck_call!(
            self,
            C_InitToken(slot, pin, pin_len, in_ptr(label))
        ))
    }

    fn c_init_pin(
        &self,
        session: CK_SESSION_HANDLE,
        pin: Option<&[u8]>,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let (pin, pin_len) = pin_args::<W>(pin)?;
        Ok(ck_call!(self, C_InitPIN(session, pin, pin_len)))
    }

    fn c_set_pin(
        &self,
        session: CK_SESSION_HANDLE,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let old_len = narrow_len::<W>(old_pin.len())?;
        let new_len = narrow_len::<W>(new_pin.len())?;
        Ok(ck_call!(
            self,
            C_SetPIN(
                session,
                in_ptr(old_pin),
                old_len,
                in_ptr(new_pin),
                new_len
            )
        ))
    }

    fn c_open_session(
        &self,
        slot: CK_SLOT_ID,
        flags: CK_FLAGS,
        session: &mut CK_SESSION_HANDLE,
    ) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        let flags = narrow::<W>(flags)?;
        let mut handle = W::default();
        let rv = ck_call!(
            self,
            C_OpenSession(slot, flags, null_mut(), null_mut(), &mut handle)
        );
        *session = handle.widen();
        Ok(rv)
    }

    fn c_close_session(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        Ok(ck_call!(self, C_CloseSession(session)))
    }

    fn c_close_all_sessions(&self, slot: CK_SLOT_ID) -> Result<CK_RV> {
        let slot = narrow::<W>(slot)?;
        Ok(ck_call!(self, C_CloseAllSessions(slot)))
    }

    fn c_get_session_info(
        &self,
        session: CK_SESSION_HANDLE,
        info: &mut SessionInfo,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        self.info_call(
            &CK_SESSION_INFO::DEF,
            |p| Ok(ck_call!(self, C_GetSessionInfo(session, p))),
            |v| SessionInfo::decode(v),
            info,
        )
    }

    fn c_get_operation_state(
        &self,
        session: CK_SESSION_HANDLE,
        state: Option<&mut [u8]>,
        state_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        output_call!(self, C_GetOperationState, session, [], state, state_len)
    }

    fn c_set_operation_state(
        &self,
        session: CK_SESSION_HANDLE,
        state: &[u8],
        encryption_key: CK_OBJECT_HANDLE,
        authentication_key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(state.len())?;
        let enc = narrow::<W>(encryption_key)?;
        let auth = narrow::<W>(authentication_key)?;
        Ok(ck_call!(
            self,
            C_SetOperationState(session, in_ptr(state), len, enc, auth)
        ))
    }

    fn c_login(
        &self,
        session: CK_SESSION_HANDLE,
        user_type: CK_USER_TYPE,
        pin: Option<&[u8]>,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let user = narrow::<W>(user_type)?;
        let (pin, pin_len) = pin_args::<W>(pin)?;
        Ok(ck_call!(self, C_Login(session, user, pin, pin_len)))
    }

    fn c_logout(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        Ok(ck_call!(self, C_Logout(session)))
    }

    fn c_create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &MarshaledTemplate,
        object: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let (tmpl, count) = self.template_args(template)?;
        let mut handle = W::default();
        let rv =
            ck_call!(self, C_CreateObject(session, tmpl, count, &mut handle));
        *object = handle.widen();
        Ok(rv)
    }

    fn c_copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
        new_object: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let object = narrow::<W>(object)?;
        let (tmpl, count) = self.template_args(template)?;
        let mut handle = W::default();
        let rv = ck_call!(
            self,
            C_CopyObject(session, object, tmpl, count, &mut handle)
        );
        *new_object = handle.widen();
        Ok(rv)
    }

    fn c_destroy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let object = narrow::<W>(object)?;
        Ok(ck_call!(self, C_DestroyObject(session, object)))
    }

    fn c_get_object_size(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        size: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let object = narrow::<W>(object)?;
        let mut native = W::default();
        let rv =
            ck_call!(self, C_GetObjectSize(session, object, &mut native));
        *size = native.widen();
        Ok(rv)
    }

    fn c_get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [AttributeSlot],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let object = narrow::<W>(object)?;
        let count = narrow_len::<W>(template.len())?;
        let array = FetchArray::new(template, self.profile())?;
        let tmpl = array.as_ptr();
        let rv = ck_call!(
            self,
            C_GetAttributeValue(session, object, tmpl, count)
        );
        array.read_lengths(template);
        Ok(rv)
    }

    fn c_set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let object = narrow::<W>(object)?;
        let (tmpl, count) = self.template_args(template)?;
        Ok(ck_call!(
            self,
            C_SetAttributeValue(session, object, tmpl, count)
        ))
    }

    fn c_find_objects_init(
        &self,
        session: CK_SESSION_HANDLE,
        template: &MarshaledTemplate,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let (tmpl, count) = self.template_args(template)?;
        Ok(ck_call!(self, C_FindObjectsInit(session, tmpl, count)))
    }

    fn c_find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        objects: &mut [CK_OBJECT_HANDLE],
        count: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let list = Some(objects);
        let (array, max) = word_out::<W>(self.profile().word, &list)?;
        let mut n = W::default();
        let rv = ck_call!(
            self,
            C_FindObjects(session, word_ptr(&array), max, &mut n)
        );
        *count = n.widen();
        if rv == CKR_OK {
            copy_words(list, &array, *count);
        }
        Ok(rv)
    }

    fn c_find_objects_final(
        &self,
        session: CK_SESSION_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        Ok(ck_call!(self, C_FindObjectsFinal(session)))
    }

    fn c_encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_EncryptInit(session, mech, key)))
    }

    fn c_encrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(data.len())?;
        output_call!(
            self,
            C_Encrypt,
            session,
            [in_ptr(data), len],
            out,
            out_len
        )
    }

    fn c_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_EncryptUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_encrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        output_call!(self, C_EncryptFinal, session, [], out, out_len)
    }

    fn c_decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_DecryptInit(session, mech, key)))
    }

    fn c_decrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(data.len())?;
        output_call!(
            self,
            C_Decrypt,
            session,
            [in_ptr(data), len],
            out,
            out_len
        )
    }

    fn c_decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_DecryptUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_decrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        output_call!(self, C_DecryptFinal, session, [], out, out_len)
    }

    fn c_digest_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        Ok(ck_call!(self, C_DigestInit(session, mech)))
    }

    fn c_digest(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(data.len())?;
        output_call!(self, C_Digest, session, [in_ptr(data), len], out, out_len)
    }

    fn c_digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(part.len())?;
        Ok(ck_call!(self, C_DigestUpdate(session, in_ptr(part), len)))
    }

    fn c_digest_key(
        &self,
        session: CK_SESSION_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_DigestKey(session, key)))
    }

    fn c_digest_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        output_call!(self, C_DigestFinal, session, [], out, out_len)
    }

    fn c_sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_SignInit(session, mech, key)))
    }

    fn c_sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(data.len())?;
        output_call!(self, C_Sign, session, [in_ptr(data), len], out, out_len)
    }

    fn c_sign_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(part.len())?;
        Ok(ck_call!(self, C_SignUpdate(session, in_ptr(part), len)))
    }

    fn c_sign_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        output_call!(self, C_SignFinal, session, [], out, out_len)
    }

    fn c_sign_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_SignRecoverInit(session, mech, key)))
    }

    fn c_sign_recover(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(data.len())?;
        output_call!(
            self,
            C_SignRecover,
            session,
            [in_ptr(data), len],
            out,
            out_len
        )
    }

    fn c_verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_VerifyInit(session, mech, key)))
    }

    fn c_verify(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let data_len = narrow_len::<W>(data.len())?;
        let sig_len = narrow_len::<W>(signature.len())?;
        Ok(ck_call!(
            self,
            C_Verify(
                session,
                in_ptr(data),
                data_len,
                in_ptr(signature),
                sig_len
            )
        ))
    }

    fn c_verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(part.len())?;
        Ok(ck_call!(self, C_VerifyUpdate(session, in_ptr(part), len)))
    }

    fn c_verify_final(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(signature.len())?;
        Ok(ck_call!(self, C_VerifyFinal(session, in_ptr(signature), len)))
    }

    fn c_verify_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let key = narrow::<W>(key)?;
        Ok(ck_call!(self, C_VerifyRecoverInit(session, mech, key)))
    }

    fn c_verify_recover(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(signature.len())?;
        output_call!(
            self,
            C_VerifyRecover,
            session,
            [in_ptr(signature), len],
            out,
            out_len
        )
    }

    fn c_digest_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_DigestEncryptUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_decrypt_digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_DecryptDigestUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_sign_encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_SignEncryptUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_decrypt_verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        part: &[u8],
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let len = narrow_len::<W>(part.len())?;
        output_call!(
            self,
            C_DecryptVerifyUpdate,
            session,
            [in_ptr(part), len],
            out,
            out_len
        )
    }

    fn c_generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let (tmpl, count) = self.template_args(template)?;
        let mut handle = W::default();
        let rv = ck_call!(
            self,
            C_GenerateKey(session, mech, tmpl, count, &mut handle)
        );
        *key = handle.widen();
        Ok(rv)
    }

    fn c_generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        public_template: &MarshaledTemplate,
        private_template: &MarshaledTemplate,
        public_key: &mut CK_OBJECT_HANDLE,
        private_key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let (pub_tmpl, pub_count) = self.template_args(public_template)?;
        let (priv_tmpl, priv_count) = self.template_args(private_template)?;
        let mut pub_handle = W::default();
        let mut priv_handle = W::default();
        let rv = ck_call!(
            self,
            C_GenerateKeyPair(
                session,
                mech,
                pub_tmpl,
                pub_count,
                priv_tmpl,
                priv_count,
                &mut pub_handle,
                &mut priv_handle
            )
        );
        *public_key = pub_handle.widen();
        *private_key = priv_handle.widen();
        Ok(rv)
    }

    fn c_wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        out: Option<&mut [u8]>,
        out_len: &mut CK_ULONG,
    ) -> Result<CK_RV> {
        let mech = self.mechanism_ptr(mechanism)?;
        let wrapping = narrow::<W>(wrapping_key)?;
        let key = narrow::<W>(key)?;
        output_call!(
            self,
            C_WrapKey,
            session,
            [mech, wrapping, key],
            out,
            out_len
        )
    }

    fn c_unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let unwrapping = narrow::<W>(unwrapping_key)?;
        let wrapped_len = narrow_len::<W>(wrapped_key.len())?;
        let (tmpl, count) = self.template_args(template)?;
        let mut handle = W::default();
        let rv = ck_call!(
            self,
            C_UnwrapKey(
                session,
                mech,
                unwrapping,
                in_ptr(wrapped_key),
                wrapped_len,
                tmpl,
                count,
                &mut handle
            )
        );
        *key = handle.widen();
        Ok(rv)
    }

    fn c_derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MarshaledMechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &MarshaledTemplate,
        key: &mut CK_OBJECT_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let mech = self.mechanism_ptr(mechanism)?;
        let base = narrow::<W>(base_key)?;
        let (tmpl, count) = self.template_args(template)?;
        let mut handle = W::default();
        let rv = ck_call!(
            self,
            C_DeriveKey(session, mech, base, tmpl, count, &mut handle)
        );
        *key = handle.widen();
        Ok(rv)
    }

    fn c_seed_random(
        &self,
        session: CK_SESSION_HANDLE,
        seed: &[u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(seed.len())?;
        Ok(ck_call!(self, C_SeedRandom(session, in_ptr(seed), len)))
    }

    fn c_generate_random(
        &self,
        session: CK_SESSION_HANDLE,
        out: &mut [u8],
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        let len = narrow_len::<W>(out.len())?;
        Ok(ck_call!(
            self,
            C_GenerateRandom(session, out.as_mut_ptr(), len)
        ))
    }

    fn c_get_function_status(
        &self,
        session: CK_SESSION_HANDLE,
    ) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        Ok(ck_call!(self, C_GetFunctionStatus(session)))
    }

    fn c_cancel_function(&self, session: CK_SESSION_HANDLE) -> Result<CK_RV> {
        let session = narrow::<W>(session)?;
        Ok(ck_call!(self, C_CancelFunction(session)))
    }

    fn c_wait_for_slot_event(
        &self,
        flags: CK_FLAGS,
        slot: &mut CK_SLOT_ID,
    ) -> Result<CK_RV> {
        let flags = narrow::<W>(flags)?;
        let mut native = W::default();
        let rv = ck_call!(
            self,
            C_WaitForSlotEvent(flags, &mut native, null_mut())
        );
        *slot = native.widen();
        Ok(rv)
    }
}
