// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The table of cryptoki entry points of a module
//!
//! A [FunctionTable] holds the 68 PKCS#11 v2.40 functions as typed
//! function pointers whose `CK_ULONG` is the native word `W` of the
//! module. Tables are filled from a [SymbolSource], either a dynamically
//! loaded [NativeLibrary] or a [StaticModule] of entry points referenced
//! directly, by resolving every `C_*` name or by asking the module for its
//! `CK_FUNCTION_LIST`.

use std::ffi::c_void;

use crate::config::BindMode;
use crate::error::{Error, Result};
use crate::loader::NativeLibrary;

use log::debug;
use pkcs11::layout::{function_pointer_offset, PTR_SIZE};
use pkcs11::{PackingMode, Word, CKR_OK, FUNCTION_NAMES};

/// Anything cryptoki entry points can be looked up from
pub trait SymbolSource: Send + Sync {
    /// Returns the address of an exported function
    fn symbol(&self, name: &'static str) -> Result<*const c_void>;

    /// A human readable name for diagnostics
    fn describe(&self) -> String;
}

impl SymbolSource for NativeLibrary {
    fn symbol(&self, name: &'static str) -> Result<*const c_void> {
        self.resolve(name)
    }

    fn describe(&self) -> String {
        self.path().display().to_string()
    }
}

/// Entry points of a module that is part of the process already, either
/// linked at build time or implemented in Rust (like a test module)
#[derive(Debug)]
pub struct StaticModule {
    name: String,
    entries: Vec<(&'static str, *const c_void)>,
}

/* The entries are addresses of code, never dereferenced as data */
unsafe impl Send for StaticModule {}
unsafe impl Sync for StaticModule {}

impl StaticModule {
    pub fn new(
        name: &str,
        entries: Vec<(&'static str, *const c_void)>,
    ) -> StaticModule {
        StaticModule {
            name: name.to_string(),
            entries: entries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module linked in at build time, see `build.rs`
    #[cfg(feature = "static-link")]
    pub fn linked() -> StaticModule {
        linked::module()
    }
}

impl SymbolSource for StaticModule {
    fn symbol(&self, name: &'static str) -> Result<*const c_void> {
        match self.entries.iter().find(|(n, p)| *n == name && !p.is_null()) {
            Some((_, p)) => Ok(*p),
            None => Err(Error::symbol_not_found(
                name,
                format!("not provided by static module {}", self.name),
            )),
        }
    }

    fn describe(&self) -> String {
        format!("static module {}", self.name)
    }
}

#[cfg(feature = "static-link")]
mod linked {
    use super::StaticModule;
    use std::ffi::c_void;

    macro_rules! linked_module {
        ($($name:ident),* $(,)?) => {
            extern "C" {
                $(fn $name();)*
            }

            pub fn module() -> StaticModule {
                StaticModule::new(
                    "linked",
                    vec![$((
                        stringify!($name),
                        $name as unsafe extern "C" fn() as *const c_void,
                    )),*],
                )
            }
        };
    }

    linked_module!(
        C_Initialize, C_Finalize, C_GetInfo, C_GetFunctionList,
        C_GetSlotList, C_GetSlotInfo, C_GetTokenInfo, C_GetMechanismList,
        C_GetMechanismInfo, C_InitToken, C_InitPIN, C_SetPIN,
        C_OpenSession, C_CloseSession, C_CloseAllSessions,
        C_GetSessionInfo, C_GetOperationState, C_SetOperationState,
        C_Login, C_Logout, C_CreateObject, C_CopyObject, C_DestroyObject,
        C_GetObjectSize, C_GetAttributeValue, C_SetAttributeValue,
        C_FindObjectsInit, C_FindObjects, C_FindObjectsFinal,
        C_EncryptInit, C_Encrypt, C_EncryptUpdate, C_EncryptFinal,
        C_DecryptInit, C_Decrypt, C_DecryptUpdate, C_DecryptFinal,
        C_DigestInit, C_Digest, C_DigestUpdate, C_DigestKey,
        C_DigestFinal, C_SignInit, C_Sign, C_SignUpdate, C_SignFinal,
        C_SignRecoverInit, C_SignRecover, C_VerifyInit, C_Verify,
        C_VerifyUpdate, C_VerifyFinal, C_VerifyRecoverInit,
        C_VerifyRecover, C_DigestEncryptUpdate, C_DecryptDigestUpdate,
        C_SignEncryptUpdate, C_DecryptVerifyUpdate, C_GenerateKey,
        C_GenerateKeyPair, C_WrapKey, C_UnwrapKey, C_DeriveKey,
        C_SeedRandom, C_GenerateRandom, C_GetFunctionStatus,
        C_CancelFunction, C_WaitForSlotEvent,
    );
}

/// Converts a resolved address into an optional typed function pointer
///
/// # Safety
///
/// `F` must be a function pointer type matching the actual signature of
/// the code at `ptr`.
unsafe fn ptr_to_fn<F: Copy>(ptr: *const c_void) -> Option<F> {
    assert_eq!(std::mem::size_of::<F>(), PTR_SIZE);
    if ptr.is_null() {
        None
    } else {
        Some(std::mem::transmute_copy::<*const c_void, F>(&ptr))
    }
}

macro_rules! function_table {
    ($($idx:literal $name:ident ( $($arg:ty),* );)*) => {
        /// The cryptoki v2.40 entry points of a module, in
        /// `CK_FUNCTION_LIST` order, for a module whose `CK_ULONG` is `W`
        #[allow(non_snake_case)]
        #[derive(Clone, Copy)]
        pub struct FunctionTable<W: Word> {
            $(pub $name: Option<unsafe extern "C" fn($($arg),*) -> W>,)*
        }

        impl<W: Word> FunctionTable<W> {
            /// Builds a table from raw addresses, null entries stay unset
            ///
            /// # Safety
            ///
            /// Every non-null entry must point to a function with the
            /// cryptoki signature of its slot, built for the word `W`.
            pub unsafe fn from_entries(
                entries: &[*const c_void; FUNCTION_COUNT],
            ) -> FunctionTable<W> {
                FunctionTable {
                    $($name: ptr_to_fn(entries[$idx]),)*
                }
            }

            /// Number of entry points actually provided
            pub fn count(&self) -> usize {
                let mut n = 0;
                $(if self.$name.is_some() { n += 1; })*
                n
            }

            #[cfg(test)]
            fn slot_names() -> Vec<(usize, &'static str)> {
                vec![$(($idx, stringify!($name)),)*]
            }
        }
    };
}

pub const FUNCTION_COUNT: usize = 68;

function_table! {
    0 C_Initialize(*mut c_void);
    1 C_Finalize(*mut c_void);
    2 C_GetInfo(*mut u8);
    3 C_GetFunctionList(*mut *mut c_void);
    4 C_GetSlotList(u8, *mut W, *mut W);
    5 C_GetSlotInfo(W, *mut u8);
    6 C_GetTokenInfo(W, *mut u8);
    7 C_GetMechanismList(W, *mut W, *mut W);
    8 C_GetMechanismInfo(W, W, *mut u8);
    9 C_InitToken(W, *mut u8, W, *mut u8);
    10 C_InitPIN(W, *mut u8, W);
    11 C_SetPIN(W, *mut u8, W, *mut u8, W);
    12 C_OpenSession(W, W, *mut c_void, *mut c_void, *mut W);
    13 C_CloseSession(W);
    14 C_CloseAllSessions(W);
    15 C_GetSessionInfo(W, *mut u8);
    16 C_GetOperationState(W, *mut u8, *mut W);
    17 C_SetOperationState(W, *mut u8, W, W, W);
    18 C_Login(W, W, *mut u8, W);
    19 C_Logout(W);
    20 C_CreateObject(W, *mut u8, W, *mut W);
    21 C_CopyObject(W, W, *mut u8, W, *mut W);
    22 C_DestroyObject(W, W);
    23 C_GetObjectSize(W, W, *mut W);
    24 C_GetAttributeValue(W, W, *mut u8, W);
    25 C_SetAttributeValue(W, W, *mut u8, W);
    26 C_FindObjectsInit(W, *mut u8, W);
    27 C_FindObjects(W, *mut W, W, *mut W);
    28 C_FindObjectsFinal(W);
    29 C_EncryptInit(W, *mut u8, W);
    30 C_Encrypt(W, *mut u8, W, *mut u8, *mut W);
    31 C_EncryptUpdate(W, *mut u8, W, *mut u8, *mut W);
    32 C_EncryptFinal(W, *mut u8, *mut W);
    33 C_DecryptInit(W, *mut u8, W);
    34 C_Decrypt(W, *mut u8, W, *mut u8, *mut W);
    35 C_DecryptUpdate(W, *mut u8, W, *mut u8, *mut W);
    36 C_DecryptFinal(W, *mut u8, *mut W);
    37 C_DigestInit(W, *mut u8);
    38 C_Digest(W, *mut u8, W, *mut u8, *mut W);
    39 C_DigestUpdate(W, *mut u8, W);
    40 C_DigestKey(W, W);
    41 C_DigestFinal(W, *mut u8, *mut W);
    42 C_SignInit(W, *mut u8, W);
    43 C_Sign(W, *mut u8, W, *mut u8, *mut W);
    44 C_SignUpdate(W, *mut u8, W);
    45 C_SignFinal(W, *mut u8, *mut W);
    46 C_SignRecoverInit(W, *mut u8, W);
    47 C_SignRecover(W, *mut u8, W, *mut u8, *mut W);
    48 C_VerifyInit(W, *mut u8, W);
    49 C_Verify(W, *mut u8, W, *mut u8, W);
    50 C_VerifyUpdate(W, *mut u8, W);
    51 C_VerifyFinal(W, *mut u8, W);
    52 C_VerifyRecoverInit(W, *mut u8, W);
    53 C_VerifyRecover(W, *mut u8, W, *mut u8, *mut W);
    54 C_DigestEncryptUpdate(W, *mut u8, W, *mut u8, *mut W);
    55 C_DecryptDigestUpdate(W, *mut u8, W, *mut u8, *mut W);
    56 C_SignEncryptUpdate(W, *mut u8, W, *mut u8, *mut W);
    57 C_DecryptVerifyUpdate(W, *mut u8, W, *mut u8, *mut W);
    58 C_GenerateKey(W, *mut u8, *mut u8, W, *mut W);
    59 C_GenerateKeyPair(W, *mut u8, *mut u8, W, *mut u8, W, *mut W, *mut W);
    60 C_WrapKey(W, *mut u8, W, W, *mut u8, *mut W);
    61 C_UnwrapKey(W, *mut u8, W, *mut u8, W, *mut u8, W, *mut W);
    62 C_DeriveKey(W, *mut u8, W, *mut u8, W, *mut W);
    63 C_SeedRandom(W, *mut u8, W);
    64 C_GenerateRandom(W, *mut u8, W);
    65 C_GetFunctionStatus(W);
    66 C_CancelFunction(W);
    67 C_WaitForSlotEvent(W, *mut W, *mut c_void);
}

impl<W: Word> FunctionTable<W> {
    /// Fills a table from `source`
    pub fn bind(
        source: &dyn SymbolSource,
        mode: BindMode,
        packing: PackingMode,
    ) -> Result<FunctionTable<W>> {
        let entries = match mode {
            BindMode::Symbols => Self::resolve_symbols(source)?,
            BindMode::FunctionList => {
                Self::read_function_list(source, packing)?
            }
        };
        let table = unsafe { Self::from_entries(&entries) };
        debug!(
            "bound {} of {} functions from {} ({:?})",
            table.count(),
            FUNCTION_COUNT,
            source.describe(),
            mode
        );
        Ok(table)
    }

    fn resolve_symbols(
        source: &dyn SymbolSource,
    ) -> Result<[*const c_void; FUNCTION_COUNT]> {
        let mut entries = [std::ptr::null(); FUNCTION_COUNT];
        for (entry, name) in entries.iter_mut().zip(FUNCTION_NAMES.iter()) {
            *entry = source.symbol(name)?;
        }
        Ok(entries)
    }

    fn read_function_list(
        source: &dyn SymbolSource,
        packing: PackingMode,
    ) -> Result<[*const c_void; FUNCTION_COUNT]> {
        const NAME: &str = "C_GetFunctionList";
        let getter: unsafe extern "C" fn(*mut *mut c_void) -> W =
            match unsafe { ptr_to_fn(source.symbol(NAME)?) } {
                Some(f) => f,
                None => {
                    return Err(Error::symbol_not_found(
                        NAME,
                        format!("NULL entry in {}", source.describe()),
                    ))
                }
            };
        let mut list: *mut c_void = std::ptr::null_mut();
        let rv = unsafe { getter(&mut list) }.widen();
        if rv != CKR_OK {
            return Err(Error::ck_fn(NAME, rv));
        }
        if list.is_null() {
            return Err(Error::loader(format!(
                "{} returned a NULL function list",
                source.describe()
            )));
        }
        let base = list as *const u8;
        /* CK_VERSION comes first, two bytes */
        let (major, minor) = unsafe { (*base, *base.add(1)) };
        debug!("function list version {}.{}", major, minor);

        let mut entries = [std::ptr::null(); FUNCTION_COUNT];
        for (idx, entry) in entries.iter_mut().enumerate() {
            let offset = function_pointer_offset(packing, idx);
            *entry = unsafe {
                std::ptr::read_unaligned(
                    base.add(offset) as *const *const c_void
                )
            };
        }
        Ok(entries)
    }
}

/// Optional non standard entry points of a module
#[derive(Debug, Default)]
pub struct VendorFunctions {
    entries: Vec<(&'static str, *const c_void)>,
}

/* Code addresses only, see StaticModule */
unsafe impl Send for VendorFunctions {}
unsafe impl Sync for VendorFunctions {}

impl VendorFunctions {
    /// Resolves whatever of `names` the module provides, missing names are
    /// simply left out
    pub fn resolve(
        source: &dyn SymbolSource,
        names: &[&'static str],
    ) -> VendorFunctions {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            match source.symbol(name) {
                Ok(p) => entries.push((*name, p)),
                Err(e) => debug!("optional function unavailable: {}", e),
            }
        }
        VendorFunctions { entries: entries }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Returns the typed entry point or an [ErrorKind::Unsupported] error
    ///
    /// # Safety
    ///
    /// `F` must be the function pointer type of the named function for
    /// the word width of the module.
    ///
    /// [ErrorKind::Unsupported]: crate::error::ErrorKind::Unsupported
    pub unsafe fn get<F: Copy>(&self, name: &'static str) -> Result<F> {
        match self.entries.iter().find(|(n, _)| *n == name) {
            Some((_, p)) => match ptr_to_fn::<F>(*p) {
                Some(f) => Ok(f),
                None => Err(Error::unsupported(name)),
            },
            None => Err(Error::unsupported(name)),
        }
    }
}
