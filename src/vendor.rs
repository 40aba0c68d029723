// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Non standard functions of the test module
//!
//! The module exports three functions outside of `CK_FUNCTION_LIST`, they
//! are resolved by name when the module is bound and are optional: a
//! module lacking them yields [ErrorKind::Unsupported] errors.
//!
//! [ErrorKind::Unsupported]: crate::error::ErrorKind::Unsupported

use std::ops::Deref;

use crate::context::fetch_ulongs;
use crate::error::{ck_ok, Error, Result};
use crate::factory::Factories;
use crate::functions::VendorFunctions;
use crate::memory::WordArray;
use crate::session::Session;

use pkcs11::*;

pub const C_EJECT_TOKEN: &str = "C_EjectToken";
pub const C_INTERACTIVE_LOGIN: &str = "C_InteractiveLogin";
pub const C_GET_UNMANAGED_STRUCT_SIZE_LIST: &str =
    "C_GetUnmanagedStructSizeList";

static MOCK_SYMBOLS: [&str; 3] = [
    C_EJECT_TOKEN,
    C_INTERACTIVE_LOGIN,
    C_GET_UNMANAGED_STRUCT_SIZE_LIST,
];

type UlongFn<W> = unsafe extern "C" fn(W) -> W;
type SizeListFn<W> = unsafe extern "C" fn(*mut W, *mut W) -> W;

fn narrow<W: Word>(value: CK_ULONG) -> Result<W> {
    match W::narrow(value) {
        Some(w) => Ok(w),
        None => Err(Error::usage(format!(
            "value {:#x} does not fit the native CK_ULONG",
            value
        ))),
    }
}

fn ulong_call<W: Word>(
    vendor: &VendorFunctions,
    name: &'static str,
    arg: CK_ULONG,
) -> Result<CK_RV> {
    let arg = narrow::<W>(arg)?;
    /* the mock exports these with the signature above */
    let func: UlongFn<W> = unsafe { vendor.get(name)? };
    let rv = unsafe { func(arg) };
    Ok(rv.widen())
}

fn size_list_call<W: Word>(
    vendor: &VendorFunctions,
    list: Option<&mut [CK_ULONG]>,
    count: &mut CK_ULONG,
) -> Result<CK_RV> {
    let func: SizeListFn<W> =
        unsafe { vendor.get(C_GET_UNMANAGED_STRUCT_SIZE_LIST)? };
    let (array, mut n) = match list {
        Some(ref l) => {
            (Some(WordArray::new(W::WIDTH, l.len())?), narrow::<W>(*count)?)
        }
        None => (None, W::default()),
    };
    let ptr = match array {
        Some(ref a) => a.as_ptr() as *mut W,
        None => std::ptr::null_mut(),
    };
    /* ptr is NULL or holds as many words as n says */
    let rv = unsafe { func(ptr, &mut n) }.widen();
    *count = n.widen();
    if rv == CKR_OK {
        if let (Some(l), Some(a)) = (list, array) {
            let found = usize::try_from(*count)?.min(l.len());
            a.copy_to(&mut l[..found]);
        }
    }
    Ok(rv)
}

/// Hands out [MockSession]s and resolves the extra functions
#[derive(Clone, Copy, Debug, Default)]
pub struct MockFactories;

impl Factories for MockFactories {
    type Session = MockSession;

    fn vendor_symbols(&self) -> &'static [&'static str] {
        &MOCK_SYMBOLS
    }
}

/// A [Session] with the extra operations of the test module
#[derive(Debug)]
pub struct MockSession {
    session: Session,
}

impl From<Session> for MockSession {
    fn from(session: Session) -> MockSession {
        MockSession { session: session }
    }
}

impl Deref for MockSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl MockSession {
    fn ulong(&self, name: &'static str, arg: CK_ULONG) -> Result<()> {
        let vendor = self.ll()?.vendor()?;
        let rv = match self.profile().word {
            NativeWord::Width4 => ulong_call::<u32>(&vendor, name, arg)?,
            NativeWord::Width8 => ulong_call::<u64>(&vendor, name, arg)?,
        };
        ck_ok(name, rv)
    }

    /// Ejects the token of the slot this session was opened on
    pub fn eject_token(&self) -> Result<()> {
        self.ulong(C_EJECT_TOKEN, self.slot_id())
    }

    pub fn interactive_login(&self) -> Result<()> {
        self.ulong(C_INTERACTIVE_LOGIN, self.live_handle()?)
    }

    /// Sizes of the cryptoki structures as the module sees them, in the
    /// order of [pkcs11::structs::UNMANAGED_STRUCTS]
    pub fn get_unmanaged_struct_size_list(&self) -> Result<Vec<CK_ULONG>> {
        let vendor = self.ll()?.vendor()?;
        let word = self.profile().word;
        fetch_ulongs(C_GET_UNMANAGED_STRUCT_SIZE_LIST, |list, count| {
            match word {
                NativeWord::Width4 => {
                    size_list_call::<u32>(&vendor, list, count)
                }
                NativeWord::Width8 => {
                    size_list_call::<u64>(&vendor, list, count)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn double(value: u32) -> u32 {
        value * 2
    }

    extern "C" fn two_entries(list: *mut u64, count: *mut u64) -> u64 {
        unsafe {
            if !list.is_null() {
                *list = 11;
                *list.add(1) = 22;
            }
            *count = 2;
        }
        CKR_OK
    }

    #[test]
    fn foreign_signatures() {
        let f: UlongFn<u32> = double;
        assert_eq!(unsafe { f(21) }, 42);

        let g: SizeListFn<u64> = two_entries;
        let mut list = [0u64; 2];
        let mut count = 2u64;
        let rv = unsafe { g(list.as_mut_ptr(), &mut count) };
        assert_eq!(rv, CKR_OK);
        assert_eq!(list, [11, 22]);
        assert_eq!(count, 2);
    }
}
