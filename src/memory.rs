// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Unmanaged memory handed to cryptoki modules
//!
//! Everything whose address is given to a module (structures, attribute
//! values, mechanism parameter data) lives in an [UnmanagedBuffer]: a
//! zeroed, 16 byte aligned heap allocation that is wiped and released
//! exactly once when the owner drops it. Allocations and releases are
//! counted per thread so tests can assert that nothing leaks.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::{Error, Result};

use pkcs11::layout::{StructDef, StructLayout, StructView};
use pkcs11::{NativeWord, PlatformProfile, CK_ULONG};
use zeroize::Zeroize;

const ALIGNMENT: usize = 16;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    static RELEASES: Cell<usize> = const { Cell::new(0) };
    #[cfg(test)]
    static FAIL_AFTER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Allocation counters of the calling thread
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub releases: usize,
}

impl AllocationStats {
    pub fn current() -> AllocationStats {
        AllocationStats {
            allocations: ALLOCATIONS.with(|c| c.get()),
            releases: RELEASES.with(|c| c.get()),
        }
    }

    /// Buffers allocated since `earlier` and not yet released
    pub fn outstanding_since(&self, earlier: &AllocationStats) -> isize {
        let allocs = self.allocations - earlier.allocations;
        let frees = self.releases - earlier.releases;
        allocs as isize - frees as isize
    }
}

/// Makes the allocation `n` from now (0 based) fail on this thread
#[cfg(test)]
pub(crate) fn fail_allocation_after(n: Option<usize>) {
    FAIL_AFTER.with(|c| c.set(n));
}

#[cfg(test)]
fn injected_failure() -> bool {
    FAIL_AFTER.with(|c| match c.get() {
        Some(0) => {
            c.set(None);
            true
        }
        Some(n) => {
            c.set(Some(n - 1));
            false
        }
        None => false,
    })
}

#[cfg(not(test))]
fn injected_failure() -> bool {
    false
}

pub struct UnmanagedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

/* The buffer is exclusively owned, moving it to another thread is fine */
unsafe impl Send for UnmanagedBuffer {}

impl UnmanagedBuffer {
    fn layout(len: usize) -> Result<Layout> {
        Layout::from_size_align(len.max(1), ALIGNMENT)
            .map_err(|_| Error::host_memory(len))
    }

    /// Allocates `len` zeroed bytes
    pub fn new(len: usize) -> Result<UnmanagedBuffer> {
        let layout = Self::layout(len)?;
        if injected_failure() {
            return Err(Error::host_memory(len));
        }
        let ptr = match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(p) => p,
            None => return Err(Error::host_memory(len)),
        };
        ALLOCATIONS.with(|c| c.set(c.get() + 1));
        Ok(UnmanagedBuffer { ptr: ptr, len: len })
    }

    pub fn from_slice(data: &[u8]) -> Result<UnmanagedBuffer> {
        let mut buf = UnmanagedBuffer::new(data.len())?;
        buf.as_mut_slice().copy_from_slice(data);
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        match offset.checked_add(data.len()) {
            Some(end) if end <= self.len => {
                self.as_mut_slice()[offset..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(Error::usage(format!(
                "write of {} bytes at {} overflows a {} bytes buffer",
                data.len(),
                offset,
                self.len
            ))),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Drop for UnmanagedBuffer {
    fn drop(&mut self) {
        self.as_mut_slice().zeroize();
        /* the layout was valid at allocation time */
        if let Ok(layout) = Self::layout(self.len) {
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
        RELEASES.with(|c| c.set(c.get() + 1));
    }
}

impl std::fmt::Debug for UnmanagedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnmanagedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// An unmanaged buffer holding one structure in a given profile layout
#[derive(Debug)]
pub struct StructBuffer {
    buf: UnmanagedBuffer,
    layout: StructLayout,
}

impl StructBuffer {
    pub fn new(
        def: &'static StructDef,
        profile: PlatformProfile,
    ) -> Result<StructBuffer> {
        let layout = def.layout(profile);
        Ok(StructBuffer {
            buf: UnmanagedBuffer::new(layout.size())?,
            layout: layout,
        })
    }

    /// A zeroed array of `count` structures
    pub fn array(
        def: &'static StructDef,
        profile: PlatformProfile,
        count: usize,
    ) -> Result<StructBuffer> {
        let layout = def.layout(profile);
        let size = match layout.size().checked_mul(count) {
            Some(s) => s,
            None => return Err(Error::host_memory(usize::MAX)),
        };
        Ok(StructBuffer {
            buf: UnmanagedBuffer::new(size)?,
            layout: layout,
        })
    }

    pub fn layout(&self) -> StructLayout {
        self.layout
    }

    pub fn count(&self) -> usize {
        self.buf.len() / self.layout.size()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.buf.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn range(&self, index: usize) -> std::ops::Range<usize> {
        let size = self.layout.size();
        index * size..(index + 1) * size
    }

    pub fn view(&self) -> StructView<&[u8]> {
        self.view_at(0)
    }

    pub fn view_mut(&mut self) -> StructView<&mut [u8]> {
        self.view_at_mut(0)
    }

    /// View of the `index`th element of an array buffer
    pub fn view_at(&self, index: usize) -> StructView<&[u8]> {
        let range = self.range(index);
        match StructView::new(self.layout, &self.buf.as_slice()[range]) {
            Ok(v) => v,
            Err(e) => panic!("struct buffer smaller than its layout: {}", e),
        }
    }

    pub fn view_at_mut(&mut self, index: usize) -> StructView<&mut [u8]> {
        let range = self.range(index);
        let layout = self.layout;
        match StructView::new(layout, &mut self.buf.as_mut_slice()[range]) {
            Ok(v) => v,
            Err(e) => panic!("struct buffer smaller than its layout: {}", e),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

/// An array of native `CK_ULONG`s, as filled in by slot, mechanism and
/// object handle listing functions
#[derive(Debug)]
pub struct WordArray {
    buf: UnmanagedBuffer,
    word: NativeWord,
}

impl WordArray {
    pub fn new(word: NativeWord, count: usize) -> Result<WordArray> {
        let size = match count.checked_mul(word.size()) {
            Some(s) => s,
            None => return Err(Error::host_memory(usize::MAX)),
        };
        Ok(WordArray {
            buf: UnmanagedBuffer::new(size)?,
            word: word,
        })
    }

    pub fn count(&self) -> usize {
        self.buf.len() / self.word.size()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.buf.as_ptr()
    }

    pub fn get(&self, index: usize) -> CK_ULONG {
        let size = self.word.size();
        self.word.read(&self.buf.as_slice()[index * size..])
    }

    /// Copies the first `dest.len()` values out
    pub fn copy_to(&self, dest: &mut [CK_ULONG]) {
        for (i, d) in dest.iter_mut().enumerate().take(self.count()) {
            *d = self.get(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs11::structs::CK_VERSION;

    #[test]
    fn balanced_counts() {
        let start = AllocationStats::current();
        {
            let mut a = UnmanagedBuffer::new(32).unwrap();
            let b = UnmanagedBuffer::from_slice(b"abc").unwrap();
            a.write(30, &[1, 2]).unwrap();
            assert!(a.write(31, &[1, 2]).is_err());
            assert_eq!(b.to_vec(), b"abc");
            assert_eq!(a.as_ptr() as usize % ALIGNMENT, 0);
            assert_eq!(
                AllocationStats::current().outstanding_since(&start),
                2
            );
        }
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);
    }

    #[test]
    fn zero_length() {
        let buf = UnmanagedBuffer::new(0).unwrap();
        assert!(buf.is_empty());
        assert!(!buf.as_ptr().is_null());
    }

    #[test]
    fn injected_failure_is_an_error() {
        fail_allocation_after(Some(1));
        let first = UnmanagedBuffer::new(8);
        assert!(first.is_ok());
        let err = UnmanagedBuffer::new(8).unwrap_err();
        assert!(err.is_rv(pkcs11::CKR_HOST_MEMORY));
        assert!(UnmanagedBuffer::new(8).is_ok());
    }

    #[test]
    fn struct_array() {
        let mut arr =
            StructBuffer::array(&CK_VERSION::DEF, PlatformProfile::W8, 3)
                .unwrap();
        assert_eq!(arr.count(), 3);
        arr.view_at_mut(2).set_byte(CK_VERSION::minor, 9);
        assert_eq!(arr.as_slice()[5], 9);
    }

    #[test]
    fn word_array() {
        let arr = WordArray::new(NativeWord::Width4, 3).unwrap();
        unsafe {
            *(arr.as_ptr() as *mut u32).add(1) = u32::MAX;
            *(arr.as_ptr() as *mut u32).add(2) = 7;
        }
        let mut out = [1; 3];
        arr.copy_to(&mut out);
        assert_eq!(out, [0, pkcs11::CK_UNAVAILABLE_INFORMATION, 7]);
    }
}
