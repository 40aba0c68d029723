// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Declarative structure descriptions and per-profile byte layouts
//!
//! Every cryptoki structure is described once, with the [ck_struct!]
//! macro, as an ordered list of fields of a few primitive kinds. Offsets,
//! sizes and alignment are then derived for any [PlatformProfile] with the
//! same rules a C compiler applies, which lets a single binding talk to
//! modules built with 4 or 8 byte `CK_ULONG`s and with or without 1 byte
//! structure packing.

use std::error;
use std::ffi::c_void;
use std::fmt;

use crate::profile::{PackingMode, PlatformProfile};
use crate::CK_ULONG;

/// Size of a native pointer in this process
pub const PTR_SIZE: usize = std::mem::size_of::<*const c_void>();

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LayoutError {
    /// The value does not fit in the native word of the profile
    Overflow(CK_ULONG),
    /// A buffer is shorter than the structure it should hold
    ShortBuffer { needed: usize, actual: usize },
    /// A fixed size array field received the wrong amount of data
    FieldSize { field: &'static str, expected: usize, actual: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::Overflow(v) => {
                write!(f, "value {:#x} does not fit the native word", v)
            }
            LayoutError::ShortBuffer { needed, actual } => write!(
                f,
                "buffer of {} bytes cannot hold a {} bytes structure",
                actual, needed
            ),
            LayoutError::FieldSize {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field {} holds {} bytes, got {}",
                field, expected, actual
            ),
        }
    }
}

impl error::Error for LayoutError {}

/// Primitive field kinds a structure is made of
#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    /// `CK_BYTE`, `CK_BBOOL`
    Byte,
    /// `CK_ULONG` and all its aliases
    Ulong,
    /// Any data or function pointer
    Ptr,
    /// Fixed size byte array (`CK_UTF8CHAR[32]`, `CK_BYTE[16]`, ...)
    Bytes(usize),
    /// Structure embedded by value
    Struct(&'static StructDef),
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// The profile independent description of a structure
#[derive(Debug)]
pub struct StructDef {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

impl FieldKind {
    fn size(&self, profile: PlatformProfile) -> usize {
        match self {
            FieldKind::Byte => 1,
            FieldKind::Ulong => profile.word.size(),
            FieldKind::Ptr => PTR_SIZE,
            FieldKind::Bytes(n) => *n,
            FieldKind::Struct(def) => def.size(profile),
        }
    }

    fn align(&self, profile: PlatformProfile) -> usize {
        if profile.packing == PackingMode::OneByte {
            return 1;
        }
        match self {
            FieldKind::Byte | FieldKind::Bytes(_) => 1,
            FieldKind::Ulong => profile.word.size(),
            FieldKind::Ptr => PTR_SIZE,
            FieldKind::Struct(def) => def.align(profile),
        }
    }
}

impl StructDef {
    pub fn align(&self, profile: PlatformProfile) -> usize {
        self.fields
            .iter()
            .map(|f| f.kind.align(profile))
            .max()
            .unwrap_or(1)
    }

    pub fn offset(&self, profile: PlatformProfile, field: usize) -> usize {
        let mut offset = 0;
        for (idx, f) in self.fields.iter().enumerate() {
            offset = align_up(offset, f.kind.align(profile));
            if idx == field {
                break;
            }
            offset += f.kind.size(profile);
        }
        offset
    }

    pub fn size(&self, profile: PlatformProfile) -> usize {
        let mut end = 0;
        for f in self.fields {
            end = align_up(end, f.kind.align(profile)) + f.kind.size(profile);
        }
        align_up(end, self.align(profile))
    }

    pub fn layout(&'static self, profile: PlatformProfile) -> StructLayout {
        StructLayout { def: self, profile }
    }
}

/// A structure description bound to a profile
#[derive(Clone, Copy, Debug)]
pub struct StructLayout {
    def: &'static StructDef,
    profile: PlatformProfile,
}

impl StructLayout {
    pub fn def(&self) -> &'static StructDef {
        self.def
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    pub fn size(&self) -> usize {
        self.def.size(self.profile)
    }

    pub fn offset(&self, field: usize) -> usize {
        self.def.offset(self.profile, field)
    }

    fn field_size(&self, field: usize) -> usize {
        self.def.fields[field].kind.size(self.profile)
    }

    fn nested(&self, field: usize) -> StructLayout {
        match self.def.fields[field].kind {
            FieldKind::Struct(def) => def.layout(self.profile),
            _ => panic!(
                "{}.{} is not a structure",
                self.def.name, self.def.fields[field].name
            ),
        }
    }
}

/// Typed access to the bytes of one structure instance
#[derive(Debug)]
pub struct StructView<B> {
    layout: StructLayout,
    bytes: B,
}

impl<'a> StructView<&'a [u8]> {
    /// Views native memory the module (or the binding) owns.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `layout.size()` bytes for the
    /// lifetime `'a`.
    pub unsafe fn from_raw(
        layout: StructLayout,
        ptr: *const u8,
    ) -> StructView<&'a [u8]> {
        StructView {
            layout: layout,
            bytes: std::slice::from_raw_parts(ptr, layout.size()),
        }
    }
}

impl<'a> StructView<&'a mut [u8]> {
    /// Mutable view of native memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `layout.size()` bytes for the
    /// lifetime `'a` and not aliased elsewhere.
    pub unsafe fn from_raw_mut(
        layout: StructLayout,
        ptr: *mut u8,
    ) -> StructView<&'a mut [u8]> {
        StructView {
            layout: layout,
            bytes: std::slice::from_raw_parts_mut(ptr, layout.size()),
        }
    }
}

impl<B: AsRef<[u8]>> StructView<B> {
    pub fn new(
        layout: StructLayout,
        bytes: B,
    ) -> Result<StructView<B>, LayoutError> {
        let actual = bytes.as_ref().len();
        let needed = layout.size();
        if actual < needed {
            return Err(LayoutError::ShortBuffer {
                needed: needed,
                actual: actual,
            });
        }
        Ok(StructView {
            layout: layout,
            bytes: bytes,
        })
    }

    pub fn layout(&self) -> StructLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes.as_ref()[..self.layout.size()]
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }

    fn field(&self, field: usize) -> &[u8] {
        let off = self.layout.offset(field);
        &self.bytes.as_ref()[off..off + self.layout.field_size(field)]
    }

    pub fn ulong(&self, field: usize) -> CK_ULONG {
        self.layout.profile.word.read(self.field(field))
    }

    pub fn ptr(&self, field: usize) -> *mut c_void {
        let mut raw = [0u8; PTR_SIZE];
        raw.copy_from_slice(self.field(field));
        usize::from_ne_bytes(raw) as *mut c_void
    }

    pub fn byte(&self, field: usize) -> u8 {
        self.field(field)[0]
    }

    pub fn bytes(&self, field: usize) -> &[u8] {
        self.field(field)
    }

    pub fn nested(&self, field: usize) -> StructView<&[u8]> {
        StructView {
            layout: self.layout.nested(field),
            bytes: self.field(field),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> StructView<B> {
    fn field_mut(&mut self, field: usize) -> &mut [u8] {
        let off = self.layout.offset(field);
        let len = self.layout.field_size(field);
        &mut self.bytes.as_mut()[off..off + len]
    }

    pub fn set_ulong(
        &mut self,
        field: usize,
        value: CK_ULONG,
    ) -> Result<(), LayoutError> {
        let word = self.layout.profile.word;
        word.write(value, self.field_mut(field))
    }

    pub fn set_ptr(&mut self, field: usize, ptr: *const c_void) {
        let raw = (ptr as usize).to_ne_bytes();
        self.field_mut(field).copy_from_slice(&raw);
    }

    pub fn set_byte(&mut self, field: usize, value: u8) {
        self.field_mut(field)[0] = value;
    }

    pub fn set_bytes(
        &mut self,
        field: usize,
        value: &[u8],
    ) -> Result<(), LayoutError> {
        let dest = self.field_mut(field);
        if dest.len() != value.len() {
            return Err(LayoutError::FieldSize {
                field: self.layout.def.fields[field].name,
                expected: self.layout.field_size(field),
                actual: value.len(),
            });
        }
        dest.copy_from_slice(value);
        Ok(())
    }

    pub fn nested_mut(&mut self, field: usize) -> StructView<&mut [u8]> {
        let layout = self.layout.nested(field);
        StructView {
            layout: layout,
            bytes: self.field_mut(field),
        }
    }
}

/// Offset of the `index`th function pointer inside a `CK_FUNCTION_LIST`.
/// The list starts with a `CK_VERSION` followed by pointers only, so only
/// the packing matters.
pub fn function_pointer_offset(packing: PackingMode, index: usize) -> usize {
    let first = match packing {
        PackingMode::Default => align_up(2, PTR_SIZE),
        PackingMode::OneByte => 2,
    };
    first + index * PTR_SIZE
}

/// Total size of a `CK_FUNCTION_LIST` with `count` entries
pub fn function_list_size(packing: PackingMode, count: usize) -> usize {
    let end = function_pointer_offset(packing, count);
    match packing {
        PackingMode::Default => align_up(end, PTR_SIZE),
        PackingMode::OneByte => end,
    }
}

/// Declares the description of a cryptoki structure.
///
/// Each structure becomes a module holding its [StructDef] as `DEF` and
/// one `usize` constant per field, the field index used by [StructView].
///
/// ```
/// use pkcs11::ck_struct;
/// ck_struct!(CK_EXAMPLE {
///     flag: byte,
///     count: ulong,
///     data: ptr,
///     tag: [4],
/// });
/// assert_eq!(CK_EXAMPLE::data, 2);
/// ```
#[macro_export]
macro_rules! ck_struct {
    (@kind byte) => { $crate::layout::FieldKind::Byte };
    (@kind ulong) => { $crate::layout::FieldKind::Ulong };
    (@kind ptr) => { $crate::layout::FieldKind::Ptr };
    (@kind [$n:expr]) => { $crate::layout::FieldKind::Bytes($n) };
    (@kind $nested:ident) => {
        $crate::layout::FieldKind::Struct(&$nested::DEF)
    };
    ($(#[$meta:meta])* $name:ident { $($field:ident : $kind:tt),* $(,)? }) => {
        $(#[$meta])*
        #[allow(non_snake_case, non_upper_case_globals, dead_code)]
        pub mod $name {
            #[allow(unused_imports)]
            use super::*;

            #[allow(non_camel_case_types)]
            #[repr(usize)]
            enum Index {
                $($field),*
            }

            $(pub const $field: usize = Index::$field as usize;)*

            pub static DEF: $crate::layout::StructDef =
                $crate::layout::StructDef {
                    name: stringify!($name),
                    fields: &[$($crate::layout::FieldDef {
                        name: stringify!($field),
                        kind: $crate::ck_struct!(@kind $kind),
                    }),*],
                };
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::*;

    #[test]
    fn view_roundtrip() {
        let layout = CK_ATTRIBUTE::DEF.layout(PlatformProfile::W4_PACKED);
        let mut buf = vec![0u8; layout.size()];
        let mut view = StructView::new(layout, buf.as_mut_slice()).unwrap();
        view.set_ulong(CK_ATTRIBUTE::type_, 0x11).unwrap();
        view.set_ptr(CK_ATTRIBUTE::pValue, 0x1234 as *const c_void);
        view.set_ulong(CK_ATTRIBUTE::ulValueLen, 7).unwrap();
        assert!(view.set_ulong(CK_ATTRIBUTE::ulValueLen, 1 << 33).is_err());
        assert_eq!(view.ulong(CK_ATTRIBUTE::type_), 0x11);
        assert_eq!(view.ptr(CK_ATTRIBUTE::pValue) as usize, 0x1234);
        assert_eq!(view.ulong(CK_ATTRIBUTE::ulValueLen), 7);
        assert_eq!(&buf[..4], &0x11u32.to_ne_bytes());
    }

    #[test]
    fn short_buffer() {
        let layout = CK_INFO::DEF.layout(PlatformProfile::W8);
        let buf = [0u8; 10];
        assert_eq!(
            StructView::new(layout, &buf[..]).unwrap_err(),
            LayoutError::ShortBuffer {
                needed: layout.size(),
                actual: 10
            }
        );
    }

    #[test]
    fn nested_fields() {
        let layout = CK_INFO::DEF.layout(PlatformProfile::W8_PACKED);
        let mut buf = vec![0u8; layout.size()];
        let mut view = StructView::new(layout, &mut buf[..]).unwrap();
        let mut ver = view.nested_mut(CK_INFO::libraryVersion);
        ver.set_byte(CK_VERSION::major, 3);
        ver.set_byte(CK_VERSION::minor, 1);
        assert_eq!(buf[74], 3);
        assert_eq!(buf[75], 1);
    }

    #[test]
    fn function_list() {
        assert_eq!(function_pointer_offset(PackingMode::OneByte, 0), 2);
        assert_eq!(
            function_pointer_offset(PackingMode::Default, 1),
            2 * PTR_SIZE
        );
        assert_eq!(
            function_list_size(PackingMode::Default, 68),
            69 * PTR_SIZE
        );
    }
}
