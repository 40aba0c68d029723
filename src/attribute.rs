// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the safe Rust representation of PKCS#11
//! attributes ([Attribute]), the mapping between attribute type values and
//! the data type they carry ([AttrType]), and the marshaling of attribute
//! templates into profile specific `CK_ATTRIBUTE` arrays
//! ([MarshaledTemplate]).

use std::cmp::Ordering;
use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::memory::{StructBuffer, UnmanagedBuffer};
use crate::types::Date;

use pkcs11::layout::StructView;
use pkcs11::structs::CK_ATTRIBUTE;
use pkcs11::*;

use zeroize::Zeroizing;

/// List of attribute types we understand
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrType {
    BoolType,
    NumType,
    StringType,
    BytesType,
    UlongArrayType,
    DateType,
    TemplateType,
}

impl AttrType {
    /// Finds and return the attribute id and type from its `CKA_*` name
    pub fn attr_name_to_id_type(s: &str) -> Result<(CK_ULONG, AttrType)> {
        match Attrmap::search_by_name(s) {
            Some(a) => Ok((a.id, a.atype)),
            None => Err(Error::usage(format!("unknown attribute {}", s))),
        }
    }

    /// Finds the attribute type from the attribute id
    pub fn attr_id_to_attrtype(id: CK_ULONG) -> Option<AttrType> {
        Attrmap::search_by_id(id).map(|a| a.atype)
    }
}

/// Returns the printable name of an attribute type
pub fn attr_name(id: CK_ATTRIBUTE_TYPE) -> &'static str {
    match Attrmap::search_by_id(id) {
        Some(a) => a.name,
        None => "CKA_UNKNOWN",
    }
}

/// Struct to map a PKCS#11 attribute to a type and a printable name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    atype: AttrType,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    /// Convenience function to efficiently search for a mapping by id
    pub fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search_by(|a| a.id.cmp(&id)) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }

    /// Convenience function to search for a mapping by name
    pub fn search_by_name(s: &str) -> Option<&'static Attrmap<'static>> {
        ATTRMAP.iter().find(|a| a.name == s)
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr; as $attrtype:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            atype: AttrType::$attrtype,
        }
    };
}

/// The main attributes map, sorted by id
static ATTRMAP: [Attrmap<'_>; 62] = [
    attrmap_element!(CKA_CLASS; as NumType),
    attrmap_element!(CKA_TOKEN; as BoolType),
    attrmap_element!(CKA_PRIVATE; as BoolType),
    attrmap_element!(CKA_LABEL; as StringType),
    attrmap_element!(CKA_APPLICATION; as StringType),
    attrmap_element!(CKA_VALUE; as BytesType),
    attrmap_element!(CKA_OBJECT_ID; as BytesType),
    attrmap_element!(CKA_CERTIFICATE_TYPE; as NumType),
    attrmap_element!(CKA_ISSUER; as BytesType),
    attrmap_element!(CKA_SERIAL_NUMBER; as BytesType),
    attrmap_element!(CKA_TRUSTED; as BoolType),
    attrmap_element!(CKA_CERTIFICATE_CATEGORY; as NumType),
    attrmap_element!(CKA_CHECK_VALUE; as BytesType),
    attrmap_element!(CKA_KEY_TYPE; as NumType),
    attrmap_element!(CKA_SUBJECT; as BytesType),
    attrmap_element!(CKA_ID; as BytesType),
    attrmap_element!(CKA_SENSITIVE; as BoolType),
    attrmap_element!(CKA_ENCRYPT; as BoolType),
    attrmap_element!(CKA_DECRYPT; as BoolType),
    attrmap_element!(CKA_WRAP; as BoolType),
    attrmap_element!(CKA_UNWRAP; as BoolType),
    attrmap_element!(CKA_SIGN; as BoolType),
    attrmap_element!(CKA_SIGN_RECOVER; as BoolType),
    attrmap_element!(CKA_VERIFY; as BoolType),
    attrmap_element!(CKA_VERIFY_RECOVER; as BoolType),
    attrmap_element!(CKA_DERIVE; as BoolType),
    attrmap_element!(CKA_START_DATE; as DateType),
    attrmap_element!(CKA_END_DATE; as DateType),
    attrmap_element!(CKA_MODULUS; as BytesType),
    attrmap_element!(CKA_MODULUS_BITS; as NumType),
    attrmap_element!(CKA_PUBLIC_EXPONENT; as BytesType),
    attrmap_element!(CKA_PRIVATE_EXPONENT; as BytesType),
    attrmap_element!(CKA_PRIME_1; as BytesType),
    attrmap_element!(CKA_PRIME_2; as BytesType),
    attrmap_element!(CKA_EXPONENT_1; as BytesType),
    attrmap_element!(CKA_EXPONENT_2; as BytesType),
    attrmap_element!(CKA_COEFFICIENT; as BytesType),
    attrmap_element!(CKA_PRIME; as BytesType),
    attrmap_element!(CKA_SUBPRIME; as BytesType),
    attrmap_element!(CKA_BASE; as BytesType),
    attrmap_element!(CKA_VALUE_BITS; as NumType),
    attrmap_element!(CKA_VALUE_LEN; as NumType),
    attrmap_element!(CKA_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_LOCAL; as BoolType),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as BoolType),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as NumType),
    attrmap_element!(CKA_MODIFIABLE; as BoolType),
    attrmap_element!(CKA_COPYABLE; as BoolType),
    attrmap_element!(CKA_DESTROYABLE; as BoolType),
    attrmap_element!(CKA_EC_PARAMS; as BytesType),
    attrmap_element!(CKA_EC_POINT; as BytesType),
    attrmap_element!(CKA_ALWAYS_AUTHENTICATE; as BoolType),
    attrmap_element!(CKA_WRAP_WITH_TRUSTED; as BoolType),
    attrmap_element!(CKA_HW_FEATURE_TYPE; as NumType),
    attrmap_element!(CKA_RESET_ON_INIT; as BoolType),
    attrmap_element!(CKA_HAS_RESET; as BoolType),
    attrmap_element!(CKA_WRAP_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_UNWRAP_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_DERIVE_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_ALLOWED_MECHANISMS; as UlongArrayType),
    attrmap_element!(CKA_VENDOR_DEFINED; as BytesType),
];

/// The value of an attribute, decoded according to its [AttrType]
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// No value, only meaningful in templates to query lengths
    Empty,
    Bool(bool),
    Ulong(CK_ULONG),
    Bytes(Vec<u8>),
    UlongArray(Vec<CK_ULONG>),
    Date(Option<Date>),
    Template(Vec<Attribute>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    attr_type: CK_ATTRIBUTE_TYPE,
    value: AttributeValue,
}

impl Attribute {
    pub fn empty(t: CK_ATTRIBUTE_TYPE) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Empty,
        }
    }

    pub fn from_bool(t: CK_ATTRIBUTE_TYPE, val: bool) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Bool(val),
        }
    }

    pub fn from_ulong(t: CK_ATTRIBUTE_TYPE, val: CK_ULONG) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Ulong(val),
        }
    }

    pub fn from_bytes(t: CK_ATTRIBUTE_TYPE, val: Vec<u8>) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Bytes(val),
        }
    }

    pub fn from_string(t: CK_ATTRIBUTE_TYPE, val: &str) -> Attribute {
        Attribute::from_bytes(t, val.as_bytes().to_vec())
    }

    pub fn from_date(t: CK_ATTRIBUTE_TYPE, val: Option<Date>) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Date(val),
        }
    }

    pub fn from_ulong_array(
        t: CK_ATTRIBUTE_TYPE,
        val: Vec<CK_ULONG>,
    ) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::UlongArray(val),
        }
    }

    pub fn from_template(
        t: CK_ATTRIBUTE_TYPE,
        val: Vec<Attribute>,
    ) -> Attribute {
        Attribute {
            attr_type: t,
            value: AttributeValue::Template(val),
        }
    }

    pub fn attr_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.attr_type
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    pub fn name(&self) -> &'static str {
        attr_name(self.attr_type)
    }

    fn type_error(&self, expected: &str) -> Error {
        Error::usage(format!(
            "{} does not hold a {} value",
            self.name(),
            expected
        ))
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.value {
            AttributeValue::Bool(b) => Ok(b),
            _ => Err(self.type_error("boolean")),
        }
    }

    pub fn to_ulong(&self) -> Result<CK_ULONG> {
        match self.value {
            AttributeValue::Ulong(u) => Ok(u),
            _ => Err(self.type_error("numeric")),
        }
    }

    pub fn to_bytes(&self) -> Result<&[u8]> {
        match self.value {
            AttributeValue::Bytes(ref v) => Ok(v.as_slice()),
            _ => Err(self.type_error("byte array")),
        }
    }

    pub fn to_string(&self) -> Result<String> {
        match self.value {
            AttributeValue::Bytes(ref v) => match std::str::from_utf8(v) {
                Ok(s) => Ok(s.to_string()),
                Err(_) => Err(self.type_error("UTF-8")),
            },
            _ => Err(self.type_error("string")),
        }
    }

    pub fn to_date(&self) -> Result<Option<Date>> {
        match self.value {
            AttributeValue::Date(d) => Ok(d),
            _ => Err(self.type_error("date")),
        }
    }

    pub fn to_ulong_array(&self) -> Result<&[CK_ULONG]> {
        match self.value {
            AttributeValue::UlongArray(ref v) => Ok(v.as_slice()),
            _ => Err(self.type_error("numeric array")),
        }
    }

    pub fn to_template(&self) -> Result<&[Attribute]> {
        match self.value {
            AttributeValue::Template(ref v) => Ok(v.as_slice()),
            _ => Err(self.type_error("template")),
        }
    }

    /// Decodes a fetched slot, nested templates become attribute lists
    /// without their unavailable entries
    pub fn decode(slot: &AttributeSlot, word: NativeWord) -> Result<Attribute> {
        if let Some(ref entries) = slot.nested {
            let mut attrs = Vec::with_capacity(entries.len());
            for entry in entries.iter().filter(|e| e.is_available()) {
                attrs.push(Attribute::decode(entry, word)?);
            }
            return Ok(Attribute::from_template(slot.attr_type, attrs));
        }
        let raw = match slot.buffer {
            Some(ref b) => b.as_slice(),
            None => &[],
        };
        Attribute::decode_value(slot.attr_type, raw, word)
    }

    /// Decodes a raw value returned by a module. Unknown attribute types
    /// are kept as bytes, so are nested template arrays as they hold
    /// pointers: [Attribute::decode] on a slot with its nested entries
    /// fetched gives the attribute list.
    pub fn decode_value(
        t: CK_ATTRIBUTE_TYPE,
        raw: &[u8],
        word: NativeWord,
    ) -> Result<Attribute> {
        let atype = AttrType::attr_id_to_attrtype(t);
        let value = match atype {
            Some(AttrType::BoolType) => {
                if raw.len() != 1 {
                    return Err(Error::usage(format!(
                        "{} returned {} bytes for a boolean",
                        attr_name(t),
                        raw.len()
                    )));
                }
                AttributeValue::Bool(raw[0] != CK_FALSE)
            }
            Some(AttrType::NumType) => {
                if raw.len() != word.size() {
                    return Err(Error::usage(format!(
                        "{} returned {} bytes for a CK_ULONG",
                        attr_name(t),
                        raw.len()
                    )));
                }
                AttributeValue::Ulong(word.read(raw))
            }
            Some(AttrType::UlongArrayType) => {
                if raw.len() % word.size() != 0 {
                    return Err(Error::usage(format!(
                        "{} returned {} bytes for a CK_ULONG array",
                        attr_name(t),
                        raw.len()
                    )));
                }
                AttributeValue::UlongArray(
                    raw.chunks(word.size()).map(|c| word.read(c)).collect(),
                )
            }
            Some(AttrType::DateType) => {
                if raw.is_empty() {
                    AttributeValue::Date(None)
                } else {
                    AttributeValue::Date(Date::decode(raw))
                }
            }
            _ => AttributeValue::Bytes(raw.to_vec()),
        };
        Ok(Attribute {
            attr_type: t,
            value: value,
        })
    }

    /// The native encoding of the value, `None` for [AttributeValue::Empty]
    /// and templates which are marshaled separately
    fn encode(&self, word: NativeWord) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let encoded = match self.value {
            AttributeValue::Empty | AttributeValue::Template(_) => None,
            AttributeValue::Bool(b) => Some(vec![if b {
                CK_TRUE
            } else {
                CK_FALSE
            }]),
            AttributeValue::Ulong(u) => {
                let mut v = vec![0u8; word.size()];
                word.write(u, &mut v)?;
                Some(v)
            }
            AttributeValue::Bytes(ref b) => Some(b.clone()),
            AttributeValue::UlongArray(ref a) => {
                let mut v = vec![0u8; a.len() * word.size()];
                for (u, chunk) in a.iter().zip(v.chunks_mut(word.size())) {
                    word.write(*u, chunk)?;
                }
                Some(v)
            }
            AttributeValue::Date(Some(d)) => Some(d.encode().to_vec()),
            AttributeValue::Date(None) => Some(Vec::new()),
        };
        Ok(encoded.map(Zeroizing::new))
    }
}

/// A template in native form: a `CK_ATTRIBUTE` array plus every value
/// buffer it points to, including nested templates
#[derive(Debug)]
pub struct MarshaledTemplate {
    profile: PlatformProfile,
    array: StructBuffer,
    values: Vec<UnmanagedBuffer>,
    nested: Vec<MarshaledTemplate>,
}

impl MarshaledTemplate {
    pub fn new(
        attrs: &[Attribute],
        profile: PlatformProfile,
    ) -> Result<MarshaledTemplate> {
        let mut array =
            StructBuffer::array(&CK_ATTRIBUTE::DEF, profile, attrs.len())?;
        let mut values = Vec::new();
        let mut nested = Vec::new();
        for (i, attr) in attrs.iter().enumerate() {
            let (ptr, len) = match attr.value {
                AttributeValue::Template(ref inner) => {
                    let t = MarshaledTemplate::new(inner, profile)?;
                    let entry = (t.as_ptr(), t.array.len());
                    nested.push(t);
                    entry
                }
                _ => match attr.encode(profile.word)? {
                    Some(bytes) if !bytes.is_empty() => {
                        let buf = UnmanagedBuffer::from_slice(&bytes)?;
                        let entry = (buf.as_ptr(), buf.len());
                        values.push(buf);
                        entry
                    }
                    _ => (std::ptr::null_mut(), 0),
                },
            };
            let mut view = array.view_at_mut(i);
            view.set_ulong(CK_ATTRIBUTE::type_, attr.attr_type)?;
            view.set_ptr(CK_ATTRIBUTE::pValue, ptr as *const _);
            view.set_ulong(CK_ATTRIBUTE::ulValueLen, CK_ULONG::try_from(len)?)?;
        }
        Ok(MarshaledTemplate {
            profile: profile,
            array: array,
            values: values,
            nested: nested,
        })
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    pub fn as_ptr(&self) -> *mut u8 {
        if self.array.is_empty() {
            std::ptr::null_mut()
        } else {
            self.array.as_ptr()
        }
    }

    pub fn count(&self) -> usize {
        self.array.count()
    }

    /// Number of unmanaged allocations owned, nested templates included
    pub fn allocations(&self) -> usize {
        1 + self.values.len()
            + self.nested.iter().map(|n| n.allocations()).sum::<usize>()
    }
}

/// One entry of a `C_GetAttributeValue` template
///
/// `buffer` is `None` to query the value length, the module reports the
/// length in `len` (or `CK_UNAVAILABLE_INFORMATION`); with a buffer the
/// value is copied in and the buffer truncated to the returned length.
/// A slot with `nested` entries fetches a nested template into them
/// instead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeSlot {
    pub attr_type: CK_ATTRIBUTE_TYPE,
    pub buffer: Option<Zeroizing<Vec<u8>>>,
    pub len: CK_ULONG,
    pub nested: Option<Vec<AttributeSlot>>,
}

impl AttributeSlot {
    pub fn query(attr_type: CK_ATTRIBUTE_TYPE) -> AttributeSlot {
        AttributeSlot {
            attr_type: attr_type,
            buffer: None,
            len: 0,
            nested: None,
        }
    }

    pub fn with_capacity(
        attr_type: CK_ATTRIBUTE_TYPE,
        capacity: usize,
    ) -> AttributeSlot {
        AttributeSlot {
            attr_type: attr_type,
            buffer: Some(Zeroizing::new(vec![0u8; capacity])),
            len: 0,
            nested: None,
        }
    }

    /// Turns a fetched nested template array, which lists the nested
    /// types and lengths, into a slot that fetches the nested values
    pub fn expand_nested(
        &self,
        profile: PlatformProfile,
    ) -> Result<AttributeSlot> {
        let raw = match self.buffer {
            Some(ref b) => b.as_slice(),
            None => &[],
        };
        let layout = CK_ATTRIBUTE::DEF.layout(profile);
        if raw.len() % layout.size() != 0 {
            return Err(Error::usage(format!(
                "{} returned {} bytes for a template",
                attr_name(self.attr_type),
                raw.len()
            )));
        }
        let mut entries = Vec::with_capacity(raw.len() / layout.size());
        for chunk in raw.chunks(layout.size()) {
            let view = StructView::new(layout, chunk)?;
            let t = view.ulong(CK_ATTRIBUTE::type_);
            let len = view.ulong(CK_ATTRIBUTE::ulValueLen);
            entries.push(if len == CK_UNAVAILABLE_INFORMATION {
                AttributeSlot::query(t)
            } else {
                AttributeSlot::with_capacity(t, usize::try_from(len)?)
            });
        }
        Ok(AttributeSlot {
            attr_type: self.attr_type,
            buffer: None,
            len: self.len,
            nested: Some(entries),
        })
    }

    pub fn is_available(&self) -> bool {
        self.len != CK_UNAVAILABLE_INFORMATION
    }
}

/// The `CK_ATTRIBUTE` arrays of a `C_GetAttributeValue` call, pointing
/// into the slot buffers
pub(crate) struct FetchArray {
    array: StructBuffer,
    nested: Vec<Option<FetchArray>>,
}

impl FetchArray {
    pub(crate) fn new(
        slots: &mut [AttributeSlot],
        profile: PlatformProfile,
    ) -> Result<FetchArray> {
        let mut array =
            StructBuffer::array(&CK_ATTRIBUTE::DEF, profile, slots.len())?;
        let mut nested = Vec::with_capacity(slots.len());
        for (i, slot) in slots.iter_mut().enumerate() {
            let (inner, ptr, len) = match slot.nested {
                Some(ref mut entries) => {
                    let inner = FetchArray::new(entries, profile)?;
                    let ptr = inner.as_ptr();
                    let len = inner.array.len();
                    (Some(inner), ptr, len)
                }
                None => match slot.buffer {
                    Some(ref mut b) => (None, b.as_mut_ptr(), b.len()),
                    None => (None, std::ptr::null_mut(), 0),
                },
            };
            let mut view = array.view_at_mut(i);
            view.set_ulong(CK_ATTRIBUTE::type_, slot.attr_type)?;
            view.set_ptr(CK_ATTRIBUTE::pValue, ptr as *const c_void);
            view.set_ulong(CK_ATTRIBUTE::ulValueLen, CK_ULONG::try_from(len)?)?;
            nested.push(inner);
        }
        Ok(FetchArray {
            array: array,
            nested: nested,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        if self.array.is_empty() {
            std::ptr::null_mut()
        } else {
            self.array.as_ptr()
        }
    }

    /// Copies the reported lengths back, they are set per attribute
    /// whatever the outcome of the call
    pub(crate) fn read_lengths(&self, slots: &mut [AttributeSlot]) {
        for (i, slot) in slots.iter_mut().enumerate() {
            let len = self.array.view_at(i).ulong(CK_ATTRIBUTE::ulValueLen);
            slot.len = len;
            if let (Some(Some(inner)), Some(entries)) =
                (self.nested.get(i), slot.nested.as_mut())
            {
                inner.read_lengths(entries);
            }
            if let Some(ref mut b) = slot.buffer {
                match usize::try_from(len) {
                    Ok(l) if len != CK_UNAVAILABLE_INFORMATION => {
                        if l <= b.len() {
                            b.truncate(l);
                        }
                    }
                    _ => (),
                }
            }
        }
    }
}
