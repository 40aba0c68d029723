// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Token, sessions and objects of the mock module

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use pkcs11::*;

pub const SLOT_ID: CK_SLOT_ID = 1;
pub const EMPTY_SLOT_ID: CK_SLOT_ID = 2;
pub const USER_PIN: &str = "12345678";
pub const SO_PIN: &str = "87654321";
pub const TOKEN_LABEL: &str = "ckbind mock token";

/* object and session handles start here so they never look like slots */
const FIRST_HANDLE: CK_ULONG = 0x100;

pub type MockResult<T> = std::result::Result<T, CK_RV>;

pub type StoredTemplate = Vec<(CK_ATTRIBUTE_TYPE, StoredValue)>;

/// An attribute value as the module keeps it. Values are stored in the
/// native encoding of the caller, nested templates are deep copied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoredValue {
    Raw(Vec<u8>),
    Template(StoredTemplate),
}

impl StoredValue {
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            StoredValue::Raw(v) => Some(v.as_slice()),
            StoredValue::Template(_) => None,
        }
    }
}

pub fn is_template_attribute(t: CK_ATTRIBUTE_TYPE) -> bool {
    matches!(
        t,
        CKA_WRAP_TEMPLATE | CKA_UNWRAP_TEMPLATE | CKA_DERIVE_TEMPLATE
    )
}

#[derive(Clone, Debug, Default)]
pub struct Object {
    pub attrs: StoredTemplate,
}

impl Object {
    pub fn new(attrs: StoredTemplate) -> Object {
        Object { attrs: attrs }
    }

    pub fn get(&self, t: CK_ATTRIBUTE_TYPE) -> Option<&StoredValue> {
        self.attrs.iter().find(|(a, _)| *a == t).map(|(_, v)| v)
    }

    pub fn raw(&self, t: CK_ATTRIBUTE_TYPE) -> Option<&[u8]> {
        self.get(t).and_then(|v| v.as_raw())
    }

    pub fn set(&mut self, t: CK_ATTRIBUTE_TYPE, value: StoredValue) {
        match self.attrs.iter_mut().find(|(a, _)| *a == t) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((t, value)),
        }
    }

    pub fn set_raw(&mut self, t: CK_ATTRIBUTE_TYPE, value: &[u8]) {
        self.set(t, StoredValue::Raw(value.to_vec()))
    }

    pub fn is_true(&self, t: CK_ATTRIBUTE_TYPE) -> bool {
        self.raw(t) == Some(&[CK_TRUE][..])
    }

    pub fn is_false(&self, t: CK_ATTRIBUTE_TYPE) -> bool {
        self.raw(t) == Some(&[CK_FALSE][..])
    }

    /// The value of secret attributes can't be read back
    pub fn is_sensitive(&self, t: CK_ATTRIBUTE_TYPE) -> bool {
        t == CKA_VALUE
            && (self.is_true(CKA_SENSITIVE) || self.is_false(CKA_EXTRACTABLE))
    }

    pub fn value(&self) -> &[u8] {
        self.raw(CKA_VALUE).unwrap_or(&[])
    }

    /// Key byte of the toy ciphers
    pub fn key_byte(&self) -> u8 {
        match self.value().first() {
            Some(b) => *b,
            None => 0x5a,
        }
    }

    pub fn size(&self) -> usize {
        fn value_size(v: &StoredValue) -> usize {
            match v {
                StoredValue::Raw(r) => r.len(),
                StoredValue::Template(t) => {
                    t.iter().map(|(_, v)| value_size(v)).sum()
                }
            }
        }
        self.attrs.iter().map(|(_, v)| value_size(v)).sum()
    }

    pub fn matches(&self, template: &StoredTemplate) -> bool {
        template.iter().all(|(t, v)| self.get(*t) == Some(v))
    }
}

/// Accumulated input of a MAC operation
#[derive(Clone, Debug, Default)]
pub struct MacOp {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct SessionState {
    pub slot: CK_SLOT_ID,
    pub flags: CK_FLAGS,
    pub encrypt: Option<u8>,
    pub decrypt: Option<u8>,
    pub digest: Option<Vec<u8>>,
    pub sign: Option<MacOp>,
    pub verify: Option<MacOp>,
    pub sign_recover: Option<u8>,
    pub verify_recover: Option<u8>,
    pub find: Option<VecDeque<CK_OBJECT_HANDLE>>,
}

impl SessionState {
    fn new(slot: CK_SLOT_ID, flags: CK_FLAGS) -> SessionState {
        SessionState {
            slot: slot,
            flags: flags,
            encrypt: None,
            decrypt: None,
            digest: None,
            sign: None,
            verify: None,
            sign_recover: None,
            verify_recover: None,
            find: None,
        }
    }

    pub fn read_write(&self) -> bool {
        self.flags & CKF_RW_SESSION != 0
    }
}

/// The GCM parameters last seen by an init call
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GcmSeen {
    pub iv: Vec<u8>,
    pub iv_bits: CK_ULONG,
    pub aad: Vec<u8>,
    pub tag_bits: CK_ULONG,
}

/* Makes an attribute value longer after its length was queried, like a
 * module whose objects change between the two calls */
#[derive(Debug)]
struct Growth {
    object: CK_OBJECT_HANDLE,
    attr: CK_ATTRIBUTE_TYPE,
    extra: usize,
    times: usize,
}

#[derive(Debug)]
pub struct MockState {
    pub initialized: bool,
    pub init_flags: CK_FLAGS,
    pub init_reserved: Option<String>,
    pub token_present: bool,
    pub label: [u8; 32],
    pub so_pin: Vec<u8>,
    pub user_pin: Vec<u8>,
    pub login: Option<CK_USER_TYPE>,
    pub sessions: HashMap<CK_SESSION_HANDLE, SessionState>,
    pub objects: HashMap<CK_OBJECT_HANDLE, Object>,
    pub events: VecDeque<CK_SLOT_ID>,
    pub last_gcm: Option<GcmSeen>,
    pub seed: Vec<u8>,
    calls: HashMap<&'static str, usize>,
    growth: Option<Growth>,
    next_handle: CK_ULONG,
    random: u8,
}

pub fn padded<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [b' '; N];
    let len = s.len().min(N);
    out[..len].copy_from_slice(&s.as_bytes()[..len]);
    out
}

impl MockState {
    pub fn new() -> MockState {
        MockState {
            initialized: false,
            init_flags: 0,
            init_reserved: None,
            token_present: true,
            label: padded(TOKEN_LABEL),
            so_pin: SO_PIN.as_bytes().to_vec(),
            user_pin: USER_PIN.as_bytes().to_vec(),
            login: None,
            sessions: HashMap::new(),
            objects: HashMap::new(),
            events: VecDeque::new(),
            last_gcm: None,
            seed: Vec::new(),
            calls: HashMap::new(),
            growth: None,
            next_handle: FIRST_HANDLE,
            random: 0,
        }
    }

    pub fn record_call(&mut self, name: &'static str) {
        *self.calls.entry(name).or_insert(0) += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        match self.calls.get(name) {
            Some(n) => *n,
            None => 0,
        }
    }

    pub fn check_initialized(&self) -> MockResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CKR_CRYPTOKI_NOT_INITIALIZED)
        }
    }

    /// Checks the slot exists and holds a token
    pub fn check_token(&self, slot: CK_SLOT_ID) -> MockResult<()> {
        self.check_initialized()?;
        match slot {
            SLOT_ID if self.token_present => Ok(()),
            SLOT_ID | EMPTY_SLOT_ID => Err(CKR_TOKEN_NOT_PRESENT),
            _ => Err(CKR_SLOT_ID_INVALID),
        }
    }

    pub fn next_handle(&mut self) -> CK_ULONG {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn open_session(
        &mut self,
        slot: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> CK_SESSION_HANDLE {
        let handle = self.next_handle();
        self.sessions.insert(handle, SessionState::new(slot, flags));
        handle
    }

    pub fn session(&self, h: CK_SESSION_HANDLE) -> MockResult<&SessionState> {
        self.check_initialized()?;
        self.sessions.get(&h).ok_or(CKR_SESSION_HANDLE_INVALID)
    }

    pub fn session_mut(
        &mut self,
        h: CK_SESSION_HANDLE,
    ) -> MockResult<&mut SessionState> {
        self.check_initialized()?;
        self.sessions.get_mut(&h).ok_or(CKR_SESSION_HANDLE_INVALID)
    }

    /// Session state as `C_GetSessionInfo` reports it
    pub fn session_state(&self, s: &SessionState) -> CK_STATE {
        match (self.login, s.read_write()) {
            (Some(CKU_SO), _) => CKS_RW_SO_FUNCTIONS,
            (Some(_), true) => CKS_RW_USER_FUNCTIONS,
            (Some(_), false) => CKS_RO_USER_FUNCTIONS,
            (None, true) => CKS_RW_PUBLIC_SESSION,
            (None, false) => CKS_RO_PUBLIC_SESSION,
        }
    }

    pub fn close_slot_sessions(&mut self, slot: CK_SLOT_ID) {
        self.sessions.retain(|_, s| s.slot != slot);
        if self.sessions.is_empty() {
            self.login = None;
        }
    }

    pub fn object(&self, h: CK_OBJECT_HANDLE) -> MockResult<&Object> {
        self.objects.get(&h).ok_or(CKR_OBJECT_HANDLE_INVALID)
    }

    pub fn key(&self, h: CK_OBJECT_HANDLE) -> MockResult<&Object> {
        self.objects.get(&h).ok_or(CKR_KEY_HANDLE_INVALID)
    }

    pub fn add_object(&mut self, object: Object) -> CK_OBJECT_HANDLE {
        let handle = self.next_handle();
        self.objects.insert(handle, object);
        handle
    }

    /// Deterministic bytes, mixed with whatever was seeded
    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            self.random = self.random.wrapping_mul(29).wrapping_add(113);
            let mix = match self.seed.len() {
                0 => 0,
                n => self.seed[i % n],
            };
            out.push(self.random ^ mix);
        }
        out
    }

    pub fn set_growth(
        &mut self,
        object: CK_OBJECT_HANDLE,
        attr: CK_ATTRIBUTE_TYPE,
        extra: usize,
        times: usize,
    ) {
        self.growth = Some(Growth {
            object: object,
            attr: attr,
            extra: extra,
            times: times,
        });
    }

    /// Called after the length of an attribute was reported
    pub fn length_queried(
        &mut self,
        object: CK_OBJECT_HANDLE,
        attr: CK_ATTRIBUTE_TYPE,
    ) {
        let extra = match self.growth {
            Some(ref mut g)
                if g.object == object && g.attr == attr && g.times > 0 =>
            {
                g.times -= 1;
                g.extra
            }
            _ => return,
        };
        if let Some(o) = self.objects.get_mut(&object) {
            let mut value = o.raw(attr).unwrap_or(&[]).to_vec();
            value.resize(value.len() + extra, b'+');
            o.set(attr, StoredValue::Raw(value));
        }
    }
}

static STATE: Lazy<Mutex<MockState>> =
    Lazy::new(|| Mutex::new(MockState::new()));

/// Locks the module state; a panic in a test can't leave it unusable
pub fn lock() -> MutexGuard<'static, MockState> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/* Toy digest: not cryptographic, only deterministic and input sensitive */
pub fn mock_digest(data: &[u8]) -> Vec<u8> {
    let mut out = [0u8; 32];
    let mut acc: u8 = 0x6a;
    for (i, b) in data.iter().enumerate() {
        acc = acc.wrapping_mul(31).wrapping_add(*b);
        out[i % 32] ^= acc;
        out[(i + 7) % 32] = out[(i + 7) % 32].wrapping_add(acc.rotate_left(3));
    }
    out[31] ^= data.len() as u8;
    out.to_vec()
}

pub fn mock_mac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut input = key.to_vec();
    input.extend_from_slice(data);
    mock_digest(&input)
}

pub fn xor(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}
