// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Rust representations of the cryptoki information structures

use std::fmt;

use bitflags::bitflags;
use pkcs11::layout::StructView;
use pkcs11::structs::*;
use pkcs11::*;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SlotFlags: CK_FLAGS {
        const TOKEN_PRESENT = CKF_TOKEN_PRESENT;
        const REMOVABLE_DEVICE = CKF_REMOVABLE_DEVICE;
        const HW_SLOT = CKF_HW_SLOT;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct TokenFlags: CK_FLAGS {
        const RNG = CKF_RNG;
        const WRITE_PROTECTED = CKF_WRITE_PROTECTED;
        const LOGIN_REQUIRED = CKF_LOGIN_REQUIRED;
        const USER_PIN_INITIALIZED = CKF_USER_PIN_INITIALIZED;
        const RESTORE_KEY_NOT_NEEDED = CKF_RESTORE_KEY_NOT_NEEDED;
        const CLOCK_ON_TOKEN = CKF_CLOCK_ON_TOKEN;
        const PROTECTED_AUTHENTICATION_PATH =
            CKF_PROTECTED_AUTHENTICATION_PATH;
        const DUAL_CRYPTO_OPERATIONS = CKF_DUAL_CRYPTO_OPERATIONS;
        const TOKEN_INITIALIZED = CKF_TOKEN_INITIALIZED;
        const SECONDARY_AUTHENTICATION = CKF_SECONDARY_AUTHENTICATION;
        const USER_PIN_COUNT_LOW = CKF_USER_PIN_COUNT_LOW;
        const USER_PIN_FINAL_TRY = CKF_USER_PIN_FINAL_TRY;
        const USER_PIN_LOCKED = CKF_USER_PIN_LOCKED;
        const USER_PIN_TO_BE_CHANGED = CKF_USER_PIN_TO_BE_CHANGED;
        const SO_PIN_COUNT_LOW = CKF_SO_PIN_COUNT_LOW;
        const SO_PIN_FINAL_TRY = CKF_SO_PIN_FINAL_TRY;
        const SO_PIN_LOCKED = CKF_SO_PIN_LOCKED;
        const SO_PIN_TO_BE_CHANGED = CKF_SO_PIN_TO_BE_CHANGED;
        const ERROR_STATE = CKF_ERROR_STATE;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SessionFlags: CK_FLAGS {
        const RW_SESSION = CKF_RW_SESSION;
        const SERIAL_SESSION = CKF_SERIAL_SESSION;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MechanismFlags: CK_FLAGS {
        const HW = CKF_HW;
        const ENCRYPT = CKF_ENCRYPT;
        const DECRYPT = CKF_DECRYPT;
        const DIGEST = CKF_DIGEST;
        const SIGN = CKF_SIGN;
        const SIGN_RECOVER = CKF_SIGN_RECOVER;
        const VERIFY = CKF_VERIFY;
        const VERIFY_RECOVER = CKF_VERIFY_RECOVER;
        const GENERATE = CKF_GENERATE;
        const GENERATE_KEY_PAIR = CKF_GENERATE_KEY_PAIR;
        const WRAP = CKF_WRAP;
        const UNWRAP = CKF_UNWRAP;
        const DERIVE = CKF_DERIVE;
        const EC_F_P = CKF_EC_F_P;
        const EC_F_2M = CKF_EC_F_2M;
        const EC_ECPARAMETERS = CKF_EC_ECPARAMETERS;
        const EC_NAMEDCURVE = CKF_EC_NAMEDCURVE;
        const EC_UNCOMPRESS = CKF_EC_UNCOMPRESS;
        const EC_COMPRESS = CKF_EC_COMPRESS;
        const EXTENSION = CKF_EXTENSION;
    }
}

bitflags! {
    /// Flags of `CK_C_INITIALIZE_ARGS`
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct InitializeFlags: CK_FLAGS {
        const LIBRARY_CANT_CREATE_OS_THREADS =
            CKF_LIBRARY_CANT_CREATE_OS_THREADS;
        const OS_LOCKING_OK = CKF_OS_LOCKING_OK;
    }
}

/* Fixed size character fields are blank padded, some modules pad with
 * NULs instead */
fn padded_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub fn new(major: u8, minor: u8) -> Version {
        Version {
            major: major,
            minor: minor,
        }
    }

    pub(crate) fn decode<B: AsRef<[u8]>>(view: &StructView<B>) -> Version {
        Version {
            major: view.byte(CK_VERSION::major),
            minor: view.byte(CK_VERSION::minor),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Info {
    pub cryptoki_version: Version,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub library_description: String,
    pub library_version: Version,
}

impl Info {
    pub(crate) fn decode<B: AsRef<[u8]>>(view: &StructView<B>) -> Info {
        Info {
            cryptoki_version: Version::decode(
                &view.nested(CK_INFO::cryptokiVersion),
            ),
            manufacturer_id: padded_string(view.bytes(CK_INFO::manufacturerID)),
            flags: view.ulong(CK_INFO::flags),
            library_description: padded_string(
                view.bytes(CK_INFO::libraryDescription),
            ),
            library_version: Version::decode(
                &view.nested(CK_INFO::libraryVersion),
            ),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SlotInfo {
    pub slot_description: String,
    pub manufacturer_id: String,
    pub flags: SlotFlags,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl SlotInfo {
    pub(crate) fn decode<B: AsRef<[u8]>>(view: &StructView<B>) -> SlotInfo {
        SlotInfo {
            slot_description: padded_string(
                view.bytes(CK_SLOT_INFO::slotDescription),
            ),
            manufacturer_id: padded_string(
                view.bytes(CK_SLOT_INFO::manufacturerID),
            ),
            flags: SlotFlags::from_bits_retain(view.ulong(CK_SLOT_INFO::flags)),
            hardware_version: Version::decode(
                &view.nested(CK_SLOT_INFO::hardwareVersion),
            ),
            firmware_version: Version::decode(
                &view.nested(CK_SLOT_INFO::firmwareVersion),
            ),
        }
    }

    pub fn token_present(&self) -> bool {
        self.flags.contains(SlotFlags::TOKEN_PRESENT)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub flags: TokenFlags,
    pub max_session_count: CK_ULONG,
    pub session_count: CK_ULONG,
    pub max_rw_session_count: CK_ULONG,
    pub rw_session_count: CK_ULONG,
    pub max_pin_len: CK_ULONG,
    pub min_pin_len: CK_ULONG,
    pub total_public_memory: CK_ULONG,
    pub free_public_memory: CK_ULONG,
    pub total_private_memory: CK_ULONG,
    pub free_private_memory: CK_ULONG,
    pub hardware_version: Version,
    pub firmware_version: Version,
    pub utc_time: String,
}

impl TokenInfo {
    pub(crate) fn decode<B: AsRef<[u8]>>(view: &StructView<B>) -> TokenInfo {
        TokenInfo {
            label: padded_string(view.bytes(CK_TOKEN_INFO::label)),
            manufacturer_id: padded_string(
                view.bytes(CK_TOKEN_INFO::manufacturerID),
            ),
            model: padded_string(view.bytes(CK_TOKEN_INFO::model)),
            serial_number: padded_string(
                view.bytes(CK_TOKEN_INFO::serialNumber),
            ),
            flags: TokenFlags::from_bits_retain(
                view.ulong(CK_TOKEN_INFO::flags),
            ),
            max_session_count: view.ulong(CK_TOKEN_INFO::ulMaxSessionCount),
            session_count: view.ulong(CK_TOKEN_INFO::ulSessionCount),
            max_rw_session_count: view
                .ulong(CK_TOKEN_INFO::ulMaxRwSessionCount),
            rw_session_count: view.ulong(CK_TOKEN_INFO::ulRwSessionCount),
            max_pin_len: view.ulong(CK_TOKEN_INFO::ulMaxPinLen),
            min_pin_len: view.ulong(CK_TOKEN_INFO::ulMinPinLen),
            total_public_memory: view
                .ulong(CK_TOKEN_INFO::ulTotalPublicMemory),
            free_public_memory: view.ulong(CK_TOKEN_INFO::ulFreePublicMemory),
            total_private_memory: view
                .ulong(CK_TOKEN_INFO::ulTotalPrivateMemory),
            free_private_memory: view
                .ulong(CK_TOKEN_INFO::ulFreePrivateMemory),
            hardware_version: Version::decode(
                &view.nested(CK_TOKEN_INFO::hardwareVersion),
            ),
            firmware_version: Version::decode(
                &view.nested(CK_TOKEN_INFO::firmwareVersion),
            ),
            utc_time: padded_string(view.bytes(CK_TOKEN_INFO::utcTime)),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionInfo {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: SessionFlags,
    pub device_error: CK_ULONG,
}

impl SessionInfo {
    pub(crate) fn decode<B: AsRef<[u8]>>(view: &StructView<B>) -> SessionInfo {
        SessionInfo {
            slot_id: view.ulong(CK_SESSION_INFO::slotID),
            state: view.ulong(CK_SESSION_INFO::state),
            flags: SessionFlags::from_bits_retain(
                view.ulong(CK_SESSION_INFO::flags),
            ),
            device_error: view.ulong(CK_SESSION_INFO::ulDeviceError),
        }
    }

    pub fn is_read_write(&self) -> bool {
        self.flags.contains(SessionFlags::RW_SESSION)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MechanismInfo {
    pub min_key_size: CK_ULONG,
    pub max_key_size: CK_ULONG,
    pub flags: MechanismFlags,
}

impl MechanismInfo {
    pub(crate) fn decode<B: AsRef<[u8]>>(
        view: &StructView<B>,
    ) -> MechanismInfo {
        MechanismInfo {
            min_key_size: view.ulong(CK_MECHANISM_INFO::ulMinKeySize),
            max_key_size: view.ulong(CK_MECHANISM_INFO::ulMaxKeySize),
            flags: MechanismFlags::from_bits_retain(
                view.ulong(CK_MECHANISM_INFO::flags),
            ),
        }
    }
}

/// A `CK_DATE`, eight ASCII digits on the wire
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day: u8) -> Option<Date> {
        if year > 9999 || !(1..=12).contains(&month) || !(1..=31).contains(&day)
        {
            return None;
        }
        Some(Date {
            year: year,
            month: month,
            day: day,
        })
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        let s = format!("{:04}{:02}{:02}", self.year, self.month, self.day);
        out.copy_from_slice(s.as_bytes());
        out
    }

    /// Parses the 8 byte wire form, an all blank or all zero value is
    /// the empty date and yields `None`
    pub fn decode(raw: &[u8]) -> Option<Date> {
        if raw.len() != 8 || !raw.iter().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let s = std::str::from_utf8(raw).ok()?;
        let year = s[0..4].parse().ok()?;
        let month = s[4..6].parse().ok()?;
        let day = s[6..8].parse().ok()?;
        Date::new(year, month, day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs11::PlatformProfile;

    #[test]
    fn info_decode() {
        let layout = CK_INFO::DEF.layout(PlatformProfile::W4_PACKED);
        let mut buf = vec![0u8; layout.size()];
        let mut view = StructView::new(layout, &mut buf[..]).unwrap();
        let mut manuf = [b' '; 32];
        manuf[..4].copy_from_slice(b"ACME");
        view.set_bytes(CK_INFO::manufacturerID, &manuf).unwrap();
        view.set_bytes(CK_INFO::libraryDescription, &[0u8; 32])
            .unwrap();
        view.set_ulong(CK_INFO::flags, 0).unwrap();
        {
            let mut v = view.nested_mut(CK_INFO::cryptokiVersion);
            v.set_byte(CK_VERSION::major, 2);
            v.set_byte(CK_VERSION::minor, 40);
        }
        let info = Info::decode(&view);
        assert_eq!(info.manufacturer_id, "ACME");
        assert_eq!(info.library_description, "");
        assert_eq!(info.cryptoki_version.to_string(), "2.40");
    }

    #[test]
    fn dates() {
        let d = Date::new(2024, 2, 29).unwrap();
        assert_eq!(&d.encode(), b"20240229");
        assert_eq!(Date::decode(b"20240229"), Some(d));
        assert_eq!(Date::decode(b"        "), None);
        assert_eq!(Date::decode(b"20241301"), None);
        assert!(Date::new(2024, 0, 1).is_none());
    }

    #[test]
    fn flags_keep_unknown_bits() {
        let f = SlotFlags::from_bits_retain(CKF_TOKEN_PRESENT | 0x100);
        assert!(f.contains(SlotFlags::TOKEN_PRESENT));
        assert_eq!(f.bits(), CKF_TOKEN_PRESENT | 0x100);
    }
}
