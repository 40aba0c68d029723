// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

/* asserts the call failed with the given CKR_ code */
macro_rules! assert_rv {
    ($ret:expr, $rv:expr) => {
        match $ret {
            Ok(_) => panic!("expected {}, call succeeded", rv_name($rv)),
            Err(e) => assert!(
                e.is_rv($rv),
                "expected {}, got {}",
                rv_name($rv),
                e
            ),
        }
    };
}

pub fn secret_key_template(value: &[u8]) -> Vec<Attribute> {
    vec![
        Attribute::from_ulong(CKA_CLASS, CKO_SECRET_KEY),
        Attribute::from_ulong(CKA_KEY_TYPE, CKK_GENERIC_SECRET),
        Attribute::from_bytes(CKA_VALUE, value.to_vec()),
        Attribute::from_bool(CKA_EXTRACTABLE, true),
        Attribute::from_bool(CKA_SENSITIVE, false),
    ]
}

pub fn data_object_template(label: &str, value: &[u8]) -> Vec<Attribute> {
    vec![
        Attribute::from_ulong(CKA_CLASS, CKO_DATA),
        Attribute::from_string(CKA_LABEL, label),
        Attribute::from_bytes(CKA_VALUE, value.to_vec()),
    ]
}

pub fn import_secret(session: &Session, value: &[u8]) -> CK_OBJECT_HANDLE {
    ret_or_panic!(session.create_object(&secret_key_template(value)))
}

/// Reads back the CKA_VALUE of a non sensitive key
pub fn key_value(session: &Session, key: CK_OBJECT_HANDLE) -> Vec<u8> {
    let attrs = ret_or_panic!(session.get_attribute_value(key, &[CKA_VALUE]));
    assert_eq!(attrs.len(), 1);
    ret_or_panic!(attrs[0].to_bytes()).to_vec()
}

pub fn xor(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

/* what the module derives a key of `len` bytes from */
pub fn stretched(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut block = ckbind_mock::mock_digest(seed);
    while out.len() < len {
        out.extend_from_slice(&block);
        block = ckbind_mock::mock_digest(&block);
    }
    out.truncate(len);
    out
}

pub fn random_data() -> RandomData {
    RandomData {
        client_random: vec![0xc1; 32],
        server_random: vec![0x5e; 32],
    }
}
