// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;
use pkcs11::layout::StructDef;
use pkcs11::structs::*;

/* sizes in PlatformProfile::ALL order: w4, w4_packed, w8, w8_packed */
#[cfg(target_pointer_width = "64")]
static SIZES: [(&StructDef, [usize; 4]); 36] = [
    (&CK_VERSION::DEF, [2, 2, 2, 2]),
    (&CK_INFO::DEF, [76, 72, 88, 76]),
    (&CK_SLOT_INFO::DEF, [104, 104, 112, 108]),
    (&CK_TOKEN_INFO::DEF, [160, 160, 208, 204]),
    (&CK_SESSION_INFO::DEF, [16, 16, 32, 32]),
    (&CK_ATTRIBUTE::DEF, [24, 16, 24, 24]),
    (&CK_DATE::DEF, [8, 8, 8, 8]),
    (&CK_MECHANISM::DEF, [24, 16, 24, 24]),
    (&CK_MECHANISM_INFO::DEF, [12, 12, 24, 24]),
    (&CK_C_INITIALIZE_ARGS::DEF, [48, 44, 48, 48]),
    (&CK_RSA_PKCS_OAEP_PARAMS::DEF, [32, 24, 40, 40]),
    (&CK_RSA_PKCS_PSS_PARAMS::DEF, [12, 12, 24, 24]),
    (&CK_AES_CTR_PARAMS::DEF, [20, 20, 24, 24]),
    (&CK_GCM_PARAMS::DEF, [32, 32, 48, 48]),
    (&CK_CCM_PARAMS::DEF, [40, 32, 48, 48]),
    (&CK_AES_CBC_ENCRYPT_DATA_PARAMS::DEF, [32, 28, 32, 32]),
    (&CK_DES_CBC_ENCRYPT_DATA_PARAMS::DEF, [24, 20, 24, 24]),
    (&CK_RC2_CBC_PARAMS::DEF, [12, 12, 16, 16]),
    (&CK_KEY_DERIVATION_STRING_DATA::DEF, [16, 12, 16, 16]),
    (&CK_ECDH1_DERIVE_PARAMS::DEF, [32, 28, 40, 40]),
    (&CK_X9_42_DH1_DERIVE_PARAMS::DEF, [32, 28, 40, 40]),
    (&CK_EDDSA_PARAMS::DEF, [16, 13, 24, 17]),
    (&CK_HKDF_PARAMS::DEF, [48, 38, 64, 58]),
    (&CK_PKCS5_PBKD2_PARAMS::DEF, [64, 52, 72, 72]),
    (&CK_PKCS5_PBKD2_PARAMS2::DEF, [64, 48, 72, 72]),
    (&CK_KEY_WRAP_SET_OAEP_PARAMS::DEF, [24, 13, 24, 17]),
    (&CK_SSL3_RANDOM_DATA::DEF, [32, 24, 32, 32]),
    (&CK_SSL3_MASTER_KEY_DERIVE_PARAMS::DEF, [40, 32, 40, 40]),
    (&CK_TLS12_MASTER_KEY_DERIVE_PARAMS::DEF, [48, 36, 48, 48]),
    (&CK_SSL3_KEY_MAT_OUT::DEF, [32, 32, 48, 48]),
    (&CK_SSL3_KEY_MAT_PARAMS::DEF, [56, 45, 72, 65]),
    (&CK_TLS12_KEY_MAT_PARAMS::DEF, [64, 49, 80, 73]),
    (&CK_WTLS_RANDOM_DATA::DEF, [32, 24, 32, 32]),
    (&CK_WTLS_KEY_MAT_OUT::DEF, [16, 16, 24, 24]),
    (&CK_WTLS_KEY_MAT_PARAMS::DEF, [64, 53, 88, 81]),
    (&CK_TLS_PRF_PARAMS::DEF, [48, 40, 48, 48]),
];

/* (structure, field, offsets in PlatformProfile::ALL order) */
#[cfg(target_pointer_width = "64")]
static OFFSETS: [(&StructDef, usize, [usize; 4]); 24] = [
    (&CK_ATTRIBUTE::DEF, CK_ATTRIBUTE::pValue, [8, 4, 8, 8]),
    (&CK_ATTRIBUTE::DEF, CK_ATTRIBUTE::ulValueLen, [16, 12, 16, 16]),
    (&CK_INFO::DEF, CK_INFO::flags, [36, 34, 40, 34]),
    (&CK_INFO::DEF, CK_INFO::libraryDescription, [40, 38, 48, 42]),
    (&CK_INFO::DEF, CK_INFO::libraryVersion, [72, 70, 80, 74]),
    (
        &CK_TOKEN_INFO::DEF,
        CK_TOKEN_INFO::ulMaxSessionCount,
        [100, 100, 104, 104],
    ),
    (
        &CK_TOKEN_INFO::DEF,
        CK_TOKEN_INFO::hardwareVersion,
        [140, 140, 184, 184],
    ),
    (&CK_TOKEN_INFO::DEF, CK_TOKEN_INFO::utcTime, [144, 144, 188, 188]),
    (&CK_EDDSA_PARAMS::DEF, CK_EDDSA_PARAMS::ulContextDataLen, [4, 1, 8, 1]),
    (&CK_EDDSA_PARAMS::DEF, CK_EDDSA_PARAMS::pContextData, [8, 5, 16, 9]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::prfHashMechanism, [4, 2, 8, 2]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::ulSaltType, [8, 6, 16, 10]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::pSalt, [16, 10, 24, 18]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::hSaltKey, [28, 22, 40, 34]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::pInfo, [32, 26, 48, 42]),
    (&CK_HKDF_PARAMS::DEF, CK_HKDF_PARAMS::ulInfoLen, [40, 34, 56, 50]),
    (
        &CK_SSL3_KEY_MAT_PARAMS::DEF,
        CK_SSL3_KEY_MAT_PARAMS::bIsExport,
        [12, 12, 24, 24],
    ),
    (
        &CK_SSL3_KEY_MAT_PARAMS::DEF,
        CK_SSL3_KEY_MAT_PARAMS::RandomInfo,
        [16, 13, 32, 25],
    ),
    (
        &CK_SSL3_KEY_MAT_PARAMS::DEF,
        CK_SSL3_KEY_MAT_PARAMS::pReturnedKeyMaterial,
        [48, 37, 64, 57],
    ),
    (
        &CK_WTLS_KEY_MAT_PARAMS::DEF,
        CK_WTLS_KEY_MAT_PARAMS::pReturnedKeyMaterial,
        [56, 45, 80, 73],
    ),
    (&CK_GCM_PARAMS::DEF, CK_GCM_PARAMS::ulTagBits, [28, 28, 40, 40]),
    (
        &CK_C_INITIALIZE_ARGS::DEF,
        CK_C_INITIALIZE_ARGS::pReserved,
        [40, 36, 40, 40],
    ),
    (
        &CK_KEY_WRAP_SET_OAEP_PARAMS::DEF,
        CK_KEY_WRAP_SET_OAEP_PARAMS::ulXLen,
        [16, 9, 16, 9],
    ),
    (
        &CK_TLS12_KEY_MAT_PARAMS::DEF,
        CK_TLS12_KEY_MAT_PARAMS::prfHashMechanism,
        [56, 45, 72, 65],
    ),
];

#[cfg(target_pointer_width = "64")]
#[test]
fn test_struct_sizes() {
    for (i, (def, sizes)) in SIZES.iter().enumerate() {
        assert!(std::ptr::eq(UNMANAGED_STRUCTS[i], *def));
        for (profile, size) in PlatformProfile::ALL.iter().zip(sizes) {
            assert_eq!(
                def.size(*profile),
                *size,
                "size of {} for {}",
                def.name,
                profile
            );
        }
    }
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_field_offsets() {
    for (def, field, offsets) in OFFSETS.iter() {
        for (profile, offset) in PlatformProfile::ALL.iter().zip(offsets) {
            assert_eq!(
                def.offset(*profile, *field),
                *offset,
                "offset of {}.{} for {}",
                def.name,
                def.fields[*field].name,
                profile
            );
        }
    }
}

#[test]
fn test_packed_structs_have_no_padding() {
    for profile in [PlatformProfile::W4_PACKED, PlatformProfile::W8_PACKED] {
        for def in UNMANAGED_STRUCTS.iter() {
            assert_eq!(def.align(profile), 1, "{}", def.name);
        }
    }
    /* two bytes and a native word */
    assert_eq!(
        CK_EDDSA_PARAMS::DEF.offset(PlatformProfile::W4_PACKED, 2),
        1 + 4
    );
}

/* The compiler's own layout of the host ABI must agree with the computed
 * one for the detected profile */
#[cfg(not(windows))]
#[allow(dead_code)]
mod host {
    use std::ffi::c_void;
    use std::os::raw::c_ulong;

    #[repr(C)]
    pub struct Version {
        pub major: u8,
        pub minor: u8,
    }

    #[repr(C)]
    pub struct Info {
        pub cryptoki_version: Version,
        pub manufacturer_id: [u8; 32],
        pub flags: c_ulong,
        pub library_description: [u8; 32],
        pub library_version: Version,
    }

    #[repr(C)]
    pub struct Attribute {
        pub type_: c_ulong,
        pub value: *mut c_void,
        pub value_len: c_ulong,
    }

    #[repr(C)]
    pub struct GcmParams {
        pub iv: *mut u8,
        pub iv_len: c_ulong,
        pub iv_bits: c_ulong,
        pub aad: *mut u8,
        pub aad_len: c_ulong,
        pub tag_bits: c_ulong,
    }

    #[repr(C)]
    pub struct HkdfParams {
        pub extract: u8,
        pub expand: u8,
        pub prf_hash_mechanism: c_ulong,
        pub salt_type: c_ulong,
        pub salt: *mut u8,
        pub salt_len: c_ulong,
        pub salt_key: c_ulong,
        pub info: *mut u8,
        pub info_len: c_ulong,
    }

    #[repr(C)]
    pub struct Ssl3RandomData {
        pub client_random: *mut u8,
        pub client_random_len: c_ulong,
        pub server_random: *mut u8,
        pub server_random_len: c_ulong,
    }

    #[repr(C)]
    pub struct Ssl3KeyMatParams {
        pub mac_size_in_bits: c_ulong,
        pub key_size_in_bits: c_ulong,
        pub iv_size_in_bits: c_ulong,
        pub is_export: u8,
        pub random_info: Ssl3RandomData,
        pub returned_key_material: *mut c_void,
    }
}

#[cfg(not(windows))]
#[test]
fn test_host_layout() {
    use std::mem::{offset_of, size_of};

    let profile = ret_or_panic!(platform::detect());

    assert_eq!(CK_INFO::DEF.size(profile), size_of::<host::Info>());
    assert_eq!(
        CK_INFO::DEF.offset(profile, CK_INFO::flags),
        offset_of!(host::Info, flags)
    );
    assert_eq!(
        CK_INFO::DEF.offset(profile, CK_INFO::libraryVersion),
        offset_of!(host::Info, library_version)
    );

    assert_eq!(
        CK_ATTRIBUTE::DEF.size(profile),
        size_of::<host::Attribute>()
    );
    assert_eq!(
        CK_ATTRIBUTE::DEF.offset(profile, CK_ATTRIBUTE::ulValueLen),
        offset_of!(host::Attribute, value_len)
    );

    assert_eq!(
        CK_GCM_PARAMS::DEF.size(profile),
        size_of::<host::GcmParams>()
    );
    assert_eq!(
        CK_GCM_PARAMS::DEF.offset(profile, CK_GCM_PARAMS::ulTagBits),
        offset_of!(host::GcmParams, tag_bits)
    );

    assert_eq!(
        CK_HKDF_PARAMS::DEF.size(profile),
        size_of::<host::HkdfParams>()
    );
    assert_eq!(
        CK_HKDF_PARAMS::DEF.offset(profile, CK_HKDF_PARAMS::hSaltKey),
        offset_of!(host::HkdfParams, salt_key)
    );

    assert_eq!(
        CK_SSL3_KEY_MAT_PARAMS::DEF.size(profile),
        size_of::<host::Ssl3KeyMatParams>()
    );
    assert_eq!(
        CK_SSL3_KEY_MAT_PARAMS::DEF
            .offset(profile, CK_SSL3_KEY_MAT_PARAMS::pReturnedKeyMaterial),
        offset_of!(host::Ssl3KeyMatParams, returned_key_material)
    );
}

/* The module computes its sizes on its side of the boundary */
#[test]
#[serial]
fn test_module_struct_sizes() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let sizes = ret_or_panic!(session.get_unmanaged_struct_size_list());
        assert_eq!(sizes.len(), UNMANAGED_STRUCTS.len());
        for (def, size) in UNMANAGED_STRUCTS.iter().zip(sizes) {
            assert_eq!(
                def.size(token.profile),
                usize::try_from(size).unwrap(),
                "{} for {}",
                def.name,
                token.profile
            );
        }
    });
}

/* HKDF without salt or info has no pointers to the heap, so every byte
 * of the block is known */
#[cfg(all(target_pointer_width = "64", target_endian = "little"))]
static HKDF_BYTES: [&str; 4] = [
    concat!(
        "01010000", "50020000", "01000000", "00000000",
        "0000000000000000", "00000000", "00000000",
        "0000000000000000", "00000000", "00000000",
    ),
    concat!(
        "0101", "50020000", "01000000", "0000000000000000",
        "00000000", "00000000", "0000000000000000", "00000000",
    ),
    concat!(
        "0101000000000000", "5002000000000000", "0100000000000000",
        "0000000000000000", "0000000000000000", "0000000000000000",
        "0000000000000000", "0000000000000000",
    ),
    concat!(
        "0101", "5002000000000000", "0100000000000000",
        "0000000000000000", "0000000000000000", "0000000000000000",
        "0000000000000000", "0000000000000000",
    ),
];

#[cfg(all(target_pointer_width = "64", target_endian = "little"))]
#[test]
fn test_marshaled_bytes() {
    let params = MechanismParams::Hkdf(HkdfParams {
        extract: true,
        expand: true,
        prf_hash_mechanism: CKM_SHA256,
        salt: HkdfSalt::Null,
        info: Vec::new(),
    });
    for (profile, expected) in PlatformProfile::ALL.iter().zip(HKDF_BYTES) {
        let marshaled = ret_or_panic!(params.marshal(*profile));
        let bytes = ret_or_panic!(marshaled.as_bytes());
        assert_eq!(
            hex::encode(bytes),
            expected,
            "HKDF parameters for {}",
            profile
        );
        assert_eq!(
            bytes.len(),
            CK_HKDF_PARAMS::DEF.size(*profile),
            "size for {}",
            profile
        );
    }
}
