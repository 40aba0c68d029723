// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Numeric constants of the PKCS#11 v2.40 interface
//!
//! All integer quantities are carried as a logical 64 bit [CK_ULONG]
//! regardless of the width the loaded module actually uses; narrowing to
//! the module word happens when structures and arguments are marshaled.

pub type CK_ULONG = u64;
pub type CK_LONG = i64;
pub type CK_BYTE = u8;
pub type CK_BBOOL = u8;
pub type CK_UTF8CHAR = u8;
pub type CK_CHAR = u8;

pub type CK_RV = CK_ULONG;
pub type CK_FLAGS = CK_ULONG;
pub type CK_SLOT_ID = CK_ULONG;
pub type CK_SESSION_HANDLE = CK_ULONG;
pub type CK_OBJECT_HANDLE = CK_ULONG;
pub type CK_OBJECT_CLASS = CK_ULONG;
pub type CK_KEY_TYPE = CK_ULONG;
pub type CK_ATTRIBUTE_TYPE = CK_ULONG;
pub type CK_MECHANISM_TYPE = CK_ULONG;
pub type CK_USER_TYPE = CK_ULONG;
pub type CK_STATE = CK_ULONG;
pub type CK_NOTIFICATION = CK_ULONG;
pub type CK_RSA_PKCS_MGF_TYPE = CK_ULONG;
pub type CK_RSA_PKCS_OAEP_SOURCE_TYPE = CK_ULONG;
pub type CK_EC_KDF_TYPE = CK_ULONG;
pub type CK_X9_42_DH_KDF_TYPE = CK_ULONG;
pub type CK_PKCS5_PBKD2_SALT_SOURCE_TYPE = CK_ULONG;
pub type CK_PKCS5_PBKDF2_PSEUDO_RANDOM_FUNCTION_TYPE = CK_ULONG;

pub const CK_TRUE: CK_BBOOL = 1;
pub const CK_FALSE: CK_BBOOL = 0;

pub const CK_INVALID_HANDLE: CK_ULONG = 0;
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = !0;
pub const CK_EFFECTIVELY_INFINITE: CK_ULONG = 0;

pub const CRYPTOKI_VERSION_MAJOR: CK_BYTE = 2;
pub const CRYPTOKI_VERSION_MINOR: CK_BYTE = 40;

/// Declares a group of constants together with a lookup function that
/// returns the symbolic name of a value
macro_rules! named_constants {
    ($lookup:ident; $($name:ident = $value:expr),* $(,)?) => {
        $(pub const $name: CK_ULONG = $value;)*

        pub fn $lookup(value: CK_ULONG) -> &'static str {
            match value {
                $($name => stringify!($name),)*
                _ => "UNKNOWN",
            }
        }
    };
}

named_constants! { rv_name;
    CKR_OK = 0x00000000,
    CKR_CANCEL = 0x00000001,
    CKR_HOST_MEMORY = 0x00000002,
    CKR_SLOT_ID_INVALID = 0x00000003,
    CKR_GENERAL_ERROR = 0x00000005,
    CKR_FUNCTION_FAILED = 0x00000006,
    CKR_ARGUMENTS_BAD = 0x00000007,
    CKR_NO_EVENT = 0x00000008,
    CKR_NEED_TO_CREATE_THREADS = 0x00000009,
    CKR_CANT_LOCK = 0x0000000A,
    CKR_ATTRIBUTE_READ_ONLY = 0x00000010,
    CKR_ATTRIBUTE_SENSITIVE = 0x00000011,
    CKR_ATTRIBUTE_TYPE_INVALID = 0x00000012,
    CKR_ATTRIBUTE_VALUE_INVALID = 0x00000013,
    CKR_ACTION_PROHIBITED = 0x0000001B,
    CKR_DATA_INVALID = 0x00000020,
    CKR_DATA_LEN_RANGE = 0x00000021,
    CKR_DEVICE_ERROR = 0x00000030,
    CKR_DEVICE_MEMORY = 0x00000031,
    CKR_DEVICE_REMOVED = 0x00000032,
    CKR_ENCRYPTED_DATA_INVALID = 0x00000040,
    CKR_ENCRYPTED_DATA_LEN_RANGE = 0x00000041,
    CKR_FUNCTION_CANCELED = 0x00000050,
    CKR_FUNCTION_NOT_PARALLEL = 0x00000051,
    CKR_FUNCTION_NOT_SUPPORTED = 0x00000054,
    CKR_KEY_HANDLE_INVALID = 0x00000060,
    CKR_KEY_SIZE_RANGE = 0x00000062,
    CKR_KEY_TYPE_INCONSISTENT = 0x00000063,
    CKR_KEY_NOT_NEEDED = 0x00000064,
    CKR_KEY_CHANGED = 0x00000065,
    CKR_KEY_NEEDED = 0x00000066,
    CKR_KEY_INDIGESTIBLE = 0x00000067,
    CKR_KEY_FUNCTION_NOT_PERMITTED = 0x00000068,
    CKR_KEY_NOT_WRAPPABLE = 0x00000069,
    CKR_KEY_UNEXTRACTABLE = 0x0000006A,
    CKR_MECHANISM_INVALID = 0x00000070,
    CKR_MECHANISM_PARAM_INVALID = 0x00000071,
    CKR_OBJECT_HANDLE_INVALID = 0x00000082,
    CKR_OPERATION_ACTIVE = 0x00000090,
    CKR_OPERATION_NOT_INITIALIZED = 0x00000091,
    CKR_PIN_INCORRECT = 0x000000A0,
    CKR_PIN_INVALID = 0x000000A1,
    CKR_PIN_LEN_RANGE = 0x000000A2,
    CKR_PIN_EXPIRED = 0x000000A3,
    CKR_PIN_LOCKED = 0x000000A4,
    CKR_SESSION_CLOSED = 0x000000B0,
    CKR_SESSION_COUNT = 0x000000B1,
    CKR_SESSION_HANDLE_INVALID = 0x000000B3,
    CKR_SESSION_PARALLEL_NOT_SUPPORTED = 0x000000B4,
    CKR_SESSION_READ_ONLY = 0x000000B5,
    CKR_SESSION_EXISTS = 0x000000B6,
    CKR_SESSION_READ_ONLY_EXISTS = 0x000000B7,
    CKR_SESSION_READ_WRITE_SO_EXISTS = 0x000000B8,
    CKR_SIGNATURE_INVALID = 0x000000C0,
    CKR_SIGNATURE_LEN_RANGE = 0x000000C1,
    CKR_TEMPLATE_INCOMPLETE = 0x000000D0,
    CKR_TEMPLATE_INCONSISTENT = 0x000000D1,
    CKR_TOKEN_NOT_PRESENT = 0x000000E0,
    CKR_TOKEN_NOT_RECOGNIZED = 0x000000E1,
    CKR_TOKEN_WRITE_PROTECTED = 0x000000E2,
    CKR_UNWRAPPING_KEY_HANDLE_INVALID = 0x000000F0,
    CKR_UNWRAPPING_KEY_SIZE_RANGE = 0x000000F1,
    CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT = 0x000000F2,
    CKR_USER_ALREADY_LOGGED_IN = 0x00000100,
    CKR_USER_NOT_LOGGED_IN = 0x00000101,
    CKR_USER_PIN_NOT_INITIALIZED = 0x00000102,
    CKR_USER_TYPE_INVALID = 0x00000103,
    CKR_USER_ANOTHER_ALREADY_LOGGED_IN = 0x00000104,
    CKR_USER_TOO_MANY_TYPES = 0x00000105,
    CKR_WRAPPED_KEY_INVALID = 0x00000110,
    CKR_WRAPPED_KEY_LEN_RANGE = 0x00000112,
    CKR_WRAPPING_KEY_HANDLE_INVALID = 0x00000113,
    CKR_WRAPPING_KEY_SIZE_RANGE = 0x00000114,
    CKR_WRAPPING_KEY_TYPE_INCONSISTENT = 0x00000115,
    CKR_RANDOM_SEED_NOT_SUPPORTED = 0x00000120,
    CKR_RANDOM_NO_RNG = 0x00000121,
    CKR_DOMAIN_PARAMS_INVALID = 0x00000130,
    CKR_CURVE_NOT_SUPPORTED = 0x00000140,
    CKR_BUFFER_TOO_SMALL = 0x00000150,
    CKR_SAVED_STATE_INVALID = 0x00000160,
    CKR_INFORMATION_SENSITIVE = 0x00000170,
    CKR_STATE_UNSAVEABLE = 0x00000180,
    CKR_CRYPTOKI_NOT_INITIALIZED = 0x00000190,
    CKR_CRYPTOKI_ALREADY_INITIALIZED = 0x00000191,
    CKR_MUTEX_BAD = 0x000001A0,
    CKR_MUTEX_NOT_LOCKED = 0x000001A1,
    CKR_NEW_PIN_MODE = 0x000001B0,
    CKR_NEXT_OTP = 0x000001B1,
    CKR_EXCEEDED_MAX_ITERATIONS = 0x000001B5,
    CKR_FIPS_SELF_TEST_FAILED = 0x000001B6,
    CKR_LIBRARY_LOAD_FAILED = 0x000001B7,
    CKR_PIN_TOO_WEAK = 0x000001B8,
    CKR_PUBLIC_KEY_INVALID = 0x000001B9,
    CKR_FUNCTION_REJECTED = 0x00000200,
    CKR_VENDOR_DEFINED = 0x80000000,
}

named_constants! { mech_name;
    CKM_RSA_PKCS_KEY_PAIR_GEN = 0x00000000,
    CKM_RSA_PKCS = 0x00000001,
    CKM_RSA_X_509 = 0x00000003,
    CKM_SHA1_RSA_PKCS = 0x00000006,
    CKM_RSA_PKCS_OAEP = 0x00000009,
    CKM_RSA_PKCS_PSS = 0x0000000D,
    CKM_SHA1_RSA_PKCS_PSS = 0x0000000E,
    CKM_X9_42_DH_DERIVE = 0x00000031,
    CKM_SHA256_RSA_PKCS = 0x00000040,
    CKM_SHA256_RSA_PKCS_PSS = 0x00000043,
    CKM_RC2_CBC = 0x00000102,
    CKM_DES_KEY_GEN = 0x00000120,
    CKM_DES3_KEY_GEN = 0x00000131,
    CKM_DES3_ECB = 0x00000132,
    CKM_DES3_CBC = 0x00000133,
    CKM_SHA_1 = 0x00000220,
    CKM_SHA_1_HMAC = 0x00000221,
    CKM_SHA256 = 0x00000250,
    CKM_SHA256_HMAC = 0x00000251,
    CKM_SHA384 = 0x00000260,
    CKM_SHA512 = 0x00000270,
    CKM_GENERIC_SECRET_KEY_GEN = 0x00000350,
    CKM_CONCATENATE_BASE_AND_KEY = 0x00000360,
    CKM_CONCATENATE_BASE_AND_DATA = 0x00000362,
    CKM_XOR_BASE_AND_DATA = 0x00000364,
    CKM_SSL3_PRE_MASTER_KEY_GEN = 0x00000370,
    CKM_SSL3_MASTER_KEY_DERIVE = 0x00000371,
    CKM_SSL3_KEY_AND_MAC_DERIVE = 0x00000372,
    CKM_TLS_PRE_MASTER_KEY_GEN = 0x00000374,
    CKM_TLS_MASTER_KEY_DERIVE = 0x00000375,
    CKM_TLS_KEY_AND_MAC_DERIVE = 0x00000376,
    CKM_TLS_PRF = 0x00000378,
    CKM_PKCS5_PBKD2 = 0x000003B0,
    CKM_WTLS_MASTER_KEY_DERIVE = 0x000003D1,
    CKM_WTLS_PRF = 0x000003D3,
    CKM_WTLS_SERVER_KEY_AND_MAC_DERIVE = 0x000003D4,
    CKM_WTLS_CLIENT_KEY_AND_MAC_DERIVE = 0x000003D5,
    CKM_TLS12_MASTER_KEY_DERIVE = 0x000003E0,
    CKM_TLS12_KEY_AND_MAC_DERIVE = 0x000003E1,
    CKM_KEY_WRAP_SET_OAEP = 0x00000401,
    CKM_EC_KEY_PAIR_GEN = 0x00001040,
    CKM_ECDSA = 0x00001041,
    CKM_ECDSA_SHA256 = 0x00001044,
    CKM_ECDH1_DERIVE = 0x00001050,
    CKM_ECDH1_COFACTOR_DERIVE = 0x00001051,
    CKM_EC_EDWARDS_KEY_PAIR_GEN = 0x00001055,
    CKM_EDDSA = 0x00001057,
    CKM_AES_KEY_GEN = 0x00001080,
    CKM_AES_ECB = 0x00001081,
    CKM_AES_CBC = 0x00001082,
    CKM_AES_CBC_PAD = 0x00001085,
    CKM_AES_CTR = 0x00001086,
    CKM_AES_GCM = 0x00001087,
    CKM_AES_CCM = 0x00001088,
    CKM_DES_ECB_ENCRYPT_DATA = 0x00001100,
    CKM_DES_CBC_ENCRYPT_DATA = 0x00001101,
    CKM_DES3_ECB_ENCRYPT_DATA = 0x00001102,
    CKM_DES3_CBC_ENCRYPT_DATA = 0x00001103,
    CKM_AES_ECB_ENCRYPT_DATA = 0x00001104,
    CKM_AES_CBC_ENCRYPT_DATA = 0x00001105,
    CKM_AES_KEY_WRAP = 0x00002109,
    CKM_AES_KEY_WRAP_PAD = 0x0000210A,
    CKM_HKDF_DERIVE = 0x0000402A,
    CKM_HKDF_DATA = 0x0000402B,
    CKM_HKDF_KEY_GEN = 0x0000402C,
    CKM_VENDOR_DEFINED = 0x80000000,
}

/* Attribute types */
pub const CKF_ARRAY_ATTRIBUTE: CK_FLAGS = 0x40000000;

pub const CKA_CLASS: CK_ATTRIBUTE_TYPE = 0x00000000;
pub const CKA_TOKEN: CK_ATTRIBUTE_TYPE = 0x00000001;
pub const CKA_PRIVATE: CK_ATTRIBUTE_TYPE = 0x00000002;
pub const CKA_LABEL: CK_ATTRIBUTE_TYPE = 0x00000003;
pub const CKA_APPLICATION: CK_ATTRIBUTE_TYPE = 0x00000010;
pub const CKA_VALUE: CK_ATTRIBUTE_TYPE = 0x00000011;
pub const CKA_OBJECT_ID: CK_ATTRIBUTE_TYPE = 0x00000012;
pub const CKA_CERTIFICATE_TYPE: CK_ATTRIBUTE_TYPE = 0x00000080;
pub const CKA_ISSUER: CK_ATTRIBUTE_TYPE = 0x00000081;
pub const CKA_SERIAL_NUMBER: CK_ATTRIBUTE_TYPE = 0x00000082;
pub const CKA_TRUSTED: CK_ATTRIBUTE_TYPE = 0x00000086;
pub const CKA_CERTIFICATE_CATEGORY: CK_ATTRIBUTE_TYPE = 0x00000087;
pub const CKA_CHECK_VALUE: CK_ATTRIBUTE_TYPE = 0x00000090;
pub const CKA_KEY_TYPE: CK_ATTRIBUTE_TYPE = 0x00000100;
pub const CKA_SUBJECT: CK_ATTRIBUTE_TYPE = 0x00000101;
pub const CKA_ID: CK_ATTRIBUTE_TYPE = 0x00000102;
pub const CKA_SENSITIVE: CK_ATTRIBUTE_TYPE = 0x00000103;
pub const CKA_ENCRYPT: CK_ATTRIBUTE_TYPE = 0x00000104;
pub const CKA_DECRYPT: CK_ATTRIBUTE_TYPE = 0x00000105;
pub const CKA_WRAP: CK_ATTRIBUTE_TYPE = 0x00000106;
pub const CKA_UNWRAP: CK_ATTRIBUTE_TYPE = 0x00000107;
pub const CKA_SIGN: CK_ATTRIBUTE_TYPE = 0x00000108;
pub const CKA_SIGN_RECOVER: CK_ATTRIBUTE_TYPE = 0x00000109;
pub const CKA_VERIFY: CK_ATTRIBUTE_TYPE = 0x0000010A;
pub const CKA_VERIFY_RECOVER: CK_ATTRIBUTE_TYPE = 0x0000010B;
pub const CKA_DERIVE: CK_ATTRIBUTE_TYPE = 0x0000010C;
pub const CKA_START_DATE: CK_ATTRIBUTE_TYPE = 0x00000110;
pub const CKA_END_DATE: CK_ATTRIBUTE_TYPE = 0x00000111;
pub const CKA_MODULUS: CK_ATTRIBUTE_TYPE = 0x00000120;
pub const CKA_MODULUS_BITS: CK_ATTRIBUTE_TYPE = 0x00000121;
pub const CKA_PUBLIC_EXPONENT: CK_ATTRIBUTE_TYPE = 0x00000122;
pub const CKA_PRIVATE_EXPONENT: CK_ATTRIBUTE_TYPE = 0x00000123;
pub const CKA_PRIME_1: CK_ATTRIBUTE_TYPE = 0x00000124;
pub const CKA_PRIME_2: CK_ATTRIBUTE_TYPE = 0x00000125;
pub const CKA_EXPONENT_1: CK_ATTRIBUTE_TYPE = 0x00000126;
pub const CKA_EXPONENT_2: CK_ATTRIBUTE_TYPE = 0x00000127;
pub const CKA_COEFFICIENT: CK_ATTRIBUTE_TYPE = 0x00000128;
pub const CKA_PRIME: CK_ATTRIBUTE_TYPE = 0x00000130;
pub const CKA_SUBPRIME: CK_ATTRIBUTE_TYPE = 0x00000131;
pub const CKA_BASE: CK_ATTRIBUTE_TYPE = 0x00000132;
pub const CKA_VALUE_BITS: CK_ATTRIBUTE_TYPE = 0x00000160;
pub const CKA_VALUE_LEN: CK_ATTRIBUTE_TYPE = 0x00000161;
pub const CKA_EXTRACTABLE: CK_ATTRIBUTE_TYPE = 0x00000162;
pub const CKA_LOCAL: CK_ATTRIBUTE_TYPE = 0x00000163;
pub const CKA_NEVER_EXTRACTABLE: CK_ATTRIBUTE_TYPE = 0x00000164;
pub const CKA_ALWAYS_SENSITIVE: CK_ATTRIBUTE_TYPE = 0x00000165;
pub const CKA_KEY_GEN_MECHANISM: CK_ATTRIBUTE_TYPE = 0x00000166;
pub const CKA_MODIFIABLE: CK_ATTRIBUTE_TYPE = 0x00000170;
pub const CKA_COPYABLE: CK_ATTRIBUTE_TYPE = 0x00000171;
pub const CKA_DESTROYABLE: CK_ATTRIBUTE_TYPE = 0x00000172;
pub const CKA_EC_PARAMS: CK_ATTRIBUTE_TYPE = 0x00000180;
pub const CKA_EC_POINT: CK_ATTRIBUTE_TYPE = 0x00000181;
pub const CKA_ALWAYS_AUTHENTICATE: CK_ATTRIBUTE_TYPE = 0x00000202;
pub const CKA_WRAP_WITH_TRUSTED: CK_ATTRIBUTE_TYPE = 0x00000210;
pub const CKA_WRAP_TEMPLATE: CK_ATTRIBUTE_TYPE = CKF_ARRAY_ATTRIBUTE | 0x211;
pub const CKA_UNWRAP_TEMPLATE: CK_ATTRIBUTE_TYPE = CKF_ARRAY_ATTRIBUTE | 0x212;
pub const CKA_DERIVE_TEMPLATE: CK_ATTRIBUTE_TYPE = CKF_ARRAY_ATTRIBUTE | 0x213;
pub const CKA_HW_FEATURE_TYPE: CK_ATTRIBUTE_TYPE = 0x00000300;
pub const CKA_RESET_ON_INIT: CK_ATTRIBUTE_TYPE = 0x00000301;
pub const CKA_HAS_RESET: CK_ATTRIBUTE_TYPE = 0x00000302;
pub const CKA_ALLOWED_MECHANISMS: CK_ATTRIBUTE_TYPE =
    CKF_ARRAY_ATTRIBUTE | 0x600;
pub const CKA_VENDOR_DEFINED: CK_ATTRIBUTE_TYPE = 0x80000000;

/* Object classes */
pub const CKO_DATA: CK_OBJECT_CLASS = 0x00000000;
pub const CKO_CERTIFICATE: CK_OBJECT_CLASS = 0x00000001;
pub const CKO_PUBLIC_KEY: CK_OBJECT_CLASS = 0x00000002;
pub const CKO_PRIVATE_KEY: CK_OBJECT_CLASS = 0x00000003;
pub const CKO_SECRET_KEY: CK_OBJECT_CLASS = 0x00000004;
pub const CKO_HW_FEATURE: CK_OBJECT_CLASS = 0x00000005;
pub const CKO_DOMAIN_PARAMETERS: CK_OBJECT_CLASS = 0x00000006;
pub const CKO_MECHANISM: CK_OBJECT_CLASS = 0x00000007;
pub const CKO_OTP_KEY: CK_OBJECT_CLASS = 0x00000008;

/* Key types */
pub const CKK_RSA: CK_KEY_TYPE = 0x00000000;
pub const CKK_DSA: CK_KEY_TYPE = 0x00000001;
pub const CKK_DH: CK_KEY_TYPE = 0x00000002;
pub const CKK_EC: CK_KEY_TYPE = 0x00000003;
pub const CKK_X9_42_DH: CK_KEY_TYPE = 0x00000004;
pub const CKK_GENERIC_SECRET: CK_KEY_TYPE = 0x00000010;
pub const CKK_RC2: CK_KEY_TYPE = 0x00000011;
pub const CKK_DES: CK_KEY_TYPE = 0x00000013;
pub const CKK_DES3: CK_KEY_TYPE = 0x00000015;
pub const CKK_AES: CK_KEY_TYPE = 0x0000001F;
pub const CKK_EC_EDWARDS: CK_KEY_TYPE = 0x00000040;

/* User types */
pub const CKU_SO: CK_USER_TYPE = 0;
pub const CKU_USER: CK_USER_TYPE = 1;
pub const CKU_CONTEXT_SPECIFIC: CK_USER_TYPE = 2;

/* Session states */
pub const CKS_RO_PUBLIC_SESSION: CK_STATE = 0;
pub const CKS_RO_USER_FUNCTIONS: CK_STATE = 1;
pub const CKS_RW_PUBLIC_SESSION: CK_STATE = 2;
pub const CKS_RW_USER_FUNCTIONS: CK_STATE = 3;
pub const CKS_RW_SO_FUNCTIONS: CK_STATE = 4;

/* Slot info flags */
pub const CKF_TOKEN_PRESENT: CK_FLAGS = 0x00000001;
pub const CKF_REMOVABLE_DEVICE: CK_FLAGS = 0x00000002;
pub const CKF_HW_SLOT: CK_FLAGS = 0x00000004;

/* Token info flags */
pub const CKF_RNG: CK_FLAGS = 0x00000001;
pub const CKF_WRITE_PROTECTED: CK_FLAGS = 0x00000002;
pub const CKF_LOGIN_REQUIRED: CK_FLAGS = 0x00000004;
pub const CKF_USER_PIN_INITIALIZED: CK_FLAGS = 0x00000008;
pub const CKF_RESTORE_KEY_NOT_NEEDED: CK_FLAGS = 0x00000020;
pub const CKF_CLOCK_ON_TOKEN: CK_FLAGS = 0x00000040;
pub const CKF_PROTECTED_AUTHENTICATION_PATH: CK_FLAGS = 0x00000100;
pub const CKF_DUAL_CRYPTO_OPERATIONS: CK_FLAGS = 0x00000200;
pub const CKF_TOKEN_INITIALIZED: CK_FLAGS = 0x00000400;
pub const CKF_SECONDARY_AUTHENTICATION: CK_FLAGS = 0x00000800;
pub const CKF_USER_PIN_COUNT_LOW: CK_FLAGS = 0x00010000;
pub const CKF_USER_PIN_FINAL_TRY: CK_FLAGS = 0x00020000;
pub const CKF_USER_PIN_LOCKED: CK_FLAGS = 0x00040000;
pub const CKF_USER_PIN_TO_BE_CHANGED: CK_FLAGS = 0x00080000;
pub const CKF_SO_PIN_COUNT_LOW: CK_FLAGS = 0x00100000;
pub const CKF_SO_PIN_FINAL_TRY: CK_FLAGS = 0x00200000;
pub const CKF_SO_PIN_LOCKED: CK_FLAGS = 0x00400000;
pub const CKF_SO_PIN_TO_BE_CHANGED: CK_FLAGS = 0x00800000;
pub const CKF_ERROR_STATE: CK_FLAGS = 0x01000000;

/* Session info flags */
pub const CKF_RW_SESSION: CK_FLAGS = 0x00000002;
pub const CKF_SERIAL_SESSION: CK_FLAGS = 0x00000004;

/* Mechanism info flags */
pub const CKF_HW: CK_FLAGS = 0x00000001;
pub const CKF_ENCRYPT: CK_FLAGS = 0x00000100;
pub const CKF_DECRYPT: CK_FLAGS = 0x00000200;
pub const CKF_DIGEST: CK_FLAGS = 0x00000400;
pub const CKF_SIGN: CK_FLAGS = 0x00000800;
pub const CKF_SIGN_RECOVER: CK_FLAGS = 0x00001000;
pub const CKF_VERIFY: CK_FLAGS = 0x00002000;
pub const CKF_VERIFY_RECOVER: CK_FLAGS = 0x00004000;
pub const CKF_GENERATE: CK_FLAGS = 0x00008000;
pub const CKF_GENERATE_KEY_PAIR: CK_FLAGS = 0x00010000;
pub const CKF_WRAP: CK_FLAGS = 0x00020000;
pub const CKF_UNWRAP: CK_FLAGS = 0x00040000;
pub const CKF_DERIVE: CK_FLAGS = 0x00080000;
pub const CKF_EC_F_P: CK_FLAGS = 0x00100000;
pub const CKF_EC_F_2M: CK_FLAGS = 0x00200000;
pub const CKF_EC_ECPARAMETERS: CK_FLAGS = 0x00400000;
pub const CKF_EC_NAMEDCURVE: CK_FLAGS = 0x00800000;
pub const CKF_EC_UNCOMPRESS: CK_FLAGS = 0x01000000;
pub const CKF_EC_COMPRESS: CK_FLAGS = 0x02000000;
pub const CKF_EXTENSION: CK_FLAGS = 0x80000000;

/* C_Initialize flags */
pub const CKF_LIBRARY_CANT_CREATE_OS_THREADS: CK_FLAGS = 0x00000001;
pub const CKF_OS_LOCKING_OK: CK_FLAGS = 0x00000002;

/* C_WaitForSlotEvent flags */
pub const CKF_DONT_BLOCK: CK_FLAGS = 0x00000001;

/* Notifications */
pub const CKN_SURRENDER: CK_NOTIFICATION = 0;

/* MGF types */
pub const CKG_MGF1_SHA1: CK_RSA_PKCS_MGF_TYPE = 0x00000001;
pub const CKG_MGF1_SHA256: CK_RSA_PKCS_MGF_TYPE = 0x00000002;
pub const CKG_MGF1_SHA384: CK_RSA_PKCS_MGF_TYPE = 0x00000003;
pub const CKG_MGF1_SHA512: CK_RSA_PKCS_MGF_TYPE = 0x00000004;
pub const CKG_MGF1_SHA224: CK_RSA_PKCS_MGF_TYPE = 0x00000005;

/* OAEP source */
pub const CKZ_DATA_SPECIFIED: CK_RSA_PKCS_OAEP_SOURCE_TYPE = 0x00000001;

/* PBKDF2 salt source and pseudo random functions */
pub const CKZ_SALT_SPECIFIED: CK_PKCS5_PBKD2_SALT_SOURCE_TYPE = 0x00000001;
pub const CKP_PKCS5_PBKD2_HMAC_SHA1:
    CK_PKCS5_PBKDF2_PSEUDO_RANDOM_FUNCTION_TYPE = 0x00000001;
pub const CKP_PKCS5_PBKD2_HMAC_SHA256:
    CK_PKCS5_PBKDF2_PSEUDO_RANDOM_FUNCTION_TYPE = 0x00000005;

/* Key derivation functions */
pub const CKD_NULL: CK_EC_KDF_TYPE = 0x00000001;
pub const CKD_SHA1_KDF: CK_EC_KDF_TYPE = 0x00000002;
pub const CKD_SHA256_KDF: CK_EC_KDF_TYPE = 0x00000006;

/* HKDF salt types */
pub const CKF_HKDF_SALT_NULL: CK_FLAGS = 0x00000001;
pub const CKF_HKDF_SALT_DATA: CK_FLAGS = 0x00000002;
pub const CKF_HKDF_SALT_KEY: CK_FLAGS = 0x00000004;

/// The entry point names of a version 2.40 `CK_FUNCTION_LIST`, in the
/// order the structure lists them
pub const FUNCTION_NAMES: [&str; 68] = [
    "C_Initialize",
    "C_Finalize",
    "C_GetInfo",
    "C_GetFunctionList",
    "C_GetSlotList",
    "C_GetSlotInfo",
    "C_GetTokenInfo",
    "C_GetMechanismList",
    "C_GetMechanismInfo",
    "C_InitToken",
    "C_InitPIN",
    "C_SetPIN",
    "C_OpenSession",
    "C_CloseSession",
    "C_CloseAllSessions",
    "C_GetSessionInfo",
    "C_GetOperationState",
    "C_SetOperationState",
    "C_Login",
    "C_Logout",
    "C_CreateObject",
    "C_CopyObject",
    "C_DestroyObject",
    "C_GetObjectSize",
    "C_GetAttributeValue",
    "C_SetAttributeValue",
    "C_FindObjectsInit",
    "C_FindObjects",
    "C_FindObjectsFinal",
    "C_EncryptInit",
    "C_Encrypt",
    "C_EncryptUpdate",
    "C_EncryptFinal",
    "C_DecryptInit",
    "C_Decrypt",
    "C_DecryptUpdate",
    "C_DecryptFinal",
    "C_DigestInit",
    "C_Digest",
    "C_DigestUpdate",
    "C_DigestKey",
    "C_DigestFinal",
    "C_SignInit",
    "C_Sign",
    "C_SignUpdate",
    "C_SignFinal",
    "C_SignRecoverInit",
    "C_SignRecover",
    "C_VerifyInit",
    "C_Verify",
    "C_VerifyUpdate",
    "C_VerifyFinal",
    "C_VerifyRecoverInit",
    "C_VerifyRecover",
    "C_DigestEncryptUpdate",
    "C_DecryptDigestUpdate",
    "C_SignEncryptUpdate",
    "C_DecryptVerifyUpdate",
    "C_GenerateKey",
    "C_GenerateKeyPair",
    "C_WrapKey",
    "C_UnwrapKey",
    "C_DeriveKey",
    "C_SeedRandom",
    "C_GenerateRandom",
    "C_GetFunctionStatus",
    "C_CancelFunction",
    "C_WaitForSlotEvent",
];
