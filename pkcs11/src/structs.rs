// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Descriptions of the PKCS#11 v2.40 structures the binding marshals

use crate::ck_struct;
use crate::layout::StructDef;

ck_struct!(CK_VERSION {
    major: byte,
    minor: byte,
});

ck_struct!(CK_INFO {
    cryptokiVersion: CK_VERSION,
    manufacturerID: [32],
    flags: ulong,
    libraryDescription: [32],
    libraryVersion: CK_VERSION,
});

ck_struct!(CK_SLOT_INFO {
    slotDescription: [64],
    manufacturerID: [32],
    flags: ulong,
    hardwareVersion: CK_VERSION,
    firmwareVersion: CK_VERSION,
});

ck_struct!(CK_TOKEN_INFO {
    label: [32],
    manufacturerID: [32],
    model: [16],
    serialNumber: [16],
    flags: ulong,
    ulMaxSessionCount: ulong,
    ulSessionCount: ulong,
    ulMaxRwSessionCount: ulong,
    ulRwSessionCount: ulong,
    ulMaxPinLen: ulong,
    ulMinPinLen: ulong,
    ulTotalPublicMemory: ulong,
    ulFreePublicMemory: ulong,
    ulTotalPrivateMemory: ulong,
    ulFreePrivateMemory: ulong,
    hardwareVersion: CK_VERSION,
    firmwareVersion: CK_VERSION,
    utcTime: [16],
});

ck_struct!(CK_SESSION_INFO {
    slotID: ulong,
    state: ulong,
    flags: ulong,
    ulDeviceError: ulong,
});

ck_struct!(CK_ATTRIBUTE {
    type_: ulong,
    pValue: ptr,
    ulValueLen: ulong,
});

ck_struct!(CK_DATE {
    year: [4],
    month: [2],
    day: [2],
});

ck_struct!(CK_MECHANISM {
    mechanism: ulong,
    pParameter: ptr,
    ulParameterLen: ulong,
});

ck_struct!(CK_MECHANISM_INFO {
    ulMinKeySize: ulong,
    ulMaxKeySize: ulong,
    flags: ulong,
});

ck_struct!(CK_C_INITIALIZE_ARGS {
    CreateMutex: ptr,
    DestroyMutex: ptr,
    LockMutex: ptr,
    UnlockMutex: ptr,
    flags: ulong,
    pReserved: ptr,
});

ck_struct!(CK_RSA_PKCS_OAEP_PARAMS {
    hashAlg: ulong,
    mgf: ulong,
    source: ulong,
    pSourceData: ptr,
    ulSourceDataLen: ulong,
});

ck_struct!(CK_RSA_PKCS_PSS_PARAMS {
    hashAlg: ulong,
    mgf: ulong,
    sLen: ulong,
});

ck_struct!(CK_AES_CTR_PARAMS {
    ulCounterBits: ulong,
    cb: [16],
});

ck_struct!(CK_GCM_PARAMS {
    pIv: ptr,
    ulIvLen: ulong,
    ulIvBits: ulong,
    pAAD: ptr,
    ulAADLen: ulong,
    ulTagBits: ulong,
});

ck_struct!(CK_CCM_PARAMS {
    ulDataLen: ulong,
    pNonce: ptr,
    ulNonceLen: ulong,
    pAAD: ptr,
    ulAADLen: ulong,
    ulMACLen: ulong,
});

ck_struct!(CK_AES_CBC_ENCRYPT_DATA_PARAMS {
    iv: [16],
    pData: ptr,
    length: ulong,
});

ck_struct!(CK_DES_CBC_ENCRYPT_DATA_PARAMS {
    iv: [8],
    pData: ptr,
    length: ulong,
});

ck_struct!(CK_RC2_CBC_PARAMS {
    ulEffectiveBits: ulong,
    iv: [8],
});

ck_struct!(CK_KEY_DERIVATION_STRING_DATA {
    pData: ptr,
    ulLen: ulong,
});

ck_struct!(CK_ECDH1_DERIVE_PARAMS {
    kdf: ulong,
    ulSharedDataLen: ulong,
    pSharedData: ptr,
    ulPublicDataLen: ulong,
    pPublicData: ptr,
});

ck_struct!(CK_X9_42_DH1_DERIVE_PARAMS {
    kdf: ulong,
    ulOtherInfoLen: ulong,
    pOtherInfo: ptr,
    ulPublicDataLen: ulong,
    pPublicData: ptr,
});

ck_struct!(CK_EDDSA_PARAMS {
    phFlag: byte,
    ulContextDataLen: ulong,
    pContextData: ptr,
});

ck_struct!(CK_HKDF_PARAMS {
    bExtract: byte,
    bExpand: byte,
    prfHashMechanism: ulong,
    ulSaltType: ulong,
    pSalt: ptr,
    ulSaltLen: ulong,
    hSaltKey: ulong,
    pInfo: ptr,
    ulInfoLen: ulong,
});

/* The original v2.20 definition, ulPasswordLen is a pointer */
ck_struct!(CK_PKCS5_PBKD2_PARAMS {
    saltSource: ulong,
    pSaltSourceData: ptr,
    ulSaltSourceDataLen: ulong,
    iterations: ulong,
    prf: ulong,
    pPrfData: ptr,
    ulPrfDataLen: ulong,
    pPassword: ptr,
    ulPasswordLen: ptr,
});

ck_struct!(CK_PKCS5_PBKD2_PARAMS2 {
    saltSource: ulong,
    pSaltSourceData: ptr,
    ulSaltSourceDataLen: ulong,
    iterations: ulong,
    prf: ulong,
    pPrfData: ptr,
    ulPrfDataLen: ulong,
    pPassword: ptr,
    ulPasswordLen: ulong,
});

ck_struct!(CK_KEY_WRAP_SET_OAEP_PARAMS {
    bBC: byte,
    pX: ptr,
    ulXLen: ulong,
});

ck_struct!(CK_SSL3_RANDOM_DATA {
    pClientRandom: ptr,
    ulClientRandomLen: ulong,
    pServerRandom: ptr,
    ulServerRandomLen: ulong,
});

ck_struct!(CK_SSL3_MASTER_KEY_DERIVE_PARAMS {
    RandomInfo: CK_SSL3_RANDOM_DATA,
    pVersion: ptr,
});

ck_struct!(CK_TLS12_MASTER_KEY_DERIVE_PARAMS {
    RandomInfo: CK_SSL3_RANDOM_DATA,
    pVersion: ptr,
    prfHashMechanism: ulong,
});

ck_struct!(CK_SSL3_KEY_MAT_OUT {
    hClientMacSecret: ulong,
    hServerMacSecret: ulong,
    hClientKey: ulong,
    hServerKey: ulong,
    pIVClient: ptr,
    pIVServer: ptr,
});

ck_struct!(CK_SSL3_KEY_MAT_PARAMS {
    ulMacSizeInBits: ulong,
    ulKeySizeInBits: ulong,
    ulIVSizeInBits: ulong,
    bIsExport: byte,
    RandomInfo: CK_SSL3_RANDOM_DATA,
    pReturnedKeyMaterial: ptr,
});

ck_struct!(CK_TLS12_KEY_MAT_PARAMS {
    ulMacSizeInBits: ulong,
    ulKeySizeInBits: ulong,
    ulIVSizeInBits: ulong,
    bIsExport: byte,
    RandomInfo: CK_SSL3_RANDOM_DATA,
    pReturnedKeyMaterial: ptr,
    prfHashMechanism: ulong,
});

ck_struct!(CK_WTLS_RANDOM_DATA {
    pClientRandom: ptr,
    ulClientRandomLen: ulong,
    pServerRandom: ptr,
    ulServerRandomLen: ulong,
});

ck_struct!(CK_WTLS_KEY_MAT_OUT {
    hMacSecret: ulong,
    hKey: ulong,
    pIV: ptr,
});

ck_struct!(CK_WTLS_KEY_MAT_PARAMS {
    DigestMechanism: ulong,
    ulMacSizeInBits: ulong,
    ulKeySizeInBits: ulong,
    ulIVSizeInBits: ulong,
    ulSequenceNumber: ulong,
    bIsExport: byte,
    RandomInfo: CK_WTLS_RANDOM_DATA,
    pReturnedKeyMaterial: ptr,
});

ck_struct!(CK_TLS_PRF_PARAMS {
    pSeed: ptr,
    ulSeedLen: ulong,
    pLabel: ptr,
    ulLabelLen: ulong,
    pOutput: ptr,
    pulOutputLen: ptr,
});

/// Structures whose sizes a module can report through the vendor call
/// `C_GetUnmanagedStructSizeList`, in reporting order
pub static UNMANAGED_STRUCTS: [&StructDef; 36] = [
    &CK_VERSION::DEF,
    &CK_INFO::DEF,
    &CK_SLOT_INFO::DEF,
    &CK_TOKEN_INFO::DEF,
    &CK_SESSION_INFO::DEF,
    &CK_ATTRIBUTE::DEF,
    &CK_DATE::DEF,
    &CK_MECHANISM::DEF,
    &CK_MECHANISM_INFO::DEF,
    &CK_C_INITIALIZE_ARGS::DEF,
    &CK_RSA_PKCS_OAEP_PARAMS::DEF,
    &CK_RSA_PKCS_PSS_PARAMS::DEF,
    &CK_AES_CTR_PARAMS::DEF,
    &CK_GCM_PARAMS::DEF,
    &CK_CCM_PARAMS::DEF,
    &CK_AES_CBC_ENCRYPT_DATA_PARAMS::DEF,
    &CK_DES_CBC_ENCRYPT_DATA_PARAMS::DEF,
    &CK_RC2_CBC_PARAMS::DEF,
    &CK_KEY_DERIVATION_STRING_DATA::DEF,
    &CK_ECDH1_DERIVE_PARAMS::DEF,
    &CK_X9_42_DH1_DERIVE_PARAMS::DEF,
    &CK_EDDSA_PARAMS::DEF,
    &CK_HKDF_PARAMS::DEF,
    &CK_PKCS5_PBKD2_PARAMS::DEF,
    &CK_PKCS5_PBKD2_PARAMS2::DEF,
    &CK_KEY_WRAP_SET_OAEP_PARAMS::DEF,
    &CK_SSL3_RANDOM_DATA::DEF,
    &CK_SSL3_MASTER_KEY_DERIVE_PARAMS::DEF,
    &CK_TLS12_MASTER_KEY_DERIVE_PARAMS::DEF,
    &CK_SSL3_KEY_MAT_OUT::DEF,
    &CK_SSL3_KEY_MAT_PARAMS::DEF,
    &CK_TLS12_KEY_MAT_PARAMS::DEF,
    &CK_WTLS_RANDOM_DATA::DEF,
    &CK_WTLS_KEY_MAT_OUT::DEF,
    &CK_WTLS_KEY_MAT_PARAMS::DEF,
    &CK_TLS_PRF_PARAMS::DEF,
];
