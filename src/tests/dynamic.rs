// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;
use std::env;

/* The module is loaded as a shared object here, so it has its own copy
 * of the mock state and the in-process hooks do not see its calls */
fn module_path() -> String {
    env::var("TEST_PKCS11_MODULE")
        .unwrap_or_else(|_| "target/debug/libckbind_mock.so".to_string())
}

fn load(binding: BindMode) -> Pkcs11 {
    let config = Config::for_library(&module_path()).with_binding(binding);
    let pkcs11 = ret_or_panic!(Pkcs11::new(&config));
    let host = ret_or_panic!(crate::platform::detect());
    assert_eq!(pkcs11.profile(), host);
    pkcs11
}

#[test]
#[serial]
fn test_dynamic_load() {
    for binding in [BindMode::Symbols, BindMode::FunctionList] {
        let pkcs11 = load(binding);
        let outcome = ret_or_panic!(pkcs11.initialize());
        assert_eq!(outcome, InitializeOutcome::Initialized);

        let info = ret_or_panic!(pkcs11.get_info());
        assert_eq!(info.manufacturer_id, "ckbind");
        let slots = ret_or_panic!(pkcs11.get_slot_list(true));
        assert_eq!(slots, vec![SLOT_ID]);

        let session = ret_or_panic!(pkcs11.slot(SLOT_ID).open_session(true));
        ret_or_panic!(session.login(CKU_USER, Some(USER_PIN)));
        ret_or_panic!(session.digest_init(&Mechanism::new(CKM_SHA256)));
        let digest = ret_or_panic!(session.digest(b"loaded"));
        assert_eq!(digest, ckbind_mock::mock_digest(b"loaded"));
        ret_or_panic!(session.close());

        ret_or_panic!(pkcs11.finalize());
    }
}

#[test]
#[serial]
fn test_dynamic_missing_library() {
    let config = Config::for_library("/nonexistent/libnothing.so");
    let err = Pkcs11::new(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Loader);
}
