// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

#[test]
#[serial]
fn test_open_close_lifecycle() {
    for profile in PlatformProfile::ALL {
        let token = TestToken::new(profile);
        let pkcs11 = &token.pkcs11;

        let outcome = ret_or_panic!(pkcs11.initialize());
        assert_eq!(outcome, InitializeOutcome::Initialized);

        let slots = ret_or_panic!(pkcs11.get_slot_list(true));
        assert_eq!(slots, vec![SLOT_ID]);

        let session = ret_or_panic!(pkcs11.slot(slots[0]).open_session(false));
        assert_eq!(session.slot_id(), SLOT_ID);
        assert_eq!(pkcs11.open_session_count(), 1);
        ret_or_panic!(session.close());
        assert!(session.is_closed());
        assert_eq!(pkcs11.open_session_count(), 0);
        assert_eq!(ckbind_mock::open_sessions(), 0);

        ret_or_panic!(pkcs11.finalize());
        assert!(!ckbind_mock::is_initialized());
    }
}

#[test]
#[serial]
fn test_initialize_twice() {
    let token = TestToken::initialized(PlatformProfile::W8);
    let outcome = ret_or_panic!(token.pkcs11.initialize());
    assert_eq!(outcome, InitializeOutcome::AlreadyInitialized);
    /* the first call still owns the finalization */
    assert!(token.pkcs11.initialized_here());

    ret_or_panic!(token.pkcs11.finalize());
    ret_or_panic!(token.pkcs11.finalize());
    assert_eq!(ckbind_mock::calls("C_Finalize"), 1);

    /* the module itself refuses a second finalization */
    let rv = ret_or_panic!(token.pkcs11.low_level().c_finalize());
    assert_eq!(rv, CKR_CRYPTOKI_NOT_INITIALIZED);
}

#[test]
#[serial]
fn test_initialized_elsewhere() {
    let token = TestToken::new(PlatformProfile::W4_PACKED);
    let rv = ret_or_panic!(token.pkcs11.low_level().c_initialize(None));
    assert_eq!(rv, CKR_OK);

    let outcome = ret_or_panic!(token.pkcs11.initialize());
    assert_eq!(outcome, InitializeOutcome::AlreadyInitialized);
    assert!(!token.pkcs11.initialized_here());

    ret_or_panic!(token.pkcs11.finalize());
    drop(token);
    assert_eq!(ckbind_mock::calls("C_Finalize"), 0);
    assert!(ckbind_mock::is_initialized());
    ckbind_mock::reset();
}

#[test]
#[serial]
fn test_drop_finalizes() {
    let token = TestToken::initialized(PlatformProfile::W4);
    let session = token.get_session(false);
    drop(token);
    /* the session keeps the module loaded and initialized */
    assert!(ckbind_mock::is_initialized());
    assert_eq!(ckbind_mock::calls("C_Finalize"), 0);
    drop(session);
    assert_eq!(ckbind_mock::calls("C_CloseSession"), 1);
    assert_eq!(ckbind_mock::calls("C_Finalize"), 1);
    assert!(!ckbind_mock::is_initialized());
}

#[test]
#[serial]
fn test_initialize_args() {
    for profile in PlatformProfile::ALL {
        let token = TestToken::initialized(profile);
        let (flags, reserved) = ckbind_mock::initialize_args();
        assert_eq!(flags, CKF_OS_LOCKING_OK);
        assert_eq!(reserved, None);
        drop(token);

        let config = TestToken::config(profile)
            .with_application_type(ApplicationType::SingleThreaded)
            .with_init_reserved("configdir='/etc/ckbind'");
        let token = TestToken::with_config(profile, &config);
        ret_or_panic!(token.pkcs11.initialize());
        let (flags, reserved) = ckbind_mock::initialize_args();
        assert_eq!(flags, 0);
        assert_eq!(reserved.as_deref(), Some("configdir='/etc/ckbind'"));
    }
}

#[test]
#[serial]
fn test_binding_modes() {
    for profile in PlatformProfile::ALL {
        for binding in [BindMode::Symbols, BindMode::FunctionList] {
            let config = TestToken::config(profile).with_binding(binding);
            let token = TestToken::with_config(profile, &config);
            ret_or_panic!(token.pkcs11.initialize());
            let info = ret_or_panic!(token.pkcs11.get_info());
            assert_eq!(info.manufacturer_id, "ckbind");

            let expected = match binding {
                BindMode::Symbols => 0,
                BindMode::FunctionList => 1,
            };
            assert_eq!(ckbind_mock::calls("C_GetFunctionList"), expected);
        }
    }
}

#[test]
#[serial]
fn test_not_initialized() {
    let token = TestToken::new(PlatformProfile::W8_PACKED);
    assert!(!token.pkcs11.is_initialized());

    let err = token.pkcs11.get_info().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = token.pkcs11.get_slot_list(false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = token.slot().get_token_info().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = token.slot().open_session(false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(ckbind_mock::calls("C_GetInfo"), 0);
    assert_eq!(ckbind_mock::calls("C_GetSlotList"), 0);
    assert_eq!(ckbind_mock::calls("C_GetTokenInfo"), 0);
    assert_eq!(ckbind_mock::calls("C_OpenSession"), 0);

    /* the low level surface still reaches the module */
    let mut info = Info::default();
    let rv = ret_or_panic!(token.pkcs11.low_level().c_get_info(&mut info));
    assert_eq!(rv, CKR_CRYPTOKI_NOT_INITIALIZED);

    ret_or_panic!(token.pkcs11.initialize());
    assert!(token.pkcs11.is_initialized());
    ret_or_panic!(token.pkcs11.get_info());

    ret_or_panic!(token.pkcs11.finalize());
    let err = token.pkcs11.get_slot_list(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(ckbind_mock::calls("C_GetSlotList"), 0);
}

#[test]
#[serial]
fn test_usable_when_initialized_elsewhere() {
    let token = TestToken::new(PlatformProfile::W4);
    let rv = ret_or_panic!(token.pkcs11.low_level().c_initialize(None));
    assert_eq!(rv, CKR_OK);
    let outcome = ret_or_panic!(token.pkcs11.initialize());
    assert_eq!(outcome, InitializeOutcome::AlreadyInitialized);
    assert!(token.pkcs11.is_initialized());

    let slots = ret_or_panic!(token.pkcs11.get_slot_list(true));
    assert_eq!(slots, vec![SLOT_ID]);
    /* finalize is not ours to do, the module stays usable */
    ret_or_panic!(token.pkcs11.finalize());
    assert!(token.pkcs11.is_initialized());
    drop(token);
    ckbind_mock::reset();
}

#[test]
#[serial]
fn test_get_info() {
    for_each_profile(|token| {
        let info = ret_or_panic!(token.pkcs11.get_info());
        assert_eq!(
            info.cryptoki_version,
            Version::new(CRYPTOKI_VERSION_MAJOR, CRYPTOKI_VERSION_MINOR)
        );
        assert_eq!(info.manufacturer_id, "ckbind");
        assert_eq!(info.library_description, "ckbind mock module");
        assert_eq!(info.library_version, Version::new(0, 4));
        assert_eq!(info.flags, 0);
    });
}

#[test]
#[serial]
fn test_slots() {
    for_each_profile(|token| {
        let all = ret_or_panic!(token.pkcs11.get_slot_list(false));
        assert_eq!(all, vec![SLOT_ID, EMPTY_SLOT_ID]);

        let slots = ret_or_panic!(token.pkcs11.get_slots(true));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id(), SLOT_ID);

        let info = ret_or_panic!(slots[0].get_slot_info());
        assert!(info.token_present());
        assert!(info.flags.contains(SlotFlags::REMOVABLE_DEVICE));
        assert_eq!(info.slot_description, "ckbind mock slot 1");
        assert_eq!(info.manufacturer_id, "ckbind");
        assert_eq!(info.hardware_version, Version::new(1, 0));

        let empty = token.pkcs11.slot(EMPTY_SLOT_ID);
        let info = ret_or_panic!(empty.get_slot_info());
        assert!(!info.token_present());
        assert_rv!(empty.get_token_info(), CKR_TOKEN_NOT_PRESENT);

        assert_rv!(token.pkcs11.slot(42).get_slot_info(), CKR_SLOT_ID_INVALID);
    });
}

#[test]
#[serial]
fn test_token_info() {
    for_each_profile(|token| {
        let _ro = token.get_session(false);
        let _rw = token.get_session(true);
        let info = ret_or_panic!(token.slot().get_token_info());
        assert_eq!(info.label, TOKEN_LABEL);
        assert_eq!(info.manufacturer_id, "ckbind");
        assert_eq!(info.model, "mock");
        assert_eq!(info.serial_number, "0001");
        assert!(info.flags.contains(
            TokenFlags::RNG
                | TokenFlags::LOGIN_REQUIRED
                | TokenFlags::PROTECTED_AUTHENTICATION_PATH
                | TokenFlags::DUAL_CRYPTO_OPERATIONS
        ));
        assert!(!info.flags.contains(TokenFlags::WRITE_PROTECTED));
        assert_eq!(info.session_count, 2);
        assert_eq!(info.rw_session_count, 1);
        assert_eq!(info.max_pin_len, 64);
        assert_eq!(info.min_pin_len, 4);
        /* the sentinel survives the narrowing to 4 bytes and back */
        assert_eq!(info.total_public_memory, CK_UNAVAILABLE_INFORMATION);
        assert_eq!(info.free_private_memory, CK_UNAVAILABLE_INFORMATION);
        assert_eq!(info.firmware_version, Version::new(0, 4));
        assert_eq!(info.utc_time, "2025010100000000");
    });
}

#[test]
#[serial]
fn test_mechanisms() {
    for_each_profile(|token| {
        let slot = token.slot();
        let list = ret_or_panic!(slot.get_mechanism_list());
        assert_eq!(list.len(), 26);
        assert!(list.contains(&CKM_AES_GCM));
        assert!(list.contains(&CKM_TLS12_KEY_AND_MAC_DERIVE));

        let info = ret_or_panic!(slot.get_mechanism_info(CKM_AES_GCM));
        assert_eq!(info.min_key_size, 16);
        assert_eq!(info.max_key_size, 32);
        assert_eq!(
            info.flags,
            MechanismFlags::ENCRYPT | MechanismFlags::DECRYPT
        );

        let info = ret_or_panic!(slot.get_mechanism_info(CKM_SHA256));
        assert_eq!(info.flags, MechanismFlags::DIGEST);

        assert_rv!(
            slot.get_mechanism_info(CKM_VENDOR_DEFINED),
            CKR_MECHANISM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_slot_events() {
    for_each_profile(|token| {
        let event = ret_or_panic!(token.pkcs11.wait_for_slot_event(
            CKF_DONT_BLOCK
        ));
        assert_eq!(event, None);

        ckbind_mock::push_slot_event(EMPTY_SLOT_ID);
        let event = ret_or_panic!(token.pkcs11.wait_for_slot_event(
            CKF_DONT_BLOCK
        ));
        assert_eq!(event, Some(EMPTY_SLOT_ID));

        /* a blocking wait would never return */
        assert_rv!(
            token.pkcs11.wait_for_slot_event(0),
            CKR_FUNCTION_NOT_SUPPORTED
        );
    });
}

#[test]
#[serial]
fn test_eject_token() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        ret_or_panic!(session.eject_token());
        assert_eq!(ckbind_mock::open_sessions(), 0);

        let slots = ret_or_panic!(token.pkcs11.get_slot_list(true));
        assert!(slots.is_empty());
        let event = ret_or_panic!(token.pkcs11.wait_for_slot_event(
            CKF_DONT_BLOCK
        ));
        assert_eq!(event, Some(SLOT_ID));
        assert_rv!(token.slot().open_session(false), CKR_TOKEN_NOT_PRESENT);

        /* the module closed it already */
        assert_rv!(session.close(), CKR_SESSION_HANDLE_INVALID);

        ckbind_mock::insert_token();
        let slots = ret_or_panic!(token.pkcs11.get_slot_list(true));
        assert_eq!(slots, vec![SLOT_ID]);
    });
}

#[test]
#[serial]
fn test_slot_list_length_protocol() {
    for_each_profile(|token| {
        let ll = token.pkcs11.low_level();
        let mut count: CK_ULONG = 0;
        let rv = ret_or_panic!(ll.c_get_slot_list(false, None, &mut count));
        assert_eq!(rv, CKR_OK);
        assert_eq!(count, 2);

        let mut short = [0 as CK_SLOT_ID; 1];
        let rv = ret_or_panic!(ll.c_get_slot_list(
            false,
            Some(&mut short),
            &mut count
        ));
        assert_eq!(rv, CKR_BUFFER_TOO_SMALL);
        assert_eq!(count, 2);

        let mut list = [0 as CK_SLOT_ID; 2];
        let rv = ret_or_panic!(ll.c_get_slot_list(
            false,
            Some(&mut list),
            &mut count
        ));
        assert_eq!(rv, CKR_OK);
        assert_eq!(list, [SLOT_ID, EMPTY_SLOT_ID]);
    });
}

fn assert_send_sync<T: Send + Sync>(_: &T) {}

#[test]
#[serial]
fn test_shared_between_threads() {
    let token = TestToken::initialized(PlatformProfile::W8);
    let session = token.get_session(false);
    assert_send_sync(&token.pkcs11);
    assert_send_sync(&token.slot());
    assert_send_sync(&session);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let info = ret_or_panic!(session.get_session_info());
                assert_eq!(info.slot_id, SLOT_ID);
            });
        }
    });
    assert_eq!(ckbind_mock::calls("C_GetSessionInfo"), 4);
}
