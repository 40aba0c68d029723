// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

#[test]
#[serial]
fn test_close_twice() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        ret_or_panic!(session.close());
        ret_or_panic!(session.close());
        assert_eq!(ckbind_mock::calls("C_CloseSession"), 1);

        /* a closed handle is never handed to the module again */
        let err = session.get_session_info().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(ckbind_mock::calls("C_GetSessionInfo"), 0);
        drop(session);
        assert_eq!(ckbind_mock::calls("C_CloseSession"), 1);
    });
}

#[test]
#[serial]
fn test_drop_closes() {
    for_each_profile(|token| {
        {
            let _session = token.get_session(true);
            assert_eq!(ckbind_mock::open_sessions(), 1);
        }
        assert_eq!(ckbind_mock::open_sessions(), 0);
        assert_eq!(ckbind_mock::calls("C_CloseSession"), 1);
        assert_eq!(token.pkcs11.open_session_count(), 0);
    });
}

#[test]
#[serial]
fn test_finalize_closes_sessions() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        ret_or_panic!(token.pkcs11.finalize());
        assert!(session.is_closed());
        ret_or_panic!(session.close());
        assert_eq!(ckbind_mock::calls("C_CloseSession"), 0);
    });
}

#[test]
#[serial]
fn test_session_info() {
    for_each_profile(|token| {
        let ro = token.get_session(false);
        let info = ret_or_panic!(ro.get_session_info());
        assert_eq!(info.slot_id, SLOT_ID);
        assert_eq!(info.state, CKS_RO_PUBLIC_SESSION);
        assert!(info.flags.contains(SessionFlags::SERIAL_SESSION));
        assert!(!info.is_read_write());
        assert_eq!(info.device_error, 0);

        let rw = token.get_session(true);
        let info = ret_or_panic!(rw.get_session_info());
        assert_eq!(info.state, CKS_RW_PUBLIC_SESSION);
        assert!(info.is_read_write());

        ret_or_panic!(rw.login(CKU_USER, Some(USER_PIN)));
        let info = ret_or_panic!(rw.get_session_info());
        assert_eq!(info.state, CKS_RW_USER_FUNCTIONS);
        let info = ret_or_panic!(ro.get_session_info());
        assert_eq!(info.state, CKS_RO_USER_FUNCTIONS);
    });
}

#[test]
#[serial]
fn test_login_logout() {
    for_each_profile(|token| {
        let session = token.get_session(false);

        assert_rv!(
            session.login(CKU_USER, Some("00000000")),
            CKR_PIN_INCORRECT
        );
        assert_eq!(ckbind_mock::logged_in(), None);

        /* context specific logins need a prior login */
        assert_rv!(
            session.login(CKU_CONTEXT_SPECIFIC, Some(USER_PIN)),
            CKR_USER_NOT_LOGGED_IN
        );

        ret_or_panic!(session.login(CKU_USER, Some(USER_PIN)));
        assert_eq!(ckbind_mock::logged_in(), Some(CKU_USER));
        assert_rv!(
            session.login(CKU_USER, Some(USER_PIN)),
            CKR_USER_ALREADY_LOGGED_IN
        );
        ret_or_panic!(session.login(CKU_CONTEXT_SPECIFIC, Some(USER_PIN)));

        ret_or_panic!(session.logout());
        assert_eq!(ckbind_mock::logged_in(), None);
        assert_rv!(session.logout(), CKR_USER_NOT_LOGGED_IN);

        /* protected authentication path */
        ret_or_panic!(session.login(CKU_USER, None));
        assert_eq!(ckbind_mock::logged_in(), Some(CKU_USER));
    });
}

#[test]
#[serial]
fn test_so_login() {
    for_each_profile(|token| {
        let ro = token.get_session(false);
        let rw = token.get_session(true);
        assert_rv!(
            rw.login(CKU_SO, Some(SO_PIN)),
            CKR_SESSION_READ_ONLY_EXISTS
        );
        ret_or_panic!(ro.close());
        ret_or_panic!(rw.login(CKU_SO, Some(SO_PIN)));
        assert_eq!(ckbind_mock::logged_in(), Some(CKU_SO));
        let info = ret_or_panic!(rw.get_session_info());
        assert_eq!(info.state, CKS_RW_SO_FUNCTIONS);
    });
}

#[test]
#[serial]
fn test_last_close_logs_out() {
    for_each_profile(|token| {
        let session = token.login();
        assert_eq!(ckbind_mock::logged_in(), Some(CKU_USER));
        ret_or_panic!(session.close());
        assert_eq!(ckbind_mock::logged_in(), None);
    });
}

#[test]
#[serial]
fn test_init_pin() {
    for_each_profile(|token| {
        let session = token.get_session(true);
        assert_rv!(session.init_pin(Some("1111")), CKR_USER_NOT_LOGGED_IN);

        ret_or_panic!(session.login(CKU_SO, Some(SO_PIN)));
        ret_or_panic!(session.init_pin(Some("new user pin")));
        ret_or_panic!(session.logout());

        assert_rv!(session.login(CKU_USER, Some(USER_PIN)), CKR_PIN_INCORRECT);
        ret_or_panic!(session.login(CKU_USER, Some("new user pin")));
    });
}

#[test]
#[serial]
fn test_set_pin() {
    for_each_profile(|token| {
        let ro = token.get_session(false);
        assert_rv!(ro.set_pin(USER_PIN, "abcd1234"), CKR_SESSION_READ_ONLY);
        drop(ro);

        let session = token.login();
        assert_rv!(session.set_pin("wrong", "abcd1234"), CKR_PIN_INCORRECT);
        ret_or_panic!(session.set_pin(USER_PIN, "abcd1234"));
        ret_or_panic!(session.logout());
        assert_rv!(session.login(CKU_USER, Some(USER_PIN)), CKR_PIN_INCORRECT);
        ret_or_panic!(session.login(CKU_USER, Some("abcd1234")));
    });
}

#[test]
#[serial]
fn test_init_token() {
    for_each_profile(|token| {
        let slot = token.slot();
        let session = token.get_session(true);
        import_secret(&session, b"0123456789abcdef");
        assert_eq!(ckbind_mock::object_count(), 1);

        assert_rv!(
            slot.init_token(Some(SO_PIN), "relabeled"),
            CKR_SESSION_EXISTS
        );
        drop(session);

        assert_rv!(
            slot.init_token(Some("bad"), "relabeled"),
            CKR_PIN_INCORRECT
        );
        ret_or_panic!(slot.init_token(Some(SO_PIN), "relabeled"));
        assert_eq!(ckbind_mock::token_label(), "relabeled");
        assert_eq!(ckbind_mock::object_count(), 0);

        let info = ret_or_panic!(slot.get_token_info());
        assert_eq!(info.label, "relabeled");

        /* labels are fixed 32 byte fields */
        let err = slot.init_token(None, &"x".repeat(33)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    });
}

#[test]
#[serial]
fn test_close_all_sessions() {
    for_each_profile(|token| {
        let sessions = [
            token.get_session(false),
            token.get_session(true),
            token.get_session(true),
        ];
        assert_eq!(token.pkcs11.open_session_count(), 3);

        ret_or_panic!(token.slot().close_all_sessions());
        assert_eq!(token.pkcs11.open_session_count(), 0);
        assert_eq!(ckbind_mock::open_sessions(), 0);
        assert!(sessions.iter().all(|s| s.is_closed()));

        drop(sessions);
        assert_eq!(ckbind_mock::calls("C_CloseSession"), 0);
    });
}

#[test]
#[serial]
fn test_interactive_login() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        ret_or_panic!(session.interactive_login());
        assert_eq!(ckbind_mock::logged_in(), Some(CKU_USER));
        assert_rv!(session.interactive_login(), CKR_USER_ALREADY_LOGGED_IN);

        ret_or_panic!(session.close());
        let err = session.interactive_login().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    });
}

#[test]
#[serial]
fn test_function_status() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let rv = ret_or_panic!(session.get_function_status());
        assert_eq!(rv, CKR_FUNCTION_NOT_PARALLEL);
        let rv = ret_or_panic!(session.cancel_function());
        assert_eq!(rv, CKR_FUNCTION_NOT_PARALLEL);
    });
}
