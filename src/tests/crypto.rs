// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

const KEY: &[u8; 16] = b"\x42123456789abcdef";
const DATA: &[u8] = b"Some data to run through the token";

fn cbc_pad() -> Mechanism {
    Mechanism::with_params(
        CKM_AES_CBC_PAD,
        MechanismParams::Bytes(vec![0x1a; 16]),
    )
}

#[test]
#[serial]
fn test_encrypt_decrypt() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);

        let ecb = Mechanism::new(CKM_AES_ECB);
        ret_or_panic!(session.encrypt_init(&ecb, key));
        let enc = ret_or_panic!(session.encrypt(DATA));
        assert_eq!(enc, xor(DATA, 0x42));
        /* the single part call ended the operation */
        assert_rv!(session.encrypt(DATA), CKR_OPERATION_NOT_INITIALIZED);

        ret_or_panic!(session.decrypt_init(&cbc_pad(), key));
        let dec = ret_or_panic!(session.decrypt(&enc));
        assert_eq!(dec, DATA);
    });
}

#[test]
#[serial]
fn test_multipart_cipher() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);

        ret_or_panic!(session.encrypt_init(&cbc_pad(), key));
        assert_rv!(session.encrypt_init(&cbc_pad(), key), CKR_OPERATION_ACTIVE);
        let mut enc = Vec::new();
        for part in DATA.chunks(5) {
            enc.extend(ret_or_panic!(session.encrypt_update(part)));
        }
        let last = ret_or_panic!(session.encrypt_final());
        assert!(last.is_empty());
        assert_eq!(enc, xor(DATA, 0x42));
        assert_rv!(session.encrypt_final(), CKR_OPERATION_NOT_INITIALIZED);

        let ecb = Mechanism::new(CKM_AES_ECB);
        ret_or_panic!(session.decrypt_init(&ecb, key));
        let mut dec = ret_or_panic!(session.decrypt_update(&enc[..10]));
        dec.extend(ret_or_panic!(session.decrypt_update(&enc[10..])));
        dec.extend(ret_or_panic!(session.decrypt_final()));
        assert_eq!(dec, DATA);
    });
}

#[test]
#[serial]
fn test_cipher_params() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);

        let short_iv = Mechanism::with_params(
            CKM_AES_CBC_PAD,
            MechanismParams::Bytes(vec![0u8; 8]),
        );
        assert_rv!(
            session.encrypt_init(&short_iv, key),
            CKR_MECHANISM_PARAM_INVALID
        );
        let ecb_with_iv = Mechanism::with_params(
            CKM_AES_ECB,
            MechanismParams::Bytes(vec![0u8; 16]),
        );
        assert_rv!(
            session.encrypt_init(&ecb_with_iv, key),
            CKR_MECHANISM_PARAM_INVALID
        );
        assert_rv!(
            session.encrypt_init(&Mechanism::new(CKM_SHA256), key),
            CKR_MECHANISM_INVALID
        );
        assert_rv!(
            session.encrypt_init(&Mechanism::new(CKM_AES_ECB), 4242),
            CKR_KEY_HANDLE_INVALID
        );

        let ctr = |bits| {
            Mechanism::with_params(
                CKM_AES_CTR,
                MechanismParams::AesCtr(AesCtrParams {
                    counter_bits: bits,
                    cb: [0xcc; 16],
                }),
            )
        };
        assert_rv!(
            session.encrypt_init(&ctr(0), key),
            CKR_MECHANISM_PARAM_INVALID
        );
        assert_rv!(
            session.encrypt_init(&ctr(129), key),
            CKR_MECHANISM_PARAM_INVALID
        );
        ret_or_panic!(session.encrypt_init(&ctr(32), key));
        assert_eq!(ret_or_panic!(session.encrypt(DATA)), xor(DATA, 0x42));

        let ccm = |nonce: &[u8]| {
            Mechanism::with_params(
                CKM_AES_CCM,
                MechanismParams::Ccm(CcmParams {
                    data_len: DATA.len() as CK_ULONG,
                    nonce: nonce.to_vec(),
                    aad: b"header".to_vec(),
                    mac_len: 16,
                }),
            )
        };
        assert_rv!(
            session.encrypt_init(&ccm(&[7u8; 6]), key),
            CKR_MECHANISM_PARAM_INVALID
        );
        assert_rv!(
            session.encrypt_init(&ccm(&[7u8; 14]), key),
            CKR_MECHANISM_PARAM_INVALID
        );
        ret_or_panic!(session.encrypt_init(&ccm(&[7u8; 13]), key));
        assert_eq!(ret_or_panic!(session.encrypt(DATA)), xor(DATA, 0x42));
    });
}

#[test]
#[serial]
fn test_gcm_params() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);

        let iv = [0x24u8; 12];
        let mech = Mechanism::with_params(
            CKM_AES_GCM,
            MechanismParams::Gcm(GcmParams::new(&iv, b"additional", 128)),
        );
        ret_or_panic!(session.encrypt_init(&mech, key));
        let seen = ckbind_mock::last_gcm().expect("GCM init was not seen");
        assert_eq!(seen.iv, iv);
        assert_eq!(seen.iv_bits, 96);
        assert_eq!(seen.aad, b"additional");
        assert_eq!(seen.tag_bits, 128);
        assert_eq!(ret_or_panic!(session.encrypt(DATA)), xor(DATA, 0x42));

        /* empty AAD travels as a NULL pointer */
        let mech = Mechanism::with_params(
            CKM_AES_GCM,
            MechanismParams::Gcm(GcmParams::new(&iv, &[], 96)),
        );
        ret_or_panic!(session.decrypt_init(&mech, key));
        let seen = ckbind_mock::last_gcm().expect("GCM init was not seen");
        assert!(seen.aad.is_empty());
        assert_eq!(seen.tag_bits, 96);
    });
}

#[test]
#[serial]
fn test_rsa_ciphers() {
    for_each_profile(|token| {
        let session = token.get_session(true);
        let (public, private) = ret_or_panic!(session.generate_key_pair(
            &Mechanism::new(CKM_RSA_PKCS_KEY_PAIR_GEN),
            &[Attribute::from_ulong(CKA_MODULUS_BITS, 2048)],
            &[],
        ));
        let byte = key_value(&session, public)[0];

        let oaep = Mechanism::with_params(
            CKM_RSA_PKCS_OAEP,
            MechanismParams::RsaOaep(RsaOaepParams::new(
                CKM_SHA256,
                CKG_MGF1_SHA256,
                b"label",
            )),
        );
        ret_or_panic!(session.encrypt_init(&oaep, public));
        let enc = ret_or_panic!(session.encrypt(DATA));
        assert_eq!(enc, xor(DATA, byte));
        ret_or_panic!(session.decrypt_init(&oaep, private));
        assert_eq!(ret_or_panic!(session.decrypt(&enc)), DATA);

        ret_or_panic!(
            session.sign_recover_init(&Mechanism::new(CKM_RSA_X_509), private)
        );
        let sig = ret_or_panic!(session.sign_recover(b"recoverable"));
        assert_eq!(sig, xor(b"recoverable", byte));
        ret_or_panic!(
            session.verify_recover_init(&Mechanism::new(CKM_RSA_X_509), public)
        );
        let recovered = ret_or_panic!(session.verify_recover(&sig));
        assert_eq!(recovered, b"recoverable");
    });
}

#[test]
#[serial]
fn test_digest() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let sha256 = Mechanism::new(CKM_SHA256);

        ret_or_panic!(session.digest_init(&sha256));
        assert_rv!(session.digest_init(&sha256), CKR_OPERATION_ACTIVE);
        let digest = ret_or_panic!(session.digest(DATA));
        assert_eq!(digest, ckbind_mock::mock_digest(DATA));

        ret_or_panic!(session.digest_init(&sha256));
        for part in DATA.chunks(7) {
            ret_or_panic!(session.digest_update(part));
        }
        assert_eq!(ret_or_panic!(session.digest_final()), digest);

        /* keys are digested by value */
        let key = import_secret(&session, KEY);
        ret_or_panic!(session.digest_init(&sha256));
        ret_or_panic!(session.digest_update(b"prefix"));
        ret_or_panic!(session.digest_key(key));
        let mut expected = b"prefix".to_vec();
        expected.extend_from_slice(KEY);
        assert_eq!(
            ret_or_panic!(session.digest_final()),
            ckbind_mock::mock_digest(&expected)
        );

        assert_rv!(
            session.digest_init(&Mechanism::new(CKM_AES_ECB)),
            CKR_MECHANISM_INVALID
        );
        assert_rv!(session.digest_final(), CKR_OPERATION_NOT_INITIALIZED);
    });
}

#[test]
#[serial]
fn test_digest_buffer_too_small() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        ret_or_panic!(session.digest_init(&Mechanism::new(CKM_SHA256)));
        let ll = session.low_level();

        let mut short = [0u8; 16];
        let mut len = short.len() as CK_ULONG;
        let rv = ret_or_panic!(ll.c_digest(
            session.handle(),
            DATA,
            Some(&mut short),
            &mut len
        ));
        assert_eq!(rv, CKR_BUFFER_TOO_SMALL);
        assert_eq!(len, 32);

        /* the operation is still active after a short buffer */
        let mut out = [0u8; 32];
        let rv = ret_or_panic!(ll.c_digest(
            session.handle(),
            DATA,
            Some(&mut out),
            &mut len
        ));
        assert_eq!(rv, CKR_OK);
        assert_eq!(out.to_vec(), ckbind_mock::mock_digest(DATA));
    });
}

#[test]
#[serial]
fn test_operation_state() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        assert_rv!(
            session.get_operation_state(),
            CKR_OPERATION_NOT_INITIALIZED
        );

        ret_or_panic!(session.digest_init(&Mechanism::new(CKM_SHA256)));
        ret_or_panic!(session.digest_update(b"first half, "));
        let saved = ret_or_panic!(session.get_operation_state());
        assert!(saved.starts_with(b"MOCKDGST"));

        let other = token.get_session(false);
        ret_or_panic!(other.set_operation_state(
            &saved,
            CK_INVALID_HANDLE,
            CK_INVALID_HANDLE
        ));
        ret_or_panic!(other.digest_update(b"second half"));
        assert_eq!(
            ret_or_panic!(other.digest_final()),
            ckbind_mock::mock_digest(b"first half, second half")
        );

        assert_rv!(
            other.set_operation_state(
                b"garbage",
                CK_INVALID_HANDLE,
                CK_INVALID_HANDLE
            ),
            CKR_SAVED_STATE_INVALID
        );
    });
}

#[test]
#[serial]
fn test_hmac() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);
        let hmac = Mechanism::new(CKM_SHA256_HMAC);
        let expected = ckbind_mock::mock_mac(KEY, DATA);

        ret_or_panic!(session.sign_init(&hmac, key));
        assert_rv!(session.sign_init(&hmac, key), CKR_OPERATION_ACTIVE);
        let sig = ret_or_panic!(session.sign(DATA));
        assert_eq!(sig, expected);

        ret_or_panic!(session.sign_init(&hmac, key));
        for part in DATA.chunks(3) {
            ret_or_panic!(session.sign_update(part));
        }
        assert_eq!(ret_or_panic!(session.sign_final()), expected);

        ret_or_panic!(session.verify_init(&hmac, key));
        ret_or_panic!(session.verify(DATA, &sig));

        ret_or_panic!(session.verify_init(&hmac, key));
        ret_or_panic!(session.verify_update(&DATA[..4]));
        ret_or_panic!(session.verify_update(&DATA[4..]));
        ret_or_panic!(session.verify_final(&sig));

        /* a failed verification ends the operation too */
        ret_or_panic!(session.verify_init(&hmac, key));
        assert_rv!(session.verify(b"other data", &sig), CKR_SIGNATURE_INVALID);
        assert_rv!(session.verify(DATA, &sig), CKR_OPERATION_NOT_INITIALIZED);

        let with_params = Mechanism::with_params(
            CKM_SHA256_HMAC,
            MechanismParams::Ulong(16),
        );
        assert_rv!(
            session.sign_init(&with_params, key),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_pss_params() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);
        let pss = |mgf| {
            Mechanism::with_params(
                CKM_RSA_PKCS_PSS,
                MechanismParams::RsaPss(RsaPssParams {
                    hash_alg: CKM_SHA256,
                    mgf: mgf,
                    salt_len: 32,
                }),
            )
        };

        ret_or_panic!(session.sign_init(&pss(CKG_MGF1_SHA256), key));
        let sig = ret_or_panic!(session.sign(DATA));
        assert_eq!(sig, ckbind_mock::mock_mac(KEY, DATA));

        /* zero is not a valid MGF */
        assert_rv!(
            session.verify_init(&pss(0), key),
            CKR_MECHANISM_PARAM_INVALID
        );

        let marshaled = ret_or_panic!(session.marshal(&pss(CKG_MGF1_SHA1)));
        let back: RsaPssParams =
            ret_or_panic!(marshaled.params().unmarshal());
        assert_eq!(back.hash_alg, CKM_SHA256);
        assert_eq!(back.mgf, CKG_MGF1_SHA1);
        assert_eq!(back.salt_len, 32);
    });
}

#[test]
#[serial]
fn test_eddsa() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let (public, private) = ret_or_panic!(session.generate_key_pair(
            &Mechanism::new(CKM_EC_EDWARDS_KEY_PAIR_GEN),
            &[],
            &[],
        ));

        for params in [
            MechanismParams::None,
            MechanismParams::Eddsa(EddsaParams {
                ph_flag: false,
                context_data: b"context".to_vec(),
            }),
            MechanismParams::Eddsa(EddsaParams {
                ph_flag: true,
                context_data: Vec::new(),
            }),
        ] {
            let mech = Mechanism::with_params(CKM_EDDSA, params);
            ret_or_panic!(session.sign_init(&mech, private));
            let sig = ret_or_panic!(session.sign(DATA));
            ret_or_panic!(session.verify_init(&mech, public));
            ret_or_panic!(session.verify(DATA, &sig));
        }
    });
}

#[test]
#[serial]
fn test_dual_updates() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let key = import_secret(&session, KEY);
        let mac_key = import_secret(&session, b"mac key");
        let ecb = Mechanism::new(CKM_AES_ECB);
        let sha256 = Mechanism::new(CKM_SHA256);
        let hmac = Mechanism::new(CKM_SHA256_HMAC);

        /* both halves must be active */
        ret_or_panic!(session.encrypt_init(&ecb, key));
        assert_rv!(
            session.digest_encrypt_update(DATA),
            CKR_OPERATION_NOT_INITIALIZED
        );
        ret_or_panic!(session.digest_init(&sha256));
        let enc = ret_or_panic!(session.digest_encrypt_update(DATA));
        assert_eq!(enc, xor(DATA, 0x42));
        ret_or_panic!(session.encrypt_final());
        assert_eq!(
            ret_or_panic!(session.digest_final()),
            ckbind_mock::mock_digest(DATA)
        );

        ret_or_panic!(session.decrypt_init(&ecb, key));
        ret_or_panic!(session.digest_init(&sha256));
        let dec = ret_or_panic!(session.decrypt_digest_update(&enc));
        assert_eq!(dec, DATA);
        ret_or_panic!(session.decrypt_final());
        assert_eq!(
            ret_or_panic!(session.digest_final()),
            ckbind_mock::mock_digest(DATA)
        );

        ret_or_panic!(session.encrypt_init(&ecb, key));
        ret_or_panic!(session.sign_init(&hmac, mac_key));
        let enc = ret_or_panic!(session.sign_encrypt_update(DATA));
        assert_eq!(enc, xor(DATA, 0x42));
        ret_or_panic!(session.encrypt_final());
        let sig = ret_or_panic!(session.sign_final());
        assert_eq!(sig, ckbind_mock::mock_mac(b"mac key", DATA));

        ret_or_panic!(session.decrypt_init(&ecb, key));
        ret_or_panic!(session.verify_init(&hmac, mac_key));
        let dec = ret_or_panic!(session.decrypt_verify_update(&enc));
        assert_eq!(dec, DATA);
        ret_or_panic!(session.decrypt_final());
        ret_or_panic!(session.verify_final(&sig));
    });
}

/* the module's generator, before any seed is mixed in */
fn mock_random(state: &mut u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            *state = state.wrapping_mul(29).wrapping_add(113);
            *state
        })
        .collect()
}

#[test]
#[serial]
fn test_random() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let mut state = 0u8;

        let bytes = ret_or_panic!(session.generate_random(24));
        assert_eq!(bytes, mock_random(&mut state, 24));
        assert!(ret_or_panic!(session.generate_random(0)).is_empty());

        ret_or_panic!(session.seed_random(&[0xff]));
        let bytes = ret_or_panic!(session.generate_random(8));
        assert_eq!(bytes, xor(&mock_random(&mut state, 8), 0xff));
    });
}
