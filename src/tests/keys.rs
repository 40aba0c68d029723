// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

const BASE: &[u8] = b"\x17base key material 0123456789";

fn attribute(
    session: &Session,
    key: CK_OBJECT_HANDLE,
    t: CK_ATTRIBUTE_TYPE,
) -> Attribute {
    let mut attrs = ret_or_panic!(session.get_attribute_value(key, &[t]));
    assert_eq!(attrs.len(), 1);
    attrs.remove(0)
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

fn with_randoms(base: &[u8], random: &RandomData) -> Vec<u8> {
    concat(&[base, &random.client_random, &random.server_random])
}

#[test]
#[serial]
fn test_generate_key() {
    for_each_profile(|token| {
        let session = token.get_session(false);

        let key = ret_or_panic!(session.generate_key(
            &Mechanism::new(CKM_AES_KEY_GEN),
            &[Attribute::from_bool(CKA_EXTRACTABLE, true)],
        ));
        assert_eq!(key_value(&session, key).len(), 16);
        let key_type = attribute(&session, key, CKA_KEY_TYPE);
        assert_eq!(ret_or_panic!(key_type.to_ulong()), CKK_AES);
        let local = attribute(&session, key, CKA_LOCAL);
        assert!(ret_or_panic!(local.to_bool()));

        let key = ret_or_panic!(session.generate_key(
            &Mechanism::new(CKM_GENERIC_SECRET_KEY_GEN),
            &[Attribute::from_ulong(CKA_VALUE_LEN, 48)],
        ));
        assert_eq!(key_value(&session, key).len(), 48);
        let class = attribute(&session, key, CKA_CLASS);
        assert_eq!(ret_or_panic!(class.to_ulong()), CKO_SECRET_KEY);

        let with_params = Mechanism::with_params(
            CKM_AES_KEY_GEN,
            MechanismParams::Ulong(16),
        );
        assert_rv!(
            session.generate_key(&with_params, &[]),
            CKR_MECHANISM_PARAM_INVALID
        );
        assert_rv!(
            session.generate_key(&Mechanism::new(CKM_AES_ECB), &[]),
            CKR_MECHANISM_INVALID
        );

        /* token objects need a read/write session */
        assert_rv!(
            session.generate_key(
                &Mechanism::new(CKM_AES_KEY_GEN),
                &[Attribute::from_bool(CKA_TOKEN, true)],
            ),
            CKR_SESSION_READ_ONLY
        );
    });
}

/* the module's PBKDF2 stand in */
fn pbkdf2_value(
    password: &[u8],
    salt: &[u8],
    iterations: CK_ULONG,
    len: usize,
) -> Vec<u8> {
    let seed = concat(&[password, salt, &iterations.to_be_bytes()]);
    stretched(&ckbind_mock::mock_digest(&seed), len)
}

#[test]
#[serial]
fn test_pbkdf2() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let params = Pbkdf2Params::new(
            b"correct horse",
            b"pepper and salt",
            1000,
            CKP_PKCS5_PBKD2_HMAC_SHA256,
        );

        /* the v2.20 layout passes the password length by pointer */
        let v1 = Mechanism::with_params(
            CKM_PKCS5_PBKD2,
            MechanismParams::Pbkdf2(params.clone()),
        );
        let key = ret_or_panic!(session.generate_key(&v1, &[]));
        let expected =
            pbkdf2_value(b"correct horse", b"pepper and salt", 1000, 32);
        assert_eq!(key_value(&session, key), expected);

        let v2 = Mechanism::with_params(
            CKM_PKCS5_PBKD2,
            MechanismParams::Pbkdf2V2(params.clone()),
        );
        let key = ret_or_panic!(session.generate_key(
            &v2,
            &[Attribute::from_ulong(CKA_VALUE_LEN, 20)]
        ));
        assert_eq!(key_value(&session, key), expected[..20]);

        let mut zero = params;
        zero.iterations = 0;
        assert_rv!(
            session.generate_key(
                &Mechanism::with_params(
                    CKM_PKCS5_PBKD2,
                    MechanismParams::Pbkdf2V2(zero),
                ),
                &[]
            ),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_generate_key_pair() {
    for_each_profile(|token| {
        let session = token.get_session(true);
        let (public, private) = ret_or_panic!(session.generate_key_pair(
            &Mechanism::new(CKM_EC_KEY_PAIR_GEN),
            &[Attribute::from_bytes(CKA_EC_PARAMS, b"\x06\x08curve".to_vec())],
            &[Attribute::from_string(CKA_LABEL, "ec private")],
        ));
        assert_ne!(public, private);

        let class = attribute(&session, public, CKA_CLASS);
        assert_eq!(ret_or_panic!(class.to_ulong()), CKO_PUBLIC_KEY);
        let class = attribute(&session, private, CKA_CLASS);
        assert_eq!(ret_or_panic!(class.to_ulong()), CKO_PRIVATE_KEY);
        let key_type = attribute(&session, private, CKA_KEY_TYPE);
        assert_eq!(ret_or_panic!(key_type.to_ulong()), CKK_EC);

        /* private keys default to sensitive */
        let sensitive = attribute(&session, private, CKA_SENSITIVE);
        assert!(ret_or_panic!(sensitive.to_bool()));
        let attrs =
            ret_or_panic!(session.get_attribute_value(private, &[CKA_VALUE]));
        assert!(attrs.is_empty());
        assert_eq!(key_value(&session, public).len(), 32);

        let (_, private) = ret_or_panic!(session.generate_key_pair(
            &Mechanism::new(CKM_RSA_PKCS_KEY_PAIR_GEN),
            &[],
            &[Attribute::from_bool(CKA_SENSITIVE, false)],
        ));
        assert_eq!(key_value(&session, private).len(), 32);

        assert_rv!(
            session.generate_key_pair(
                &Mechanism::new(CKM_AES_KEY_GEN),
                &[],
                &[]
            ),
            CKR_MECHANISM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_wrap_unwrap() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let wrapping = import_secret(&session, b"\x42wrapping key123");
        let secret = b"the secret to carry";
        let key = import_secret(&session, secret);

        let oaep = Mechanism::with_params(
            CKM_RSA_PKCS_OAEP,
            MechanismParams::RsaOaep(RsaOaepParams::new(
                CKM_SHA_1,
                CKG_MGF1_SHA1,
                &[],
            )),
        );
        for mech in [Mechanism::new(CKM_AES_KEY_WRAP), oaep] {
            let wrapped = ret_or_panic!(session.wrap_key(&mech, wrapping, key));
            assert_eq!(wrapped, xor(secret, 0x42));

            let unwrapped = ret_or_panic!(session.unwrap_key(
                &mech,
                wrapping,
                &wrapped,
                &[
                    Attribute::from_ulong(CKA_CLASS, CKO_SECRET_KEY),
                    Attribute::from_string(CKA_LABEL, "unwrapped"),
                ],
            ));
            assert_eq!(key_value(&session, unwrapped), secret);
            let label = attribute(&session, unwrapped, CKA_LABEL);
            assert_eq!(ret_or_panic!(label.to_string()), "unwrapped");

            assert_rv!(
                session.unwrap_key(&mech, wrapping, &[], &[]),
                CKR_WRAPPED_KEY_INVALID
            );
        }

        let locked = ret_or_panic!(session.create_object(&[
            Attribute::from_ulong(CKA_CLASS, CKO_SECRET_KEY),
            Attribute::from_bytes(CKA_VALUE, b"stays inside".to_vec()),
            Attribute::from_bool(CKA_EXTRACTABLE, false),
        ]));
        assert_rv!(
            session.wrap_key(
                &Mechanism::new(CKM_AES_KEY_WRAP),
                wrapping,
                locked
            ),
            CKR_KEY_UNEXTRACTABLE
        );

        let with_iv = Mechanism::with_params(
            CKM_AES_KEY_WRAP,
            MechanismParams::Bytes(vec![0xa6; 8]),
        );
        assert_rv!(
            session.wrap_key(&with_iv, wrapping, key),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_simple_derivations() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);

        let mech = Mechanism::with_params(
            CKM_CONCATENATE_BASE_AND_DATA,
            MechanismParams::KeyDerivationString(KeyDerivationStringData {
                data: b" and more".to_vec(),
            }),
        );
        let key = ret_or_panic!(session.derive_key(&mech, base, &[]));
        let joined = concat(&[BASE, b" and more"]);
        assert_eq!(key_value(&session, key), stretched(&joined, joined.len()));

        let mech = Mechanism::with_params(
            CKM_AES_CBC_ENCRYPT_DATA,
            MechanismParams::AesCbcEncryptData(AesCbcEncryptDataParams {
                iv: [0x33; 16],
                data: vec![0xf0; 32],
            }),
        );
        let key = ret_or_panic!(session.derive_key(
            &mech,
            base,
            &[Attribute::from_ulong(CKA_VALUE_LEN, 24)]
        ));
        let encrypted = xor(&[0xf0; 32], 0x17);
        assert_eq!(key_value(&session, key), stretched(&encrypted, 24));

        assert_rv!(
            session.derive_key(&Mechanism::new(CKM_AES_ECB), base, &[]),
            CKR_MECHANISM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_ecdh_derive() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let ecdh = |public: &[u8]| {
            Mechanism::with_params(
                CKM_ECDH1_DERIVE,
                MechanismParams::Ecdh1Derive(Ecdh1DeriveParams {
                    kdf: CKD_NULL,
                    shared_data: Vec::new(),
                    public_data: public.to_vec(),
                }),
            )
        };

        let point = b"\x04peer public point";
        let key = ret_or_panic!(session.derive_key(&ecdh(point), base, &[]));
        let shared = ckbind_mock::mock_mac(BASE, point);
        assert_eq!(key_value(&session, key), stretched(&shared, 32));

        assert_rv!(
            session.derive_key(&ecdh(&[]), base, &[]),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_hkdf_derive() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let hkdf = |salt: HkdfSalt, extract: bool, expand: bool| {
            Mechanism::with_params(
                CKM_HKDF_DERIVE,
                MechanismParams::Hkdf(HkdfParams {
                    extract: extract,
                    expand: expand,
                    prf_hash_mechanism: CKM_SHA256,
                    salt: salt,
                    info: b"info".to_vec(),
                }),
            )
        };

        let mech = hkdf(HkdfSalt::Data(b"salty".to_vec()), true, true);
        let key = ret_or_panic!(session.derive_key(
            &mech,
            base,
            &[Attribute::from_ulong(CKA_VALUE_LEN, 42)]
        ));
        let prk = ckbind_mock::mock_mac(BASE, b"saltyinfo");
        assert_eq!(key_value(&session, key), stretched(&prk, 42));

        let mech = hkdf(HkdfSalt::Null, false, true);
        let key = ret_or_panic!(session.derive_key(&mech, base, &[]));
        let prk = ckbind_mock::mock_mac(BASE, b"info");
        assert_eq!(key_value(&session, key), stretched(&prk, 32));

        let salt_key = import_secret(&session, b"salt key");
        let mech = hkdf(HkdfSalt::Key(salt_key), true, false);
        ret_or_panic!(session.derive_key(&mech, base, &[]));

        assert_rv!(
            session.derive_key(&hkdf(HkdfSalt::Null, false, false), base, &[]),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

#[test]
#[serial]
fn test_master_key_derive() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let random = random_data();
        let seed = with_randoms(BASE, &random);
        let expected = stretched(&stretched(&seed, 48), 48);

        let ssl3 = Mechanism::with_params(
            CKM_SSL3_MASTER_KEY_DERIVE,
            MechanismParams::Ssl3MasterKeyDerive(Ssl3MasterKeyDeriveParams {
                random: random.clone(),
            }),
        );
        let (key, version) =
            ret_or_panic!(session.derive_master_key(&ssl3, base, &[]));
        assert_eq!(version, Version::new(3, 0));
        assert_eq!(key_value(&session, key), expected);

        let tls12 = Mechanism::with_params(
            CKM_TLS12_MASTER_KEY_DERIVE,
            MechanismParams::Tls12MasterKeyDerive(Tls12MasterKeyDeriveParams {
                random: random,
                prf_hash_mechanism: CKM_SHA256,
            }),
        );
        let marshaled = ret_or_panic!(session.marshal(&tls12));
        let key = ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        assert_eq!(
            ret_or_panic!(marshaled.params().version()),
            Version::new(3, 3)
        );
        assert_eq!(key_value(&session, key), expected);

        /* both random values are required */
        let empty = Mechanism::with_params(
            CKM_SSL3_MASTER_KEY_DERIVE,
            MechanismParams::Ssl3MasterKeyDerive(Ssl3MasterKeyDeriveParams {
                random: RandomData::default(),
            }),
        );
        assert_rv!(
            session.derive_master_key(&empty, base, &[]),
            CKR_MECHANISM_PARAM_INVALID
        );
    });
}

fn tls12_key_mat(iv_bits: CK_ULONG) -> Mechanism {
    Mechanism::with_params(
        CKM_TLS12_KEY_AND_MAC_DERIVE,
        MechanismParams::Tls12KeyMat(Tls12KeyMatParams {
            mac_size_bits: 160,
            key_size_bits: 128,
            iv_size_bits: iv_bits,
            is_export: false,
            random: random_data(),
            prf_hash_mechanism: CKM_SHA256,
        }),
    )
}

#[test]
#[serial]
fn test_key_material() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let random = random_data();
        let seed = with_randoms(BASE, &random);
        let block = stretched(&seed, 2 * (20 + 16 + 16));

        let mut marshaled = ret_or_panic!(session.marshal(&tls12_key_mat(128)));
        let handle =
            ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        assert_eq!(handle, CK_INVALID_HANDLE);
        let out = ret_or_panic!(marshaled.params_mut().take_key_material());
        assert_eq!(key_value(&session, out.client_mac_secret), block[..20]);
        assert_eq!(key_value(&session, out.server_mac_secret), block[20..40]);
        assert_eq!(key_value(&session, out.client_key), block[40..56]);
        assert_eq!(key_value(&session, out.server_key), block[56..72]);
        assert_eq!(out.iv_client(), Some(&block[72..88]));
        assert_eq!(out.iv_server(), Some(&block[88..104]));

        /* the output is only handed out once */
        let err = marshaled.params_mut().take_key_material().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);

        let ssl3 = Mechanism::with_params(
            CKM_SSL3_KEY_AND_MAC_DERIVE,
            MechanismParams::Ssl3KeyMat(Ssl3KeyMatParams {
                mac_size_bits: 160,
                key_size_bits: 128,
                iv_size_bits: 128,
                is_export: false,
                random: random_data(),
            }),
        );
        let out = ret_or_panic!(session.derive_key_material(&ssl3, base, &[]));
        assert_eq!(key_value(&session, out.server_key), block[56..72]);
        assert_eq!(out.iv_server(), Some(&block[88..104]));
    });
}

#[test]
#[serial]
fn test_key_material_without_iv() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let random = random_data();
        let seed = with_randoms(BASE, &random);
        let block = stretched(&seed, 2 * (20 + 16));

        let mut marshaled = ret_or_panic!(session.marshal(&tls12_key_mat(0)));
        ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        let out = ret_or_panic!(marshaled.params_mut().take_key_material());
        assert_eq!(out.iv_client(), None);
        assert_eq!(out.iv_server(), None);
        assert_eq!(key_value(&session, out.client_key), block[40..56]);
        assert_eq!(key_value(&session, out.server_key), block[56..72]);
    });
}

#[test]
#[serial]
fn test_key_material_partial_byte_iv() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let start = AllocationStats::current();

        let err = session.marshal(&tls12_key_mat(13)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(AllocationStats::current().allocations, start.allocations);

        let err = session
            .derive_key_material(&tls12_key_mat(13), base, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(ckbind_mock::calls("C_DeriveKey"), 0);
    });
}

#[test]
#[serial]
fn test_wtls_key_material() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let random = random_data();
        let mech = Mechanism::with_params(
            CKM_WTLS_CLIENT_KEY_AND_MAC_DERIVE,
            MechanismParams::WtlsKeyMat(WtlsKeyMatParams {
                digest_mechanism: CKM_SHA256,
                mac_size_bits: 160,
                key_size_bits: 128,
                iv_size_bits: 64,
                sequence_number: 7,
                is_export: false,
                random: random.clone(),
            }),
        );
        let seq: CK_ULONG = 7;
        let seed = concat(&[
            BASE,
            &random.client_random,
            &random.server_random,
            &seq.to_be_bytes(),
        ]);
        let block = stretched(&seed, 20 + 16 + 8);

        let mut marshaled = ret_or_panic!(session.marshal(&mech));
        ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        assert!(marshaled.params_mut().take_key_material().is_err());
        let out =
            ret_or_panic!(marshaled.params_mut().take_wtls_key_material());
        assert_eq!(key_value(&session, out.mac_secret), block[..20]);
        assert_eq!(key_value(&session, out.key), block[20..36]);
        assert_eq!(out.iv(), Some(&block[36..44]));

        let out = ret_or_panic!(session.derive_wtls_key_material(
            &mech,
            base,
            &[]
        ));
        assert_eq!(key_value(&session, out.key), block[20..36]);
    });
}

#[test]
#[serial]
fn test_tls_prf() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let mech = Mechanism::with_params(
            CKM_TLS_PRF,
            MechanismParams::TlsPrf(TlsPrfParams {
                seed: b"handshake hash".to_vec(),
                label: b"client finished".to_vec(),
                output_len: 12,
            }),
        );

        let marshaled = ret_or_panic!(session.marshal(&mech));
        ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        let output = ret_or_panic!(marshaled.params().prf_output());
        let input = concat(&[BASE, b"client finished", b"handshake hash"]);
        assert_eq!(output, stretched(&input, 12));
        assert!(marshaled.params().version().is_err());

        let output = ret_or_panic!(session.tls_prf(&mech, base));
        assert_eq!(output, stretched(&input, 12));
    });
}

#[test]
#[serial]
fn test_params_released() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let start = AllocationStats::current();

        let mut marshaled = ret_or_panic!(session.marshal(&tls12_key_mat(64)));
        assert!(AllocationStats::current().outstanding_since(&start) > 0);
        ret_or_panic!(session.derive_key_with(&marshaled, base, &[]));
        let out = ret_or_panic!(marshaled.params_mut().take_key_material());
        marshaled.params_mut().dispose();
        assert_eq!(marshaled.params().allocations(), 0);
        let err = session
            .derive_key_with(&marshaled, base, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disposed);

        /* the key material outlives its parameters */
        assert!(out.iv_client().is_some());
        drop(out);
        drop(marshaled);
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);

        let out = ret_or_panic!(session.derive_key_material(
            &tls12_key_mat(64),
            base,
            &[]
        ));
        drop(out);
        assert_eq!(AllocationStats::current().outstanding_since(&start), 0);
    });
}

#[test]
#[serial]
fn test_write_back_needs_read_back() {
    for_each_profile(|token| {
        let session = token.get_session(false);
        let base = import_secret(&session, BASE);
        let objects = ckbind_mock::object_count();

        /* plain derivation would lose the handles the module writes */
        let err = session
            .derive_key(&tls12_key_mat(128), base, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(ckbind_mock::calls("C_DeriveKey"), 0);
        assert_eq!(ckbind_mock::object_count(), objects);

        /* each read back call only takes its own parameter family */
        let err = session
            .derive_wtls_key_material(&tls12_key_mat(128), base, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = session
            .tls_prf(&Mechanism::new(CKM_TLS_PRF), base)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(ckbind_mock::calls("C_DeriveKey"), 0);

        let out = ret_or_panic!(session.derive_key_material(
            &tls12_key_mat(128),
            base,
            &[]
        ));
        assert_eq!(ckbind_mock::calls("C_DeriveKey"), 1);
        assert_eq!(ckbind_mock::object_count(), objects + 4);
        for key in [
            out.client_mac_secret,
            out.server_mac_secret,
            out.client_key,
            out.server_key,
        ] {
            assert_ne!(key, CK_INVALID_HANDLE);
        }
        assert_eq!(out.iv_client().map(|iv| iv.len()), Some(16));
    });
}
