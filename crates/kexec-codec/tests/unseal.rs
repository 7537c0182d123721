// CLASSIFICATION: COMMUNITY
// Filename: unseal.rs v0.3
// Date Modified: 2026-03-19
// Author: Cohesix Codex

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use pgp::cleartext::CleartextSignedMessage;
use pgp::composed::{KeyType, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey};
use pgp::types::SecretKeyTrait as _;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha2::{Digest, Sha256};

use kexec_codec::{pack_payload, seal, signing_line, unseal, TrustRoots, UnsealError};

const KEY: [u8; 32] = [7u8; 32];
const NONCE: [u8; 24] = [9u8; 24];

fn test_signer() -> (SignedSecretKey, SignedPublicKey) {
    let mut rng = StdRng::seed_from_u64(1984);
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::EdDSA)
        .can_sign(true)
        .primary_user_id("unit signer <signer@example.invalid>".into())
        .build()
        .unwrap();
    let secret = params.generate(&mut rng).unwrap();
    let secret = secret.sign(&mut rng, || String::new()).unwrap();
    let public = secret
        .public_key()
        .sign(&mut rng, &secret, || String::new())
        .unwrap();
    (secret, public)
}

fn clearsign(secret: &SignedSecretKey, text: &str) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(42);
    let msg = CleartextSignedMessage::sign(&mut rng, text, secret, || String::new()).unwrap();
    msg.to_armored_bytes(Default::default()).unwrap()
}

fn pgp_roots(public: SignedPublicKey) -> (TrustRoots, tempfile::NamedTempFile) {
    let self_file = tempfile::NamedTempFile::new().unwrap();
    let roots = TrustRoots {
        pgp_keys: vec![public],
        kms_pub: Vec::new(),
        rekor_pub: Vec::new(),
        self_path: self_file.path().to_path_buf(),
    };
    (roots, self_file)
}

fn sealed(secret: &SignedSecretKey, kernel: &[u8], config: &[u8]) -> Vec<u8> {
    let payload = pack_payload(kernel, config);
    let sig = clearsign(secret, &signing_line(&payload));
    seal(&KEY, &NONCE, &sig, &payload)
}

#[test]
fn happy_path_roundtrip() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    let pkg = unseal(&roots, 1, &KEY, &blob, None).unwrap();
    assert_eq!(pkg.kernel, b"abc");
    assert_eq!(pkg.config, br#"{"version":1}"#);
}

#[test]
fn empty_ext_sig_falls_back_to_pgp() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    assert!(unseal(&roots, 1, &KEY, &blob, Some("")).is_ok());
}

#[test]
fn rollback_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let blob = sealed(&secret, b"abc", br#"{"version":0}"#);
    let err = unseal(&roots, 1, &KEY, &blob, None).unwrap_err();
    assert_eq!(err, UnsealError::Rollback { from: 1, to: 0 });
}

#[test]
fn equal_version_allowed() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let blob = sealed(&secret, b"abc", br#"{"version":3}"#);
    assert!(unseal(&roots, 3, &KEY, &blob, None).is_ok());
}

#[test]
fn tampered_ciphertext_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let mut blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    // One bit anywhere past the magic must break the AEAD tag check.
    let idx = 10 + 24 + 5;
    blob[idx] ^= 0x01;
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn tampered_nonce_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let mut blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    blob[10] ^= 0x80;
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn bad_magic_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let mut blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    blob[0] = b'X';
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn truncated_envelope_rejected() {
    let (_, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let mut blob = b"HGW-KEXEC\0".to_vec();
    blob.extend_from_slice(&[0u8; 10]);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

fn seal_raw_plaintext(plain: &[u8]) -> Vec<u8> {
    let aead = XChaCha20Poly1305::new((&KEY).into());
    let ciphertext = aead
        .encrypt(XNonce::from_slice(&NONCE), plain)
        .unwrap();
    let mut blob = b"HGW-KEXEC\0".to_vec();
    blob.extend_from_slice(&NONCE);
    blob.extend_from_slice(&ciphertext);
    blob
}

#[test]
fn outer_trailing_bytes_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let payload = pack_payload(b"abc", br#"{"version":1}"#);
    let sig = clearsign(&secret, &signing_line(&payload));

    let mut plain = Vec::new();
    plain.extend_from_slice(&(sig.len() as u32).to_le_bytes());
    plain.extend_from_slice(&sig);
    plain.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    plain.extend_from_slice(&payload);
    plain.push(0xAA);

    let blob = seal_raw_plaintext(&plain);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn inner_trailing_bytes_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    // Trailing byte inside the signed payload: the signature still matches,
    // the strict inner length check must reject it.
    let mut payload = pack_payload(b"abc", br#"{"version":1}"#);
    payload.push(0xAA);
    let sig = clearsign(&secret, &signing_line(&payload));
    let blob = seal(&KEY, &NONCE, &sig, &payload);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn filename_mismatch_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let payload = pack_payload(b"abc", br#"{"version":1}"#);
    let line = format!("{}  foo.bin", hex::encode(Sha256::digest(&payload)));
    let sig = clearsign(&secret, &line);
    let blob = seal(&KEY, &NONCE, &sig, &payload);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::BadFilename("foo.bin".into())
    );
}

#[test]
fn digest_mismatch_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let payload = pack_payload(b"abc", br#"{"version":1}"#);
    let line = format!(
        "{}  homegw-kexec.v1.bin",
        hex::encode(Sha256::digest(b"something else"))
    );
    let sig = clearsign(&secret, &line);
    let blob = seal(&KEY, &NONCE, &sig, &payload);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::HashMismatch
    );
}

#[test]
fn unknown_signer_rejected() {
    let (secret, _) = test_signer();
    let mut rng = StdRng::seed_from_u64(77);
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::EdDSA)
        .can_sign(true)
        .primary_user_id("other <other@example.invalid>".into())
        .build()
        .unwrap();
    let other = params.generate(&mut rng).unwrap();
    let other = other.sign(&mut rng, || String::new()).unwrap();
    let other_pub = other
        .public_key()
        .sign(&mut rng, &other, || String::new())
        .unwrap();
    let (roots, _guard) = pgp_roots(other_pub);

    let blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn garbage_config_json_rejected() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    let blob = sealed(&secret, b"abc", b"not json");
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, None).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

// ---- external signature path ----

fn ecdsa_pair() -> (EcdsaKeyPair, Vec<u8>) {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
    let pair =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng).unwrap();
    let public = pair.public_key().as_ref().to_vec();
    (pair, public)
}

fn ext_roots(kms_pub: Vec<u8>, rekor_pub: Vec<u8>) -> (TrustRoots, tempfile::NamedTempFile) {
    let self_file = tempfile::NamedTempFile::new().unwrap();
    let roots = TrustRoots {
        pgp_keys: Vec::new(),
        kms_pub,
        rekor_pub,
        self_path: self_file.path().to_path_buf(),
    };
    (roots, self_file)
}

fn ext_sig_for(
    blob: &[u8],
    kms: &EcdsaKeyPair,
    rekor: &EcdsaKeyPair,
    integrated_time: i64,
) -> String {
    let rng = SystemRandom::new();
    let sig = kms.sign(&rng, blob).unwrap();
    let canonical = serde_json::to_vec(&serde_json::json!({
        "body": "ZHVtbXkgZW50cnk=",
        "integratedTime": integrated_time,
        "logID": "c0ffee",
        "logIndex": 7,
    }))
    .unwrap();
    let set = rekor.sign(&rng, &canonical).unwrap();
    serde_json::json!({
        "base64Signature": BASE64.encode(sig.as_ref()),
        "rekorBundle": {
            "SignedEntryTimestamp": BASE64.encode(set.as_ref()),
            "Payload": {
                "body": "ZHVtbXkgZW50cnk=",
                "integratedTime": integrated_time,
                "logIndex": 7,
                "logID": "c0ffee"
            }
        }
    })
    .to_string()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[test]
fn external_signature_accepted() {
    let (kms, kms_pub) = ecdsa_pair();
    let (rekor, rekor_pub) = ecdsa_pair();
    let (roots, _guard) = ext_roots(kms_pub, rekor_pub);

    // The embedded clearsign is ignored on this path.
    let payload = pack_payload(b"abc", br#"{"version":2}"#);
    let blob = seal(&KEY, &NONCE, b"not a signature", &payload);
    let ext = ext_sig_for(&blob, &kms, &rekor, now_unix() + 3600);

    let pkg = unseal(&roots, 1, &KEY, &blob, Some(&ext)).unwrap();
    assert_eq!(pkg.kernel, b"abc");
}

#[test]
fn stale_bundle_rejected() {
    let (kms, kms_pub) = ecdsa_pair();
    let (rekor, rekor_pub) = ecdsa_pair();
    let (roots, _guard) = ext_roots(kms_pub, rekor_pub);

    let payload = pack_payload(b"abc", br#"{"version":2}"#);
    let blob = seal(&KEY, &NONCE, b"not a signature", &payload);
    // Integrated long before the self binary's mtime.
    let ext = ext_sig_for(&blob, &kms, &rekor, 1000);

    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some(&ext)).unwrap_err(),
        UnsealError::TimeSkew
    );
}

#[test]
fn tampered_envelope_with_ext_sig_is_invalid_blob() {
    let (kms, kms_pub) = ecdsa_pair();
    let (rekor, rekor_pub) = ecdsa_pair();
    let (roots, _guard) = ext_roots(kms_pub, rekor_pub);

    let payload = pack_payload(b"abc", br#"{"version":2}"#);
    let mut blob = seal(&KEY, &NONCE, b"not a signature", &payload);
    let ext = ext_sig_for(&blob, &kms, &rekor, now_unix() + 3600);

    // A flip anywhere past the magic must surface as an AEAD failure even
    // when an external signature header rides along.
    blob[10 + 24 + 5] ^= 0x01;
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some(&ext)).unwrap_err(),
        UnsealError::InvalidBlob
    );

    let mut blob = seal(&KEY, &NONCE, b"not a signature", &payload);
    let ext = ext_sig_for(&blob, &kms, &rekor, now_unix() + 3600);
    blob[10] ^= 0x80;
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some(&ext)).unwrap_err(),
        UnsealError::InvalidBlob
    );
}

#[test]
fn foreign_kms_signature_rejected() {
    let (_kms, kms_pub) = ecdsa_pair();
    let (rekor, rekor_pub) = ecdsa_pair();
    let (foreign, _) = ecdsa_pair();
    let (roots, _guard) = ext_roots(kms_pub, rekor_pub);

    let payload = pack_payload(b"abc", br#"{"version":2}"#);
    let blob = seal(&KEY, &NONCE, b"not a signature", &payload);
    let ext = ext_sig_for(&blob, &foreign, &rekor, now_unix() + 3600);

    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some(&ext)).unwrap_err(),
        UnsealError::InvalidExtSig
    );
}

#[test]
fn malformed_ext_sig_rejected() {
    let (_, kms_pub) = ecdsa_pair();
    let (_, rekor_pub) = ecdsa_pair();
    let (roots, _guard) = ext_roots(kms_pub, rekor_pub);

    let payload = pack_payload(b"abc", br#"{"version":2}"#);
    let blob = seal(&KEY, &NONCE, b"not a signature", &payload);

    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some("{ nope")).unwrap_err(),
        UnsealError::InvalidExtSig
    );
    assert_eq!(
        unseal(&roots, 1, &KEY, &blob, Some(r#"{"base64Signature":"AA=="}"#)).unwrap_err(),
        UnsealError::InvalidExtSig
    );
}

#[test]
fn roundtrip_various_sizes() {
    let (secret, public) = test_signer();
    let (roots, _guard) = pgp_roots(public);
    for kernel_len in [0usize, 1, 4096] {
        let kernel = vec![0x5Au8; kernel_len];
        let blob = sealed(&secret, &kernel, br#"{"version":1,"hostname":"gw"}"#);
        let pkg = unseal(&roots, 0, &KEY, &blob, None).unwrap();
        assert_eq!(pkg.kernel, kernel);
    }
}

#[test]
fn missing_self_binary_only_matters_externally() {
    // The mtime anchor is consulted on the external path only.
    let (secret, public) = test_signer();
    let roots = TrustRoots {
        pgp_keys: vec![public],
        kms_pub: Vec::new(),
        rekor_pub: Vec::new(),
        self_path: PathBuf::from("/does/not/exist"),
    };
    let blob = sealed(&secret, b"abc", br#"{"version":1}"#);
    assert!(unseal(&roots, 1, &KEY, &blob, None).is_ok());
}
