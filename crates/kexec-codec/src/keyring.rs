// CLASSIFICATION: COMMUNITY
// Filename: keyring.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-01-07

//! Compiled-in trust anchors.
//!
//! The signer keyring and the two P-256 verification keys ship inside the
//! binary; a bad embedded key is a build problem and aborts on first use.

use std::io::Cursor;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use pgp::composed::SignedPublicKey;
use pgp::Deserializable;

use crate::TrustRoots;

/// Path whose mtime anchors the external-signature freshness check.
const SELF_PATH: &str = "/homegw-init";

static PGP_SIGNER: &[u8] = include_bytes!("../keys/signer.asc");

// KMS key id: fa13a37e-84fb-48d0-a507-34ad383fdee6
static KMS_PUB: &str = include_str!("../keys/kms.pub");

static REKOR_PUB: &str = include_str!("../keys/rekor.pub");

pub(crate) static EMBEDDED: Lazy<TrustRoots> = Lazy::new(|| {
    let (signer, _) = SignedPublicKey::from_armor_single(Cursor::new(PGP_SIGNER))
        .expect("embedded pgp signer key");
    TrustRoots {
        pgp_keys: vec![signer],
        kms_pub: decode_point(KMS_PUB),
        rekor_pub: decode_point(REKOR_PUB),
        self_path: PathBuf::from(SELF_PATH),
    }
});

fn decode_point(encoded: &str) -> Vec<u8> {
    let point = BASE64
        .decode(encoded.trim())
        .expect("embedded verification key");
    assert_eq!(point.len(), 65, "verification key is not an uncompressed P-256 point");
    point
}
