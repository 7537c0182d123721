// CLASSIFICATION: COMMUNITY
// Filename: verify.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-03-19

//! Signature verification backends for sealed packages.
//!
//! Exactly one backend runs per unseal: the PGP clearsign path for plain
//! uploads, or the external transparency-log bundle path when the caller
//! supplies one.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pgp::cleartext::CleartextSignedMessage;
use pgp::composed::SignedPublicKey;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{UnsealError, PACKAGE_FILENAME};

/// Trust anchors for both verification backends.
///
/// Production code uses [`TrustRoots::embedded`]; tests construct their own
/// with freshly generated keys.
pub struct TrustRoots {
    /// PGP keys accepted for the clearsigned hash line.
    pub pgp_keys: Vec<SignedPublicKey>,
    /// KMS public key, uncompressed P-256 point.
    pub kms_pub: Vec<u8>,
    /// Transparency-log public key, uncompressed P-256 point.
    pub rekor_pub: Vec<u8>,
    /// Binary whose mtime anchors the bundle freshness check.
    pub self_path: PathBuf,
}

impl TrustRoots {
    /// Compiled-in trust anchors.
    pub fn embedded() -> &'static TrustRoots {
        &crate::keyring::EMBEDDED
    }
}

/// Verify a PGP clearsigned `sha256  filename` line against `data`.
pub(crate) fn verify_clearsign(
    roots: &TrustRoots,
    sig: &[u8],
    data: &[u8],
) -> Result<(), UnsealError> {
    let text = std::str::from_utf8(sig).map_err(|_| UnsealError::InvalidBlob)?;
    let (msg, _headers) =
        CleartextSignedMessage::from_string(text).map_err(|_| UnsealError::InvalidBlob)?;

    if !roots.pgp_keys.iter().any(|key| msg.verify(key).is_ok()) {
        return Err(UnsealError::InvalidBlob);
    }

    let signed = msg.signed_text();
    let first = signed.lines().next().unwrap_or("");
    let (digest, filename) = parse_digest_line(first).ok_or(UnsealError::InvalidBlob)?;

    if filename != PACKAGE_FILENAME {
        return Err(UnsealError::BadFilename(filename.to_string()));
    }

    let actual = Sha256::digest(data);
    if digest != actual.as_slice() {
        return Err(UnsealError::HashMismatch);
    }

    log::info!("kexec package verified with pgp signature");
    Ok(())
}

/// Parse a `sha256sum`-style line: 64 hex digits, two spaces, a filename.
fn parse_digest_line(line: &str) -> Option<(Vec<u8>, &str)> {
    if !line.is_ascii() || line.len() < 64 + 3 {
        return None;
    }
    let (hash_part, rest) = line.split_at(64);
    if !hash_part
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    let name = rest.strip_prefix("  ")?;
    if name.is_empty() {
        return None;
    }
    Some((hex::decode(hash_part).ok()?, name))
}

#[derive(Deserialize)]
struct SignedPayload {
    #[serde(rename = "base64Signature", alias = "Base64Signature")]
    base64_signature: String,
    #[serde(rename = "rekorBundle", alias = "Bundle")]
    bundle: Option<RekorBundle>,
}

#[derive(Deserialize)]
struct RekorBundle {
    #[serde(rename = "SignedEntryTimestamp")]
    signed_entry_timestamp: String,
    #[serde(rename = "Payload")]
    payload: RekorPayload,
}

#[derive(Deserialize)]
struct RekorPayload {
    body: serde_json::Value,
    #[serde(rename = "integratedTime")]
    integrated_time: i64,
    #[serde(rename = "logIndex")]
    log_index: i64,
    #[serde(rename = "logID")]
    log_id: String,
}

/// Verify an external transparency-log signature over the raw envelope.
///
/// The KMS signature covers `blob` as posted. The bundle inclusion proof is
/// checked offline: the signed entry timestamp must cover the canonical JSON
/// of the bundle payload. Finally the bundle's integration time must not
/// precede the mtime of the running binary, pinning forward progress.
pub(crate) fn verify_external(
    roots: &TrustRoots,
    ext_sig: &str,
    blob: &[u8],
) -> Result<(), UnsealError> {
    let payload: SignedPayload =
        serde_json::from_str(ext_sig).map_err(|_| UnsealError::InvalidExtSig)?;
    let bundle = payload.bundle.as_ref().ok_or(UnsealError::InvalidExtSig)?;

    let sig = BASE64
        .decode(&payload.base64_signature)
        .map_err(|_| UnsealError::InvalidExtSig)?;
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &roots.kms_pub)
        .verify(blob, &sig)
        .map_err(|_| UnsealError::InvalidExtSig)?;

    // Canonical JSON keeps keys sorted, matching what the log signed.
    let canonical = serde_json::to_vec(&serde_json::json!({
        "body": bundle.payload.body,
        "integratedTime": bundle.payload.integrated_time,
        "logID": bundle.payload.log_id,
        "logIndex": bundle.payload.log_index,
    }))
    .map_err(|_| UnsealError::InvalidExtSig)?;
    let set = BASE64
        .decode(&bundle.signed_entry_timestamp)
        .map_err(|_| UnsealError::InvalidExtSig)?;
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &roots.rekor_pub)
        .verify(&canonical, &set)
        .map_err(|_| UnsealError::InvalidExtSig)?;

    let self_mtime = fs::metadata(&roots.self_path)
        .and_then(|m| m.modified())
        .map_err(|_| UnsealError::InvalidExtSig)?;
    let bundle_time = UNIX_EPOCH + Duration::from_secs(bundle.payload.integrated_time.max(0) as u64);
    if bundle_time < self_mtime {
        return Err(UnsealError::TimeSkew);
    }

    log::info!(
        "kexec package verified with external signature, log_index={}",
        bundle.payload.log_index
    );
    Ok(())
}
