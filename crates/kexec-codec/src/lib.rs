// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-03-19

//! Sealed kexec package codec.
//!
//! A package travels as `magic ‖ nonce ‖ AEAD(sig_len ‖ sig ‖ data_len ‖ data)`
//! where `data` is `kernel_len ‖ kernel ‖ config_len ‖ config`, all lengths
//! little-endian u32. [`unseal`] decrypts, verifies exactly one signature
//! (PGP clearsign or an external transparency-log bundle) and enforces the
//! monotonic config version.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub mod keyring;
pub mod verify;

pub use verify::TrustRoots;

/// On-wire magic prefix, ten bytes including the trailing NUL.
pub const MAGIC: &[u8] = b"HGW-KEXEC\0";

/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;

/// AEAD key length.
pub const KEY_LEN: usize = 32;

/// The only filename accepted in the clearsigned hash line.
pub const PACKAGE_FILENAME: &str = "homegw-kexec.v1.bin";

/// Result of a successful [`unseal`].
pub struct UnsealedPackage {
    pub kernel: Vec<u8>,
    pub config: Vec<u8>,
}

/// Failures surfaced by the unseal pipeline.
///
/// External detail is intentionally coarse; callers log the variant and
/// answer with a terse message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnsealError {
    /// Structural, AEAD or PGP verification failure.
    #[error("invalid blob")]
    InvalidBlob,
    /// Malformed or failed external signature.
    #[error("invalid external signature")]
    InvalidExtSig,
    /// Incoming config version precedes the running one.
    #[error("cannot rollback from {from} to {to}")]
    Rollback { from: i64, to: i64 },
    /// External signature bundle predates the running binary.
    #[error("bundle time is before self mod time")]
    TimeSkew,
    /// Clearsigned hash line names a file other than [`PACKAGE_FILENAME`].
    #[error("unsupported filename: {0}")]
    BadFilename(String),
    /// Clearsigned digest does not match the decrypted payload.
    #[error("hash mismatch")]
    HashMismatch,
}

#[derive(Deserialize)]
struct MinimalConfig {
    #[serde(default)]
    version: i64,
}

/// Unseal a kexec package.
///
/// `ext_sig` is the raw value of the `X-External-Signature` header; a
/// non-empty value switches verification to the external bundle path and the
/// embedded clearsign is ignored. The config is parsed only far enough to
/// read `version` for the anti-rollback check; equal versions are accepted.
pub fn unseal(
    roots: &TrustRoots,
    current_version: i64,
    key: &[u8; KEY_LEN],
    blob: &[u8],
    ext_sig: Option<&str>,
) -> Result<UnsealedPackage, UnsealError> {
    let data = decrypt_and_verify(roots, key, blob, ext_sig)?;

    let (kernel_len, rest) = split_u32(&data)?;
    let (kernel, rest) = take_prefix(rest, kernel_len)?;
    let (config_len, rest) = split_u32(rest)?;
    if rest.len() != config_len as usize {
        return Err(UnsealError::InvalidBlob);
    }
    let config = rest;

    let min: MinimalConfig =
        serde_json::from_slice(config).map_err(|_| UnsealError::InvalidBlob)?;
    if min.version < current_version {
        return Err(UnsealError::Rollback {
            from: current_version,
            to: min.version,
        });
    }

    Ok(UnsealedPackage {
        kernel: kernel.to_vec(),
        config: config.to_vec(),
    })
}

fn decrypt_and_verify(
    roots: &TrustRoots,
    key: &[u8; KEY_LEN],
    blob: &[u8],
    ext_sig: Option<&str>,
) -> Result<Vec<u8>, UnsealError> {
    let ext_sig = ext_sig.filter(|s| !s.is_empty());

    let rest = blob.strip_prefix(MAGIC).ok_or(UnsealError::InvalidBlob)?;
    if rest.len() < NONCE_LEN {
        return Err(UnsealError::InvalidBlob);
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let aead = XChaCha20Poly1305::new(key.into());
    let plain = aead
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| UnsealError::InvalidBlob)?;

    let (sig_len, rest) = split_u32(&plain)?;
    let (sig, rest) = take_prefix(rest, sig_len)?;
    let (data_len, rest) = split_u32(rest)?;
    if rest.len() != data_len as usize {
        return Err(UnsealError::InvalidBlob);
    }
    let data = rest;

    // Structural and AEAD failures take precedence over signature checks.
    // The external signature covers the raw envelope as posted.
    match ext_sig {
        Some(ext) => verify::verify_external(roots, ext, blob)?,
        None => verify::verify_clearsign(roots, sig, data)?,
    }

    Ok(data.to_vec())
}

fn split_u32(data: &[u8]) -> Result<(u32, &[u8]), UnsealError> {
    if data.len() < 4 {
        return Err(UnsealError::InvalidBlob);
    }
    let (head, rest) = data.split_at(4);
    Ok((u32::from_le_bytes(head.try_into().expect("4-byte slice")), rest))
}

fn take_prefix(data: &[u8], len: u32) -> Result<(&[u8], &[u8]), UnsealError> {
    let len = len as usize;
    if data.len() < len {
        return Err(UnsealError::InvalidBlob);
    }
    Ok(data.split_at(len))
}

/// Build the inner `kernel_len ‖ kernel ‖ config_len ‖ config` payload.
pub fn pack_payload(kernel: &[u8], config: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + kernel.len() + config.len());
    out.extend_from_slice(&(kernel.len() as u32).to_le_bytes());
    out.extend_from_slice(kernel);
    out.extend_from_slice(&(config.len() as u32).to_le_bytes());
    out.extend_from_slice(config);
    out
}

/// The single line an operator clearsigns for a payload.
pub fn signing_line(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    format!("{}  {}", hex::encode(digest), PACKAGE_FILENAME)
}

/// Assemble and encrypt a full envelope from a signed payload.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    signature: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(8 + signature.len() + payload.len());
    plain.extend_from_slice(&(signature.len() as u32).to_le_bytes());
    plain.extend_from_slice(signature);
    plain.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    plain.extend_from_slice(payload);

    let aead = XChaCha20Poly1305::new(key.into());
    let ciphertext = aead
        .encrypt(XNonce::from_slice(nonce.as_slice()), plain.as_slice())
        .expect("aead seal");

    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ciphertext);
    out
}
