// CLASSIFICATION: COMMUNITY
// Filename: bootstrap_paste.rs v0.2
// Date Modified: 2026-02-14
// Author: Cohesix Codex

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use homegw_init::bootstrap::read_config_paste;

fn paste_block(config: &[u8]) -> String {
    format!(
        "<BEGIN>\n{}\n{}\n<END>\n",
        BASE64.encode(Sha256::digest(config)),
        BASE64.encode(config)
    )
}

#[test]
fn accepts_valid_paste() {
    let mut reader = Cursor::new(paste_block(b"{\"version\":1}"));
    let mut writer = Vec::new();
    let config = read_config_paste(&mut reader, &mut writer).unwrap();
    assert_eq!(config, b"{\"version\":1}");

    let output = String::from_utf8(writer).unwrap();
    assert!(output.contains("Waiting for config input"));
    assert!(output.contains("Config received"));
}

#[test]
fn retries_until_hash_matches() {
    // First block lies about its hash, second is honest.
    let bad = format!(
        "<BEGIN>\n{}\n{}\n<END>\n",
        BASE64.encode(Sha256::digest(b"other data")),
        BASE64.encode(b"pasted config")
    );
    let input = format!("{bad}{}", paste_block(b"pasted config"));
    let mut reader = Cursor::new(input);
    let mut writer = Vec::new();
    let config = read_config_paste(&mut reader, &mut writer).unwrap();
    assert_eq!(config, b"pasted config");

    let output = String::from_utf8(writer).unwrap();
    assert_eq!(output.matches("Waiting for config input").count(), 2);
}

#[test]
fn rejects_short_hash_then_recovers() {
    let bad = format!(
        "<BEGIN>\n{}\n{}\n<END>\n",
        BASE64.encode(b"short"),
        BASE64.encode(b"config")
    );
    let input = format!("{bad}{}", paste_block(b"config"));
    let mut reader = Cursor::new(input);
    let mut writer = Vec::new();
    assert_eq!(
        read_config_paste(&mut reader, &mut writer).unwrap(),
        b"config"
    );
}

#[test]
fn rejects_bad_base64_then_recovers() {
    let bad = format!(
        "<BEGIN>\n{}\n!!! not base64 !!!\n<END>\n",
        BASE64.encode(Sha256::digest(b"config"))
    );
    let input = format!("{bad}{}", paste_block(b"config"));
    let mut reader = Cursor::new(input);
    let mut writer = Vec::new();
    assert_eq!(
        read_config_paste(&mut reader, &mut writer).unwrap(),
        b"config"
    );
}

#[test]
fn body_may_span_multiple_lines() {
    let config = vec![0xABu8; 600];
    let encoded = BASE64.encode(&config);
    let (first, second) = encoded.split_at(encoded.len() / 2);
    let input = format!(
        "<BEGIN>\n{}\n{first}\n{second}\n<END>\n",
        BASE64.encode(Sha256::digest(&config))
    );
    let mut reader = Cursor::new(input);
    let mut writer = Vec::new();
    assert_eq!(
        read_config_paste(&mut reader, &mut writer).unwrap(),
        config
    );
}

#[test]
fn crlf_line_endings_are_accepted() {
    let config = b"windows operator";
    let input = format!(
        "<BEGIN>\r\n{}\r\n{}\r\n<END>\r\n",
        BASE64.encode(Sha256::digest(config)),
        BASE64.encode(config)
    );
    let mut reader = Cursor::new(input);
    let mut writer = Vec::new();
    assert_eq!(
        read_config_paste(&mut reader, &mut writer).unwrap(),
        config
    );
}

#[test]
fn closed_stream_is_an_error() {
    let mut reader = Cursor::new("");
    let mut writer = Vec::new();
    assert!(read_config_paste(&mut reader, &mut writer).is_err());

    let mut reader = Cursor::new("<BEGIN>\n");
    let mut writer = Vec::new();
    assert!(read_config_paste(&mut reader, &mut writer).is_err());
}
