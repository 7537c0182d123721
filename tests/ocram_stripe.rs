// CLASSIFICATION: COMMUNITY
// Filename: ocram_stripe.rs v0.2
// Date Modified: 2026-02-14
// Author: Cohesix Codex

use homegw_init::ocram::SramStripe;

const REGION: usize = 4096;

fn stripe() -> (SramStripe, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(REGION as u64).unwrap();
    (SramStripe::at(file.path(), 0, REGION), file)
}

#[test]
fn handoff_roundtrip_and_destructive_load() {
    let (stripe, file) = stripe();
    stripe.write_config(b"{\"version\":4}").unwrap();

    let loaded = stripe.load_config().unwrap();
    assert_eq!(loaded.as_deref(), Some(b"{\"version\":4}" as &[u8]));

    // The load erased the stripe: a second read finds nothing, and the
    // backing region is all zeros.
    assert_eq!(stripe.load_config().unwrap(), None);
    let raw = std::fs::read(file.path()).unwrap();
    assert!(raw.iter().all(|&b| b == 0));
}

#[test]
fn dump_returns_pre_erase_snapshot() {
    let (stripe, file) = stripe();
    std::fs::write(file.path(), b"snapshot me").unwrap();
    file.as_file().set_len(REGION as u64).unwrap();

    let snapshot = stripe.dump_and_erase().unwrap();
    assert_eq!(&snapshot[..11], b"snapshot me");
    assert_eq!(snapshot.len(), REGION);

    let raw = std::fs::read(file.path()).unwrap();
    assert!(raw.iter().all(|&b| b == 0));
}

#[test]
fn corrupt_hash_is_rejected_but_still_erased() {
    let (stripe, file) = stripe();
    stripe.write_config(b"good config").unwrap();

    // Flip one byte of the stored hash prefix.
    let mut raw = std::fs::read(file.path()).unwrap();
    raw[0] ^= 0xFF;
    std::fs::write(file.path(), &raw).unwrap();

    assert_eq!(stripe.load_config().unwrap(), None);
    let raw = std::fs::read(file.path()).unwrap();
    assert!(raw.iter().all(|&b| b == 0));
}

#[test]
fn oversized_config_is_rejected() {
    let (stripe, _file) = stripe();
    // 32-byte hash + config + terminator must fit the region.
    let max = REGION - 33;
    assert!(stripe.write_config(&vec![b'x'; max]).is_ok());
    assert!(stripe.write_config(&vec![b'x'; max + 1]).is_err());
}

#[test]
fn empty_stripe_loads_nothing() {
    let (stripe, _file) = stripe();
    assert_eq!(stripe.load_config().unwrap(), None);
}
