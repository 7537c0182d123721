// CLASSIFICATION: COMMUNITY
// Filename: kexec-sealer.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-03-19

//! Operator tool that builds a sealed kexec package.
//!
//! Prints the hash line to sign, reads the armored clearsign from stdin and
//! writes the sealed envelope to stdout.

use std::io::{self, Read, Write};

use anyhow::Context;
use clap::Parser;
use rand::RngCore;

use kexec_codec::{pack_payload, seal, signing_line, NONCE_LEN};

#[derive(Parser)]
#[command(name = "kexec-sealer", about = "Build a sealed kexec package")]
struct Args {
    /// Kernel image path.
    #[arg(long)]
    kernel: String,
    /// Config path.
    #[arg(long)]
    config: String,
    /// 32-byte AEAD key path.
    #[arg(long)]
    key: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let key_data = std::fs::read(&args.key).context("can't read key")?;
    let key: [u8; 32] = key_data
        .try_into()
        .map_err(|_| anyhow::anyhow!("key is not 32 bytes long"))?;

    let kernel = std::fs::read(&args.kernel).context("can't read kernel")?;
    let config = std::fs::read(&args.config).context("can't read config")?;
    let payload = pack_payload(&kernel, &config);

    eprintln!(
        "Please sign the following string with `gpg --clearsign`:\n\n{}\n",
        signing_line(&payload)
    );

    let mut signature = Vec::new();
    io::stdin()
        .read_to_end(&mut signature)
        .context("can't read signature")?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = seal(&key, &nonce, &signature, &payload);
    io::stdout().write_all(&sealed)?;
    Ok(())
}
