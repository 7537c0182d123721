// CLASSIFICATION: COMMUNITY
// Filename: bootstrap.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-02-14

//! Boot-time config intake.
//!
//! Sources, in order: the `HOMEGW_CONFIG_PATH` file override, the SRAM
//! stripe staged by the previous kernel, and finally an operator paste on
//! the USB-gadget serial port. Without a valid config the appliance has no
//! identity, so every failure on this path is fatal.

use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, RawFd};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::config::InitConfig;
use crate::ocram::SramStripe;

const SERIAL_PORT: &str = "/dev/ttyGS0";

/// Resolve the boot config and return it parsed plus as raw bytes.
///
/// The raw bytes are the canonical blob: they are what gets re-staged into
/// SRAM on the next kexec.
pub fn load_config() -> anyhow::Result<(InitConfig, Vec<u8>)> {
    let config_text = match std::env::var("HOMEGW_CONFIG_PATH") {
        Ok(path) if !path.is_empty() => {
            std::fs::read(&path).with_context(|| format!("can't read {path}"))?
        }
        _ => match SramStripe::system()
            .load_config()
            .context("can't access the sram stripe")?
        {
            Some(text) => text,
            None => {
                log::warn!("can't load config from ocram, falling back to {SERIAL_PORT}");
                load_config_from_serial()?
            }
        },
    };

    let config: InitConfig =
        serde_json::from_slice(&config_text).context("can't parse config")?;
    Ok((config, config_text))
}

fn load_config_from_serial() -> anyhow::Result<Vec<u8>> {
    let port = OpenOptions::new()
        .read(true)
        .write(true)
        .open(SERIAL_PORT)
        .with_context(|| format!("can't open {SERIAL_PORT}"))?;
    disable_echo(port.as_raw_fd()).context("can't configure serial port")?;

    let mut writer = port.try_clone()?;
    let mut reader = BufReader::new(port);
    read_config_paste(&mut reader, &mut writer)
}

/// Run the paste protocol until a config with a matching hash arrives.
///
/// Protocol: `<BEGIN>`, one line of base64(sha256(config)), any number of
/// lines of base64(config), `<END>`. Any decode or hash failure restarts
/// the loop; end-of-stream is an error.
pub fn read_config_paste<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> anyhow::Result<Vec<u8>> {
    loop {
        writer.write_all(b"Waiting for config input\n")?;
        writer.flush()?;

        loop {
            let line = read_trimmed_line(reader)?.context("serial stream closed")?;
            if line == "<BEGIN>" {
                break;
            }
        }

        let hash_b64 = read_trimmed_line(reader)?.context("can't read config hash")?;

        let mut data_b64 = String::new();
        while let Some(line) = read_trimmed_line(reader)? {
            if line == "<END>" {
                break;
            }
            data_b64.push_str(&line);
        }

        let expected_hash = match BASE64.decode(&hash_b64) {
            Ok(h) => h,
            Err(err) => {
                log::warn!("can't decode config hash: {err}");
                continue;
            }
        };
        if expected_hash.len() != 32 {
            log::warn!("config hash is not 32 bytes");
            continue;
        }

        let config_data = match BASE64.decode(&data_b64) {
            Ok(d) => d,
            Err(err) => {
                log::warn!("can't decode config data: {err}");
                continue;
            }
        };

        if Sha256::digest(&config_data).as_slice() != expected_hash {
            log::warn!("config hash mismatch");
            continue;
        }

        writer.write_all(b"Config received\n")?;
        writer.flush()?;
        return Ok(config_data);
    }
}

fn read_trimmed_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn disable_echo(fd: RawFd) -> io::Result<()> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };
    termios.c_lflag &= !libc::ECHO;
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
