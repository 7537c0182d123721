// CLASSIFICATION: COMMUNITY
// Filename: ocram.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-02-14

//! On-chip SRAM stripe used to carry the config across a kexec.
//!
//! The stripe lives at a fixed physical range reached through `/dev/mem`
//! and holds `sha256(config) ‖ config ‖ 0`. Reads are destructive: the
//! whole region is zeroed as part of [`SramStripe::dump_and_erase`], so at
//! most one boot ever observes a given generation. DRAM contents are not
//! dependable across a kernel handoff; the on-SoC scratchpad is.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Physical start of the stripe.
pub const OCRAM_START: u64 = 0x0090_1000;
/// Physical end of the stripe (exclusive).
pub const OCRAM_END: u64 = 0x0092_0000;

const HASH_LEN: usize = 32;

/// A fixed region of a memory device holding one staged config.
pub struct SramStripe {
    dev: PathBuf,
    offset: u64,
    len: usize,
}

impl SramStripe {
    /// The appliance's on-chip SRAM region.
    pub fn system() -> Self {
        Self {
            dev: PathBuf::from("/dev/mem"),
            offset: OCRAM_START,
            len: (OCRAM_END - OCRAM_START) as usize,
        }
    }

    /// A stripe over an arbitrary device or file region.
    pub fn at(dev: impl Into<PathBuf>, offset: u64, len: usize) -> Self {
        Self {
            dev: dev.into(),
            offset,
            len,
        }
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    fn map(&self) -> io::Result<Mapping> {
        let file = OpenOptions::new().read(true).write(true).open(&self.dev)?;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                self.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Mapping {
            ptr: ptr.cast(),
            len: self.len,
        })
    }

    /// Snapshot the region, then zero every byte of it.
    pub fn dump_and_erase(&self) -> io::Result<Vec<u8>> {
        let mut mapping = self.map()?;
        let snapshot = mapping.as_slice().to_vec();
        mapping.as_mut_slice().fill(0);
        Ok(snapshot)
    }

    /// Destructively load a staged config.
    ///
    /// Returns `Ok(None)` when the stripe holds no config whose hash checks
    /// out; the region is erased either way.
    pub fn load_config(&self) -> io::Result<Option<Vec<u8>>> {
        let snapshot = self.dump_and_erase()?;
        if snapshot.len() < HASH_LEN + 1 {
            return Ok(None);
        }
        let (expected, rest) = snapshot.split_at(HASH_LEN);
        let data_len = rest.iter().position(|&b| b == 0).unwrap_or(0);
        let config = &rest[..data_len];
        if Sha256::digest(config).as_slice() != expected {
            return Ok(None);
        }
        Ok(Some(config.to_vec()))
    }

    /// Stage a config for the next boot.
    pub fn write_config(&self, config: &[u8]) -> anyhow::Result<()> {
        if HASH_LEN + config.len() + 1 > self.len {
            anyhow::bail!("config is too big for the sram stripe");
        }
        let mut mapping = self.map()?;
        let region = mapping.as_mut_slice();
        let digest = Sha256::digest(config);
        region[..HASH_LEN].copy_from_slice(&digest);
        region[HASH_LEN..HASH_LEN + config.len()].copy_from_slice(config);
        region[HASH_LEN + config.len()] = 0;
        Ok(())
    }
}

/// RAII shared mapping of the stripe region.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
