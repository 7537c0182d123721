// CLASSIFICATION: COMMUNITY
// Filename: memfd.rs v0.2
// Author: Lukas Bower
// Date Modified: 2025-11-02

//! Sealed in-memory files for handing secrets to child processes.
//!
//! The child sees the buffer as `/proc/self/fd/3`; the seals stop it (or
//! anything else holding the fd) from resizing or rewriting the contents.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd};

/// Create a sealed read-only memfd holding `data`.
pub fn sealed_buffer(name: &str, data: &[u8]) -> io::Result<File> {
    let cname = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let fd = unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut file = unsafe { File::from_raw_fd(fd) };

    if !data.is_empty() {
        file.write_all(data)?;
    }

    let seals = libc::F_SEAL_GROW | libc::F_SEAL_SHRINK | libc::F_SEAL_WRITE | libc::F_SEAL_SEAL;
    if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_ADD_SEALS, seals) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(file)
}

/// Arrange for `file` to appear as fd 3 in a child spawned from `cmd`.
pub fn attach_as_fd3(cmd: &mut std::process::Command, file: &File) {
    use std::os::unix::process::CommandExt;

    let fd = file.as_raw_fd();
    // dup2 also clears O_CLOEXEC on the new descriptor.
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(fd, 3) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn buffer_contents_survive_sealing() {
        let mut f = sealed_buffer("unit", b"secret bytes").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        f.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"secret bytes");
    }

    #[test]
    fn writes_rejected_after_sealing() {
        let mut f = sealed_buffer("unit", b"x").unwrap();
        assert!(f.write_all(b"more").is_err());
    }

    #[test]
    fn empty_buffer_is_sealed_too() {
        let f = sealed_buffer("empty", b"").unwrap();
        assert_eq!(f.metadata().unwrap().len(), 0);
    }
}
