// CLASSIFICATION: COMMUNITY
// Filename: reboot.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-04-03

//! Live-reboot plumbing shared by the API server and emergency mode.
//!
//! Teardown here is deliberately aggressive: the operator asked for this
//! reboot, and recovery from a failed `kexec_load` happens in emergency
//! mode after the next boot.

use std::ffi::CString;
use std::io;
use std::process::{Command, Stdio};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

/// Hard cap on a sealed package, checked against Content-Length before read.
pub const MAX_PACKAGE_SIZE: u64 = 128 * 1024 * 1024;

/// User scratch filesystem unmounted during teardown.
pub const USER_SCRATCH_MOUNT: &str = "/vroot/tmp";

/// Where the primary init persists the AEAD key for emergency mode.
pub const KEY_FILE: &str = "/kexec-encryption-key.txt";

const KEXEC_ENTRY: libc::c_ulong = 0x8000_0000;
const KEXEC_SEGMENT_DEST: usize = 0x8000_0000;
const KEXEC_SEGMENT_CAPACITY: usize = 0x0800_0000;

static KEXEC_GATE: Lazy<Arc<Mutex<()>>> = Lazy::new(|| Arc::new(Mutex::new(())));

/// Process-wide kexec mutex. There is exactly one init per boot, so one
/// gate; a failed `try_lock` maps to 409.
pub fn kexec_gate() -> Arc<Mutex<()>> {
    KEXEC_GATE.clone()
}

/// SIGKILL everything owned by uid 1000.
///
/// Two consecutive `pkill` runs reporting "no matching process" are the
/// terminal state; a single failure may race a process that was exiting
/// while kills were delivered.
pub fn kill_user_processes() {
    loop {
        if !pkill_uid_1000() && !pkill_uid_1000() {
            log::info!("killed all user processes");
            break;
        }
    }
}

fn pkill_uid_1000() -> bool {
    Command::new("pkill")
        .args(["-SIGKILL", "-U", "1000"])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Unmount a filesystem; errors are logged, never fatal.
pub fn unmount(path: &str) {
    let target = match CString::new(path) {
        Ok(target) => target,
        Err(_) => return,
    };
    if unsafe { libc::umount(target.as_ptr()) } != 0 {
        log::error!("failed to unmount {path}: {}", io::Error::last_os_error());
    } else {
        log::info!("unmounted {path}");
    }
}

#[repr(C)]
struct KexecSegment {
    buf: *const libc::c_void,
    bufsz: usize,
    mem: usize,
    memsz: usize,
}

/// Load the kernel image as a single kexec segment.
///
/// The segment descriptor and the kernel buffer must both stay alive
/// across the syscall; the borrow on `kernel` guarantees that here.
pub fn kexec_load(kernel: &[u8]) -> io::Result<()> {
    let segment = KexecSegment {
        buf: kernel.as_ptr().cast(),
        bufsz: kernel.len(),
        mem: KEXEC_SEGMENT_DEST,
        memsz: KEXEC_SEGMENT_CAPACITY,
    };
    let rc = unsafe {
        libc::syscall(
            libc::SYS_kexec_load,
            KEXEC_ENTRY,
            1 as libc::c_ulong,
            &segment as *const KexecSegment,
            0 as libc::c_ulong,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Jump into the loaded kernel. Only returns on failure, which is fatal:
/// the supervising boot process relaunches init.
pub fn reboot_into_new_kernel() -> ! {
    unsafe {
        libc::reboot(libc::RB_KEXEC);
    }
    log::error!("failed to reboot: {}", io::Error::last_os_error());
    std::process::exit(1);
}
