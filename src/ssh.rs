// CLASSIFICATION: COMMUNITY
// Filename: ssh.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-03-02

//! Dropbear supervisor.
//!
//! Dropbear runs chrooted into `/vroot` in its own process group with the
//! host key passed as a sealed memfd. The supervisor respawns it until the
//! kill signal fires; the kill path SIGKILLs the whole process group and
//! then reports completion by dropping the completion sender.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::oneshot;

use crate::memfd;

const USER_SSH_DIR: &str = "/vroot/tmp/user/.ssh";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshServerConfig {
    /// Base64 host key handed to dropbear via memfd.
    pub host_key: String,
    pub authorized_keys: Vec<String>,
}

impl SshServerConfig {
    /// Stage credentials and start the supervision loop.
    pub fn spawn(
        &self,
        kill: oneshot::Receiver<()>,
        completion: oneshot::Sender<()>,
    ) -> anyhow::Result<()> {
        stage_authorized_keys(&self.authorized_keys)?;

        let host_key_decoded = BASE64
            .decode(&self.host_key)
            .context("failed to decode host key")?;
        let host_key = memfd::sealed_buffer("host.key", &host_key_decoded)
            .context("failed to create memfd for host key")?;

        tokio::spawn(supervise(host_key, kill, completion));
        Ok(())
    }
}

fn stage_authorized_keys(keys: &[String]) -> anyhow::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(USER_SSH_DIR)
        .context("failed to create user ssh dir")?;
    let path = format!("{USER_SSH_DIR}/authorized_keys");
    std::fs::write(&path, keys.join("\n")).context("failed to write authorized_keys")?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;

    for target in ["/vroot/tmp/user", USER_SSH_DIR, path.as_str()] {
        if let Ok(c) = CString::new(target) {
            unsafe {
                libc::chown(c.as_ptr(), 1000, 1000);
            }
        }
    }
    Ok(())
}

async fn supervise(host_key: File, mut kill: oneshot::Receiver<()>, completion: oneshot::Sender<()>) {
    // Dropping this at the end of the loop is the completion signal.
    let _completion = completion;

    loop {
        let mut child = match spawn_dropbear(&host_key) {
            Ok(child) => child,
            Err(err) => {
                log::error!("failed to spawn dropbear: {err}");
                break;
            }
        };
        let pid = child.id().map(|p| p as i32).unwrap_or(0);
        apply_process_params(pid);
        pump_logs(&mut child);
        log::info!("dropbear spawned, pid={pid}");

        tokio::select! {
            status = child.wait() => {
                log::error!("dropbear exited: {status:?}");
                match kill.try_recv() {
                    Err(oneshot::error::TryRecvError::Empty) => {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    _ => {
                        log::info!("dropbear killed, not restarting");
                        break;
                    }
                }
            }
            _ = &mut kill => {
                if pid > 0 {
                    if unsafe { libc::kill(-pid, libc::SIGKILL) } != 0 {
                        log::error!(
                            "failed to kill dropbear process group: {}",
                            io::Error::last_os_error()
                        );
                    } else {
                        log::info!("sent SIGKILL to dropbear process group");
                    }
                }
                let _ = child.wait().await;
                break;
            }
        }
    }
}

fn spawn_dropbear(host_key: &File) -> io::Result<tokio::process::Child> {
    use std::os::unix::process::CommandExt;

    let fd = host_key.as_raw_fd();
    let chroot_dir = CString::new("/vroot").expect("static path");
    let root_dir = CString::new("/").expect("static path");

    let mut cmd = std::process::Command::new("dropbear");
    cmd.args(["-E", "-F", "-s", "-p", "22", "-r", "/proc/self/fd/3"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::dup2(fd, 3) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::chroot(chroot_dir.as_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::chdir(root_dir.as_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    tokio::process::Command::from(cmd).spawn()
}

fn apply_process_params(pid: i32) {
    if pid <= 0 {
        return;
    }
    let _ = std::fs::write(format!("/proc/{pid}/oom_score_adj"), "0");
    let _ = std::fs::write(format!("/proc/{pid}/limits"), "Max processes=300:300\n");
    unsafe {
        libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, 5);
    }
}

fn pump_logs(child: &mut tokio::process::Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::info!(target: "dropbear", "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::info!(target: "dropbear", "{line}");
            }
        });
    }
}
