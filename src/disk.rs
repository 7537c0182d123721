// CLASSIFICATION: COMMUNITY
// Filename: disk.rs v0.3
// Author: Lukas Bower
// Date Modified: 2025-12-08

//! Encrypted data-disk bring-up.

use std::process::{Command, Stdio};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::memfd;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub device: String,
    pub encrypted_device: String,
    pub mountpoint: String,
    pub luks_key: String,
}

impl DiskConfig {
    /// Open the LUKS mapping and mount it.
    ///
    /// The key never touches the filesystem: it is handed to cryptsetup as
    /// a sealed memfd visible at `/proc/self/fd/3`.
    pub fn open(&self) -> anyhow::Result<()> {
        let luks_key = BASE64
            .decode(&self.luks_key)
            .context("failed to decode luks key")?;
        let keyfd = memfd::sealed_buffer("luks-key", &luks_key)
            .context("failed to create memfd for luks key")?;

        let mut cmd = Command::new("nice");
        cmd.args([
            "-n",
            "10",
            "cryptsetup",
            "luksOpen",
            &self.device,
            &self.encrypted_device,
            "--key-file",
            "/proc/self/fd/3",
        ]);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        memfd::attach_as_fd3(&mut cmd, &keyfd);
        let status = cmd.status().context("failed to run cryptsetup")?;
        if !status.success() {
            anyhow::bail!("failed to open luks device: {status}");
        }

        std::fs::create_dir_all(&self.mountpoint).ok();

        let status = Command::new("mount")
            .args([
                "-t",
                "ext4",
                "-o",
                "nosuid,nodev,noatime",
                &format!("/dev/mapper/{}", self.encrypted_device),
                &self.mountpoint,
            ])
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .context("failed to run mount")?;
        if !status.success() {
            anyhow::bail!("failed to mount device: {status}");
        }

        log::info!("mounted device {} at {}", self.device, self.mountpoint);
        Ok(())
    }
}
