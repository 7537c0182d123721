// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.7
// Author: Lukas Bower
// Date Modified: 2026-04-03

//! Init configuration document.
//!
//! The whole appliance is driven by one JSON object. Every section is
//! optional; collaborators receive their own sub-structs.

use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::disk::DiskConfig;
use crate::netboot::NetbootConfig;
use crate::netif::NetifConfig;
use crate::ssh::SshServerConfig;
use crate::tesla::TeslaApiConfig;
use crate::wireguard::WireguardConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub version: i64,
    pub hostname: String,
    pub tesla_api: Vec<TeslaApiConfig>,
    pub wireguard: Vec<WireguardConfig>,
    pub api_server: Option<ApiServerConfig>,
    pub ssh_server: Option<SshServerConfig>,
    pub kexec_encryption_key: String,
    pub disks: Vec<DiskConfig>,
    pub netif: Vec<NetifConfig>,
    pub fs_permissions: Vec<FsPermissionConfig>,
    pub netboot: Option<NetbootConfig>,
    pub sysctl: Vec<SysctlConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub listen: String,
    pub certificates: Vec<CertificateConfig>,
    pub client_keys: Vec<ClientKey>,
    pub max_concurrent_quic_connections: usize,
    pub stateless_reset_key: String,
    pub ext_reset_allowed_pins: Vec<String>,
    pub allow_crash: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// PEM certificate chain, inline.
    pub cert: String,
    /// PEM private key, inline.
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientKey {
    pub id: String,
    pub secret: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FsPermissionConfig {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub chmod: String,
    pub chown: String,
}

impl FsPermissionConfig {
    /// Apply chmod/chown over the subtree via `find -exec`.
    pub fn apply(&self) {
        if !self.chmod.is_empty() {
            self.run_find("chmod", &[&self.chmod]);
        }
        if !self.chown.is_empty() {
            self.run_find("chown", &[&self.chown]);
        }
    }

    fn run_find(&self, op: &str, op_args: &[&str]) {
        let mut cmd = Command::new("find");
        cmd.arg(&self.path);
        if !self.name.is_empty() {
            cmd.args(["-name", &self.name]);
        }
        if !self.file_type.is_empty() {
            cmd.args(["-type", &self.file_type]);
        }
        cmd.arg("-exec").arg(op).args(op_args).args(["{}", ";"]);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        match cmd.status() {
            Ok(status) if status.success() => {
                log::info!("applied fs permission op={op} path={}", self.path)
            }
            Ok(status) => log::error!(
                "failed to apply fs permission op={op} path={} status={status}",
                self.path
            ),
            Err(err) => log::error!(
                "failed to apply fs permission op={op} path={}: {err}",
                self.path
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SysctlConfig {
    pub name: String,
    pub value: String,
}

impl SysctlConfig {
    pub fn apply(&self) {
        let assignment = format!("{}={}", self.name, self.value);
        let status = Command::new("sysctl")
            .args(["-w", &assignment])
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();
        match status {
            Ok(status) if status.success() => log::info!("applied sysctl {assignment}"),
            Ok(status) => log::error!("failed to apply sysctl {assignment}: {status}"),
            Err(err) => log::error!("failed to apply sysctl {assignment}: {err}"),
        }
    }
}
