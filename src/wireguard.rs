// CLASSIFICATION: COMMUNITY
// Filename: wireguard.rs v0.3
// Author: Lukas Bower
// Date Modified: 2025-12-08

//! WireGuard interface provisioning.

use std::process::{Command, Stdio};

use anyhow::Context;
use serde::Deserialize;

use crate::memfd;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    pub interface: String,
    pub private_key: String,
    pub addresses: Vec<String>,
    pub peers: Vec<WireguardPeer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireguardPeer {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: String,
    pub preshared_key: String,
    pub persistent_keepalive: u32,
}

impl WireguardConfig {
    pub fn apply(&self) -> anyhow::Result<()> {
        run(Command::new("ip").args(["link", "add", &self.interface, "type", "wireguard"]))
            .context("failed to create interface")?;

        for addr in &self.addresses {
            if let Err(err) =
                run(Command::new("ip").args(["addr", "add", addr, "dev", &self.interface]))
            {
                log::error!("failed to add address {addr}: {err}");
            }
        }

        {
            // Keys go through sealed memfds, never argv or disk.
            let private_key = memfd::sealed_buffer("private-key.pem", self.private_key.as_bytes())
                .context("failed to create memfd for private key")?;
            let mut cmd = Command::new("wg");
            cmd.args([
                "set",
                &self.interface,
                "listen-port",
                "0",
                "private-key",
                "/proc/self/fd/3",
            ]);
            memfd::attach_as_fd3(&mut cmd, &private_key);
            run(&mut cmd).context("failed to set private key")?;
        }

        for peer in &self.peers {
            let preshared_key =
                memfd::sealed_buffer("preshared-key.pem", peer.preshared_key.as_bytes())
                    .context("failed to create memfd for preshared key")?;

            let mut cmd = Command::new("wg");
            cmd.args(["set", &self.interface, "peer", &peer.public_key]);
            if !peer.endpoint.is_empty() {
                cmd.args(["endpoint", &peer.endpoint]);
            }
            if !peer.preshared_key.is_empty() {
                cmd.args(["preshared-key", "/proc/self/fd/3"]);
            }
            if peer.persistent_keepalive != 0 {
                cmd.args([
                    "persistent-keepalive",
                    &peer.persistent_keepalive.to_string(),
                ]);
            }
            if !peer.allowed_ips.is_empty() {
                cmd.args(["allowed-ips", &peer.allowed_ips.join(",")]);
            }
            memfd::attach_as_fd3(&mut cmd, &preshared_key);
            if let Err(err) = run(&mut cmd) {
                log::error!("failed to set peer {}: {err}", peer.public_key);
            }
        }

        run(Command::new("ip").args(["link", "set", &self.interface, "up"]))
            .context("failed to set interface up")?;

        log::info!("wireguard config applied to {}", self.interface);
        Ok(())
    }
}

fn run(cmd: &mut Command) -> anyhow::Result<()> {
    let status = cmd
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if !status.success() {
        anyhow::bail!("{status}");
    }
    Ok(())
}
