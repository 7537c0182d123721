// CLASSIFICATION: COMMUNITY
// Filename: netif.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-01-22

//! Network interface bring-up by shelling out to the standard utilities.

use std::fs::OpenOptions;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetifConfig {
    pub name: String,
    /// `dhcp` or `static`.
    pub mode: String,
    pub ipv4_address: String,
    pub ipv4_gateway: String,
    pub nameservers: Vec<String>,
}

impl NetifConfig {
    pub fn start(&self) -> anyhow::Result<()> {
        match self.mode.as_str() {
            "dhcp" => {
                let name = self.name.clone();
                std::thread::spawn(move || loop {
                    let status = Command::new("udhcpc")
                        .args(["-i", &name, "-f"])
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit())
                        .status();
                    log::error!("udhcpc for {name} exited: {status:?}");
                    std::thread::sleep(Duration::from_secs(5));
                });
                log::info!("started udhcp client on {}", self.name);
                Ok(())
            }
            "static" => {
                run_ip(&["link", "set", &self.name, "up"])
                    .context("failed to bring up interface")?;

                if !self.ipv4_address.is_empty() {
                    run_ip(&["addr", "add", &self.ipv4_address, "dev", &self.name])
                        .context("failed to set ipv4 address")?;
                }

                if !self.ipv4_gateway.is_empty() {
                    run_ip(&["route", "add", "default", "via", &self.ipv4_gateway])
                        .context("failed to set ipv4 gateway")?;
                }

                if !self.nameservers.is_empty() {
                    let mut resolv = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open("/etc/resolv.conf")
                        .context("failed to open /etc/resolv.conf")?;
                    for nameserver in &self.nameservers {
                        writeln!(resolv, "nameserver {nameserver}")
                            .context("failed to write /etc/resolv.conf")?;
                    }
                }

                log::info!("configured static network interface {}", self.name);
                Ok(())
            }
            other => anyhow::bail!("unknown netif mode: {other}"),
        }
    }
}

fn run_ip(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new("ip")
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("failed to run ip")?;
    if !status.success() {
        anyhow::bail!("ip {} failed: {status}", args.join(" "));
    }
    Ok(())
}
