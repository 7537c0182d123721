// CLASSIFICATION: COMMUNITY
// Filename: main.rs v1.1
// Author: Lukas Bower
// Date Modified: 2026-04-11

//! Entry point for the homegw-init supervisor binary.

use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use homegw_init::api::ApiServer;
use homegw_init::config::InitConfig;
use homegw_init::tesla::VehicleApi;
use homegw_init::{bootstrap, emergency, kmsg, reboot, rt};

#[derive(Parser)]
#[command(name = "homegw-init", about = "Init-role supervisor for the home gateway appliance")]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(clap::Subcommand)]
enum Mode {
    /// Reduced control plane for recovery after a failed primary bring-up.
    EmergencyKexec,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if matches!(cli.mode, Some(Mode::EmergencyKexec)) {
        return emergency::run();
    }

    let (config, config_text) = bootstrap::load_config()?;

    // Prepare for emergency kexec.
    write_key_file(&config.kexec_encryption_key);

    disable_core_dump()?;

    if let Err(err) = rt::spawn(&config_text) {
        log::error!("failed to start homegw-rt: {err}");
    }

    let self_hash = compute_self_hash()?;
    log::info!(
        "homegw-init started, version={}, self_hash={}",
        env!("CARGO_PKG_VERSION"),
        hex::encode(self_hash)
    );

    set_hostname(&config.hostname);

    let runtime = tokio::runtime::Runtime::new().context("can't start runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: InitConfig) -> anyhow::Result<()> {
    kmsg::relay();

    let tesla: Vec<Arc<VehicleApi>> = config
        .tesla_api
        .iter()
        .map(|cfg| Arc::new(VehicleApi::new(cfg)))
        .collect();

    for wg in &config.wireguard {
        if let Err(err) = wg.apply() {
            log::error!("failed to apply wireguard config for {}: {err}", wg.interface);
        }
    }

    for netif in &config.netif {
        if let Err(err) = netif.start() {
            log::error!("failed to start netif {}: {err}", netif.name);
        }
    }

    for perm in &config.fs_permissions {
        perm.apply();
    }

    for sysctl in &config.sysctl {
        sysctl.apply();
    }

    // Disks open in the background; netboot starts once they are done.
    {
        let disks = config.disks.clone();
        let netboot = config.netboot.clone();
        tokio::task::spawn_blocking(move || {
            for disk in &disks {
                if let Err(err) = disk.open() {
                    log::error!("failed to open disk {}: {err}", disk.device);
                }
            }
            log::info!("all disks opened");
            if let Some(netboot) = netboot {
                netboot.start();
            }
        });
    }

    let (ssh_kill_tx, ssh_kill_rx) = oneshot::channel();
    let (ssh_completion_tx, ssh_completion_rx) = oneshot::channel();
    if let Some(ssh) = &config.ssh_server {
        if let Err(err) = ssh.spawn(ssh_kill_rx, ssh_completion_tx) {
            log::error!("ssh server spawn failed: {err}");
        }
    } else {
        // No SSH server: the kill step must complete immediately.
        drop(ssh_kill_rx);
        drop(ssh_completion_tx);
    }

    if let Some(api_config) = config.api_server.clone() {
        let (kexec_key, kexec_enabled) = decode_kexec_key(&config.kexec_encryption_key);
        let server = ApiServer::new(
            config.version,
            api_config,
            tesla.clone(),
            kexec_enabled,
            kexec_key,
            config.disks.clone(),
            ssh_kill_tx,
            ssh_completion_rx,
        );
        tokio::spawn(async move {
            if let Err(err) = server.run().await {
                log::error!("api server failed: {err}");
            }
        });
    }

    log::info!("initialization completed");
    std::future::pending::<()>().await;
    Ok(())
}

fn decode_kexec_key(encoded: &str) -> ([u8; 32], bool) {
    match BASE64.decode(encoded.trim()) {
        Ok(key) if key.len() == 32 => {
            let key: [u8; 32] = key.try_into().expect("length checked");
            (key, true)
        }
        Ok(_) => {
            log::error!("kexec encryption key is not 32 bytes long");
            ([0u8; 32], false)
        }
        Err(err) => {
            log::error!("failed to decode kexec encryption key: {err}");
            ([0u8; 32], false)
        }
    }
}

fn write_key_file(key: &str) {
    let result = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(reboot::KEY_FILE)
        .and_then(|mut f| {
            use std::io::Write;
            f.write_all(key.as_bytes())
        });
    if let Err(err) = result {
        log::error!("failed to persist kexec encryption key: {err}");
    }
}

fn disable_core_dump() -> anyhow::Result<()> {
    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_DUMPABLE,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if rc != 0 {
        anyhow::bail!("can't disable core dumps: {}", io::Error::last_os_error());
    }
    log::info!("core dumps disabled");
    Ok(())
}

fn compute_self_hash() -> anyhow::Result<[u8; 32]> {
    let exe = std::fs::read("/proc/self/exe").context("failed to read /proc/self/exe")?;
    Ok(Sha256::digest(&exe).into())
}

fn set_hostname(hostname: &str) {
    if hostname.is_empty() {
        return;
    }
    let rc = unsafe { libc::sethostname(hostname.as_ptr().cast(), hostname.len()) };
    if rc != 0 {
        log::error!("failed to set hostname: {}", io::Error::last_os_error());
    }
}
