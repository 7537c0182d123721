// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-04-11

//! Library root for the homegw-init supervisor.

/// Control-plane gateway (HTTP/2 + HTTP/3, auth, kexec trigger)
pub mod api;
/// Boot-time config intake
pub mod bootstrap;
/// Init configuration document
pub mod config;
/// Encrypted data-disk bring-up
pub mod disk;
/// Emergency kexec mode
pub mod emergency;
/// Kernel log relay
pub mod kmsg;
/// Sealed memfd secret passing
pub mod memfd;
/// TFTP netboot responder
pub mod netboot;
/// Network interface bring-up
pub mod netif;
/// SRAM stripe carrying the config across kexec
pub mod ocram;
/// Live-reboot teardown and kernel syscalls
pub mod reboot;
/// Real-time sidecar supervision
pub mod rt;
/// Dropbear supervisor
pub mod ssh;
/// Vehicle API client
pub mod tesla;
/// Lazily resolved background values
pub mod value_task;
/// WireGuard provisioning
pub mod wireguard;
