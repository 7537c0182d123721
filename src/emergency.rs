// CLASSIFICATION: COMMUNITY
// Filename: emergency.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-04-03

//! Emergency kexec mode.
//!
//! A reduced control plane for recovering from a broken primary bring-up:
//! plain HTTP, one endpoint, no TLS and no auth beyond physical network
//! reach. The unseal pipeline is identical to the primary path except that
//! the current version is pinned to 1, so recovery can install any signed
//! package even when the recorded version is corrupt.

use std::io::Read;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tiny_http::{Method, Response, Server};

use kexec_codec::TrustRoots;

use crate::ocram::SramStripe;
use crate::reboot;

const LISTEN: &str = "0.0.0.0:2345";
const EMERGENCY_VERSION: i64 = 1;

pub fn run() -> anyhow::Result<()> {
    let key_text =
        std::fs::read_to_string(reboot::KEY_FILE).context("can't read kexec encryption key")?;
    let decoded = BASE64
        .decode(key_text.trim())
        .context("can't decode kexec encryption key")?;
    let key: [u8; 32] = decoded
        .try_into()
        .map_err(|_| anyhow::anyhow!("kexec encryption key is not 32 bytes long"))?;

    log::info!("emergency-kexec started");

    let server = Server::http(LISTEN)
        .map_err(|err| anyhow::anyhow!("can't listen on {LISTEN}: {err}"))?;
    for request in server.incoming_requests() {
        if request.method() != &Method::Post || request.url() != "/emergency-kexec" {
            let _ = request.respond(Response::empty(404));
            continue;
        }
        handle_kexec(request, &key);
    }
    Ok(())
}

fn handle_kexec(mut request: tiny_http::Request, key: &[u8; 32]) {
    let gate = reboot::kexec_gate();
    let Ok(_gate) = gate.try_lock() else {
        let _ = request.respond(Response::empty(409));
        return;
    };

    let Some(content_length) = request.body_length() else {
        let _ = request.respond(Response::empty(400));
        return;
    };
    if content_length as u64 > reboot::MAX_PACKAGE_SIZE {
        let _ = request.respond(
            Response::from_string("kexec package is too big").with_status_code(400),
        );
        return;
    }

    let mut input = vec![0u8; content_length];
    if request.as_reader().read_exact(&mut input).is_err() {
        let _ = request.respond(Response::empty(400));
        return;
    }

    let ext_sig = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("X-External-Signature"))
        .map(|h| h.value.as_str().to_string());

    let pkg = match kexec_codec::unseal(
        TrustRoots::embedded(),
        EMERGENCY_VERSION,
        key,
        &input,
        ext_sig.as_deref(),
    ) {
        Ok(pkg) => pkg,
        Err(err) => {
            log::error!("failed to unseal kexec package: {err}");
            let _ = request
                .respond(Response::from_string(format!("unseal failed: {err}")).with_status_code(400));
            return;
        }
    };
    drop(input);

    reboot::kill_user_processes();
    reboot::unmount(reboot::USER_SCRATCH_MOUNT);

    if let Err(err) = SramStripe::system().write_config(&pkg.config) {
        log::error!("failed to write config to ocram: {err}");
        let _ = request.respond(Response::empty(500));
        return;
    }

    if let Err(err) = reboot::kexec_load(&pkg.kernel) {
        log::error!("failed to load kexec package: {err}");
        let _ = request.respond(Response::empty(500));
        return;
    }

    log::info!("kexec image loaded, rebooting");
    let _ = request.respond(
        Response::from_string("Rebooting into new kernel\n").with_status_code(200),
    );
    reboot::reboot_into_new_kernel();
}
