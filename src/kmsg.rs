// CLASSIFICATION: COMMUNITY
// Filename: kmsg.rs v0.1
// Author: Lukas Bower
// Date Modified: 2025-11-02

//! Kernel log relay.

use std::fs::File;
use std::io::{BufRead, BufReader};

/// Stream `/dev/kmsg` lines into the process log on a background thread.
pub fn relay() {
    std::thread::spawn(|| {
        let kernel_log = match File::open("/dev/kmsg") {
            Ok(f) => f,
            Err(err) => {
                log::info!("can't open /dev/kmsg, not relaying kernel logs: {err}");
                return;
            }
        };
        for line in BufReader::new(kernel_log).lines() {
            match line {
                Ok(line) => log::info!(target: "kmsg", "{line}"),
                Err(_) => continue,
            }
        }
    });
}
