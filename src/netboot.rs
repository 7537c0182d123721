// CLASSIFICATION: COMMUNITY
// Filename: netboot.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-02-02

//! Read-only TFTP responder for netbooting downstream devices.
//!
//! Serves RRQ only, 512-byte blocks, one thread per transfer, 5 second ack
//! timeout. Write requests and paths containing `..` are refused.

use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const OP_RRQ: u16 = 1;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;

const BLOCK_SIZE: usize = 512;
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetbootConfig {
    pub tftp_root: String,
}

impl NetbootConfig {
    /// Bind port 69 and serve forever on a background thread.
    pub fn start(&self) {
        let root = self.tftp_root.clone();
        std::thread::spawn(move || {
            let socket = match UdpSocket::bind("0.0.0.0:69") {
                Ok(s) => s,
                Err(err) => {
                    log::error!("tftp server bind failed: {err}");
                    return;
                }
            };
            log::info!("tftp server started, root={root}");
            let mut buf = [0u8; 1024];
            loop {
                let (n, peer) = match socket.recv_from(&mut buf) {
                    Ok(r) => r,
                    Err(err) => {
                        log::error!("tftp recv failed: {err}");
                        continue;
                    }
                };
                let request = buf[..n].to_vec();
                let root = root.clone();
                std::thread::spawn(move || handle_request(&root, peer, &request));
            }
        });
    }
}

fn handle_request(root: &str, peer: SocketAddr, request: &[u8]) {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(err) => {
            log::error!("tftp transfer socket failed: {err}");
            return;
        }
    };

    let (opcode, filename) = match parse_rrq(request) {
        Some(parsed) => parsed,
        None => {
            send_error(&socket, peer, 4, "malformed request");
            return;
        }
    };
    if opcode != OP_RRQ {
        send_error(&socket, peer, 4, "only read requests are supported");
        return;
    }
    if filename.contains("..") {
        log::warn!("tftp request with .. in path: {filename}");
        send_error(&socket, peer, 2, "invalid filename");
        return;
    }

    let path = Path::new(root).join(&filename);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(err) => {
            log::warn!("tftp can't open {}: {err}", path.display());
            send_error(&socket, peer, 1, "file not found");
            return;
        }
    };

    if let Err(err) = socket.set_read_timeout(Some(ACK_TIMEOUT)) {
        log::error!("tftp timeout setup failed: {err}");
        return;
    }

    let mut block: u16 = 1;
    let mut served: u64 = 0;
    loop {
        let mut data = vec![0u8; BLOCK_SIZE];
        let n = match file.read(&mut data) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("tftp read failed for {filename}: {err}");
                send_error(&socket, peer, 0, "read failed");
                return;
            }
        };
        data.truncate(n);
        served += n as u64;

        if !send_block(&socket, peer, block, &data) {
            return;
        }
        if n < BLOCK_SIZE {
            break;
        }
        block = block.wrapping_add(1);
    }

    log::info!("tftp served {filename} ({served} bytes) to {peer}");
}

fn parse_rrq(request: &[u8]) -> Option<(u16, String)> {
    if request.len() < 4 {
        return None;
    }
    let opcode = u16::from_be_bytes([request[0], request[1]]);
    let mut parts = request[2..].split(|&b| b == 0);
    let filename = String::from_utf8(parts.next()?.to_vec()).ok()?;
    if filename.is_empty() {
        return None;
    }
    Some((opcode, filename))
}

/// Send one DATA block and wait for its ACK, retrying on timeout.
fn send_block(socket: &UdpSocket, peer: SocketAddr, block: u16, data: &[u8]) -> bool {
    let mut packet = Vec::with_capacity(4 + data.len());
    packet.extend_from_slice(&OP_DATA.to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet.extend_from_slice(data);

    for _ in 0..MAX_RETRIES {
        if socket.send_to(&packet, peer).is_err() {
            return false;
        }
        let mut ack = [0u8; 64];
        match socket.recv_from(&mut ack) {
            Ok((n, from)) if from == peer && n >= 4 => {
                let opcode = u16::from_be_bytes([ack[0], ack[1]]);
                let acked = u16::from_be_bytes([ack[2], ack[3]]);
                if opcode == OP_ACK && acked == block {
                    return true;
                }
                if opcode == OP_ERROR {
                    return false;
                }
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    log::warn!("tftp block {block} to {peer} timed out");
    false
}

fn send_error(socket: &UdpSocket, peer: SocketAddr, code: u16, message: &str) {
    let mut packet = Vec::with_capacity(5 + message.len());
    packet.extend_from_slice(&OP_ERROR.to_be_bytes());
    packet.extend_from_slice(&code.to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    let _ = socket.send_to(&packet, peer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rrq() {
        let mut req = vec![0, 1];
        req.extend_from_slice(b"zImage\0octet\0");
        let (op, name) = parse_rrq(&req).unwrap();
        assert_eq!(op, OP_RRQ);
        assert_eq!(name, "zImage");
    }

    #[test]
    fn rejects_short_packets() {
        assert!(parse_rrq(&[0, 1]).is_none());
        assert!(parse_rrq(&[0, 1, 0, 0]).is_none());
    }
}
