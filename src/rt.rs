// CLASSIFICATION: COMMUNITY
// Filename: rt.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-03-02

//! Real-time sidecar supervision.
//!
//! `/homegw-rt` receives the config document on stdin, a log pipe as fd 3
//! and a pre-bound unix listener as fd 4. Its JSON log lines are pumped
//! into the process log; init does not outlive the sidecar.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::process::{Command, Stdio};

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Control socket shared with the API server's ext_reset proxy.
pub const SOCKET_PATH: &str = "/run/homegw-rt.sock";

/// Spawn the sidecar and start pumping its logs.
pub fn spawn(config_text: &[u8]) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error()).context("failed to create pipe");
    }
    let (log_read, log_write) = (fds[0], fds[1]);

    let listener =
        UnixListener::bind(SOCKET_PATH).context("failed to listen on unix socket")?;
    let _ = std::fs::set_permissions(SOCKET_PATH, std::fs::Permissions::from_mode(0o664));
    if let Ok(path) = std::ffi::CString::new(SOCKET_PATH) {
        unsafe {
            libc::chown(path.as_ptr(), 0, 1000);
        }
    }
    let listener_fd = listener.as_raw_fd();

    let mut cmd = Command::new("/homegw-rt");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(log_write, 3) < 0 || libc::dup2(listener_fd, 4) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = cmd.spawn().context("failed to start homegw-rt")?;
    unsafe {
        libc::close(log_write);
    }
    // The listener is leaked on purpose so the socket file is never removed.
    std::mem::forget(listener);

    if let Some(mut stdin) = child.stdin.take() {
        let config = config_text.to_vec();
        std::thread::spawn(move || {
            let _ = stdin.write_all(&config);
        });
    }

    let reader = unsafe { File::from_raw_fd(log_read) };
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::error!("failed to read from homegw-rt: {err}");
                    break;
                }
            };
            relay_log_line(&line);
        }
        log::error!("homegw-rt exited");
        std::process::exit(1);
    });

    Ok(())
}

/// Map one sidecar JSON log line onto the process log.
fn relay_log_line(line: &str) {
    let msg: serde_json::Value = match serde_json::from_str(line) {
        Ok(msg) => msg,
        Err(err) => {
            log::error!("failed to parse homegw-rt message: {err}");
            return;
        }
    };
    let level = match msg.get("level").and_then(|v| v.as_str()).unwrap_or("INFO") {
        "ERROR" => log::Level::Error,
        "WARN" => log::Level::Warn,
        "DEBUG" | "TRACE" => log::Level::Debug,
        _ => log::Level::Info,
    };
    let target = msg.get("target").and_then(|v| v.as_str()).unwrap_or("");
    let fields = msg.get("fields").cloned().unwrap_or(serde_json::Value::Null);
    let message = fields
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("homegw-rt log")
        .to_string();
    log::log!(target: "homegw-rt", level, "{message} target={target} fields={fields}");
}

/// Proxy an external-reset request to the sidecar over its unix socket.
pub async fn ext_reset(pin: &str) -> anyhow::Result<(u16, String)> {
    let mut stream = tokio::net::UnixStream::connect(SOCKET_PATH)
        .await
        .context("failed to connect to homegw-rt")?;
    let request = format!(
        "POST /ext_reset/{pin} HTTP/1.1\r\nHost: homegw-rt\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    parse_http_response(&response)
}

fn parse_http_response(raw: &[u8]) -> anyhow::Result<(u16, String)> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((&*text, ""));
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .context("malformed response from homegw-rt")?;
    Ok((status, body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_http_response;

    #[test]
    fn parses_status_and_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let (status, body) = parse_http_response(raw).unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_http_response(b"not http").is_err());
    }
}
