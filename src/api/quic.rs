// CLASSIFICATION: COMMUNITY
// Filename: quic.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-04-11

//! QUIC side of the control plane.
//!
//! One endpoint on the same port's UDP socket, two ALPN protocols: `h3`
//! requests dispatch into the shared router, `quicssh` streams are byte
//! relays to the local SSH port.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use axum::Router;

use super::AppState;

const DEFAULT_MAX_CONNECTIONS: usize = 100;
const LOCAL_SSH: &str = "127.0.0.1:22";

/// Bring up the QUIC listener. Failures are logged and leave the TCP side
/// running, mirroring the rest of collaborator bring-up.
pub fn start(
    state: AppState,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    router: Router,
) {
    if let Err(err) = start_inner(state, certs, key, router) {
        log::error!("quic server listen failed: {err}");
    }
}

fn start_inner(
    state: AppState,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    router: Router,
) -> anyhow::Result<()> {
    let mut tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    tls.alpn_protocols = vec![b"h3".to_vec(), b"quicssh".to_vec()];

    let server_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls)?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(server_crypto));

    let socket = std::net::UdpSocket::bind(state.config.listen.as_str())?;
    let endpoint = quinn::Endpoint::new(
        endpoint_config(&state.config.stateless_reset_key),
        Some(server_config),
        socket,
        Arc::new(quinn::TokioRuntime),
    )?;

    let max_connections = match state.config.max_concurrent_quic_connections {
        0 => DEFAULT_MAX_CONNECTIONS,
        n => n,
    };
    log::info!(
        "starting quic server, max_concurrent_connections={max_connections}, listen={}",
        state.config.listen
    );

    tokio::spawn(accept_loop(
        endpoint,
        Arc::new(Semaphore::new(max_connections)),
        router,
    ));
    Ok(())
}

/// Reset protection is optional: a missing or malformed key just runs the
/// endpoint without it.
fn endpoint_config(reset_key_b64: &str) -> quinn::EndpointConfig {
    if let Ok(key) = BASE64.decode(reset_key_b64) {
        if key.len() == 32 {
            log::info!("loaded stateless reset key");
            return quinn::EndpointConfig::new(Arc::new(ring::hmac::Key::new(
                ring::hmac::HMAC_SHA256,
                &key,
            )));
        }
    }
    quinn::EndpointConfig::default()
}

async fn accept_loop(endpoint: quinn::Endpoint, sem: Arc<Semaphore>, router: Router) {
    loop {
        let permit = match sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let Some(incoming) = endpoint.accept().await else {
            log::error!("quic accept failed");
            return;
        };
        let router = router.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(err) => {
                    log::debug!("quic handshake failed: {err}");
                    return;
                }
            };
            let protocol = conn
                .handshake_data()
                .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
                .and_then(|data| data.protocol);
            let peer = conn.remote_address();
            match protocol.as_deref() {
                Some(b"quicssh") => {
                    log::info!("quicssh connection from {peer}");
                    relay_to_local_ssh(conn).await;
                }
                _ => serve_h3(conn, router).await,
            }
        });
    }
}

async fn serve_h3(conn: quinn::Connection, router: Router) {
    let mut h3_conn =
        match h3::server::Connection::new(h3_quinn::Connection::new(conn)).await {
            Ok(conn) => conn,
            Err(err) => {
                log::debug!("h3 handshake failed: {err}");
                return;
            }
        };
    loop {
        match h3_conn.accept().await {
            Ok(Some((req, stream))) => {
                let router = router.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_h3_request(req, stream, router).await {
                        log::debug!("http3 request error: {err}");
                    }
                });
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("http3 conn error: {err}");
                break;
            }
        }
    }
}

async fn handle_h3_request(
    req: http::Request<()>,
    mut stream: h3::server::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>,
    router: Router,
) -> anyhow::Result<()> {
    let (parts, _) = req.into_parts();

    let mut body = BytesMut::new();
    while let Some(mut chunk) = stream.recv_data().await? {
        let len = chunk.remaining();
        body.extend_from_slice(&chunk.copy_to_bytes(len));
    }

    let request = http::Request::from_parts(parts, axum::body::Body::from(body.freeze()));
    let response = router.oneshot(request).await?;
    let (parts, mut out_body) = response.into_parts();

    stream
        .send_response(http::Response::from_parts(parts, ()))
        .await?;
    while let Some(frame) = out_body.frame().await {
        let frame = frame.map_err(|err| anyhow::anyhow!("response body error: {err}"))?;
        if let Ok(data) = frame.into_data() {
            stream.send_data(data).await?;
        }
    }
    stream.finish().await?;
    Ok(())
}

/// Relay `quicssh` streams to the local SSH daemon, one at a time per
/// connection.
async fn relay_to_local_ssh(conn: quinn::Connection) {
    let sem = Arc::new(Semaphore::new(1));
    loop {
        let permit = tokio::select! {
            permit = sem.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = conn.closed() => {
                log::info!("closing relay");
                return;
            }
        };

        let (send, recv) = match conn.accept_bi().await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("failed to accept stream: {err}");
                return;
            }
        };

        tokio::spawn(async move {
            let _permit = permit;
            relay_stream(send, recv).await;
        });
    }
}

async fn relay_stream(mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
    let mut ssh = match tokio::net::TcpStream::connect(LOCAL_SSH).await {
        Ok(conn) => conn,
        Err(err) => {
            log::error!("failed to dial ssh: {err}");
            return;
        }
    };
    log::info!("established ssh connection for stream {}", send.id());

    let (mut ssh_read, mut ssh_write) = ssh.split();
    let to_ssh = async {
        let result = tokio::io::copy(&mut recv, &mut ssh_write).await;
        let _ = ssh_write.shutdown().await;
        result
    };
    let from_ssh = async {
        let result = tokio::io::copy(&mut ssh_read, &mut send).await;
        let _ = send.finish();
        result
    };
    let (to_result, from_result) = tokio::join!(to_ssh, from_ssh);
    if let Err(err) = to_result {
        log::debug!("failed to copy from quic to ssh: {err}");
    }
    if let Err(err) = from_result {
        log::debug!("failed to copy from ssh to quic: {err}");
    }
}
