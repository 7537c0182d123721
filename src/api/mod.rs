// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.9
// Author: Lukas Bower
// Date Modified: 2026-04-11

//! Authenticated control-plane gateway.
//!
//! One router serves HTTP/1.1 and HTTP/2 over TLS plus HTTP/3 on the same
//! port's UDP side. Scope groups are mounted only when a client key with a
//! non-empty secret carries the scope. All non-kexec traffic shares a
//! 10-wide admission semaphore; `/kexec/*` bypasses it so a saturated
//! server can still be rebooted.

pub mod quic;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Context as _;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::sync::{oneshot, OwnedMutexGuard, Semaphore};
use tokio_rustls::TlsAcceptor;

use kexec_codec::TrustRoots;

use crate::config::{ApiServerConfig, CertificateConfig, ClientKey};
use crate::disk::DiskConfig;
use crate::ocram::SramStripe;
use crate::reboot;
use crate::rt;
use crate::tesla::VehicleApi;

const HTTP_MAX_CONCURRENCY: usize = 10;

pub type AppState = Arc<ApiServer>;

pub struct ApiServer {
    pub version: i64,
    pub config: ApiServerConfig,
    pub tesla: Vec<Arc<VehicleApi>>,
    pub kexec_enabled: bool,
    pub kexec_key: [u8; 32],
    pub disks: Vec<DiskConfig>,
    /// Nulled after use so the kill can only fire once.
    pub ssh_kill: StdMutex<Option<oneshot::Sender<()>>>,
    pub ssh_kill_completion: StdMutex<Option<oneshot::Receiver<()>>>,
    http_sem: Arc<Semaphore>,
}

impl ApiServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: i64,
        config: ApiServerConfig,
        tesla: Vec<Arc<VehicleApi>>,
        kexec_enabled: bool,
        kexec_key: [u8; 32],
        disks: Vec<DiskConfig>,
        ssh_kill: oneshot::Sender<()>,
        ssh_kill_completion: oneshot::Receiver<()>,
    ) -> AppState {
        Arc::new(Self {
            version,
            config,
            tesla,
            kexec_enabled,
            kexec_key,
            disks,
            ssh_kill: StdMutex::new(Some(ssh_kill)),
            ssh_kill_completion: StdMutex::new(Some(ssh_kill_completion)),
            http_sem: Arc::new(Semaphore::new(HTTP_MAX_CONCURRENCY)),
        })
    }

    /// Serve until the listener fails. QUIC runs on a background task.
    pub async fn run(self: AppState) -> anyhow::Result<()> {
        let router = build_router(self.clone());
        let (certs, key) = load_certificates(&self.config.certificates)?;

        quic::start(self.clone(), certs.clone(), key.clone_key(), router.clone());

        let mut tls = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("invalid api server certificate")?;
        tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let listener = tokio::net::TcpListener::bind(self.config.listen.as_str())
            .await
            .with_context(|| format!("can't listen on {}", self.config.listen))?;
        log::info!("starting h2 api server on {}", self.config.listen);

        loop {
            let (tcp, _peer) = listener.accept().await?;
            let acceptor = acceptor.clone();
            let router = router.clone();
            tokio::spawn(async move {
                let tls = match acceptor.accept(tcp).await {
                    Ok(tls) => tls,
                    Err(err) => {
                        log::debug!("tls accept failed: {err}");
                        return;
                    }
                };
                let service = TowerToHyperService::new(router);
                let builder =
                    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                if let Err(err) = builder
                    .serve_connection_with_upgrades(TokioIo::new(tls), service)
                    .await
                {
                    log::debug!("connection error: {err}");
                }
            });
        }
    }
}

fn load_certificates(
    configs: &[CertificateConfig],
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let first = configs.first().context("api server has no certificates")?;
    if configs.len() > 1 {
        log::warn!("multiple certificates configured, serving the first");
    }
    let certs = rustls_pemfile::certs(&mut first.cert.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .context("can't parse certificate")?;
    let key = rustls_pemfile::private_key(&mut first.key.as_bytes())
        .context("can't parse private key")?
        .context("no private key in certificate config")?;
    Ok((certs, key))
}

/// Collect `id -> secret` for every client key carrying `scope`.
fn scope_accounts(client_keys: &[ClientKey], scope: &str) -> HashMap<String, String> {
    client_keys
        .iter()
        .filter(|key| !key.secret.is_empty() && key.scopes.iter().any(|s| s == scope))
        .map(|key| (key.id.clone(), key.secret.clone()))
        .collect()
}

fn build_router(state: AppState) -> Router {
    let mut router = Router::new();

    let tesla_accounts = scope_accounts(&state.config.client_keys, "tesla");
    if !tesla_accounts.is_empty() {
        router = router.merge(
            Router::new()
                .route("/tesla/:vin/vehicle_data", get(vehicle_data))
                .route_layer(middleware::from_fn_with_state(
                    Arc::new(tesla_accounts),
                    basic_auth,
                )),
        );
        log::info!("enabled api: tesla");
    }

    let kexec_accounts = scope_accounts(&state.config.client_keys, "kexec");
    if !kexec_accounts.is_empty() {
        router = router.merge(
            Router::new()
                .route("/kexec/trigger", post(kexec_trigger))
                .layer(DefaultBodyLimit::max(reboot::MAX_PACKAGE_SIZE as usize + 1024))
                .route_layer(middleware::from_fn_with_state(
                    Arc::new(kexec_accounts),
                    basic_auth,
                )),
        );
        log::info!("enabled api: kexec");
    }

    let debug_accounts = scope_accounts(&state.config.client_keys, "debug");
    if !debug_accounts.is_empty() {
        router = router.merge(
            Router::new()
                .route("/debug/kill_dropbear", post(debug_kill_dropbear))
                .route("/debug/public_ip", get(debug_public_ip))
                .route("/debug/ext_reset/:pin", post(debug_ext_reset))
                .route("/debug/panic", post(debug_panic))
                .route("/debug/crash", post(debug_crash))
                .route_layer(middleware::from_fn_with_state(
                    Arc::new(debug_accounts),
                    basic_auth,
                )),
        );
        log::info!("enabled api: debug");
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            concurrency_limit,
        ))
        .with_state(state)
}

async fn basic_auth(
    State(accounts): State<Arc<HashMap<String, String>>>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|creds| {
            let (user, pass) = creds.split_once(':')?;
            Some(accounts.get(user).map(|secret| secret == pass).unwrap_or(false))
        })
        .unwrap_or(false);

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"homegw\"")],
        )
            .into_response();
    }
    next.run(req).await
}

/// Global admission cap; kexec traffic must get through even when the
/// server is saturated.
async fn concurrency_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.uri().path().starts_with("/kexec/") {
        return next.run(req).await;
    }
    match state.http_sem.try_acquire() {
        Ok(_permit) => next.run(req).await,
        Err(_) => err_response(StatusCode::TOO_MANY_REQUESTS, "too many requests"),
    }
}

fn err_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn vehicle_data(State(state): State<AppState>, Path(vin): Path<String>) -> Response {
    let Some(api) = state.tesla.iter().find(|v| v.vin == vin) else {
        return err_response(StatusCode::NOT_FOUND, "vehicle not found");
    };

    let Some(vehicle) = api.vehicle().ready().await else {
        return err_response(StatusCode::INTERNAL_SERVER_ERROR, "vehicle not available");
    };

    let _permit = match api.sem.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => return err_response(StatusCode::TOO_MANY_REQUESTS, "too many requests"),
    };

    match api.vehicle_data(&vehicle).await {
        Ok(data) => (StatusCode::OK, Json(serde_json::json!({ "data": data }))).into_response(),
        Err(err) => {
            log::warn!("failed to fetch vehicle data: {err}");
            err_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch vehicle data",
            )
        }
    }
}

async fn kexec_trigger(State(state): State<AppState>, req: Request) -> Response {
    if !state.kexec_enabled {
        return err_response(StatusCode::BAD_REQUEST, "kexec disabled");
    }

    let Ok(gate) = reboot::kexec_gate().try_lock_owned() else {
        return err_response(StatusCode::CONFLICT, "kexec already in progress");
    };

    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let Some(content_length) = content_length else {
        return err_response(StatusCode::BAD_REQUEST, "failed to read request body");
    };
    if content_length > reboot::MAX_PACKAGE_SIZE {
        return err_response(StatusCode::BAD_REQUEST, "kexec package is too big");
    }

    let ext_sig = req
        .headers()
        .get("x-external-signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = match axum::body::to_bytes(req.into_body(), reboot::MAX_PACKAGE_SIZE as usize).await
    {
        Ok(body) => body,
        Err(_) => return err_response(StatusCode::BAD_REQUEST, "failed to read request body"),
    };
    if body.len() as u64 != content_length {
        return err_response(StatusCode::BAD_REQUEST, "failed to read request body");
    }

    // Teardown must survive client disconnection once it starts, so it runs
    // on its own task and the handler merely awaits it.
    match tokio::spawn(run_kexec(state, gate, body, ext_sig)).await {
        Ok(response) => response,
        Err(err) => {
            log::error!("kexec task failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "kexec task failed")
        }
    }
}

async fn run_kexec(
    state: AppState,
    gate: OwnedMutexGuard<()>,
    input: Bytes,
    ext_sig: Option<String>,
) -> Response {
    let pkg = match kexec_codec::unseal(
        TrustRoots::embedded(),
        state.version,
        &state.kexec_key,
        &input,
        ext_sig.as_deref(),
    ) {
        Ok(pkg) => pkg,
        Err(err) => {
            log::error!("failed to unseal kexec package: {err}");
            return err_response(StatusCode::BAD_REQUEST, "failed to unseal kexec package");
        }
    };
    drop(input);

    // Free up as much memory as possible before kexec_load.
    let kill = state.ssh_kill.lock().unwrap().take();
    if let Some(kill) = kill {
        let _ = kill.send(());
        let completion = state.ssh_kill_completion.lock().unwrap().take();
        if let Some(completion) = completion {
            let _ = completion.await;
        }
    }

    let _ = tokio::task::spawn_blocking(reboot::kill_user_processes).await;

    reboot::unmount(reboot::USER_SCRATCH_MOUNT);
    for disk in &state.disks {
        reboot::unmount(&disk.mountpoint);
    }

    if let Err(err) = SramStripe::system().write_config(&pkg.config) {
        log::error!("failed to write config to ocram: {err}");
        return err_response(StatusCode::BAD_REQUEST, "failed to write config to ocram");
    }

    if let Err(err) = reboot::kexec_load(&pkg.kernel) {
        log::error!("failed to load kexec package: {err}");
        return err_response(StatusCode::BAD_REQUEST, "failed to load kexec package");
    }

    log::info!("kexec image loaded, rebooting");

    // Let the client see the 200 before the connection dies: reboot fires
    // once the response body has been written out, or after 15 seconds.
    let (sent_tx, sent_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _gate = gate;
        let _ = tokio::time::timeout(Duration::from_secs(15), sent_rx).await;
        reboot::reboot_into_new_kernel();
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::new(SignalOnDrop::new(
            Bytes::from_static(b"Rebooting into new kernel\n"),
            sent_tx,
        )))
        .unwrap_or_else(|_| StatusCode::OK.into_response())
}

/// Response body that reports back once hyper is done with it.
struct SignalOnDrop {
    data: Option<Bytes>,
    sent: Option<oneshot::Sender<()>>,
}

impl SignalOnDrop {
    fn new(data: Bytes, sent: oneshot::Sender<()>) -> Self {
        Self {
            data: Some(data),
            sent: Some(sent),
        }
    }
}

impl http_body::Body for SignalOnDrop {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, Self::Error>>> {
        Poll::Ready(
            self.get_mut()
                .data
                .take()
                .map(|data| Ok(http_body::Frame::data(data))),
        )
    }
}

impl Drop for SignalOnDrop {
    fn drop(&mut self) {
        if let Some(sent) = self.sent.take() {
            let _ = sent.send(());
        }
    }
}

async fn debug_kill_dropbear() -> Response {
    let _ = tokio::task::spawn_blocking(|| {
        std::process::Command::new("killall")
            .args(["-9", "dropbear"])
            .status()
    })
    .await;
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

async fn debug_public_ip() -> Response {
    let result = tokio::task::spawn_blocking(|| -> anyhow::Result<String> {
        let resp = ureq::get("https://api.ipify.org/").call()?;
        if resp.status() != 200 {
            anyhow::bail!("request failed with status {}", resp.status());
        }
        let mut ip = String::new();
        use std::io::Read;
        resp.into_reader().take(512).read_to_string(&mut ip)?;
        Ok(ip)
    })
    .await;

    match result {
        Ok(Ok(ip)) => (StatusCode::OK, Json(serde_json::json!({ "ip": ip }))).into_response(),
        Ok(Err(err)) => {
            log::warn!("failed to get public ip: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
        }
        Err(_) => err_response(StatusCode::INTERNAL_SERVER_ERROR, "request failed"),
    }
}

async fn debug_ext_reset(State(state): State<AppState>, Path(pin): Path<String>) -> Response {
    if !state.config.ext_reset_allowed_pins.contains(&pin) {
        return err_response(StatusCode::FORBIDDEN, "pin not allowed");
    }
    match rt::ext_reset(&pin).await {
        Ok((200, result)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "result": result })),
        )
            .into_response(),
        Ok((_, result)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "result": result })),
        )
            .into_response(),
        Err(err) => {
            log::warn!("ext_reset failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to perform request")
        }
    }
}

async fn debug_panic() -> Response {
    panic!("test panic");
}

async fn debug_crash(State(state): State<AppState>) -> Response {
    if !state.config.allow_crash {
        return err_response(StatusCode::FORBIDDEN, "crash not allowed");
    }
    log::warn!("requested to crash, exiting");
    std::process::exit(1);
}
