//
// server.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! The inward HTTP surface: request routing, the `/execute` and `/health`
//! endpoints, the initialization probe, the file-staging routes, and the
//! listener loop (plain or TLS-terminating).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;

use hyper::header::CONTENT_TYPE;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod};
use regex::Regex;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::error::CMError;
use crate::execution::ExecutionCoordinator;
use crate::files::FileStaging;
use crate::health::HealthMonitor;
use crate::jupyter_api::JupyterApi;

/// The body of a `POST /execute` request.
#[derive(Deserialize)]
struct ExecutionRequest {
    code: String,
}

/// Everything a request handler needs, assembled once at startup.
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub api: Arc<JupyterApi>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub health: Arc<HealthMonitor>,
    pub files: Arc<FileStaging>,
}

impl Gateway {
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self, anyhow::Error> {
        let api = Arc::new(JupyterApi::new(config.clone())?);
        let coordinator = Arc::new(ExecutionCoordinator::new(config.clone()));
        let files = Arc::new(FileStaging::new(config.working_dir.clone()));
        Ok(Self {
            config,
            api,
            coordinator,
            health: Arc::new(HealthMonitor::new()),
            files,
        })
    }
}

/// Build a JSON response. When `wrap` is set the message is wrapped in a
/// `{"message": ...}` object; otherwise it is sent as-is.
pub(crate) fn json_response(status: StatusCode, message: &str, wrap: bool) -> Response<Body> {
    let body = if wrap {
        serde_json::json!({ "message": message }).to_string()
    } else {
        message.to_string()
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("Unable to create JSON response")
}

fn error_response(err: &CMError) -> Response<Body> {
    err.log();
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(err.to_json().to_string()))
        .expect("Unable to create error response")
}

async fn handle(gateway: Arc<Gateway>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::POST, "/execute") => return handle_execute(gateway, req).await,
        (&Method::GET, "/health") => return handle_health(gateway),
        (&Method::GET, "/") => return handle_initialize(gateway).await,
        _ => {}
    }

    // File-staging routes carry path parameters; match them with anchored
    // patterns
    if method == Method::GET {
        if let Some(custom_path) = match_list_files(&path) {
            return gateway.files.list_files(custom_path.as_deref()).await;
        }
        if let Some((custom_path, filename)) = match_download(&path) {
            return gateway
                .files
                .download(custom_path.as_deref(), &filename)
                .await;
        }
        if let Some(filename) = match_get_file(&path) {
            return gateway.files.get_metadata(&filename).await;
        }
    } else if method == Method::POST {
        if let Some(custom_path) = match_upload(&path) {
            return gateway.files.upload(req, custom_path.as_deref()).await;
        }
    } else if method == Method::DELETE {
        if let Some(filename) = match_delete(&path) {
            return gateway.files.delete(&filename).await;
        }
    }

    json_response(StatusCode::NOT_FOUND, "not found", true)
}

async fn handle_execute(gateway: Arc<Gateway>, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(&CMError::InvalidRequest(format!(
                "error reading request body: {}",
                e
            )));
        }
    };

    let request: ExecutionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(&CMError::InvalidRequest(format!(
                "error unmarshaling JSON: {}",
                e
            )));
        }
    };

    let (kernel_id, session_id) = match gateway.api.ensure_session(None).await {
        Ok(ids) => ids,
        Err(e) => return error_response(&e),
    };

    match gateway
        .coordinator
        .execute(&kernel_id, &session_id, &request.code)
        .await
    {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(body) => json_response(StatusCode::OK, &body, false),
            Err(e) => error_response(&CMError::InvalidRequest(format!(
                "error marshaling JSON: {}",
                e
            ))),
        },
        Err(e) => error_response(&e),
    }
}

fn handle_health(gateway: Arc<Gateway>) -> Response<Body> {
    if gateway.health.is_healthy() {
        json_response(StatusCode::OK, "healthy", true)
    } else {
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "unhealthy exec code failed",
            true,
        )
    }
}

/// The initialization probe: re-read the credential from the environment and
/// verify the backend is reachable.
async fn handle_initialize(gateway: Arc<Gateway>) -> Response<Body> {
    let token = gateway.config.reload_token();
    match gateway.api.ensure_session(None).await {
        Ok(_) => json_response(
            StatusCode::OK,
            &format!("jupyter initialized with token: {}", token),
            true,
        ),
        Err(e) => error_response(&e),
    }
}

fn match_list_files(path: &str) -> Option<Option<String>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let regex = PATTERN
        .get_or_init(|| Regex::new(r"^/listfiles(?:/(.*))?$").expect("Invalid regex"));
    regex
        .captures(path)
        .map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}

fn match_upload(path: &str) -> Option<Option<String>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let regex =
        PATTERN.get_or_init(|| Regex::new(r"^/upload(?:/(.*))?$").expect("Invalid regex"));
    regex
        .captures(path)
        .map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}

fn match_download(path: &str) -> Option<(Option<String>, String)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let regex = PATTERN
        .get_or_init(|| Regex::new(r"^/download/(?:(.+)/)?([^/]+)$").expect("Invalid regex"));
    regex.captures(path).map(|caps| {
        (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        )
    })
}

fn match_delete(path: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let regex =
        PATTERN.get_or_init(|| Regex::new(r"^/delete/([^/]+)$").expect("Invalid regex"));
    regex
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn match_get_file(path: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let regex = PATTERN.get_or_init(|| Regex::new(r"^/get/([^/]+)$").expect("Invalid regex"));
    regex
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Bind the configured port and serve until the process exits. Bind failures
/// propagate to the caller, which treats them as fatal.
pub async fn create(gateway: Arc<Gateway>) -> Result<(), anyhow::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], gateway.config.port));
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

    log::info!(
        "Listening on {}{}",
        addr,
        if gateway.config.use_tls { " (TLS)" } else { "" }
    );

    create_with_listener(listener, gateway).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first.
pub async fn create_with_listener(
    listener: TcpListener,
    gateway: Arc<Gateway>,
) -> Result<(), anyhow::Error> {
    if gateway.config.use_tls {
        serve_tls(listener, gateway).await
    } else {
        serve_http(listener, gateway).await
    }
}

async fn serve_http(listener: TcpListener, gateway: Arc<Gateway>) -> Result<(), anyhow::Error> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let gateway = gateway.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(handle(gateway, req).await) }
            });
            if let Err(e) = Http::new().serve_connection(stream, service).await {
                log::debug!("Error serving connection: {}", e);
            }
        });
    }
}

async fn serve_tls(listener: TcpListener, gateway: Arc<Gateway>) -> Result<(), anyhow::Error> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    builder.set_private_key_file(&gateway.config.key_file, SslFiletype::PEM)?;
    builder.set_certificate_chain_file(&gateway.config.cert_file)?;
    builder.check_private_key()?;
    let acceptor = builder.build();

    loop {
        let (stream, _addr) = listener.accept().await?;
        let ssl = match Ssl::new(acceptor.context()) {
            Ok(ssl) => ssl,
            Err(e) => {
                log::error!("Failed to create TLS context for connection: {}", e);
                continue;
            }
        };

        let gateway = gateway.clone();
        tokio::task::spawn(async move {
            let mut tls = match tokio_openssl::SslStream::new(ssl, stream) {
                Ok(tls) => tls,
                Err(e) => {
                    log::error!("Failed to wrap connection in TLS: {}", e);
                    return;
                }
            };
            if let Err(e) = Pin::new(&mut tls).accept().await {
                log::debug!("TLS handshake failed: {}", e);
                return;
            }

            let service = service_fn(move |req| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(handle(gateway, req).await) }
            });
            if let Err(e) = Http::new().serve_connection(tls, service).await {
                log::debug!("Error serving TLS connection: {}", e);
            }
        });
    }
}
