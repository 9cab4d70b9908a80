//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

#![allow(dead_code)]

//! A mock Jupyter server for integration tests: serves the kernel/session
//! REST surface and a scripted kernel behind the channels websocket.

pub mod test_utils;

use std::convert::Infallible;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use hyper::header::{HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

pub const MOCK_KERNEL_ID: &str = "kernel-mock-1";
pub const MOCK_SESSION_ID: &str = "session-mock-1";

pub struct MockJupyter {
    pub base_url: String,
    pub kernel_id: String,
}

impl MockJupyter {
    /// Start a mock server that reports one idle kernel with one session.
    pub async fn start() -> Self {
        Self::start_with_kernels(true).await
    }

    /// Start a mock server with no kernels; the gateway has to create a
    /// session to get one.
    pub async fn start_empty() -> Self {
        Self::start_with_kernels(false).await
    }

    async fn start_with_kernels(has_kernels: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local address");
        let has_kernels = Arc::new(has_kernels);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                let has_kernels = has_kernels.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let has_kernels = has_kernels.clone();
                        async move { Ok::<_, Infallible>(handle_request(req, *has_kernels)) }
                    });
                    let _ = Http::new()
                        .serve_connection(stream, service)
                        .with_upgrades()
                        .await;
                });
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            kernel_id: String::from(MOCK_KERNEL_ID),
        }
    }
}

fn handle_request(req: Request<Body>, has_kernels: bool) -> Response<Body> {
    let path = req.uri().path().to_string();

    if req.method() == Method::GET && path.starts_with("/api/kernels/") && path.ends_with("/channels")
    {
        return websocket_upgrade(req);
    }

    match (req.method(), path.as_str()) {
        (&Method::GET, "/api/kernels") => {
            let kernels = if has_kernels {
                json!([{
                    "id": MOCK_KERNEL_ID,
                    "name": "python3",
                    "last_activity": "2025-01-01T00:00:00Z",
                    "execution_state": "idle",
                    "connections": 1
                }])
            } else {
                json!([])
            };
            json_body(StatusCode::OK, kernels)
        }
        (&Method::GET, "/api/sessions") => json_body(StatusCode::OK, json!([mock_session()])),
        (&Method::POST, "/api/sessions") => json_body(StatusCode::CREATED, mock_session()),
        _ => json_body(StatusCode::NOT_FOUND, json!({"message": "not found"})),
    }
}

fn mock_session() -> serde_json::Value {
    json!({
        "id": MOCK_SESSION_ID,
        "path": "Untitled.ipynb",
        "name": "",
        "type": "notebook",
        "kernel": {
            "id": MOCK_KERNEL_ID,
            "name": "python3",
            "execution_state": "idle"
        },
        "notebook": {"path": "Untitled.ipynb", "name": ""}
    })
}

fn json_body(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("Unable to create mock response")
}

fn websocket_upgrade(mut req: Request<Body>) -> Response<Body> {
    let derived = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()));
    let version = req.version();

    tokio::task::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let stream = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                mock_kernel(stream).await;
            }
            Err(e) => {
                eprintln!("Mock kernel failed to upgrade connection: {}", e);
            }
        }
    });

    let mut response = Response::new(Body::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.version_mut() = version;
    response
        .headers_mut()
        .append(CONNECTION, HeaderValue::from_static("Upgrade"));
    response
        .headers_mut()
        .append(UPGRADE, HeaderValue::from_static("websocket"));
    response.headers_mut().append(
        SEC_WEBSOCKET_ACCEPT,
        derived.expect("Missing websocket key").parse().unwrap(),
    );
    response
}

/// The scripted kernel: reads execute requests and replies with a frame
/// sequence keyed off the submitted code.
async fn mock_kernel(mut ws_stream: WebSocketStream<Upgraded>) {
    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(data) => {
                let request: serde_json::Value = match serde_json::from_str(&data) {
                    Ok(request) => request,
                    Err(_) => continue,
                };
                if request["header"]["msg_type"] != "execute_request" {
                    continue;
                }
                let parent = request["header"].clone();
                let code = request["content"]["code"].as_str().unwrap_or("").to_string();
                for frame in script_for(&parent, &code) {
                    if ws_stream.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
            }
            Message::Ping(data) => {
                let _ = ws_stream.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// The reply sequence for one execute request.
fn script_for(parent: &serde_json::Value, code: &str) -> Vec<String> {
    let mut frames = vec![status_frame(Some(parent), "busy")];

    // Runs forever; the gateway's local timeout has to fire
    if code.contains("while True") {
        return frames;
    }

    if code == "restart-now" {
        return vec![status_frame(None, "restarting")];
    }

    if code == "abort-me" {
        frames.push(frame(parent, "execute_reply", json!({"status": "aborted"})));
        return frames;
    }

    if code.contains("raise ValueError") {
        frames.push(frame(
            parent,
            "error",
            json!({
                "ename": "ValueError",
                "evalue": "x",
                "traceback": ["Traceback (most recent call last):", "ValueError: x"]
            }),
        ));
        return frames;
    }

    if code.contains("Hello Earth") {
        frames.push(frame(
            parent,
            "stream",
            json!({"name": "stdout", "text": "Hello Earth\n"}),
        ));
    } else if code == "1+1" {
        frames.push(frame(
            parent,
            "execute_result",
            json!({"data": {"text/plain": "2"}, "execution_count": 1}),
        ));
    } else if code == "make-image" {
        frames.push(frame(
            parent,
            "execute_result",
            json!({"data": {"text/plain": "<Figure size 640x480>"}}),
        ));
        frames.push(frame(
            parent,
            "display_data",
            json!({"data": {"image/png": "aGVsbG8=\n"}}),
        ));
    } else if code == "rich-result" {
        frames.push(frame(
            parent,
            "execute_result",
            json!({"data": {
                "text/plain": "fallback",
                "text/officepy": "{\"value\": 42}"
            }}),
        ));
    } else if code == "stray-frame" {
        // A frame for a request nobody is waiting on, then the real result
        frames.insert(
            0,
            frame_with_parent_id("deadbeef", "stream", json!({"name": "stdout", "text": "not yours"})),
        );
        frames.push(frame(
            parent,
            "execute_result",
            json!({"data": {"text/plain": "7"}}),
        ));
    } else if code == "stderr-output" {
        frames.push(frame(
            parent,
            "stream",
            json!({"name": "stderr", "text": "warning: x\n"}),
        ));
    }

    frames.push(status_frame(Some(parent), "idle"));
    frames
}

fn frame(parent: &serde_json::Value, msg_type: &str, content: serde_json::Value) -> String {
    json!({
        "header": {
            "msg_id": Uuid::new_v4().to_string(),
            "username": "kernel",
            "session": "mock-kernel-session",
            "msg_type": msg_type,
            "version": "5.3"
        },
        "parent_header": parent,
        "metadata": {},
        "content": content,
        "buffers": []
    })
    .to_string()
}

fn frame_with_parent_id(parent_id: &str, msg_type: &str, content: serde_json::Value) -> String {
    let parent = json!({
        "msg_id": parent_id,
        "username": "carme",
        "session": "unknown",
        "msg_type": "execute_request",
        "version": "5.3"
    });
    frame(&parent, msg_type, content)
}

fn status_frame(parent: Option<&serde_json::Value>, state: &str) -> String {
    match parent {
        Some(parent) => frame(parent, "status", json!({"execution_state": state})),
        None => json!({
            "header": {
                "msg_id": Uuid::new_v4().to_string(),
                "username": "kernel",
                "session": "mock-kernel-session",
                "msg_type": "status",
                "version": "5.3"
            },
            "parent_header": {},
            "metadata": {},
            "content": {"execution_state": state},
            "buffers": []
        })
        .to_string(),
    }
}
