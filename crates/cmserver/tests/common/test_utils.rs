//
// test_utils.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cmserver::config::GatewayConfig;
use cmserver::server::{self, Gateway};
use tokio::net::TcpListener;

/// A gateway listening on an ephemeral port, wired to a (mock) Jupyter
/// server.
pub struct TestGateway {
    pub base_url: String,
    _working_dir: tempfile::TempDir,
}

pub async fn start_gateway(jupyter_url: &str) -> TestGateway {
    start_gateway_with_timeout(jupyter_url, Duration::from_secs(5)).await
}

pub async fn start_gateway_with_timeout(jupyter_url: &str, timeout: Duration) -> TestGateway {
    let working_dir = tempfile::tempdir().expect("Failed to create working dir");

    let config = Arc::new(GatewayConfig {
        port: 0,
        jupyter_url: jupyter_url.trim_end_matches('/').to_string(),
        working_dir: working_dir.path().to_path_buf(),
        use_tls: false,
        cert_file: PathBuf::from("/nonexistent/cert.pem"),
        key_file: PathBuf::from("/nonexistent/key.pem"),
        sign_messages: false,
        max_output_len: 1024,
        exec_timeout: timeout,
        token: RwLock::new(String::from("test")),
    });

    let gateway = Arc::new(Gateway::new(config).expect("Failed to build gateway"));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind gateway listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        let _ = server::create_with_listener(listener, gateway).await;
    });

    TestGateway {
        base_url: format!("http://127.0.0.1:{}", addr.port()),
        _working_dir: working_dir,
    }
}

/// POST code to `/execute` and return the parsed response body.
pub async fn execute(base_url: &str, code: &str) -> serde_json::Value {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/execute", base_url))
        .json(&serde_json::json!({ "code": code }))
        .send()
        .await
        .expect("Failed to POST /execute");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json().await.expect("Failed to parse response body")
}
