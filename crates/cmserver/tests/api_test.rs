//
// api_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//

//! Tests for the gateway's HTTP surface outside the execution happy path.

#[path = "common/mod.rs"]
mod common;

use common::test_utils::{execute, start_gateway};
use common::MockJupyter;

#[tokio::test]
async fn test_health_reports_unhealthy_before_first_probe() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;

    let response = reqwest::get(format!("{}/health", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "unhealthy exec code failed");
}

#[tokio::test]
async fn test_execute_with_invalid_body_is_an_http_error() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/execute", gateway.base_url))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("unmarshaling"));
}

#[tokio::test]
async fn test_execute_against_unreachable_backend_is_an_http_error() {
    // Nothing is listening on this port
    let gateway = start_gateway("http://127.0.0.1:1").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/execute", gateway.base_url))
        .json(&serde_json::json!({"code": "1+1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;

    let response = reqwest::get(format!("{}/definitely-not-a-route", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_is_created_when_backend_has_no_kernels() {
    let mock = MockJupyter::start_empty().await;
    let gateway = start_gateway(&mock.base_url).await;

    let response = execute(&gateway.base_url, "1+1").await;
    assert_eq!(response["hresult"], 0);
    assert_eq!(response["result"], 2);
}

#[tokio::test]
async fn test_initialize_endpoint_probes_the_backend() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;

    let response = reqwest::get(format!("{}/", gateway.base_url)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("jupyter initialized with token:"));
}

#[tokio::test]
async fn test_file_staging_round_trip_over_http() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;
    let client = reqwest::Client::new();

    // Upload
    let boundary = "------------------------carme-test";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\nContent-Type: text/plain\r\n\r\nstaged content\r\n--{b}--\r\n",
        b = boundary
    );
    let response = client
        .post(format!("{}/upload", gateway.base_url))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let uploaded: serde_json::Value = response.json().await.unwrap();
    assert_eq!(uploaded[0]["filename"], "notes.txt");

    // List
    let response = reqwest::get(format!("{}/listfiles", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let listed: serde_json::Value = response.json().await.unwrap();
    let names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"notes.txt"));

    // Download
    let response = reqwest::get(format!("{}/download/notes.txt", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "staged content");

    // Metadata
    let response = reqwest::get(format!("{}/get/notes.txt", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let metadata: serde_json::Value = response.json().await.unwrap();
    assert_eq!(metadata["size"], 14);
    assert_eq!(metadata["mime_type"], "text/plain");

    // Delete
    let response = client
        .delete(format!("{}/delete/notes.txt", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = reqwest::get(format!("{}/download/notes.txt", gateway.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let mock = MockJupyter::start().await;
    let gateway = start_gateway(&mock.base_url).await;

    // Traversal components are cleaned away and the path never escapes the
    // working directory, so this is a plain not-found rather than a leak
    let response = reqwest::get(format!(
        "{}/listfiles/%2e%2e/%2e%2e/etc",
        gateway.base_url
    ))
    .await
    .unwrap();
    assert_ne!(response.status(), reqwest::StatusCode::OK);
}
