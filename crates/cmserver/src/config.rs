//
// config.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Process-level configuration for the gateway, combining command-line
//! arguments with the deployment's environment variables.

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

/// The shared credential forwarded to the Jupyter server when none is set in
/// the environment.
pub const DEFAULT_TOKEN: &str = "test";

/// Maximum accumulated length for each of stdout and stderr, in bytes.
pub const DEFAULT_MAX_OUTPUT_LEN: usize = 1024;

/// How long a single execution may run before the gateway gives up on it.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GatewayConfig {
    /// The port the inward HTTP listener binds to
    pub port: u16,

    /// The base URL of the Jupyter server
    pub jupyter_url: String,

    /// The directory staged files are read from and written to
    pub working_dir: PathBuf,

    /// Whether the inward listener terminates TLS
    pub use_tls: bool,

    /// TLS certificate chain (PEM), used when `use_tls` is set
    pub cert_file: PathBuf,

    /// TLS private key (PEM), used when `use_tls` is set
    pub key_file: PathBuf,

    /// Whether outgoing kernel messages carry an HMAC-SHA256 signature. The
    /// URL token is usually sufficient for the backend, so this is off by
    /// default.
    pub sign_messages: bool,

    /// Cap on each accumulated output stream
    pub max_output_len: usize,

    /// Per-execution deadline
    pub exec_timeout: Duration,

    /// The shared credential; also the HMAC key when signing is enabled. Kept
    /// behind a lock so the initialization endpoint can re-read it from the
    /// environment at runtime.
    pub token: RwLock<String>,
}

impl GatewayConfig {
    /// Build the configuration from command-line values plus the environment.
    pub fn from_env(port: u16, jupyter_url: &str, working_dir: &str, sign_messages: bool) -> Self {
        Self {
            port,
            jupyter_url: jupyter_url.trim_end_matches('/').to_string(),
            working_dir: PathBuf::from(working_dir),
            use_tls: env_flag("USE_TLS", false),
            cert_file: PathBuf::from(env_or(
                "XDS_CERT_FILE_PATH",
                "/etc/carme/certs/cert.pem",
            )),
            key_file: PathBuf::from(env_or(
                "XDS_CERT_KEY_FILE_PATH",
                "/etc/carme/certs/key.pem",
            )),
            sign_messages,
            max_output_len: DEFAULT_MAX_OUTPUT_LEN,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            token: RwLock::new(token_from_env()),
        }
    }

    /// The current shared credential.
    pub fn token(&self) -> String {
        self.token.read().unwrap().clone()
    }

    /// Re-read the credential from the environment, replacing the current
    /// one. Returns the new value.
    pub fn reload_token(&self) -> String {
        let token = token_from_env();
        *self.token.write().unwrap() = token.clone();
        token
    }
}

fn token_from_env() -> String {
    match std::env::var("JUPYTER_TOKEN") {
        Ok(token) if !token.is_empty() => token,
        _ => {
            log::info!(
                "Token not found in environment variable; using default token: {}",
                DEFAULT_TOKEN
            );
            DEFAULT_TOKEN.to_string()
        }
    }
}

pub(crate) fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "1"),
        Err(_) => default,
    }
}
