//
// kernel_info.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use serde::{Deserialize, Serialize};

/// A kernel as described by the Jupyter server's REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kernel {
    /// The kernel's opaque identifier
    pub id: String,

    /// The kernel's human-readable name (e.g. `python3`)
    #[serde(default)]
    pub name: String,

    /// The timestamp of the kernel's last activity
    #[serde(default)]
    pub last_activity: String,

    /// The kernel's execution state (`starting`, `idle`, `busy`, ...)
    #[serde(default)]
    pub execution_state: String,

    /// The number of connections to the kernel
    #[serde(default)]
    pub connections: i64,
}

/// The notebook a session is bound to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
}

/// A session as described by the Jupyter server's REST API. Sessions bind a
/// kernel to a notebook path and are the unit the gateway reuses across
/// executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The session's opaque identifier
    pub id: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub session_type: String,

    /// The kernel bound to this session
    pub kernel: Kernel,

    #[serde(default)]
    pub notebook: Notebook,
}

/// The body of a session-creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRequest {
    pub path: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub kernel: KernelSpec,
}

/// The kernel specification inside a session-creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
}

impl NewSessionRequest {
    /// A notebook session backed by the named kernel, rooted at the server's
    /// default path.
    pub fn notebook(kernel_name: &str) -> Self {
        Self {
            path: String::new(),
            session_type: String::from("notebook"),
            kernel: KernelSpec {
                name: String::from(kernel_name),
            },
        }
    }
}
