//
// execution_result.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use serde::{Deserialize, Serialize};

/// The flat result returned to HTTP callers for one execution.
///
/// Field names are part of the outward compatibility contract and must not
/// change. `hresult` is zero on success; on failure it carries one of the
/// well-known error codes and the `error_*` fields are populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// Zero on success, a well-known error code otherwise
    pub hresult: i32,

    /// The parsed result value: a JSON boolean, number, string, or structured
    /// object, depending on what the kernel reported
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub error_name: String,

    #[serde(default)]
    pub error_message: String,

    #[serde(default)]
    pub error_stack_trace: String,

    /// Accumulated standard output, bounded by the gateway's output cap
    #[serde(default)]
    pub stdout: String,

    /// Accumulated standard error, bounded by the gateway's output cap
    #[serde(default)]
    pub stderr: String,

    #[serde(rename = "diagnosticInfo", default)]
    pub diagnostic_info: DiagnosticInfo,

    /// The approximate payload size in bytes; a transport hint, never
    /// serialized
    #[serde(skip)]
    pub approximate_size: usize,
}

/// Diagnostic information attached to every execution response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    /// Wall-clock execution duration in milliseconds
    #[serde(rename = "executionDuration")]
    pub execution_duration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_size_is_not_serialized() {
        let response = ExecutionResponse {
            hresult: 0,
            result: Some(serde_json::json!(2)),
            approximate_size: 42,
            ..Default::default()
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("approximateSize").is_none());
        assert!(value.get("approximate_size").is_none());
        assert_eq!(value["result"], serde_json::json!(2));
        assert_eq!(value["diagnosticInfo"]["executionDuration"], 0);
    }
}
