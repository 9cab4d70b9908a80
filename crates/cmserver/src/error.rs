//
// error.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use log::error;

/// The outcome class of a finished execution. The numeric codes surfaced to
/// callers are part of the outward compatibility contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorCode {
    /// The execution completed normally
    Success,

    /// The kernel reported an error, or the channel failed mid-execution
    Generic,

    /// The kernel restarted while the execution was in flight
    KernelRestarted,

    /// The kernel aborted the execution before running it
    ExecutionAborted,

    /// The local deadline expired before the kernel finished
    Timeout,
}

impl ExecErrorCode {
    /// Map this code to the caller-visible `hresult`. Generic errors are
    /// subdivided by the reported error name: a `KeyboardInterrupt` is
    /// surfaced as a timeout, and unnamed errors get their own code.
    pub fn hresult(&self, error_name: &str) -> i32 {
        match self {
            ExecErrorCode::Success => 0,
            ExecErrorCode::Timeout => -2147205110,
            ExecErrorCode::KernelRestarted => -2147205111,
            ExecErrorCode::ExecutionAborted => -2147205113,
            ExecErrorCode::Generic => {
                if error_name == "KeyboardInterrupt" {
                    -2147205110
                } else if error_name.is_empty() {
                    -2147205117
                } else {
                    -2147205116
                }
            }
        }
    }
}

/// Gateway-level errors: failures that surface to HTTP callers as a 500
/// rather than as an execution result.
pub enum CMError {
    /// The Jupyter server could not be reached
    BackendUnavailable(String),

    /// The request body could not be read or parsed
    InvalidRequest(String),

    /// The kernel channel failed before the request could be sent
    ChannelClosed(String),
}

impl fmt::Display for CMError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error CM-{}: ", self.discriminant())?;
        match self {
            CMError::BackendUnavailable(details) => {
                write!(f, "Jupyter server unavailable: {}", details)
            }
            CMError::InvalidRequest(details) => {
                write!(f, "Invalid request: {}", details)
            }
            CMError::ChannelClosed(details) => {
                write!(f, "Kernel channel closed: {}", details)
            }
        }
    }
}

impl CMError {
    #[allow(unsafe_code, trivial_casts)]
    fn discriminant(&self) -> u8 {
        unsafe { *(self as *const Self as *const u8) }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.to_string() })
    }

    pub fn log(&self) {
        error!("{}", self.to_string());
    }
}
