//
// result_shaper.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Shapes an aggregated kernel record into the flat outward response,
//! including literal parsing of plain-text scalar outputs and error-code
//! mapping.

use std::sync::OnceLock;
use std::time::Instant;

use cmshared::execution_result::{DiagnosticInfo, ExecutionResponse};
use regex::Regex;

use crate::aggregation::{AggregationRecord, ExecError, ResultPayload};
use crate::error::ExecErrorCode;

/// Build the outward response for a finished record.
pub fn shape(record: AggregationRecord, started: Instant) -> ExecutionResponse {
    let stdout = record.stdout.finish();
    let stderr = record.stderr.finish();

    let mut response = ExecutionResponse::default();
    let mut payload_size = 0;

    if record.success && record.code == ExecErrorCode::Success {
        match &record.payload {
            ResultPayload::Rich(text) => {
                payload_size = text.len();
                // The officepy payload is already JSON; pass it through
                response.result = Some(match serde_json::from_str(text) {
                    Ok(value) => value,
                    Err(_) => serde_json::Value::String(text.clone()),
                });
            }
            ResultPayload::Text(text) => {
                payload_size = text.len();
                response.result = Some(parse_python_literal(text));
            }
            ResultPayload::Image(base64_data) => {
                payload_size = base64_data.len();
                response.result = Some(officepy_image_result(base64_data));
            }
            ResultPayload::None => {
                response.result = None;
            }
        }
    } else {
        let error = record.error.unwrap_or_default();
        // The hresult is derived from the error name as reported, before any
        // relabeling below
        response.hresult = record.code.hresult(&error.name);
        response.error_name = error.name;
        response.error_message = error.message;
        response.error_stack_trace = error.traceback;

        if response.error_name == "SyntaxError" {
            response.error_message = strip_file_from_syntax_error(&response.error_message);
        } else if response.error_name == "KeyboardInterrupt" {
            response.error_name = String::from("Timeout");
            response.error_message = String::from("Timeout");
        } else if response.error_name == "ProxyError" {
            // Passed through unchanged
            log::debug!("Proxy error reported by kernel");
        }
    }

    response.approximate_size = payload_size + stdout.len() + stderr.len();
    response.stdout = stdout;
    response.stderr = stderr;
    response.diagnostic_info = DiagnosticInfo {
        execution_duration: started.elapsed().as_millis() as u64,
    };
    response
}

/// The synthetic response for a locally expired deadline.
pub fn timeout_response(request_id: String, started: Instant) -> ExecutionResponse {
    let mut record = AggregationRecord::new(request_id, 0);
    record.fail(
        ExecErrorCode::Timeout,
        Some(ExecError {
            name: String::from("Timeout"),
            message: String::from("No response received"),
            traceback: String::new(),
        }),
    );
    shape(record, started)
}

/// Parse a plain-text kernel output as a Python literal where possible:
/// `True`/`False`, decimal integers, floats, and quoted strings map to the
/// corresponding JSON values; anything else is emitted as a JSON string.
pub(crate) fn parse_python_literal(text: &str) -> serde_json::Value {
    if text == "True" {
        return serde_json::Value::Bool(true);
    }
    if text == "False" {
        return serde_json::Value::Bool(false);
    }
    if let Ok(value) = text.parse::<i64>() {
        return serde_json::Value::from(value);
    }
    if let Ok(value) = text.parse::<f64>() {
        // Non-finite floats have no JSON representation and fall through
        if let Some(number) = serde_json::Number::from_f64(value) {
            return serde_json::Value::Number(number);
        }
    }
    if let Some(value) = parse_string_literal(text) {
        return serde_json::Value::String(value);
    }
    serde_json::Value::String(text.to_string())
}

/// Unquote a Python string literal, handling the simple escape sequences.
/// Returns `None` when the text is not a well-formed literal.
fn parse_string_literal(literal: &str) -> Option<String> {
    let chars: Vec<char> = literal.chars().collect();
    if chars.len() < 2 {
        return None;
    }

    let quote = chars[0];
    if (quote != '\'' && quote != '"') || chars[chars.len() - 1] != quote {
        return None;
    }

    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() - 1 {
        let ch = chars[i];
        if ch != '\\' {
            value.push(ch);
            i += 1;
            continue;
        }

        i += 1;
        if i >= chars.len() - 1 {
            // A lone trailing backslash is not a valid literal
            return None;
        }
        value.push(match chars[i] {
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            _ => return None,
        });
        i += 1;
    }
    Some(value)
}

/// Reduce the `(filename, line N)` location suffix in a SyntaxError message
/// to just `(N)`.
pub(crate) fn strip_file_from_syntax_error(message: &str) -> String {
    if message.is_empty() {
        return String::new();
    }
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    let regex = LOCATION
        .get_or_init(|| Regex::new(r"\([^()]*\bline\s+(\d+)\)").expect("Invalid regex"));
    regex.replace_all(message, "($1)").to_string()
}

/// Wrap a base64 PNG in the rich result object callers expect for images.
fn officepy_image_result(base64_data: &str) -> serde_json::Value {
    serde_json::json!({
        "officepy_result": {
            "type": "image",
            "format": "png",
            "base64_data": base64_data,
        }
    })
}
