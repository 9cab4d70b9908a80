//
// aggregation.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Per-request aggregation of kernel reply fragments.
//!
//! Every in-flight execution owns one [`AggregationRecord`], keyed by the
//! `msg_id` of its `execute_request`. The channel's reader task is the only
//! mutator: it looks records up by `parent_header.msg_id`, applies each
//! inbound fragment, and on a terminal transition removes the record and
//! hands it to the waiting caller.

use std::collections::HashMap;
use std::sync::Mutex;

use cmshared::jupyter_message::JupyterMessage;
use tokio::sync::oneshot;

use crate::error::ExecErrorCode;
use crate::jupyter_messages::{ExecutionState, JupyterMsg};

/// A bounded output accumulator. Holds at most one byte past the cap and
/// remembers whether any fragment was cut, so truncation is detectable when
/// the string is finished.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: String,
    max_len: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: String::new(),
            max_len,
            truncated: false,
        }
    }

    /// Append a fragment, keeping the buffer within one byte of the cap.
    /// Fragments are cut on character boundaries so the buffer stays valid
    /// UTF-8.
    pub fn append(&mut self, text: &str) {
        if self.max_len == 0 {
            // no output is allowed
            return;
        }

        let capacity_left = (self.max_len + 1).saturating_sub(self.buf.len());
        if capacity_left == 0 {
            if !text.is_empty() {
                self.truncated = true;
            }
            return;
        }

        if text.len() <= capacity_left {
            self.buf.push_str(text);
        } else {
            let mut end = capacity_left;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            self.buf.push_str(&text[..end]);
            self.truncated = true;
        }
    }

    /// The accumulated output, trimmed to the cap with a trailing `...` if
    /// anything was discarded.
    pub fn finish(&self) -> String {
        if !self.truncated && self.buf.len() <= self.max_len {
            return self.buf.clone();
        }

        // Leave room for the ellipsis unless the cap is too small to carry one
        let ellipsis = self.max_len >= 3;
        let mut end = if ellipsis {
            self.max_len - 3
        } else {
            self.max_len
        };
        end = end.min(self.buf.len());
        while end > 0 && !self.buf.is_char_boundary(end) {
            end -= 1;
        }

        let mut out = self.buf[..end].to_string();
        if ellipsis {
            out.push_str("...");
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The error reported by the kernel for a failed execution.
#[derive(Debug, Clone, Default)]
pub struct ExecError {
    pub name: String,
    pub message: String,
    pub traceback: String,
}

/// The result payload reported by the kernel. Exactly one representation
/// survives aggregation; an image supersedes any textual payload, and a rich
/// (officepy) payload supersedes plain text.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    None,
    /// A `text/plain` representation, subject to literal parsing
    Text(String),
    /// A `text/officepy` representation, passed through as raw JSON
    Rich(String),
    /// A base64-encoded PNG from `display_data`
    Image(String),
}

/// The aggregation state for one in-flight execution.
pub struct AggregationRecord {
    pub request_id: String,
    pub payload: ResultPayload,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
    pub error: Option<ExecError>,
    pub code: ExecErrorCode,
    pub success: bool,
    pub terminal: bool,
}

impl AggregationRecord {
    pub fn new(request_id: String, max_output_len: usize) -> Self {
        Self {
            request_id,
            payload: ResultPayload::None,
            stdout: OutputBuffer::new(max_output_len),
            stderr: OutputBuffer::new(max_output_len),
            error: None,
            code: ExecErrorCode::Success,
            success: false,
            terminal: false,
        }
    }

    /// Apply one inbound fragment to this record. Returns after updating the
    /// terminal flag; the caller decides what to do with a finished record.
    pub fn apply(&mut self, msg: &JupyterMsg) {
        match msg {
            JupyterMsg::Stream(content) => {
                if content.name.is_empty() || content.text.is_empty() {
                    return;
                }
                if content.name == "stdout" {
                    self.stdout.append(&content.text);
                } else if content.name == "stderr" {
                    self.stderr.append(&content.text);
                }
            }
            JupyterMsg::ExecuteResult(content) => {
                // An image reported earlier wins over any textual result
                if !matches!(self.payload, ResultPayload::Image(_)) {
                    if let Some(officepy) = content
                        .data
                        .text_officepy
                        .as_ref()
                        .filter(|s| !s.is_empty())
                    {
                        self.payload = ResultPayload::Rich(officepy.clone());
                    } else if let Some(plain) =
                        content.data.text_plain.as_ref().filter(|s| !s.is_empty())
                    {
                        self.payload = ResultPayload::Text(plain.clone());
                    }
                }
                self.success = true;
                // Not terminal: a display_data or the idle status may follow
            }
            JupyterMsg::DisplayData(content) => {
                if let Some(image) = content.data.image_png.as_ref().filter(|s| !s.is_empty()) {
                    let image = image.strip_suffix('\n').unwrap_or(image);
                    self.payload = ResultPayload::Image(image.to_string());
                }
            }
            JupyterMsg::Error(content) => {
                let mut traceback = String::new();
                for line in &content.traceback {
                    if !line.is_empty() {
                        traceback.push_str(line);
                        traceback.push('\n');
                    }
                }
                self.fail(
                    ExecErrorCode::Generic,
                    Some(ExecError {
                        name: content.ename.clone(),
                        message: content.evalue.clone(),
                        traceback,
                    }),
                );
            }
            JupyterMsg::ExecuteReply(content) => {
                if content.status == "aborted" {
                    self.fail(ExecErrorCode::ExecutionAborted, None);
                }
            }
            JupyterMsg::Status(content) => {
                // A restart is handled at the map level; only the idle
                // transition matters per record
                if content.execution_state == ExecutionState::Idle && !self.terminal {
                    self.success = true;
                    self.terminal = true;
                }
            }
            JupyterMsg::Other => {}
        }
    }

    /// Mark the record as failed and terminal.
    pub fn fail(&mut self, code: ExecErrorCode, error: Option<ExecError>) {
        if let Some(error) = error {
            self.error = Some(error);
        }
        self.code = code;
        self.success = false;
        self.terminal = true;
    }
}

struct PendingExecution {
    record: AggregationRecord,
    waiter: oneshot::Sender<AggregationRecord>,
}

/// The set of in-flight executions on one kernel channel.
///
/// Senders insert records before transmitting their request; the channel's
/// reader task performs all lookups, mutations, and removals. Removal and
/// waiter delivery happen under the same lock acquisition, so a request id is
/// never observable in both the map and a delivered record.
pub struct InflightMap {
    inner: Mutex<HashMap<String, PendingExecution>>,
}

impl InflightMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new in-flight execution under its request id.
    pub fn register(&self, record: AggregationRecord, waiter: oneshot::Sender<AggregationRecord>) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(record.request_id.clone(), PendingExecution { record, waiter });
    }

    /// Abandon an in-flight execution (e.g. after a local timeout). Any
    /// further fragments for this id are dropped.
    pub fn remove(&self, request_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one inbound message to the record it belongs to. A kernel
    /// restart terminates every pending record before any later frame is
    /// seen; messages without a matching record are dropped.
    pub fn dispatch(&self, msg: &JupyterMessage) {
        let typed = JupyterMsg::from(msg);

        if let JupyterMsg::Status(status) = &typed {
            if status.execution_state == ExecutionState::Restarting {
                log::warn!("Kernel is restarting; aborting all in-flight executions");
                self.abort_all(ExecErrorCode::KernelRestarted);
                return;
            }
        }

        let parent_id = match msg.parent_msg_id() {
            Some(id) => id.to_string(),
            None => return,
        };

        let mut inner = self.inner.lock().unwrap();
        let pending = match inner.get_mut(&parent_id) {
            Some(pending) => pending,
            None => {
                log::trace!(
                    "Dropping {} message for unknown request {}",
                    msg.header.msg_type,
                    parent_id
                );
                return;
            }
        };

        pending.record.apply(&typed);

        if pending.record.terminal {
            let pending = inner.remove(&parent_id).unwrap();
            // The waiter may have timed out and gone away; late results are
            // dropped silently
            let _ = pending.waiter.send(pending.record);
        }
    }

    /// Terminate every pending record with the given code and deliver each to
    /// its waiter. Used for kernel restarts and channel teardown.
    pub fn abort_all(&self, code: ExecErrorCode) {
        let mut inner = self.inner.lock().unwrap();
        for (_, mut pending) in inner.drain() {
            pending.record.fail(code, None);
            let _ = pending.waiter.send(pending.record);
        }
    }
}

impl Default for InflightMap {
    fn default() -> Self {
        Self::new()
    }
}
