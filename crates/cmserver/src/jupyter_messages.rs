//
// jupyter_messages.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use cmshared::jupyter_message::{JupyterMessage, JupyterMessageHeader, PROTOCOL_VERSION};
use serde::Deserialize;
use uuid::Uuid;

/// An enum of message types we know how to handle from Jupyter. This is in no
/// way exhaustive; it just includes the types the execution engine cares
/// about.
pub enum JupyterMsg {
    Stream(StreamContent),
    ExecuteResult(ExecuteResultContent),
    DisplayData(DisplayDataContent),
    Error(ErrorContent),
    Status(StatusContent),
    ExecuteReply(ExecuteReplyContent),
    Other,
}

/// Convert a JupyterMessage (generic type) into a JupyterMsg (specific type)
impl From<&JupyterMessage> for JupyterMsg {
    fn from(msg: &JupyterMessage) -> Self {
        let content = msg.content.clone();
        match msg.header.msg_type.as_str() {
            "stream" => match serde_json::from_value::<StreamContent>(content) {
                Ok(content) => JupyterMsg::Stream(content),
                Err(_) => JupyterMsg::Other,
            },
            "execute_result" => match serde_json::from_value::<ExecuteResultContent>(content) {
                Ok(content) => JupyterMsg::ExecuteResult(content),
                Err(_) => JupyterMsg::Other,
            },
            "display_data" => match serde_json::from_value::<DisplayDataContent>(content) {
                Ok(content) => JupyterMsg::DisplayData(content),
                Err(_) => JupyterMsg::Other,
            },
            "error" => match serde_json::from_value::<ErrorContent>(content) {
                Ok(content) => JupyterMsg::Error(content),
                Err(_) => JupyterMsg::Other,
            },
            "status" => match serde_json::from_value::<StatusContent>(content) {
                Ok(content) => JupyterMsg::Status(content),
                Err(_) => JupyterMsg::Other,
            },
            "execute_reply" => match serde_json::from_value::<ExecuteReplyContent>(content) {
                Ok(content) => JupyterMsg::ExecuteReply(content),
                Err(_) => JupyterMsg::Other,
            },
            _ => JupyterMsg::Other,
        }
    }
}

/// A fragment of kernel output on stdout or stderr.
#[derive(Deserialize)]
pub struct StreamContent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
}

/// The MIME bundle carried by `execute_result` and `display_data` messages.
/// Only the representations the gateway forwards are modeled.
#[derive(Deserialize, Default)]
pub struct MessageData {
    #[serde(rename = "text/plain", default)]
    pub text_plain: Option<String>,

    #[serde(rename = "text/officepy", default)]
    pub text_officepy: Option<String>,

    #[serde(rename = "image/png", default)]
    pub image_png: Option<String>,
}

#[derive(Deserialize)]
pub struct ExecuteResultContent {
    #[serde(default)]
    pub data: MessageData,
}

#[derive(Deserialize)]
pub struct DisplayDataContent {
    #[serde(default)]
    pub data: MessageData,
}

#[derive(Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    Restarting,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}

#[derive(Deserialize)]
pub struct ExecuteReplyContent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub execution_count: Option<i64>,
}

/// Build an `execute_request` envelope for the given code.
///
/// The header carries a fresh message ID (the correlation key echoed back on
/// every reply) and a freshly generated session ID, which is what the backend
/// expects from transient gateway clients.
pub fn execute_request(code: &str) -> JupyterMessage {
    JupyterMessage {
        header: JupyterMessageHeader {
            msg_id: Uuid::new_v4().to_string(),
            username: String::from("carme"),
            session: Uuid::new_v4().to_string(),
            msg_type: String::from("execute_request"),
            version: String::from(PROTOCOL_VERSION),
        },
        parent_header: None,
        metadata: serde_json::json!({}),
        content: serde_json::json!({
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": false,
        }),
        buffers: vec![],
        signature: None,
    }
}
