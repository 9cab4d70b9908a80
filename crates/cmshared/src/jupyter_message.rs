//
// jupyter_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use serde::{Deserialize, Serialize};

/// The Jupyter messaging protocol version stamped on outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// The header of a Jupyter message.
///
/// Incoming headers may carry additional fields (such as `date`); they are
/// ignored. Outgoing headers are fully populated by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupyterMessageHeader {
    /// The message ID
    pub msg_id: String,
    /// The name of the user that sent the message
    #[serde(default)]
    pub username: String,
    /// The messaging session the message belongs to
    #[serde(default)]
    pub session: String,
    /// The type of the message
    pub msg_type: String,
    /// The protocol version
    #[serde(default)]
    pub version: String,
}

/// A Jupyter message as it travels over the kernel's WebSocket channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupyterMessage {
    /// The header of the message
    pub header: JupyterMessageHeader,

    /// The header of the message's parent (the message that caused this
    /// message); serialized as an empty object on originating messages
    #[serde(with = "parent_header", default)]
    pub parent_header: Option<JupyterMessageHeader>,

    /// Additional metadata
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,

    /// The message payload; its schema depends on the message type
    pub content: serde_json::Value,

    /// The message buffers (unused by the gateway, but part of the envelope)
    #[serde(default)]
    pub buffers: Vec<serde_json::Value>,

    /// The HMAC signature over the canonical message parts, when signing is
    /// enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl JupyterMessage {
    /// The correlation key: the `msg_id` of the request that caused this
    /// message, if any.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// The wire protocol represents "no parent" as an empty JSON object rather
/// than `null`, so `Option<JupyterMessageHeader>` needs custom handling in
/// both directions.
mod parent_header {
    use super::JupyterMessageHeader;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(
        value: &Option<JupyterMessageHeader>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(header) => header.serialize(serializer),
            None => serde_json::Map::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<JupyterMessageHeader>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // An empty or partial object (no msg_id) means no parent
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_originating_message_has_empty_parent_header() {
        let msg = JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: String::from("abc"),
                username: String::from("carme"),
                session: String::from("s1"),
                msg_type: String::from("execute_request"),
                version: String::from(PROTOCOL_VERSION),
            },
            parent_header: None,
            metadata: serde_json::json!({}),
            content: serde_json::json!({"code": "1+1"}),
            buffers: vec![],
            signature: None,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["parent_header"], serde_json::json!({}));
        assert!(value.get("signature").is_none());
    }

    #[test]
    fn test_reply_parent_header_round_trip() {
        let raw = serde_json::json!({
            "header": {
                "msg_id": "reply-1",
                "username": "kernel",
                "session": "k1",
                "msg_type": "stream",
                "version": "5.3",
                "date": "2025-01-01T00:00:00Z"
            },
            "parent_header": {
                "msg_id": "req-1",
                "username": "carme",
                "session": "s1",
                "msg_type": "execute_request",
                "version": "5.3"
            },
            "metadata": {},
            "content": {"name": "stdout", "text": "hi"}
        });

        let msg: JupyterMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.parent_msg_id(), Some("req-1"));
        assert_eq!(msg.header.msg_type, "stream");
        assert!(msg.buffers.is_empty());
    }

    #[test]
    fn test_empty_parent_header_decodes_as_none() {
        let raw = serde_json::json!({
            "header": {"msg_id": "m1", "msg_type": "status"},
            "parent_header": {},
            "metadata": {},
            "content": {"execution_state": "starting"}
        });

        let msg: JupyterMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.parent_header.is_none());
        assert!(msg.parent_msg_id().is_none());
    }
}
