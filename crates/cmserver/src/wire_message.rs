//
// wire_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Encoding and decoding of Jupyter messages on the kernel's WebSocket
//! channel. Frames are UTF-8 JSON envelopes; outgoing envelopes may carry an
//! HMAC-SHA256 signature computed over the four canonical message parts.

use cmshared::jupyter_message::JupyterMessage;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Serialize a Jupyter message to a channel frame. When an HMAC key is
/// supplied, the signature over the canonical parts is attached to the
/// envelope; otherwise the frame is sent unsigned (the URL token
/// authenticates the connection).
pub fn encode(msg: &JupyterMessage, hmac_key: Option<&str>) -> Result<String, anyhow::Error> {
    let mut msg = msg.clone();
    if let Some(key) = hmac_key {
        msg.signature = Some(sign(&msg, key)?);
    }
    Ok(serde_json::to_string(&msg)?)
}

/// Parse a channel frame into a Jupyter message. Fails if the frame is not a
/// well-formed envelope (in particular, if `header.msg_type` is missing).
/// Unknown message types decode successfully; their content is passed through
/// untyped.
pub fn decode(data: &str) -> Result<JupyterMessage, anyhow::Error> {
    serde_json::from_str(data).map_err(|e| anyhow::anyhow!("malformed kernel message: {}", e))
}

/// Compute the hex HMAC-SHA256 signature over the message's canonical parts,
/// in the fixed order header, parent header, metadata, content. Each part is
/// fed to the digest as its JSON encoding.
pub fn sign(msg: &JupyterMessage, key: &str) -> Result<String, anyhow::Error> {
    let parts = [
        serde_json::to_vec(&msg.header)?,
        match &msg.parent_header {
            Some(header) => serde_json::to_vec(header)?,
            None => serde_json::to_vec(&serde_json::Map::new())?,
        },
        serde_json::to_vec(&msg.metadata)?,
        serde_json::to_vec(&msg.content)?,
    ];

    let mut signature =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| anyhow::anyhow!(e))?;
    for part in &parts {
        signature.update(part);
    }
    Ok(hex::encode(signature.finalize().into_bytes()))
}
