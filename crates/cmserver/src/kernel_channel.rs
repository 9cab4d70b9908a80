//
// kernel_channel.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! The WebSocket channel to a kernel.
//!
//! Each kernel gets at most one live connection. A single reader task owns
//! the socket: it demultiplexes inbound frames into the channel's in-flight
//! map and drains an outbound queue fed by senders, so no caller ever
//! touches the socket directly. Connections are opened lazily and re-opened
//! on next use after a failure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_channel::{Receiver, Sender};
use cmshared::jupyter_message::JupyterMessage;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::aggregation::InflightMap;
use crate::config::GatewayConfig;
use crate::error::ExecErrorCode;
use crate::wire_message;

/// Connection lifecycle states. There is no reconnect policy beyond lazily
/// opening a fresh connection on the next request after `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One live channel to a kernel.
pub struct KernelChannel {
    pub kernel_id: String,

    /// The in-flight executions owned by this channel's reader
    pub inflight: Arc<InflightMap>,

    /// Serializes executions targeting this kernel
    pub exec_lock: tokio::sync::Mutex<()>,

    state: Arc<RwLock<ChannelState>>,
    outbound_tx: Sender<JupyterMessage>,
}

impl KernelChannel {
    /// Open a channel to the given kernel and start its reader task.
    pub async fn connect(
        kernel_id: &str,
        config: &GatewayConfig,
    ) -> Result<Arc<Self>, anyhow::Error> {
        let url = channel_url(&config.jupyter_url, kernel_id, &config.token())?;
        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        let (ws_stream, _) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                *state.write().unwrap() = ChannelState::Disconnected;
                return Err(anyhow::anyhow!(
                    "failed to connect to kernel {}: {}",
                    kernel_id,
                    e
                ));
            }
        };

        log::info!("[kernel {}] Connected to channel websocket", kernel_id);
        *state.write().unwrap() = ChannelState::Open;

        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        let inflight = Arc::new(InflightMap::new());
        let sign_key = if config.sign_messages {
            Some(config.token())
        } else {
            None
        };

        let channel = Arc::new(Self {
            kernel_id: kernel_id.to_string(),
            inflight: inflight.clone(),
            exec_lock: tokio::sync::Mutex::new(()),
            state: state.clone(),
            outbound_tx,
        });

        let kernel_id = kernel_id.to_string();
        tokio::spawn(async move {
            channel_loop(ws_stream, outbound_rx, inflight, state, kernel_id, sign_key).await;
        });

        Ok(channel)
    }

    /// Queue an envelope for transmission. Fails only if the channel has
    /// already closed; a write failure after queueing terminates the
    /// in-flight records instead.
    pub async fn send(&self, msg: JupyterMessage) -> Result<(), anyhow::Error> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("kernel channel is closed"))
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read().unwrap()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Ask the reader to shut the connection down. Idempotent; the reader
    /// finishes the transition to `Closed`.
    pub fn close(&self) {
        {
            let mut state = self.state.write().unwrap();
            if *state == ChannelState::Open {
                *state = ChannelState::Closing;
            }
        }
        self.outbound_tx.close();
    }
}

/// The reader loop for one connection. Owns the socket; everything inbound
/// and outbound passes through here.
async fn channel_loop(
    mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: Receiver<JupyterMessage>,
    inflight: Arc<InflightMap>,
    state: Arc<RwLock<ChannelState>>,
    kernel_id: String,
    sign_key: Option<String>,
) {
    loop {
        select! {
            from_socket = ws_stream.next() => {
                let message = match from_socket {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        log::error!("[kernel {}] Failed to read frame from channel: {}", kernel_id, e);
                        break;
                    }
                    None => {
                        log::info!("[kernel {}] Channel closed by peer", kernel_id);
                        break;
                    }
                };
                match message {
                    Message::Text(data) => {
                        match wire_message::decode(&data) {
                            Ok(msg) => {
                                log::trace!(
                                    "[kernel {}] Got message {} of type {}",
                                    kernel_id,
                                    msg.header.msg_id,
                                    msg.header.msg_type
                                );
                                inflight.dispatch(&msg);
                            }
                            Err(e) => {
                                log::error!("[kernel {}] Failed to parse channel frame: {}", kernel_id, e);
                            }
                        }
                    },
                    Message::Ping(data) => {
                        // Answer with a pong carrying the same payload
                        log::trace!("[kernel {}] Got ping from channel ({} bytes)", kernel_id, data.len());
                        if let Err(e) = ws_stream.send(Message::Pong(data)).await {
                            log::error!("[kernel {}] Failed to send pong: {}", kernel_id, e);
                            break;
                        }
                    },
                    Message::Pong(data) => {
                        log::trace!("[kernel {}] Got pong from channel ({} bytes)", kernel_id, data.len());
                    },
                    Message::Binary(data) => {
                        log::warn!("[kernel {}] Got binary frame from channel ({} bytes); ignoring", kernel_id, data.len());
                    },
                    Message::Frame(_) => {
                        // Not produced by socket reads
                    },
                    Message::Close(_) => {
                        log::info!("[kernel {}] Channel closed by kernel", kernel_id);
                        break;
                    },
                }
            },
            outbound = outbound_rx.recv() => {
                let msg = match outbound {
                    Ok(msg) => msg,
                    Err(_) => {
                        // All senders dropped or close() was called
                        log::debug!("[kernel {}] Outbound queue closed; shutting down channel", kernel_id);
                        break;
                    }
                };
                let frame = match wire_message::encode(&msg, sign_key.as_deref()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("[kernel {}] Failed to encode message {}: {}", kernel_id, msg.header.msg_id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_stream.send(Message::Text(frame)).await {
                    log::error!("[kernel {}] Failed to send message to channel: {}", kernel_id, e);
                    break;
                }
            }
        }
    }

    *state.write().unwrap() = ChannelState::Closed;
    outbound_rx.close();

    // Anything still waiting on this connection fails now
    inflight.abort_all(ExecErrorCode::Generic);

    log::info!("[kernel {}] Channel reader stopped", kernel_id);
}

/// Build the channel URL for a kernel from the server's HTTP base URL.
fn channel_url(base_url: &str, kernel_id: &str, token: &str) -> Result<Url, anyhow::Error> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot derive websocket scheme from {}", base_url))?;
    url.set_path(&format!("/api/kernels/{}/channels", kernel_id));
    url.set_query(Some(&format!("token={}", token)));
    Ok(url)
}

/// The set of kernel channels owned by the gateway, keyed by kernel id.
pub struct ChannelManager {
    config: Arc<GatewayConfig>,
    channels: tokio::sync::Mutex<HashMap<String, Arc<KernelChannel>>>,
}

impl ChannelManager {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            channels: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Get the live channel for a kernel, connecting (or re-connecting) if
    /// there is none.
    pub async fn acquire(&self, kernel_id: &str) -> Result<Arc<KernelChannel>, anyhow::Error> {
        let mut channels = self.channels.lock().await;

        if let Some(channel) = channels.get(kernel_id) {
            if channel.is_open() {
                return Ok(channel.clone());
            }
            log::debug!(
                "[kernel {}] Previous channel is {:?}; reconnecting",
                kernel_id,
                channel.state()
            );
        }

        let channel = KernelChannel::connect(kernel_id, &self.config).await?;
        channels.insert(kernel_id.to_string(), channel.clone());
        Ok(channel)
    }
}
