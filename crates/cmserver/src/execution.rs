//
// execution.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! The execution coordinator: turns one code submission into one
//! `execute_request` on the kernel channel and blocks the caller until the
//! aggregated result arrives or the local deadline expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cmshared::execution_result::ExecutionResponse;
use tokio::sync::oneshot;

use crate::aggregation::AggregationRecord;
use crate::config::GatewayConfig;
use crate::error::{CMError, ExecErrorCode};
use crate::jupyter_messages;
use crate::kernel_channel::ChannelManager;
use crate::result_shaper;

pub struct ExecutionCoordinator {
    config: Arc<GatewayConfig>,
    channels: ChannelManager,
}

impl ExecutionCoordinator {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            channels: ChannelManager::new(config.clone()),
            config,
        }
    }

    /// Execute `code` on the given kernel with the configured deadline.
    pub async fn execute(
        &self,
        kernel_id: &str,
        session_id: &str,
        code: &str,
    ) -> Result<ExecutionResponse, CMError> {
        self.execute_with_timeout(kernel_id, session_id, code, self.config.exec_timeout)
            .await
    }

    /// Execute `code` on the given kernel, waiting at most `timeout` for the
    /// aggregated result.
    ///
    /// Kernel-side failures (errors, aborts, restarts, channel loss) come
    /// back as a populated response; only an unreachable backend is an `Err`.
    pub async fn execute_with_timeout(
        &self,
        kernel_id: &str,
        session_id: &str,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionResponse, CMError> {
        let started = Instant::now();

        let channel = self
            .channels
            .acquire(kernel_id)
            .await
            .map_err(|e| CMError::BackendUnavailable(e.to_string()))?;

        // One execution at a time per kernel
        let _guard = channel.exec_lock.lock().await;

        let msg = jupyter_messages::execute_request(code);
        let msg_id = msg.header.msg_id.clone();

        log::info!(
            "[kernel {}] Executing request {} (session {})",
            kernel_id,
            msg_id,
            session_id
        );

        let (waiter_tx, waiter_rx) = oneshot::channel();
        channel.inflight.register(
            AggregationRecord::new(msg_id.clone(), self.config.max_output_len),
            waiter_tx,
        );

        if let Err(e) = channel.send(msg).await {
            channel.inflight.remove(&msg_id);
            log::error!(
                "[kernel {}] Failed to send request {}: {}",
                kernel_id,
                msg_id,
                e
            );
            return Ok(channel_failure_response(msg_id, started));
        }

        match tokio::time::timeout(timeout, waiter_rx).await {
            Ok(Ok(record)) => Ok(result_shaper::shape(record, started)),
            Ok(Err(_)) => {
                // The reader went away without delivering; treat it as a
                // channel failure
                channel.inflight.remove(&msg_id);
                log::error!(
                    "[kernel {}] Channel reader dropped request {} without a result",
                    kernel_id,
                    msg_id
                );
                Ok(channel_failure_response(msg_id, started))
            }
            Err(_) => {
                // Local deadline: abandon the record. No interrupt is sent;
                // the kernel may keep running and its late output is dropped.
                channel.inflight.remove(&msg_id);
                log::warn!(
                    "[kernel {}] Request {} timed out after {:?}",
                    kernel_id,
                    msg_id,
                    timeout
                );
                Ok(result_shaper::timeout_response(msg_id, started))
            }
        }
    }
}

fn channel_failure_response(request_id: String, started: Instant) -> ExecutionResponse {
    let mut record = AggregationRecord::new(request_id, 0);
    record.fail(ExecErrorCode::Generic, None);
    result_shaper::shape(record, started)
}
