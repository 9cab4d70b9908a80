//
// health.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! The periodic self-probe behind the `/health` endpoint. Every cycle the
//! gateway runs a trivial computation through the full execution path; the
//! most recent outcome is what `/health` reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::execution::ExecutionCoordinator;
use crate::jupyter_api::JupyterApi;

const PROBE_CODE: &str = "1+1";
const WARMUP: Duration = Duration::from_secs(30);
const PERIOD: Duration = Duration::from_secs(15);

pub struct HealthMonitor {
    healthy: AtomicBool,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(false),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Start the probe task. Returns immediately; the probe runs for the
    /// lifetime of the process and never aborts it. Persistent failure only
    /// flips the health indicator.
    pub fn start(self: Arc<Self>, api: Arc<JupyterApi>, coordinator: Arc<ExecutionCoordinator>) {
        let monitor = self;
        tokio::spawn(async move {
            tokio::time::sleep(WARMUP).await;
            let mut tick = tokio::time::interval(PERIOD);
            loop {
                tick.tick().await;
                monitor.probe(&api, &coordinator).await;
            }
        });
    }

    async fn probe(&self, api: &JupyterApi, coordinator: &ExecutionCoordinator) {
        let (kernel_id, session_id) = match api.ensure_session(None).await {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Health probe failed to reach the Jupyter server: {}", e);
                self.healthy.store(false, Ordering::Relaxed);
                return;
            }
        };

        match coordinator.execute(&kernel_id, &session_id, PROBE_CODE).await {
            Ok(response) if response.error_name.is_empty() && response.stderr.is_empty() => {
                log::info!("Periodic code execution successful");
                self.healthy.store(true, Ordering::Relaxed);
            }
            Ok(response) => {
                log::error!(
                    "Periodic code execution failed: {} {}",
                    response.error_name,
                    response.error_message
                );
                self.healthy.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!("Periodic code execution failed: {}", e);
                self.healthy.store(false, Ordering::Relaxed);
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
