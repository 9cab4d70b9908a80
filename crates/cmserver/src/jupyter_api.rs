//
// jupyter_api.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Client for the Jupyter server's REST API: kernel and session discovery,
//! and session creation.

use std::sync::Arc;
use std::time::Duration;

use cmshared::kernel_info::{Kernel, NewSessionRequest, Session};

use crate::config::GatewayConfig;
use crate::error::CMError;

/// The kernel spec used when the gateway has to create a session itself.
const DEFAULT_KERNEL_NAME: &str = "python3";

pub struct JupyterApi {
    client: reqwest::Client,
    config: Arc<GatewayConfig>,
}

impl JupyterApi {
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    /// Ensure a usable (kernel, session) pair exists on the backend and
    /// return its ids.
    ///
    /// If the backend has no kernels, a fresh notebook session (which binds a
    /// fresh kernel) is created. Otherwise an existing session is reused:
    /// the one bound to `preferred_kernel_id` when given, or the first one.
    pub async fn ensure_session(
        &self,
        preferred_kernel_id: Option<&str>,
    ) -> Result<(String, String), CMError> {
        let kernels = self
            .list_kernels()
            .await
            .map_err(|e| CMError::BackendUnavailable(e.to_string()))?;

        if kernels.is_empty() {
            let session = self
                .create_session()
                .await
                .map_err(|e| CMError::BackendUnavailable(e.to_string()))?;
            log::info!(
                "Created session {} on new kernel {}",
                session.id,
                session.kernel.id
            );
            return Ok((session.kernel.id, session.id));
        }

        let sessions = self
            .list_sessions()
            .await
            .map_err(|e| CMError::BackendUnavailable(e.to_string()))?;

        if let Some(preferred) = preferred_kernel_id {
            if let Some(session) = sessions.iter().find(|s| s.kernel.id == preferred) {
                return Ok((session.kernel.id.clone(), session.id.clone()));
            }
        }

        if let Some(session) = sessions.first() {
            log::debug!(
                "Reusing session {} on kernel {}",
                session.id,
                session.kernel.id
            );
            return Ok((session.kernel.id.clone(), session.id.clone()));
        }

        // Kernels exist but no session is bound to them; create one
        let session = self
            .create_session()
            .await
            .map_err(|e| CMError::BackendUnavailable(e.to_string()))?;
        Ok((session.kernel.id, session.id))
    }

    /// List the kernels currently running on the backend.
    pub async fn list_kernels(&self) -> Result<Vec<Kernel>, anyhow::Error> {
        let url = self.api_url("kernels");
        log::trace!("Checking for available kernels");
        let kernels = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Kernel>>()
            .await?;
        Ok(kernels)
    }

    /// List the sessions currently open on the backend.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, anyhow::Error> {
        let url = self.api_url("sessions");
        log::trace!("Listing available sessions");
        let sessions = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Session>>()
            .await?;
        Ok(sessions)
    }

    /// Create a new notebook session bound to a fresh kernel.
    pub async fn create_session(&self) -> Result<Session, anyhow::Error> {
        let url = self.api_url("sessions");
        log::info!("Creating a new session");
        let session = self
            .client
            .post(url)
            .json(&NewSessionRequest::notebook(DEFAULT_KERNEL_NAME))
            .send()
            .await?
            .error_for_status()?
            .json::<Session>()
            .await?;
        Ok(session)
    }

    fn api_url(&self, resource: &str) -> String {
        format!(
            "{}/api/{}?token={}",
            self.config.jupyter_url,
            resource,
            self.config.token()
        )
    }
}
