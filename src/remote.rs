//! Remote status collector transport
//!
//! ```text
//! engine ─ event (state changed only) ─┐
//!                                      ├─→ POST {"mode": "event" | "status", ...} → collector
//! engine ─ status after each cycle ────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::actors::messages::ServiceStatus;
use crate::error::TransportError;
use crate::event::EventSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RemotePayload {
    Event {
        host: String,
        event: EventSnapshot,
    },
    Status {
        host: String,
        services: Vec<ServiceStatus>,
    },
}

impl RemotePayload {
    pub fn mode(&self) -> &'static str {
        match self {
            RemotePayload::Event { .. } => "event",
            RemotePayload::Status { .. } => "status",
        }
    }
}

#[async_trait]
pub trait RemoteStatusTransport: Send + Sync {
    async fn send(&self, payload: &RemotePayload) -> Result<(), TransportError>;
}

/// Posts payloads as JSON to HTTP collector endpoints
///
/// Endpoints are tried in order; the first one that accepts the payload
/// ends the attempt.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    urls: Vec<String>,
    token: Option<String>,
}

impl HttpCollector {
    pub fn new(
        urls: Vec<String>,
        timeout: Duration,
        token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            urls,
            token,
        })
    }

    async fn post(&self, url: &str, payload: &RemotePayload) -> Result<(), TransportError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(token) = &self.token {
            request = request.header("X-WARDEN-SECRET", token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStatusTransport for HttpCollector {
    #[instrument(skip_all, fields(mode = payload.mode()))]
    async fn send(&self, payload: &RemotePayload) -> Result<(), TransportError> {
        let mut last_error = TransportError::NoEndpoint;
        for url in &self.urls {
            match self.post(url, payload).await {
                Ok(()) => {
                    debug!("{} message sent to {url}", payload.mode());
                    return Ok(());
                }
                Err(e) => {
                    error!("collector {url} failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
