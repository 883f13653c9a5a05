//! Snapshot delivery targets

use crate::metrics::Snapshot;
use crate::{KansatsuError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

/// Errors that can occur while delivering a snapshot
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Receiver is full")]
    Full,

    #[error("Receiver closed")]
    Closed,
}

/// Consumer of published snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync + std::fmt::Debug {
    /// Short label used in log messages
    fn name(&self) -> &str;

    /// Deliver one periodic snapshot
    async fn deliver(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError>;

    /// Deliver the final snapshot of the session
    async fn session_end(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
        self.deliver(snapshot).await
    }
}

/// POSTs snapshots to a dashboard's update endpoint
#[derive(Debug, Clone)]
pub struct HttpDashboardSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpDashboardSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| {
            KansatsuError::configuration_error(format!("Invalid dashboard URL '{}': {}", url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KansatsuError::internal_error(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: serde_json::Value) -> std::result::Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(self.timeout)
                } else {
                    SinkError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Status {
                status: status.as_u16(),
            })
        }
    }

    fn payload(kind: &str, snapshot: &Snapshot) -> std::result::Result<serde_json::Value, SinkError> {
        let snapshot =
            serde_json::to_value(snapshot).map_err(|e| SinkError::Serialization(e.to_string()))?;
        Ok(json!({ "type": kind, "snapshot": snapshot }))
    }
}

#[async_trait]
impl SnapshotSink for HttpDashboardSink {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn deliver(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
        self.post(Self::payload("snapshot", snapshot)?).await
    }

    async fn session_end(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
        self.post(Self::payload("session_end", snapshot)?).await
    }
}

/// Forwards snapshots into an in-process channel
///
/// Delivery never waits: a full channel drops the snapshot.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Snapshot>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Snapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<Snapshot>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SnapshotSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
        self.tx.try_send(snapshot.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
