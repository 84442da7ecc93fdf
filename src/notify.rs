//! Notifier Seam
//!
//! Service-initiated pushes to users (sweep credits, admin decisions,
//! support forwards). The chat transport itself is out of scope; an adapter
//! bridges these calls onto the real platform. Delivery is best-effort by
//! contract: a failed send is logged and never rolls back a ledger mutation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::store::models::UserId;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notify transport error: {0}")]
    Transport(String),

    #[error("notify rejected: {0}")]
    Rejected(String),
}

/// Push one message to one user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), NotifyError>;
}

/// Send without surfacing the outcome; failures are logged at warn.
pub async fn notify_quietly(notifier: &dyn Notifier, user_id: UserId, text: &str) {
    if let Err(e) = notifier.notify(user_id, text).await {
        tracing::warn!(
            user_id,
            adapter = notifier.name(),
            error = %e,
            "notification dropped"
        );
    }
}

/// Fan one message out to several recipients (admin broadcasts).
pub async fn broadcast(notifier: &dyn Notifier, recipients: &[UserId], text: &str) {
    let sends = recipients
        .iter()
        .map(|id| notify_quietly(notifier, *id, text));
    futures::future::join_all(sends).await;
}

/// POSTs messages to a chat-platform adapter endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    /// Client with the default 10s request timeout.
    pub fn new(base_url: &str) -> Result<Self, NotifyError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/send", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "user_id": user_id, "text": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Drops every message. Used when no adapter endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), NotifyError> {
        tracing::debug!(user_id, text, "notification discarded (noop notifier)");
        Ok(())
    }
}


#[cfg(test)]
pub use mock::RecordingNotifier;
