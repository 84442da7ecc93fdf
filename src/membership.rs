//! Membership Oracle Seam
//!
//! Answers "is user X currently a member of group Y". The gate requires
//! membership in every admin-registered group before serving user commands.
//! Oracle failures fail OPEN: availability wins over enforcement, and the
//! incident is logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::models::{RequiredGroup, UserId};
use crate::store::LedgerStore;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("membership transport error: {0}")]
    Transport(String),

    #[error("membership oracle rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Oracle name for logging
    fn name(&self) -> &'static str;

    async fn is_member(&self, user_id: UserId, group_id: &str) -> Result<bool, MembershipError>;
}

/// Outcome of the required-groups check.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admitted,
    /// Groups the user still has to join
    MissingGroups(Vec<RequiredGroup>),
}

/// Required-membership gate in front of user commands.
pub struct MembershipGate {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn MembershipOracle>,
}

impl MembershipGate {
    pub fn new(store: Arc<dyn LedgerStore>, oracle: Arc<dyn MembershipOracle>) -> Self {
        Self { store, oracle }
    }

    /// Check the user against every required group.
    ///
    /// Never fails: a store or oracle error admits the user and logs the
    /// incident.
    pub async fn check(&self, user_id: UserId) -> GateDecision {
        let groups = match self.store.list_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(user_id, error = %e, "group listing failed, gate fails open");
                return GateDecision::Admitted;
            }
        };

        let mut missing = Vec::new();
        for group in groups {
            match self.oracle.is_member(user_id, &group.group_id).await {
                Ok(true) => {}
                Ok(false) => missing.push(group),
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        group_id = %group.group_id,
                        oracle = self.oracle.name(),
                        error = %e,
                        "membership check failed, gate fails open for this group"
                    );
                }
            }
        }

        if missing.is_empty() {
            GateDecision::Admitted
        } else {
            GateDecision::MissingGroups(missing)
        }
    }
}

/// Queries a chat-platform adapter over HTTP.
pub struct HttpMembershipOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMembershipOracle {
    /// Client with the default 10s request timeout.
    pub fn new(base_url: &str) -> Result<Self, MembershipError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, MembershipError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MembershipError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/member", base_url.trim_end_matches('/')),
        })
    }
}

#[derive(serde::Deserialize)]
struct MemberResponse {
    member: bool,
}

#[async_trait]
impl MembershipOracle for HttpMembershipOracle {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn is_member(&self, user_id: UserId, group_id: &str) -> Result<bool, MembershipError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("user_id", user_id.to_string()), ("group_id", group_id.to_string())])
            .send()
            .await
            .map_err(|e| MembershipError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MembershipError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }

        let body: MemberResponse = response
            .json()
            .await
            .map_err(|e| MembershipError::Transport(e.to_string()))?;
        Ok(body.member)
    }
}

/// Fixed-answer oracle: a default verdict plus per-pair overrides.
///
/// Deployments without a membership endpoint run `allow_all`.
pub struct StaticMembershipOracle {
    default_member: bool,
    overrides: std::sync::Mutex<rustc_hash::FxHashMap<(UserId, String), bool>>,
}

impl StaticMembershipOracle {
    pub fn allow_all() -> Self {
        Self {
            default_member: true,
            overrides: std::sync::Mutex::new(rustc_hash::FxHashMap::default()),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            default_member: false,
            overrides: std::sync::Mutex::new(rustc_hash::FxHashMap::default()),
        }
    }

    pub fn set(&self, user_id: UserId, group_id: &str, member: bool) {
        self.overrides
            .lock()
            .expect("oracle override lock poisoned")
            .insert((user_id, group_id.to_string()), member);
    }
}

#[async_trait]
impl MembershipOracle for StaticMembershipOracle {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn is_member(&self, user_id: UserId, group_id: &str) -> Result<bool, MembershipError> {
        let overrides = self
            .overrides
            .lock()
            .map_err(|_| MembershipError::Rejected("override lock poisoned".to_string()))?;
        Ok(*overrides
            .get(&(user_id, group_id.to_string()))
            .unwrap_or(&self.default_member))
    }
}
