//! Distributed invalidation protocol for edge-local caches.
//!
//! After a node writes or deletes an entry in its private cache it
//! broadcasts the mutation to the administration endpoint, whose handler
//! applies the same mutation to the receiving node's edge-local backend.
//! Delivery is best-effort and at-most-once: failures are logged and never
//! retried, and natural expiry eventually reconverges a node that missed one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::BroadcastError;

/// A cache mutation propagated to other nodes.
///
/// `key` is the caller key; receivers apply their own namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum DistributeMessage {
    /// Store `value` under `key` with the given policy.
    Put {
        key: String,
        value: serde_json::Value,
        ttl: u64,
        swr: u64,
    },
    /// Remove `key`.
    Delete { key: String },
}

impl DistributeMessage {
    /// Caller key the message applies to.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// The message's action.
    pub fn action(&self) -> DistributeAction {
        match self {
            Self::Put { .. } => DistributeAction::Put,
            Self::Delete { .. } => DistributeAction::Delete,
        }
    }
}

/// Action carried by a [`DistributeMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistributeAction {
    Put,
    Delete,
}

impl std::fmt::Display for DistributeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Transport for [`DistributeMessage`]s.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver `message` once. Implementations must not retry.
    async fn broadcast(&self, message: &DistributeMessage) -> Result<(), BroadcastError>;
}

/// Send `message`, logging instead of failing.
///
/// Returns whether delivery succeeded.
pub(crate) async fn broadcast_best_effort(
    broadcaster: &dyn Broadcaster,
    message: &DistributeMessage,
) -> bool {
    match broadcaster.broadcast(message).await {
        Ok(()) => {
            tracing::info!(key = message.key(), action = %message.action(), "broadcast cache update");
            true
        }
        Err(err) => {
            tracing::warn!(
                key = message.key(),
                action = %message.action(),
                error = %err,
                "broadcast failed, relying on natural expiry"
            );
            false
        }
    }
}

/// Broadcaster that POSTs messages to the administration endpoint.
pub struct HttpBroadcaster {
    route: String,
    #[cfg(not(target_arch = "wasm32"))]
    client: reqwest::Client,
}

impl HttpBroadcaster {
    /// Create a broadcaster targeting `route` (a full URL).
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            #[cfg(not(target_arch = "wasm32"))]
            client: reqwest::Client::new(),
        }
    }

    /// Create a broadcaster targeting the configured update route.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.broadcast_route())
    }

    /// Target URL.
    pub fn route(&self) -> &str {
        &self.route
    }
}

impl std::fmt::Debug for HttpBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBroadcaster")
            .field("route", &self.route)
            .finish()
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait]
impl Broadcaster for HttpBroadcaster {
    async fn broadcast(&self, message: &DistributeMessage) -> Result<(), BroadcastError> {
        let body = serde_json::to_vec(message)?;
        let request = spin_sdk::http::Request::builder()
            .method(spin_sdk::http::Method::Post)
            .uri(self.route.as_str())
            .header("content-type", "application/json")
            .body(body)
            .build();

        let response: spin_sdk::http::Response = spin_sdk::http::send(request)
            .await
            .map_err(|e| BroadcastError::Request(e.to_string()))?;

        let status = *response.status();
        if !(200..300).contains(&status) {
            return Err(BroadcastError::Http {
                status,
                url: self.route.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Broadcaster for HttpBroadcaster {
    async fn broadcast(&self, message: &DistributeMessage) -> Result<(), BroadcastError> {
        let response = self
            .client
            .post(&self.route)
            .json(message)
            .send()
            .await
            .map_err(|e| BroadcastError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BroadcastError::Http {
                status: status.as_u16(),
                url: self.route.clone(),
            });
        }
        Ok(())
    }
}
