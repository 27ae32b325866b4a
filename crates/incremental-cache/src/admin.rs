//! Administration endpoint handlers.
//!
//! Framework-agnostic: hosts pass the request body or query string in and
//! write the returned [`AdminResponse`] out. Bodies never include internal
//! error details.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;

use crate::backend::BackendKind;
use crate::cache::InvalidationStrategy;
use crate::distribute::{DistributeAction, DistributeMessage};
use crate::entry;
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::options::CachePolicy;
use crate::runtime::CacheRuntime;

/// Status and JSON body of an administration response.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: serde_json::Value,
}

impl AdminResponse {
    fn ok(body: serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn failure(status: StatusCode) -> Self {
        Self {
            status,
            body: json!({ "ok": false }),
        }
    }

    /// Whether the body reports success.
    pub fn is_ok(&self) -> bool {
        self.body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Body serialized as JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.body.to_string().into_bytes()
    }
}

/// Handlers for the cache-update webhook and the invalidation request.
#[derive(Debug, Clone)]
pub struct AdminHandler {
    runtime: Arc<CacheRuntime>,
}

impl AdminHandler {
    /// Create handlers over `runtime`.
    pub fn new(runtime: Arc<CacheRuntime>) -> Self {
        Self { runtime }
    }

    /// Apply a broadcast message to this node's edge-local backend.
    ///
    /// Never re-broadcasts.
    pub async fn apply(&self, message: &DistributeMessage) -> CacheResult<DistributeAction> {
        let backend = self.runtime.edge_local();
        let key = CacheKey::new(message.key());

        match message {
            DistributeMessage::Put {
                value, ttl, swr, ..
            } => {
                let policy = CachePolicy::resolve(signed(*ttl), Some(signed(*swr)))?;
                let storage_key = key.storage_key();
                let bytes = entry::encode(
                    &storage_key,
                    value,
                    policy.ttl,
                    policy.swr,
                    self.runtime.clock().now_ms(),
                )?;
                backend.put(&storage_key, bytes, policy.max_age()).await?;
            }
            DistributeMessage::Delete { .. } => {
                backend.delete(&key.storage_key()).await?;
            }
        }

        tracing::info!(key = %key, action = %message.action(), "applied remote cache update");
        Ok(message.action())
    }

    /// Handle a cache-update webhook body.
    ///
    /// `{"ok": true, "action": ...}` on success; `{"ok": false}` with a
    /// server-error status for malformed input or backend failure.
    pub async fn handle_cache_update(&self, body: &[u8]) -> AdminResponse {
        let message: DistributeMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting malformed cache update");
                return AdminResponse::failure(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        match self.apply(&message).await {
            Ok(action) => AdminResponse::ok(json!({ "ok": true, "action": action })),
            Err(err) => {
                tracing::error!(key = message.key(), error = %err, "failed to apply cache update");
                AdminResponse::failure(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Handle `?key=K&strategy=local|global`.
    ///
    /// Drops the entry from the durable store, when configured, and from
    /// this node's edge-local backend. `global` also broadcasts a DELETE.
    /// Missing or unknown parameters are a client error.
    pub async fn handle_invalidate(&self, query: &str) -> AdminResponse {
        let mut key = None;
        let mut strategy = None;
        for (name, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match name.as_ref() {
                "key" if !value.is_empty() => key = Some(value.into_owned()),
                "strategy" => strategy = value.parse::<InvalidationStrategy>().ok(),
                _ => {}
            }
        }

        let (Some(key), Some(strategy)) = (key, strategy) else {
            return AdminResponse::failure(StatusCode::BAD_REQUEST);
        };

        match self.invalidate(&key, strategy).await {
            Ok(()) => AdminResponse::ok(json!({ "ok": true })),
            Err(err) => {
                tracing::error!(key = %key, error = %err, "invalidation failed");
                AdminResponse::failure(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn invalidate(&self, key: &str, strategy: InvalidationStrategy) -> CacheResult<()> {
        if self.runtime.durable().is_some() {
            // The durable store is shared, so other nodes need no broadcast for it.
            self.runtime
                .invalidate_on(key, InvalidationStrategy::Local, Some(BackendKind::Durable))
                .await?;
        }
        self.runtime
            .invalidate_on(key, strategy, Some(BackendKind::EdgeLocal))
            .await
    }
}

fn signed(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
