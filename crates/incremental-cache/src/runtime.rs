//! Process-wide cache runtime.

use std::sync::Arc;

use crate::backend::{BackendKind, CacheBackend, EdgeLocalBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::distribute::{Broadcaster, HttpBroadcaster};
use crate::error::{CacheError, CacheResult};
use crate::scheduler::{Deferral, FlushReport, Scheduler};

/// Owns the backends, the scheduler and the pending-revalidation state.
///
/// Construct one per process (or service instance) and share it; each
/// test can build its own for isolation.
pub struct CacheRuntime {
    durable: Option<Arc<dyn CacheBackend>>,
    edge_local: Arc<dyn CacheBackend>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    scheduler: Arc<Scheduler>,
    deferral: Deferral,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheRuntime {
    /// Start building a runtime.
    pub fn builder() -> CacheRuntimeBuilder {
        CacheRuntimeBuilder::default()
    }

    /// Pick the backend for a call.
    ///
    /// Defaults to the durable backend when one is configured, otherwise
    /// the edge-local backend.
    pub fn select_backend(
        &self,
        backend_override: Option<BackendKind>,
    ) -> CacheResult<Arc<dyn CacheBackend>> {
        match backend_override {
            Some(BackendKind::EdgeLocal) => Ok(Arc::clone(&self.edge_local)),
            Some(BackendKind::Durable) => self.durable.clone().ok_or_else(|| {
                CacheError::Configuration("no durable backend is configured".to_string())
            }),
            None => Ok(self
                .durable
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.edge_local))),
        }
    }

    /// Broadcaster to use for a write on `backend`, if distribution applies.
    pub(crate) fn broadcaster_for(
        &self,
        backend: &dyn CacheBackend,
        distribute: Option<bool>,
    ) -> Option<Arc<dyn Broadcaster>> {
        let enabled = distribute.unwrap_or(self.config.distribute);
        if enabled && backend.kind() == BackendKind::EdgeLocal {
            self.broadcaster.clone()
        } else {
            None
        }
    }

    /// Drain deferred work. Call once per execution unit.
    pub async fn flush(&self) -> FlushReport {
        self.scheduler.flush().await
    }

    /// The node's edge-local backend.
    pub fn edge_local(&self) -> &Arc<dyn CacheBackend> {
        &self.edge_local
    }

    /// The durable backend, if configured.
    pub fn durable(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.durable.as_ref()
    }

    /// The configured broadcaster, if any.
    pub fn broadcaster(&self) -> Option<&Arc<dyn Broadcaster>> {
        self.broadcaster.as_ref()
    }

    /// The deferred-work scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// How deferred work is run.
    pub fn deferral(&self) -> &Deferral {
        &self.deferral
    }

    /// The runtime clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The runtime configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for CacheRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRuntime")
            .field("durable", &self.durable.is_some())
            .field("broadcaster", &self.broadcaster.is_some())
            .field("scheduler", &self.scheduler)
            .field("deferral", &self.deferral)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`CacheRuntime`].
#[derive(Default)]
pub struct CacheRuntimeBuilder {
    durable: Option<Arc<dyn CacheBackend>>,
    edge_local: Option<Arc<dyn CacheBackend>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    deferral: Deferral,
    clock: Option<Arc<dyn Clock>>,
    config: Option<CacheConfig>,
}

impl CacheRuntimeBuilder {
    /// Use a durable backend (makes it the default).
    pub fn durable(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.durable = Some(backend);
        self
    }

    /// Replace the default edge-local backend.
    pub fn edge_local(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.edge_local = Some(backend);
        self
    }

    /// Set the broadcaster for edge-local writes.
    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Broadcast over HTTP to the configured update route.
    pub fn http_broadcaster(self) -> Self {
        let config = self.config.clone().unwrap_or_default();
        self.broadcaster(Arc::new(HttpBroadcaster::from_config(&config)))
    }

    /// Set how deferred work runs.
    pub fn deferral(mut self, deferral: Deferral) -> Self {
        self.deferral = deferral;
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> CacheRuntime {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let edge_local = self
            .edge_local
            .unwrap_or_else(|| Arc::new(EdgeLocalBackend::with_clock(Arc::clone(&clock))));

        CacheRuntime {
            durable: self.durable,
            edge_local,
            broadcaster: self.broadcaster,
            scheduler: Arc::new(Scheduler::new()),
            deferral: self.deferral,
            clock,
            config: self.config.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DurableKvBackend;
    use crate::error::BroadcastError;
    use crate::DistributeMessage;
    use async_trait::async_trait;

    struct NullBroadcaster;

    #[async_trait]
    impl Broadcaster for NullBroadcaster {
        async fn broadcast(&self, _message: &DistributeMessage) -> Result<(), BroadcastError> {
            Ok(())
        }
    }

    #[test]
    fn test_defaults_to_edge_local_without_durable() {
        let runtime = CacheRuntime::builder().build();
        let backend = runtime.select_backend(None).unwrap();
        assert_eq!(backend.kind(), BackendKind::EdgeLocal);
    }

    #[test]
    fn test_defaults_to_durable_when_available() {
        let runtime = CacheRuntime::builder()
            .durable(Arc::new(DurableKvBackend::in_memory()))
            .build();
        assert_eq!(
            runtime.select_backend(None).unwrap().kind(),
            BackendKind::Durable
        );
        assert_eq!(
            runtime
                .select_backend(Some(BackendKind::EdgeLocal))
                .unwrap()
                .kind(),
            BackendKind::EdgeLocal
        );
    }

    #[test]
    fn test_durable_override_without_store_is_configuration_error() {
        let runtime = CacheRuntime::builder().build();
        assert!(matches!(
            runtime.select_backend(Some(BackendKind::Durable)),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_broadcaster_only_for_distributed_edge_local_writes() {
        let runtime = CacheRuntime::builder()
            .durable(Arc::new(DurableKvBackend::in_memory()))
            .broadcaster(Arc::new(NullBroadcaster))
            .build();
        let edge = runtime.select_backend(Some(BackendKind::EdgeLocal)).unwrap();
        let durable = runtime.select_backend(None).unwrap();

        assert!(runtime.broadcaster_for(edge.as_ref(), None).is_some());
        assert!(runtime.broadcaster_for(edge.as_ref(), Some(false)).is_none());
        assert!(runtime.broadcaster_for(durable.as_ref(), Some(true)).is_none());
    }

    #[test]
    fn test_config_disables_distribution_by_default() {
        let runtime = CacheRuntime::builder()
            .broadcaster(Arc::new(NullBroadcaster))
            .config(CacheConfig {
                distribute: false,
                ..Default::default()
            })
            .build();
        let edge = runtime.select_backend(None).unwrap();
        assert!(runtime.broadcaster_for(edge.as_ref(), None).is_none());
        assert!(runtime.broadcaster_for(edge.as_ref(), Some(true)).is_some());
    }

    #[test]
    fn test_http_broadcaster_uses_config_route() {
        let runtime = CacheRuntime::builder()
            .config(CacheConfig {
                base_url: "https://edge.example".to_string(),
                ..Default::default()
            })
            .http_broadcaster()
            .build();
        assert!(runtime.broadcaster().is_some());
    }
}
