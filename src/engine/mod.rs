//! Triage engine
//!
//! [`TriageEngine`] owns the shared NNTP pool and the lifetime pool counters.
//! Each [`triage`](TriageEngine::triage) call gets fresh per-run metrics, so
//! concurrent calls on one engine never mix their counters.
//!
//! The global deadline races the whole batch. On overrun the call returns
//! [`Error::HealthcheckTimeout`] and the batch task is left to finish on its
//! own: in-flight STAT/BODY requests complete and their results are dropped.

mod scheduler;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::TriageOptions;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::nntp::SessionConnector;
use crate::nntp::registry::PoolRegistry;
use crate::types::Summary;

/// Entry point for NZB triage (cloneable, all state is Arc-wrapped)
#[derive(Clone)]
pub struct TriageEngine {
    /// Shared pool slot and lifetime pool counters
    registry: Arc<PoolRegistry>,
}

impl Default for TriageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageEngine {
    /// Engine that talks to the configured server over TCP (TLS when
    /// `use_tls` is set)
    pub fn new() -> Self {
        Self {
            registry: Arc::new(PoolRegistry::new(None)),
        }
    }

    /// Engine whose pools open sessions through `connector` instead of TCP.
    ///
    /// `nntp_config` still has to be set in the options: it enables the
    /// network checks and keys the shared pool.
    pub fn with_connector(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            registry: Arc::new(PoolRegistry::new(Some(connector))),
        }
    }

    /// Triage a batch of NZB payloads.
    ///
    /// Returns one decision per payload, in input order. Malformed payloads
    /// become `analysis-error` rejections; only invalid options, the global
    /// deadline and a crashed batch task fail the call.
    pub async fn triage<S: AsRef<str>>(&self, payloads: &[S], options: &TriageOptions) -> Result<Summary> {
        options.validate()?;
        let started = Instant::now();
        let payloads: Vec<String> = payloads.iter().map(|p| p.as_ref().to_string()).collect();
        let nzb_count = payloads.len();
        let timeout_ms = options.health_check_timeout_ms;
        info!(nzbs = nzb_count, timeout_ms, "triage started");

        let metrics = Arc::new(MetricsCollector::new());
        let batch = {
            let registry = self.registry.clone();
            let options = options.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move { scheduler::run_batch(&registry, &options, &payloads, &metrics).await })
        };

        let decisions = match tokio::time::timeout(options.health_check_timeout(), batch).await {
            Ok(Ok(decisions)) => decisions,
            Ok(Err(e)) => {
                return Err(Error::TaskFailed(format!("triage batch failed: {}", e)));
            }
            Err(_) => {
                warn!(nzbs = nzb_count, timeout_ms, "triage deadline exceeded");
                return Err(Error::HealthcheckTimeout { timeout_ms });
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = Summary::from_decisions(decisions, elapsed_ms, metrics.snapshot(self.registry.totals()));
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            elapsed_ms,
            "triage finished"
        );
        Ok(summary)
    }

    /// Build (or refresh) the shared pool ahead of the first batch.
    ///
    /// Idempotent: a matching, fresh shared pool is kept as is. Concurrent
    /// calls wait for a single build.
    pub async fn pre_warm_nntp_pool(&self, options: &TriageOptions) -> Result<()> {
        options.validate()?;
        if options.nntp_config.is_none() {
            return Err(Error::Config {
                message: "nntp_config is required to pre-warm a pool".to_string(),
                key: Some("nntp_config".to_string()),
            });
        }
        self.registry.pre_warm(options).await.map_err(Error::from)
    }

    /// Close the shared pool; returns whether there was one
    pub async fn close_shared_nntp_pool(&self, reason: &str) -> bool {
        self.registry.close_shared(reason).await
    }

    /// Close the shared pool if it sat idle past its activity window;
    /// returns whether it was evicted
    pub async fn evict_stale_shared_nntp_pool(&self, reason: &str) -> bool {
        self.registry.evict_stale(reason).await
    }

    /// Whether a shared pool is currently kept warm
    pub async fn has_shared_nntp_pool(&self) -> bool {
        self.registry.has_shared().await
    }
}
