//! Shared pool bookkeeping
//!
//! The engine keeps at most one shared pool, identified by
//! [`TriageOptions::pool_key`]. A batch leases it when the key matches and the
//! pool has been used within `shared_pool_idle_timeout_ms`; otherwise the old
//! pool is closed and a new one built. The slot's async mutex is held across
//! the build, so concurrent batches and pre-warm calls wait for one build
//! instead of opening connections of their own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pool::{NntpPool, PoolOptions};
use super::session::{SessionConnector, TcpConnector};
use crate::config::TriageOptions;
use crate::error::NntpError;
use crate::metrics::{MetricsCollector, PoolCounters, PoolTotals};

struct SharedPool {
    key: String,
    pool: NntpPool,
    last_used: Instant,
    idle_timeout: Duration,
}

impl SharedPool {
    fn is_stale(&self) -> bool {
        self.last_used.elapsed() > self.idle_timeout
    }
}

/// A pool handed to one batch
#[derive(Debug)]
pub(crate) struct PoolLease {
    pub pool: NntpPool,
    shared: bool,
}

/// Owner of the shared pool and the lifetime pool counters
pub(crate) struct PoolRegistry {
    shared: Mutex<Option<SharedPool>>,
    connector: Option<Arc<dyn SessionConnector>>,
    counters: PoolCounters,
}

impl PoolRegistry {
    /// Registry that connects with `connector` when given, over TCP otherwise
    pub(crate) fn new(connector: Option<Arc<dyn SessionConnector>>) -> Self {
        Self {
            shared: Mutex::new(None),
            connector,
            counters: PoolCounters::default(),
        }
    }

    /// Lifetime pool counters
    pub(crate) fn totals(&self) -> PoolTotals {
        self.counters.totals()
    }

    fn connector_for(&self, options: &TriageOptions) -> Result<Arc<dyn SessionConnector>, NntpError> {
        if let Some(connector) = &self.connector {
            return Ok(connector.clone());
        }
        let server = options
            .nntp_config
            .clone()
            .ok_or_else(|| NntpError::Unavailable("no NNTP server configured".into()))?;
        Ok(Arc::new(TcpConnector::new(
            server,
            options.connect_timeout(),
            options.command_timeout(),
        )))
    }

    /// Build a pool and prove the server reachable with one session
    async fn build(&self, options: &TriageOptions, metrics: Option<&MetricsCollector>) -> Result<NntpPool, NntpError> {
        let pool = NntpPool::new(
            self.connector_for(options)?,
            PoolOptions {
                size: options.nntp_max_connections,
                keep_alive: options.keep_alive(),
            },
        );
        if let Err(e) = pool.warm(1).await {
            warn!(error = %e, "nntp pool build failed");
            pool.close().await;
            return Err(e);
        }
        self.counters.created();
        if let Some(metrics) = metrics {
            metrics.record_pool_create();
        }
        info!(size = pool.size(), "nntp pool created");
        Ok(pool)
    }

    async fn retire(&self, pool: NntpPool, reason: &str, metrics: Option<&MetricsCollector>) {
        info!(reason, "closing nntp pool");
        pool.close().await;
        self.counters.closed();
        if let Some(metrics) = metrics {
            metrics.record_pool_close();
        }
    }

    /// Pool for one batch: the shared one when reuse is on, a private one
    /// otherwise
    pub(crate) async fn lease(
        &self,
        options: &TriageOptions,
        metrics: Option<&MetricsCollector>,
    ) -> Result<PoolLease, NntpError> {
        if options.reuse_nntp_pool {
            return self.lease_shared(options, metrics).await;
        }
        let pool = self.build(options, metrics).await?;
        Ok(PoolLease { pool, shared: false })
    }

    async fn lease_shared(
        &self,
        options: &TriageOptions,
        metrics: Option<&MetricsCollector>,
    ) -> Result<PoolLease, NntpError> {
        let key = options
            .pool_key()
            .ok_or_else(|| NntpError::Unavailable("no NNTP server configured".into()))?;
        let mut slot = self.shared.lock().await;

        if let Some(shared) = slot.as_mut()
            && shared.key == key
            && !shared.is_stale()
            && !shared.pool.is_closing()
        {
            shared.last_used = Instant::now();
            self.counters.reused();
            if let Some(metrics) = metrics {
                metrics.record_pool_reuse();
            }
            debug!(pool_key = %key, "reusing shared nntp pool");
            return Ok(PoolLease {
                pool: shared.pool.clone(),
                shared: true,
            });
        }

        if let Some(old) = slot.take() {
            let reason = if old.key != key {
                "configuration changed"
            } else {
                "idle past activity window"
            };
            self.retire(old.pool, reason, metrics).await;
        }

        let pool = self.build(options, metrics).await?;
        debug!(pool_key = %key, "shared nntp pool built");
        *slot = Some(SharedPool {
            key,
            pool: pool.clone(),
            last_used: Instant::now(),
            idle_timeout: options.shared_pool_idle_timeout(),
        });
        Ok(PoolLease { pool, shared: true })
    }

    /// End a batch's use of a pool: shared pools stay warm, private ones close
    pub(crate) async fn finish(&self, lease: PoolLease, metrics: Option<&MetricsCollector>) {
        if !lease.shared {
            self.retire(lease.pool, "batch finished", metrics).await;
            return;
        }
        let mut slot = self.shared.lock().await;
        if let Some(shared) = slot.as_mut()
            && shared.pool.ptr_eq(&lease.pool)
        {
            shared.last_used = Instant::now();
        }
    }

    /// Build or refresh the shared pool without running a batch
    pub(crate) async fn pre_warm(&self, options: &TriageOptions) -> Result<(), NntpError> {
        let lease = self.lease_shared(options, None).await?;
        self.finish(lease, None).await;
        Ok(())
    }

    /// Close the shared pool, if any
    pub(crate) async fn close_shared(&self, reason: &str) -> bool {
        let Some(old) = self.shared.lock().await.take() else {
            return false;
        };
        self.retire(old.pool, reason, None).await;
        true
    }

    /// Close the shared pool if it sat unused past its activity window
    pub(crate) async fn evict_stale(&self, reason: &str) -> bool {
        let stale = {
            let mut slot = self.shared.lock().await;
            match slot.as_ref() {
                Some(shared) if shared.is_stale() => slot.take(),
                _ => None,
            }
        };
        match stale {
            Some(old) => {
                self.retire(old.pool, reason, None).await;
                true
            }
            None => false,
        }
    }

    /// Whether a shared pool is currently held
    pub(crate) async fn has_shared(&self) -> bool {
        self.shared.lock().await.is_some()
    }
}
