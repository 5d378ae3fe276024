//! Bounded-concurrency batch scheduler
//!
//! One batch leases a pool, analyzes every payload with at most
//! `max_parallel_nzbs` analyses in flight, and hands the pool back. Failures
//! of a single NZB (errors and panics alike) become `analysis-error`
//! decisions; they never abort the batch.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::TriageOptions;
use crate::metrics::MetricsCollector;
use crate::nntp::registry::{PoolLease, PoolRegistry};
use crate::triage::{NntpAccess, TriageEnv, analyze_nzb};
use crate::types::TriageDecision;

/// Analyze a whole batch; decisions come back in input order
pub(crate) async fn run_batch(
    registry: &PoolRegistry,
    options: &TriageOptions,
    payloads: &[String],
    metrics: &MetricsCollector,
) -> Vec<TriageDecision> {
    let (access, lease) = open_access(registry, options, metrics).await;
    let env = TriageEnv {
        options,
        access: &access,
        metrics,
    };
    let decisions = analyze_all(payloads, &env).await;
    if let Some(lease) = lease {
        registry.finish(lease, Some(metrics)).await;
    }
    decisions
}

/// Lease a pool when a server is configured. Build failures degrade to
/// [`NntpAccess::Failed`] so the batch still runs its offline checks.
async fn open_access(
    registry: &PoolRegistry,
    options: &TriageOptions,
    metrics: &MetricsCollector,
) -> (NntpAccess, Option<PoolLease>) {
    if options.nntp_config.is_none() {
        debug!("no nntp server configured, network checks disabled");
        return (NntpAccess::Disabled, None);
    }
    match registry.lease(options, Some(metrics)).await {
        Ok(lease) => (NntpAccess::Ready(lease.pool.clone()), Some(lease)),
        Err(e) => {
            warn!(error = %e, "nntp pool unavailable, continuing without network checks");
            (NntpAccess::Failed { kind: e.kind() }, None)
        }
    }
}

/// Run [`analyze_nzb`] over `payloads` with a concurrency cap
pub(crate) async fn analyze_all(payloads: &[String], env: &TriageEnv<'_>) -> Vec<TriageDecision> {
    let workers = env.options.worker_count(payloads.len()).max(1);
    let permits = Semaphore::new(workers);
    debug!(nzbs = payloads.len(), workers, "scheduling batch");

    let analyses = payloads.iter().enumerate().map(|(nzb_index, payload)| {
        let permits = &permits;
        async move {
            let Ok(_permit) = permits.acquire().await else {
                return TriageDecision::analysis_error(nzb_index, "scheduler closed");
            };
            let _active = env.metrics.enter_nzb();
            match AssertUnwindSafe(analyze_nzb(nzb_index, payload, env))
                .catch_unwind()
                .await
            {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => {
                    warn!(nzb_index, error = %e, "nzb analysis failed");
                    TriageDecision::analysis_error(nzb_index, &e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(nzb_index, error = %message, "nzb analysis panicked");
                    TriageDecision::analysis_error(nzb_index, &message)
                }
            }
        }
    });
    join_all(analyses).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "analysis panicked".to_string()
    }
}
