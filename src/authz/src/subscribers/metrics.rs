//! Prometheus metrics for authorization checks

use crate::error::{AuthzError, Result};
use crate::events::{CheckPerformed, Dispatcher};
use crate::spooler::{Spooler, SpoolerOptions};
use crate::subscribers::{spawn_check_consumer, SubscriberHandle};
use futures::FutureExt;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "tessera";

/// Check counters exposed to Prometheus
pub struct CheckMetrics {
    /// Checks by resource kind, action and decision
    pub checks: IntCounterVec,

    /// Size of the batches handed over by the spooler
    pub batch_size: Histogram,

    registry: Registry,
}

fn metrics_error(e: prometheus::Error) -> AuthzError {
    AuthzError::Internal(format!("metrics: {}", e))
}

impl CheckMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let checks = IntCounterVec::new(
            Opts::new("authz_checks_total", "Authorization checks performed").namespace(NAMESPACE),
            &["resource_kind", "action", "decision"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(checks.clone()))
            .map_err(metrics_error)?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("authz_check_batch_size", "Check events per spooler flush")
                .namespace(NAMESPACE)
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(batch_size.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            checks,
            batch_size,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one flushed batch
    pub fn record(&self, batch: &[CheckPerformed]) {
        if batch.is_empty() {
            return;
        }
        self.batch_size.observe(batch.len() as f64);
        for check in batch {
            let decision = if check.allowed { "allow" } else { "deny" };
            self.checks
                .with_label_values(&[&check.resource_kind, &check.action_id, decision])
                .inc();
        }
    }

    /// Current value of one check counter
    pub fn count(&self, resource_kind: &str, action_id: &str, allowed: bool) -> u64 {
        let decision = if allowed { "allow" } else { "deny" };
        self.checks
            .with_label_values(&[resource_kind, action_id, decision])
            .get()
    }

    /// Render the registry in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| AuthzError::Internal(e.to_string()))
    }
}

/// Spool check events into `metrics`
pub fn spawn_metrics_subscriber(
    dispatcher: &Dispatcher,
    metrics: Arc<CheckMetrics>,
    options: SpoolerOptions,
) -> SubscriberHandle {
    let spooler = Spooler::new(
        move |batch: Vec<CheckPerformed>| {
            metrics.record(&batch);
            async {}.boxed()
        },
        options,
    );

    spawn_check_consumer("metrics", dispatcher, spooler, |_, check| check.clone())
}
