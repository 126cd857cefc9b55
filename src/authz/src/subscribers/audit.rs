//! Audit trail of authorization decisions
//!
//! Check events are spooled and written to the audit repository in batches.
//! [`AuditRetention`] deletes entries older than the retention window.

use crate::clock::Clock;
use crate::error::Result;
use crate::events::Dispatcher;
use crate::spooler::{Spooler, SpoolerOptions};
use crate::store::{Filter, Repository};
use crate::subscribers::{spawn_check_consumer, SubscriberHandle};
use crate::types::AuditEntry;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Spool check events into `repo`
pub fn spawn_audit_subscriber(
    dispatcher: &Dispatcher,
    repo: Arc<dyn Repository<AuditEntry>>,
    options: SpoolerOptions,
) -> SubscriberHandle {
    let spooler = Spooler::new(
        move |batch: Vec<AuditEntry>| {
            let repo = repo.clone();
            async move {
                if batch.is_empty() {
                    return;
                }
                let count = batch.len();
                match repo.create(batch).await {
                    Ok(()) => debug!("Wrote {} audit entries", count),
                    Err(e) => error!("Failed to write {} audit entries: {}", count, e),
                }
            }
            .boxed()
        },
        options,
    );

    spawn_check_consumer("audit", dispatcher, spooler, |event, check| AuditEntry {
        id: event.id.clone(),
        principal_id: check.principal_id.clone(),
        resource_kind: check.resource_kind.clone(),
        resource_value: check.resource_value.clone(),
        action_id: check.action_id.clone(),
        allowed: check.allowed,
        timestamp: event.timestamp,
    })
}

/// Periodic deletion of expired audit entries
pub struct AuditRetention {
    repo: Arc<dyn Repository<AuditEntry>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AuditRetention {
    pub fn new(
        repo: Arc<dyn Repository<AuditEntry>>,
        clock: Arc<dyn Clock>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            retention,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Delete entries older than the retention window, returning how many went
    pub async fn run_once(&self) -> Result<u64> {
        purge(self.repo.as_ref(), self.clock.as_ref(), self.retention).await
    }

    /// Run [`AuditRetention::run_once`] every `every`, first run after one period
    pub fn start(&mut self, every: Duration) {
        if self.handle.is_some() {
            warn!("Audit retention already running");
            return;
        }

        let repo = self.repo.clone();
        let clock = self.clock.clone();
        let retention = self.retention;
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = purge(repo.as_ref(), clock.as_ref(), retention).await {
                            error!("Audit retention failed: {}", e);
                        }
                    }
                }
            }
        }));

        info!("Audit retention started: keep {} day(s), run every {:?}", retention.num_days(), every);
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Audit retention ended abnormally: {}", e);
            }
        }
    }
}

async fn purge(
    repo: &dyn Repository<AuditEntry>,
    clock: &dyn Clock,
    retention: chrono::Duration,
) -> Result<u64> {
    let cutoff = clock.now() - retention;
    let deleted = repo
        .delete_by_fields(&Filter::new().lt("timestamp", cutoff.timestamp_millis()))
        .await?;
    if deleted > 0 {
        info!("Deleted {} audit entries older than {}", deleted, cutoff);
    }
    Ok(deleted)
}
