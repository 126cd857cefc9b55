//! Event consumers wiring the dispatcher to the compiler and to spooled writers
//!
//! Each consumer owns one dispatcher queue and runs until that queue ends,
//! i.e. until it is unsubscribed through [`SubscriberHandle::stop`] or the
//! dispatcher is closed.

pub mod audit;
pub mod compile;
pub mod metrics;
pub mod stats;

pub use audit::{spawn_audit_subscriber, AuditRetention};
pub use compile::spawn_compile_subscriber;
pub use metrics::{spawn_metrics_subscriber, CheckMetrics};
pub use stats::spawn_stats_subscriber;

use crate::events::{CheckPerformed, Dispatcher, Event, EventPayload, EventType};
use crate::spooler::Spooler;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running consumer task
pub struct SubscriberHandle {
    name: &'static str,
    event_type: EventType,
    subscription_id: u64,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    pub(crate) fn new(
        name: &'static str,
        event_type: EventType,
        subscription_id: u64,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            event_type,
            subscription_id,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Whether the consumer task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Unsubscribe the queue and wait for the consumer to drain it
    pub async fn stop(self, dispatcher: &Dispatcher) {
        if let Err(e) = dispatcher.unsubscribe(self.event_type, self.subscription_id) {
            // Already gone when the dispatcher was closed first
            debug!("{} subscriber: {}", self.name, e);
        }

        if let Err(e) = self.task.await {
            warn!("{} subscriber ended abnormally: {}", self.name, e);
        }
        info!("{} subscriber stopped", self.name);
    }
}

/// Spawn a consumer that feeds every check-performed event into `spooler`
///
/// The spooler is shut down (and flushed) when the queue ends.
pub(crate) fn spawn_check_consumer<T, F>(
    name: &'static str,
    dispatcher: &Dispatcher,
    spooler: Spooler<T>,
    convert: F,
) -> SubscriberHandle
where
    T: Send + 'static,
    F: Fn(&Event, &CheckPerformed) -> T + Send + 'static,
{
    let mut subscription = dispatcher.subscribe(EventType::CheckPerformed);
    let subscription_id = subscription.id();

    let task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match &event.payload {
                EventPayload::CheckPerformed(check) => spooler.add(convert(&event, check)).await,
                EventPayload::ItemChanged(changed) => {
                    debug!("{} subscriber ignoring change of {}", name, changed.item.id());
                }
            }
        }
        spooler.shutdown().await;
    });

    info!("{} subscriber started", name);
    SubscriberHandle::new(name, EventType::CheckPerformed, subscription_id, task)
}
