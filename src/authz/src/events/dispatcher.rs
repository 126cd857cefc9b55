//! Per-event-type fan-out over bounded queues

use crate::clock::Clock;
use crate::error::{AuthzError, Result};
use crate::events::{Event, EventPayload, EventType};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default capacity of each subscriber queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Event>,
}

/// Receiving side of one subscriber queue
///
/// `recv` returns `None` once the queue has been unsubscribed (or the
/// dispatcher closed) and every buffered event was consumed.
pub struct Subscription {
    id: u64,
    event_type: EventType,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Handle used to unsubscribe
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Next buffered event, without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Event dispatcher
///
/// Owns the subscriber registry; construct one per process (or per test) and
/// share it behind an `Arc`.
pub struct Dispatcher {
    subscribers: DashMap<EventType, Vec<Subscriber>>,
    clock: Arc<dyn Clock>,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with the default queue capacity
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a dispatcher whose queues hold `queue_capacity` events
    pub fn with_capacity(clock: Arc<dyn Clock>, queue_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            clock,
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new bounded queue for `event_type`
    pub fn subscribe(&self, event_type: EventType) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .entry(event_type)
            .or_default()
            .push(Subscriber { id, sender });

        debug!("Subscribed queue {} to {}", id, event_type);

        Subscription {
            id,
            event_type,
            receiver,
        }
    }

    /// Send one event to every queue subscribed to `event_type`, in subscription order
    ///
    /// Waits while a queue is full. Fails with [`AuthzError::NoSubscriber`]
    /// when nobody listens.
    pub async fn dispatch(&self, event_type: EventType, payload: EventPayload) -> Result<()> {
        let senders: Vec<(u64, mpsc::Sender<Event>)> = match self.subscribers.get(&event_type) {
            Some(list) if !list.is_empty() => list
                .iter()
                .map(|s| (s.id, s.sender.clone()))
                .collect(),
            _ => return Err(AuthzError::NoSubscriber(event_type)),
        };

        let event = Event {
            id: Uuid::new_v4().to_string(),
            event_type,
            payload,
            timestamp: self.clock.now(),
        };

        let mut delivered = 0usize;
        for (id, sender) in senders {
            match sender.send(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Queue {} for {} is closed, skipping", id, event_type),
            }
        }

        if delivered == 0 {
            return Err(AuthzError::NoSubscriber(event_type));
        }

        debug!("Dispatched {} {} to {} queue(s)", event_type, event.id, delivered);
        Ok(())
    }

    /// Remove a queue from `event_type`
    ///
    /// The receiver sees end-of-stream after draining what was already queued.
    pub fn unsubscribe(&self, event_type: EventType, id: u64) -> Result<()> {
        let mut list = self
            .subscribers
            .get_mut(&event_type)
            .ok_or(AuthzError::UnknownEventType(event_type))?;

        let position = list
            .iter()
            .position(|s| s.id == id)
            .ok_or(AuthzError::UnknownSubscription { event_type, id })?;
        list.remove(position);

        debug!("Unsubscribed queue {} from {}", id, event_type);
        Ok(())
    }

    /// Number of queues registered for `event_type`
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .get(&event_type)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Drop every queue; consumers finish once they drain
    pub fn close(&self) {
        let queues: usize = self.subscribers.iter().map(|list| list.len()).sum();
        self.subscribers.clear();
        info!("Dispatcher closed {} queue(s)", queues);
    }
}
