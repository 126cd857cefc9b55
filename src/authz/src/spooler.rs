//! Size/time bounded batching buffer
//!
//! Items queue up until either the flush size is reached or the flush
//! interval elapses, then the whole batch goes to the flush callback in one
//! call. Delivery is best effort: a batch whose callback fails is not retried.

use futures::future::BoxFuture;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default flush interval
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Default flush size threshold
pub const DEFAULT_FLUSH_SIZE: usize = 100;

/// Async flush callback
pub type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Spooler options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoolerOptions {
    /// Maximum queued items; `add` waits when the queue is full
    pub capacity: usize,

    /// Period of the background flush
    pub flush_interval: Duration,

    /// Queue length that triggers an immediate flush
    pub flush_size: usize,
}

impl Default for SpoolerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_size: DEFAULT_FLUSH_SIZE,
        }
    }
}

impl SpoolerOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }
}

struct Inner<T> {
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
    on_flush: FlushFn<T>,
    options: SpoolerOptions,
}

impl<T: Send + 'static> Inner<T> {
    fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    async fn flush(&self) {
        let batch = {
            let mut receiver = self.receiver.lock().await;
            let count = self.queued();
            let mut batch = Vec::with_capacity(count);
            for _ in 0..count {
                match receiver.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }
            batch
        };

        debug!("Spooler flushing {} item(s)", batch.len());
        (self.on_flush)(batch).await;
    }
}

/// Batching buffer, cheap to clone
///
/// Must be created inside a Tokio runtime: construction spawns the periodic
/// flush task. Stop it with [`Spooler::shutdown`]; it also exits on its own
/// once every handle is dropped.
pub struct Spooler<T> {
    inner: Arc<Inner<T>>,
    cancel: CancellationToken,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T> Clone for Spooler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cancel: self.cancel.clone(),
            ticker: self.ticker.clone(),
        }
    }
}

impl<T: Send + 'static> Spooler<T> {
    /// Create a spooler and start its periodic flush
    pub fn new<F>(on_flush: F, options: SpoolerOptions) -> Self
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let options = SpoolerOptions {
            capacity: options.capacity.max(1),
            flush_size: options.flush_size.max(1),
            flush_interval: options.flush_interval.max(Duration::from_millis(1)),
        };
        let (sender, receiver) = mpsc::channel(options.capacity);

        let inner = Arc::new(Inner {
            sender,
            receiver: Mutex::new(receiver),
            on_flush: Arc::new(on_flush),
            options,
        });

        let cancel = CancellationToken::new();
        let ticker = Self::start_ticker(Arc::downgrade(&inner), options.flush_interval, cancel.clone());

        Self {
            inner,
            cancel,
            ticker: Arc::new(Mutex::new(Some(ticker))),
        }
    }

    fn start_ticker(
        inner: Weak<Inner<T>>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.flush().await;
                    }
                }
            }

            debug!("Spooler ticker stopped");
        })
    }

    /// Queue an item, flushing first-hand when the size threshold or capacity is reached
    pub async fn add(&self, item: T) {
        if self.inner.sender.send(item).await.is_err() {
            // The receiver lives in `inner`, which we hold
            warn!("Spooler queue closed, dropping item");
            return;
        }

        let queued = self.inner.queued();
        if queued >= self.inner.options.capacity || queued >= self.inner.options.flush_size {
            self.inner.flush().await;
        }
    }

    /// Drain what is queued right now and hand it to the callback
    ///
    /// Items added while draining wait for the next flush. The callback is
    /// invoked even when nothing was queued.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.inner.queued()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn options(&self) -> SpoolerOptions {
        self.inner.options
    }

    /// Stop the periodic flush and flush what is left
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Spooler ticker ended abnormally: {}", e);
            }
        }
        self.inner.flush().await;
        info!("Spooler shut down");
    }
}
