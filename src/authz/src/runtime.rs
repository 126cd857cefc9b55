//! Wiring of dispatcher, compiler, checker and subscribers
//!
//! [`AuthzRuntime::start`] spawns every background task; [`AuthzRuntime::shutdown`]
//! stops them and flushes what the spoolers still hold.

use crate::checker::Checker;
use crate::clock::Clock;
use crate::compiler::PolicyCompiler;
use crate::config::AuthzConfig;
use crate::error::Result;
use crate::events::{Dispatcher, EventPayload, Item, ItemAction};
use crate::store::{InMemoryRepository, Repository};
use crate::subscribers::{
    spawn_audit_subscriber, spawn_compile_subscriber, spawn_metrics_subscriber,
    spawn_stats_subscriber, AuditRetention, CheckMetrics, SubscriberHandle,
};
use crate::types::{AuditEntry, CheckStats, CompiledPolicy, Policy, Principal};
use std::sync::Arc;
use tracing::info;

/// Storage backends used by the runtime
#[derive(Clone)]
pub struct Repositories {
    pub policies: Arc<dyn Repository<Policy>>,
    pub principals: Arc<dyn Repository<Principal>>,
    pub index: Arc<dyn Repository<CompiledPolicy>>,
    pub audit: Arc<dyn Repository<AuditEntry>>,
    pub stats: Arc<dyn Repository<CheckStats>>,
}

impl Repositories {
    /// Every repository in memory
    pub fn in_memory() -> Self {
        Self {
            policies: Arc::new(InMemoryRepository::<Policy>::new()),
            principals: Arc::new(InMemoryRepository::<Principal>::new()),
            index: Arc::new(InMemoryRepository::<CompiledPolicy>::new()),
            audit: Arc::new(InMemoryRepository::<AuditEntry>::new()),
            stats: Arc::new(InMemoryRepository::<CheckStats>::new()),
        }
    }

    /// Replace the flat index backend
    pub fn with_index(mut self, index: Arc<dyn Repository<CompiledPolicy>>) -> Self {
        self.index = index;
        self
    }
}

/// Running authorization core
pub struct AuthzRuntime {
    dispatcher: Arc<Dispatcher>,
    compiler: Arc<PolicyCompiler>,
    checker: Arc<Checker>,
    metrics: Arc<CheckMetrics>,
    subscribers: Vec<SubscriberHandle>,
    retention: AuditRetention,
}

impl AuthzRuntime {
    /// Validate `config` and start every subscriber
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &AuthzConfig, repos: Repositories, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher::with_capacity(
            clock.clone(),
            config.dispatcher.queue_capacity,
        ));
        let compiler = Arc::new(PolicyCompiler::with_config(
            repos.policies.clone(),
            repos.index.clone(),
            clock.clone(),
            config.compiler_config(),
        ));
        let checker = Arc::new(
            Checker::new(repos.principals.clone(), repos.index.clone())
                .with_dispatcher(dispatcher.clone()),
        );
        let metrics = Arc::new(CheckMetrics::new()?);

        let options = config.spooler_options();
        let subscribers = vec![
            spawn_compile_subscriber(&dispatcher, compiler.clone()),
            spawn_audit_subscriber(&dispatcher, repos.audit.clone(), options),
            spawn_stats_subscriber(&dispatcher, repos.stats.clone(), options),
            spawn_metrics_subscriber(&dispatcher, metrics.clone(), options),
        ];

        let mut retention = AuditRetention::new(repos.audit.clone(), clock, config.retention());
        retention.start(config.cleanup_interval());

        info!("Authorization runtime started with {} subscriber(s)", subscribers.len());

        Ok(Self {
            dispatcher,
            compiler,
            checker,
            metrics,
            subscribers,
            retention,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn compiler(&self) -> &Arc<PolicyCompiler> {
        &self.compiler
    }

    pub fn checker(&self) -> &Arc<Checker> {
        &self.checker
    }

    pub fn metrics(&self) -> &Arc<CheckMetrics> {
        &self.metrics
    }

    /// Publish an item-changed event under the item's event type
    pub async fn publish_change(&self, action: ItemAction, item: Item) -> Result<()> {
        let event_type = item.event_type();
        self.dispatcher
            .dispatch(event_type, EventPayload::item_changed(action, item))
            .await
    }

    /// Stop every background task
    ///
    /// Subscribers drain their queues and flush their spoolers before this returns.
    pub async fn shutdown(mut self) {
        for subscriber in self.subscribers.drain(..) {
            subscriber.stop(&self.dispatcher).await;
        }
        self.retention.stop().await;
        self.dispatcher.close();
        info!("Authorization runtime stopped");
    }
}
