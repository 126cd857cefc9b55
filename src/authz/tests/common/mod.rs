//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_authz::store::{Entity, Filter, InMemoryRepository, Pagination, Repository, Sort};
use tessera_authz::{Action, AuthzError, Policy, Principal, Resource, Result, Role};

/// In-memory repository with switchable failures and a record of `create` batch sizes
pub struct FlakyRepository<E: Entity> {
    inner: InMemoryRepository<E>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    create_calls: parking_lot::Mutex<Vec<usize>>,
}

impl<E: Entity> FlakyRepository<E> {
    pub fn new() -> Self {
        Self::with_entities(Vec::new())
    }

    pub fn with_entities(entities: Vec<E>) -> Self {
        Self {
            inner: InMemoryRepository::with_entities(entities),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            create_calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Sizes of the successful `create` calls, in order
    pub fn create_calls(&self) -> Vec<usize> {
        self.create_calls.lock().clone()
    }

    pub async fn all(&self) -> Vec<E> {
        self.inner.all().await
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuthzError::DatabaseError("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthzError::DatabaseError("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for FlakyRepository<E> {
    async fn get(&self, id: &str, preloads: &[&str]) -> Result<E> {
        self.check_read()?;
        self.inner.get(id, preloads).await
    }

    async fn get_by_fields(&self, filter: &Filter) -> Result<E> {
        self.check_read()?;
        self.inner.get_by_fields(filter).await
    }

    async fn find(
        &self,
        filter: &Filter,
        pagination: Pagination,
        sort: Option<Sort>,
    ) -> Result<(Vec<E>, u64)> {
        self.check_read()?;
        self.inner.find(filter, pagination, sort).await
    }

    async fn create(&self, entities: Vec<E>) -> Result<()> {
        self.check_write()?;
        let count = entities.len();
        self.inner.create(entities).await?;
        self.create_calls.lock().push(count);
        Ok(())
    }

    async fn delete_by_fields(&self, filter: &Filter) -> Result<u64> {
        self.check_write()?;
        self.inner.delete_by_fields(filter).await
    }

    async fn update(&self, entity: E) -> Result<()> {
        self.check_write()?;
        self.inner.update(entity).await
    }
}

/// Flush callback that records every batch it receives
pub fn recording_flush<T: Send + 'static>() -> (
    Arc<parking_lot::Mutex<Vec<Vec<T>>>>,
    impl Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
) {
    let batches = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = batches.clone();
    let on_flush = move |batch: Vec<T>| {
        sink.lock().push(batch);
        async {}.boxed()
    };
    (batches, on_flush)
}

/// `post-editors`: edit on every post
pub fn post_editors() -> Policy {
    Policy::new("post-editors")
        .with_resource(Resource::new("posts", "post", "*"))
        .with_action(Action::new("edit"))
}

/// Policy over `resources` × `actions`, resource ids derived from kind and value
pub fn policy(id: &str, resources: &[(&str, &str)], actions: &[&str]) -> Policy {
    let mut policy = Policy::new(id);
    for (kind, value) in resources {
        policy = policy.with_resource(Resource::new(format!("{kind}.{value}"), *kind, *value));
    }
    for action in actions {
        policy = policy.with_action(Action::new(*action));
    }
    policy
}

/// Principal holding one role that carries `policies`
pub fn principal_with(id: &str, role: &str, policies: Vec<Policy>) -> Principal {
    let role = policies
        .into_iter()
        .fold(Role::new(role), |role, policy| role.with_policy(policy));
    Principal::new(id).with_role(role)
}

/// Formatted log output collected from a thread-local subscriber
#[derive(Clone, Default)]
pub struct LogCapture(Arc<parking_lot::Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's `tracing` output into the capture until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
