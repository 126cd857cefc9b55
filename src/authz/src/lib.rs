//! # Tessera Authorization Core
//!
//! Policy compilation into a flat, versioned permission index, plus the event
//! pipeline that keeps it current and records every decision.
//!
//! ## Features
//!
//! - **Policy compiler** denormalizing resources × actions into index rows
//! - **Authorization checker** with exact-value then wildcard lookup
//! - **Event dispatcher** with bounded per-subscriber queues
//! - **Spooler** batching audit, stats and metrics writes
//! - **PostgreSQL** flat index through `sqlx` (`postgres` feature)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_authz::store::Repository;
//! use tessera_authz::{
//!     Action, AuthzConfig, AuthzRuntime, Policy, Principal, Repositories, Resource, Role,
//!     SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tessera_authz::Result<()> {
//!     let repos = Repositories::in_memory();
//!
//!     let policy = Policy::new("post-editors")
//!         .with_resource(Resource::new("posts", "post", "*"))
//!         .with_action(Action::new("edit"));
//!     repos.policies.create(vec![policy.clone()]).await?;
//!     repos
//!         .principals
//!         .create(vec![Principal::new("alice").with_role(Role::new("editor").with_policy(policy))])
//!         .await?;
//!
//!     let runtime = AuthzRuntime::start(&AuthzConfig::default(), repos, Arc::new(SystemClock))?;
//!     runtime.compiler().compile_policy("post-editors").await?;
//!
//!     assert!(runtime.checker().is_allowed("alice", "post", "42", "edit").await?);
//!     assert!(!runtime.checker().is_allowed("alice", "post", "42", "delete").await?);
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod checker;
pub mod clock;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod rules;
pub mod runtime;
pub mod spooler;
pub mod store;
pub mod subscribers;
pub mod types;

// Re-export commonly used types
pub use checker::Checker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compiler::{CompilerConfig, PolicyCompiler};
pub use config::AuthzConfig;
pub use error::{AuthzError, Result};
pub use events::{
    CheckPerformed, Dispatcher, Event, EventPayload, EventType, Item, ItemAction, ItemChanged,
    Subscription,
};
pub use runtime::{AuthzRuntime, Repositories};
pub use spooler::{Spooler, SpoolerOptions};
pub use store::{Filter, InMemoryRepository, Pagination, Repository};
pub use subscribers::{AuditRetention, CheckMetrics, SubscriberHandle};
pub use types::{
    Action, AuditEntry, CheckStats, CompiledPolicy, Grantee, Policy, Principal, Resource, Role,
    WILDCARD,
};
