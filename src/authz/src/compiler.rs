//! Policy compiler
//!
//! Denormalizes a policy's resources × actions into versioned rows of the
//! flat index, then retires the rows of older versions.

use crate::clock::Clock;
use crate::error::Result;
use crate::rules;
use crate::store::{Filter, Repository};
use crate::types::{CompiledPolicy, Policy};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of rows per insert statement
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;

/// Compiler configuration
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Maximum rows handed to a single `create` call
    pub insert_batch_size: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

/// Per-grantee compile state
#[derive(Default)]
struct GranteeSlot {
    last_version: Option<i64>,
}

/// Writes the flat index from policy definitions
///
/// Keeps one slot per policy it has ever compiled, holding the lock that
/// serializes compiles and the last version written. Slots are never evicted.
/// Both are local to this instance: run a single compiler per index, since a
/// second one would neither wait on these locks nor see a same-second
/// version bump.
pub struct PolicyCompiler {
    policies: Arc<dyn Repository<Policy>>,
    index: Arc<dyn Repository<CompiledPolicy>>,
    clock: Arc<dyn Clock>,
    config: CompilerConfig,
    /// Serializes compiles of the same policy
    slots: DashMap<String, Arc<Mutex<GranteeSlot>>>,
}

impl PolicyCompiler {
    pub fn new(
        policies: Arc<dyn Repository<Policy>>,
        index: Arc<dyn Repository<CompiledPolicy>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(policies, index, clock, CompilerConfig::default())
    }

    pub fn with_config(
        policies: Arc<dyn Repository<Policy>>,
        index: Arc<dyn Repository<CompiledPolicy>>,
        clock: Arc<dyn Clock>,
        config: CompilerConfig,
    ) -> Self {
        Self {
            policies,
            index,
            clock,
            config,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, policy_id: &str) -> Arc<Mutex<GranteeSlot>> {
        self.slots
            .entry(policy_id.to_string())
            .or_default()
            .clone()
    }

    /// Compile one policy into the flat index
    ///
    /// A policy without resources or without actions is left untouched. On
    /// failure the index keeps whatever was written; the next change event
    /// recompiles.
    pub async fn compile_policy(&self, policy_id: &str) -> Result<()> {
        let slot = self.slot(policy_id);
        let mut slot = slot.lock().await;

        let policy = self
            .policies
            .get(policy_id, &["resources", "actions"])
            .await?;

        if policy.resources.is_empty() || policy.actions.is_empty() {
            debug!(
                "Policy {} has {} resource(s) and {} action(s), nothing to compile",
                policy_id,
                policy.resources.len(),
                policy.actions.len()
            );
            return Ok(());
        }

        for err in rules::invalid_rules(&policy.attribute_rules) {
            warn!("Policy {} carries an invalid attribute rule: {}", policy_id, err);
        }

        let now = self.clock.now();
        let version = match slot.last_version {
            Some(last) if now.timestamp() <= last => last + 1,
            _ => now.timestamp(),
        };

        let rows: Vec<CompiledPolicy> = policy
            .resources
            .iter()
            .flat_map(|resource| {
                policy.actions.iter().map(move |action| {
                    CompiledPolicy::for_policy(policy_id, resource, action, version, now)
                })
            })
            .collect();
        let total = rows.len();

        for batch in rows.chunks(self.config.insert_batch_size.max(1)) {
            self.index.create(batch.to_vec()).await?;
        }

        let retired = self
            .index
            .delete_by_fields(&Filter::new().eq("policy_id", policy_id).lt("version", version))
            .await?;

        slot.last_version = Some(version);

        info!(
            "Compiled policy {} at version {}: {} row(s) written, {} stale row(s) retired",
            policy_id, version, total, retired
        );
        Ok(())
    }
}
