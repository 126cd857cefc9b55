//! Authorization checker
//!
//! Answers "may principal P perform action A on resource K/V" from the flat
//! index. Grants are looked up through the principal's roles' policies first,
//! then through rows attached to the principal directly. Each lookup tries the
//! exact resource value, then the wildcard, and nothing broader.

use crate::error::Result;
use crate::events::{CheckPerformed, Dispatcher, EventPayload, EventType};
use crate::store::{Filter, Repository};
use crate::types::{CompiledPolicy, Principal, WILDCARD};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-only access decisions over the flat index
pub struct Checker {
    principals: Arc<dyn Repository<Principal>>,
    index: Arc<dyn Repository<CompiledPolicy>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

/// Resource values tried in order: the exact value, then the wildcard
fn candidate_values(resource_value: &str) -> Vec<&str> {
    if resource_value == WILDCARD {
        vec![WILDCARD]
    } else {
        vec![resource_value, WILDCARD]
    }
}

impl Checker {
    pub fn new(
        principals: Arc<dyn Repository<Principal>>,
        index: Arc<dyn Repository<CompiledPolicy>>,
    ) -> Self {
        Self {
            principals,
            index,
            dispatcher: None,
        }
    }

    /// Publish a check-performed event after every decision
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Decide whether `principal_id` may perform `action_id` on `resource_kind`/`resource_value`
    ///
    /// A missing grant is `Ok(false)`; a failing backend is an error.
    pub async fn is_allowed(
        &self,
        principal_id: &str,
        resource_kind: &str,
        resource_value: &str,
        action_id: &str,
    ) -> Result<bool> {
        let allowed = match self
            .decide(principal_id, resource_kind, resource_value, action_id)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    principal_id,
                    resource_kind,
                    resource_value,
                    action_id,
                    error = %e,
                    "Authorization check failed"
                );
                return Err(e);
            }
        };

        debug!(
            principal_id,
            resource_kind, resource_value, action_id, allowed, "Authorization check"
        );

        if let Some(dispatcher) = &self.dispatcher {
            let payload = EventPayload::CheckPerformed(CheckPerformed {
                principal_id: principal_id.to_string(),
                resource_kind: resource_kind.to_string(),
                resource_value: resource_value.to_string(),
                action_id: action_id.to_string(),
                allowed,
            });
            if let Err(e) = dispatcher.dispatch(EventType::CheckPerformed, payload).await {
                warn!("Failed to publish check result: {}", e);
            }
        }

        Ok(allowed)
    }

    async fn decide(
        &self,
        principal_id: &str,
        resource_kind: &str,
        resource_value: &str,
        action_id: &str,
    ) -> Result<bool> {
        let principal = self
            .principals
            .get(principal_id, &["roles", "roles.policies"])
            .await?;

        let policy_ids: BTreeSet<&str> = principal
            .roles
            .iter()
            .flat_map(|role| role.policies.iter().map(|policy| policy.id.as_str()))
            .collect();

        Ok(self
            .is_policy_allowed(&policy_ids, resource_kind, resource_value, action_id)
            .await?
            || self
                .is_principal_allowed(principal_id, resource_kind, resource_value, action_id)
                .await?)
    }

    async fn is_policy_allowed(
        &self,
        policy_ids: &BTreeSet<&str>,
        resource_kind: &str,
        resource_value: &str,
        action_id: &str,
    ) -> Result<bool> {
        if policy_ids.is_empty() {
            return Ok(false);
        }

        let grantee = Filter::new().is_in("policy_id", policy_ids.iter().copied());
        self.lookup(grantee, resource_kind, resource_value, action_id).await
    }

    async fn is_principal_allowed(
        &self,
        principal_id: &str,
        resource_kind: &str,
        resource_value: &str,
        action_id: &str,
    ) -> Result<bool> {
        let grantee = Filter::new().eq("principal_id", principal_id);
        self.lookup(grantee, resource_kind, resource_value, action_id).await
    }

    async fn lookup(
        &self,
        grantee: Filter,
        resource_kind: &str,
        resource_value: &str,
        action_id: &str,
    ) -> Result<bool> {
        for value in candidate_values(resource_value) {
            let filter = grantee
                .clone()
                .eq("resource_kind", resource_kind)
                .eq("resource_value", value)
                .eq("action_id", action_id);

            match self.index.get_by_fields(&filter).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(false)
    }
}
