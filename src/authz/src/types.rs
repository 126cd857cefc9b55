//! Core authorization types

use crate::error::{AuthzError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique policy identifier
pub type PolicyId = String;

/// Unique role identifier
pub type RoleId = String;

/// Unique principal identifier
pub type PrincipalId = String;

/// Reserved resource value meaning "any instance of this kind"
pub const WILDCARD: &str = "*";

/// Resource a policy grants access to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier
    pub id: String,

    /// Resource kind, the namespace (e.g. "post", "comment")
    pub kind: String,

    /// Instance value, or `*` for every instance of the kind
    pub value: String,
}

impl Resource {
    /// Create a new resource
    pub fn new(id: impl Into<String>, kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Parse the `kind.value` shorthand (e.g. `post.*`, `post.42`)
    ///
    /// The shorthand doubles as the resource identifier.
    pub fn parse(shorthand: &str) -> Result<Self> {
        match shorthand.split_once('.') {
            Some((kind, value)) if !kind.is_empty() && !value.is_empty() => {
                Ok(Self::new(shorthand, kind, value))
            }
            _ => Err(AuthzError::InvalidInput(format!(
                "invalid resource '{shorthand}' (expected \"kind.value\")"
            ))),
        }
    }

    /// Whether this resource covers every instance of its kind
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }
}

/// Action (verb) a policy grants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier (edit, delete, ...)
    pub id: String,
}

impl Action {
    /// Create a new action
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Policy: a named bundle of resources, actions and optional attribute rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier
    pub id: PolicyId,

    /// Resources covered by the policy (order is irrelevant)
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Actions granted on every resource
    #[serde(default)]
    pub actions: Vec<Action>,

    /// ABAC refinements such as `resource.owner_id == principal.id`
    #[serde(default)]
    pub attribute_rules: Vec<String>,
}

impl Policy {
    /// Create an empty policy
    pub fn new(id: impl Into<PolicyId>) -> Self {
        Self {
            id: id.into(),
            resources: Vec::new(),
            actions: Vec::new(),
            attribute_rules: Vec::new(),
        }
    }

    /// Add a resource
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add an action
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an attribute rule
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.attribute_rules.push(rule.into());
        self
    }

    /// Validate identifiers and parse every attribute rule
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AuthzError::InvalidPolicy(
                "Policy id cannot be empty".to_string(),
            ));
        }

        for rule in &self.attribute_rules {
            crate::rules::validate_rule(rule)?;
        }

        Ok(())
    }
}

/// Role: a named bundle of policies attached to principals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Policies granted by the role
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl Role {
    /// Create a role without policies
    pub fn new(id: impl Into<RoleId>) -> Self {
        Self {
            id: id.into(),
            policies: Vec::new(),
        }
    }

    /// Attach a policy
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }
}

/// Principal (user, service, client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier
    pub id: PrincipalId,

    /// Roles held by the principal
    #[serde(default)]
    pub roles: Vec<Role>,

    /// Key/value attributes (department, owner ids, ...)
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Principal {
    /// Create a principal without roles
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Attach a role
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Owner of a compiled grant: a policy or, for externally produced rows, a principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grantee {
    Policy(PolicyId),
    Principal(PrincipalId),
}

impl Grantee {
    /// Column holding this grantee in the flat index
    pub fn column(&self) -> &'static str {
        match self {
            Grantee::Policy(_) => "policy_id",
            Grantee::Principal(_) => "principal_id",
        }
    }

    /// Grantee identifier
    pub fn id(&self) -> &str {
        match self {
            Grantee::Policy(id) | Grantee::Principal(id) => id,
        }
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column(), self.id())
    }
}

/// One row of the flat index
///
/// Rows are only ever inserted (new version) or deleted (stale versions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub grantee: Grantee,
    pub resource_kind: String,
    pub resource_value: String,
    pub action_id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompiledPolicy {
    /// Row granted through a policy
    pub fn for_policy(
        policy_id: impl Into<PolicyId>,
        resource: &Resource,
        action: &Action,
        version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(Grantee::Policy(policy_id.into()), resource, action, version, now)
    }

    /// Row granted directly to a principal, for producers outside the compiler
    pub fn for_principal(
        principal_id: impl Into<PrincipalId>,
        resource: &Resource,
        action: &Action,
        version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(Grantee::Principal(principal_id.into()), resource, action, version, now)
    }

    fn build(
        grantee: Grantee,
        resource: &Resource,
        action: &Action,
        version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            grantee,
            resource_kind: resource.kind.clone(),
            resource_value: resource.value.clone(),
            action_id: action.id.clone(),
            version,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable record of one access decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID (the originating event id)
    pub id: String,
    pub principal_id: PrincipalId,
    pub resource_kind: String,
    pub resource_value: String,
    pub action_id: String,
    pub allowed: bool,
    /// Time the check event was dispatched
    pub timestamp: DateTime<Utc>,
}

/// Allowed/denied counters for one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStats {
    pub day: NaiveDate,
    pub allowed: u64,
    pub denied: u64,
}

impl CheckStats {
    /// Empty counters for a day
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            allowed: 0,
            denied: 0,
        }
    }

    /// Total decisions counted
    pub fn total(&self) -> u64 {
        self.allowed + self.denied
    }
}
