//! Repository contract and in-memory storage
//!
//! The core reaches persistence only through [`Repository`], generic over
//! entity types implementing [`Entity`]. Filters are conjunctions of `=`,
//! `IN` and `<` predicates over named fields.

use crate::error::{AuthzError, Result};
use crate::types::{AuditEntry, CheckStats, CompiledPolicy, Policy, Principal, Role};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresIndexStore;

/// Comparable field value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Text(value.clone())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// Single field predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(&'static str, FieldValue),
    In(&'static str, Vec<FieldValue>),
    Lt(&'static str, FieldValue),
}

impl Predicate {
    /// Field the predicate applies to
    pub fn field(&self) -> &'static str {
        match self {
            Predicate::Eq(field, _) | Predicate::In(field, _) | Predicate::Lt(field, _) => field,
        }
    }

    fn matches<E: Entity>(&self, entity: &E) -> bool {
        let Some(actual) = entity.field(self.field()) else {
            return false;
        };

        match self {
            Predicate::Eq(_, expected) => actual == *expected,
            Predicate::In(_, candidates) => candidates.contains(&actual),
            Predicate::Lt(_, bound) => actual < *bound,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(field, value) => write!(f, "{field} = {value}"),
            Predicate::Lt(field, value) => write!(f, "{field} < {value}"),
            Predicate::In(field, values) => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{field} IN ({})", values.join(", "))
            }
        }
    }
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Filter matching everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field = value`
    pub fn eq(mut self, field: &'static str, value: impl Into<FieldValue>) -> Self {
        self.predicates.push(Predicate::Eq(field, value.into()));
        self
    }

    /// Require `field IN (values)`
    pub fn is_in<V: Into<FieldValue>>(
        mut self,
        field: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.predicates.push(Predicate::In(field, values));
        self
    }

    /// Require `field < value`
    pub fn lt(mut self, field: &'static str, value: impl Into<FieldValue>) -> Self {
        self.predicates.push(Predicate::Lt(field, value.into()));
        self
    }

    /// Predicates in insertion order
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Whether an entity satisfies every predicate
    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.predicates.iter().all(|p| p.matches(entity))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self.predicates.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(" AND "))
    }
}

/// Offset/limit window over a result set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    /// `None` returns every remaining row
    pub limit: Option<usize>,
}

impl Pagination {
    /// Every row
    pub fn all() -> Self {
        Self::default()
    }

    /// 1-based page of `size` rows
    pub fn page(page: usize, size: usize) -> Self {
        Self {
            offset: page.saturating_sub(1) * size,
            limit: Some(size),
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: &'static str,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: &'static str) -> Self {
        Self { field, descending: false }
    }

    pub fn desc(field: &'static str) -> Self {
        Self { field, descending: true }
    }
}

/// Capabilities the repository needs from a stored type
pub trait Entity: Clone + Send + Sync + 'static {
    /// Entity name used in errors and logs
    const NAME: &'static str;

    /// Primary key
    fn id(&self) -> String;

    /// Named field value used by filters and sorting
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Drop relations that were not requested through preloads
    fn retain_relations(&mut self, _preloads: &[&str]) {}
}

/// Persistence contract consumed by the core
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Get an entity by id, loading the listed relations (`roles`, `roles.policies`, ...)
    async fn get(&self, id: &str, preloads: &[&str]) -> Result<E>;

    /// First entity matching the filter
    async fn get_by_fields(&self, filter: &Filter) -> Result<E>;

    /// Matching entities in the requested window, plus the total match count
    async fn find(
        &self,
        filter: &Filter,
        pagination: Pagination,
        sort: Option<Sort>,
    ) -> Result<(Vec<E>, u64)>;

    /// Insert entities
    async fn create(&self, entities: Vec<E>) -> Result<()>;

    /// Delete every matching entity, returning how many were removed
    async fn delete_by_fields(&self, filter: &Filter) -> Result<u64>;

    /// Replace an existing entity
    async fn update(&self, entity: E) -> Result<()>;
}

/// Split `preloads` into whether `relation` is requested and its nested preloads
fn nested_preloads<'a>(preloads: &[&'a str], relation: &str) -> Option<Vec<&'a str>> {
    let mut requested = false;
    let mut nested = Vec::new();

    for preload in preloads {
        if *preload == relation {
            requested = true;
        } else if let Some(rest) = preload
            .strip_prefix(relation)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            requested = true;
            nested.push(rest);
        }
    }

    requested.then_some(nested)
}

impl Entity for Policy {
    const NAME: &'static str = "policy";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.as_str().into()),
            _ => None,
        }
    }

    fn retain_relations(&mut self, preloads: &[&str]) {
        if nested_preloads(preloads, "resources").is_none() {
            self.resources.clear();
        }
        if nested_preloads(preloads, "actions").is_none() {
            self.actions.clear();
        }
    }
}

impl Entity for Role {
    const NAME: &'static str = "role";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.as_str().into()),
            _ => None,
        }
    }

    fn retain_relations(&mut self, preloads: &[&str]) {
        match nested_preloads(preloads, "policies") {
            Some(nested) => self
                .policies
                .iter_mut()
                .for_each(|p| p.retain_relations(&nested)),
            None => self.policies.clear(),
        }
    }
}

impl Entity for Principal {
    const NAME: &'static str = "principal";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.as_str().into()),
            _ => self
                .attributes
                .get(name)
                .map(|value| FieldValue::Text(value.clone())),
        }
    }

    fn retain_relations(&mut self, preloads: &[&str]) {
        match nested_preloads(preloads, "roles") {
            Some(nested) => self
                .roles
                .iter_mut()
                .for_each(|r| r.retain_relations(&nested)),
            None => self.roles.clear(),
        }
    }
}

impl Entity for CompiledPolicy {
    const NAME: &'static str = "compiled_policy";

    /// Length-prefixed parts, so separators inside a value cannot collide
    fn id(&self) -> String {
        let grantee = self.grantee.to_string();
        [
            grantee.as_str(),
            self.resource_kind.as_str(),
            self.resource_value.as_str(),
            self.action_id.as_str(),
        ]
        .iter()
        .map(|part| format!("{}:{}", part.len(), part))
        .chain(std::iter::once(self.version.to_string()))
        .collect::<Vec<_>>()
        .join("/")
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        use crate::types::Grantee;

        match (name, &self.grantee) {
            ("policy_id", Grantee::Policy(id)) => Some(id.as_str().into()),
            ("principal_id", Grantee::Principal(id)) => Some(id.as_str().into()),
            ("resource_kind", _) => Some(self.resource_kind.as_str().into()),
            ("resource_value", _) => Some(self.resource_value.as_str().into()),
            ("action_id", _) => Some(self.action_id.as_str().into()),
            ("version", _) => Some(self.version.into()),
            ("created_at", _) => Some(self.created_at.timestamp_millis().into()),
            ("updated_at", _) => Some(self.updated_at.timestamp_millis().into()),
            _ => None,
        }
    }
}

impl Entity for AuditEntry {
    const NAME: &'static str = "audit_entry";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.as_str().into()),
            "principal_id" => Some(self.principal_id.as_str().into()),
            "resource_kind" => Some(self.resource_kind.as_str().into()),
            "resource_value" => Some(self.resource_value.as_str().into()),
            "action_id" => Some(self.action_id.as_str().into()),
            "allowed" => Some(self.allowed.into()),
            "timestamp" => Some(self.timestamp.timestamp_millis().into()),
            _ => None,
        }
    }
}

impl Entity for CheckStats {
    const NAME: &'static str = "check_stats";

    fn id(&self) -> String {
        self.day.to_string()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" | "day" => Some(self.day.to_string().into()),
            "allowed" => Some((self.allowed as i64).into()),
            "denied" => Some((self.denied as i64).into()),
            _ => None,
        }
    }
}

/// In-memory repository, keyed by entity id
pub struct InMemoryRepository<E: Entity> {
    rows: Arc<RwLock<BTreeMap<String, E>>>,
}

impl<E: Entity> InMemoryRepository<E> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create a repository holding `entities`
    pub fn with_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let rows = entities.into_iter().map(|e| (e.id(), e)).collect();
        Self {
            rows: Arc::new(RwLock::new(rows)),
        }
    }

    /// Number of stored entities
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the repository is empty
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Every stored entity in key order
    pub async fn all(&self) -> Vec<E> {
        self.rows.read().await.values().cloned().collect()
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_field<E: Entity>(a: &E, b: &E, field: &str) -> Ordering {
    a.field(field).cmp(&b.field(field))
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn get(&self, id: &str, preloads: &[&str]) -> Result<E> {
        let rows = self.rows.read().await;
        let mut entity = rows
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(E::NAME, id))?;
        entity.retain_relations(preloads);
        Ok(entity)
    }

    async fn get_by_fields(&self, filter: &Filter) -> Result<E> {
        let rows = self.rows.read().await;
        rows.values()
            .find(|e| filter.matches(*e))
            .cloned()
            .ok_or_else(|| AuthzError::not_found(E::NAME, filter.to_string()))
    }

    async fn find(
        &self,
        filter: &Filter,
        pagination: Pagination,
        sort: Option<Sort>,
    ) -> Result<(Vec<E>, u64)> {
        let rows = self.rows.read().await;
        let mut matching: Vec<E> = rows.values().filter(|e| filter.matches(*e)).cloned().collect();
        let total = matching.len() as u64;

        if let Some(sort) = sort {
            matching.sort_by(|a, b| {
                let ordering = compare_field(a, b, sort.field);
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let window = matching
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit.unwrap_or(usize::MAX))
            .collect();

        Ok((window, total))
    }

    async fn create(&self, entities: Vec<E>) -> Result<()> {
        let mut rows = self.rows.write().await;
        for entity in entities {
            rows.insert(entity.id(), entity);
        }
        Ok(())
    }

    async fn delete_by_fields(&self, filter: &Filter) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, e| !filter.matches(&*e));
        Ok((before - rows.len()) as u64)
    }

    async fn update(&self, entity: E) -> Result<()> {
        let mut rows = self.rows.write().await;
        let id = entity.id();
        match rows.get_mut(&id) {
            Some(existing) => {
                *existing = entity;
                Ok(())
            }
            None => Err(AuthzError::not_found(E::NAME, id)),
        }
    }
}
