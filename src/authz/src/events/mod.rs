//! Events exchanged between the write path, the checker and the subscribers
//!
//! Payloads form a closed enum so consumers match exhaustively instead of
//! down-casting.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Subscription, DEFAULT_QUEUE_CAPACITY};

use crate::types::{Action, Policy, Principal, Resource, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing key for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PolicyChanged,
    ResourceChanged,
    ActionChanged,
    RoleChanged,
    PrincipalChanged,
    CheckPerformed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PolicyChanged => "policy.changed",
            EventType::ResourceChanged => "resource.changed",
            EventType::ActionChanged => "action.changed",
            EventType::RoleChanged => "role.changed",
            EventType::PrincipalChanged => "principal.changed",
            EventType::CheckPerformed => "check.performed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation that happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Create,
    Update,
}

/// Mutated entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Item {
    Policy(Policy),
    Resource(Resource),
    Action(Action),
    Role(Role),
    Principal(Principal),
}

impl Item {
    /// Identifier of the wrapped entity
    pub fn id(&self) -> &str {
        match self {
            Item::Policy(p) => &p.id,
            Item::Resource(r) => &r.id,
            Item::Action(a) => &a.id,
            Item::Role(r) => &r.id,
            Item::Principal(p) => &p.id,
        }
    }

    /// Event type a change of this entity is published under
    pub fn event_type(&self) -> EventType {
        match self {
            Item::Policy(_) => EventType::PolicyChanged,
            Item::Resource(_) => EventType::ResourceChanged,
            Item::Action(_) => EventType::ActionChanged,
            Item::Role(_) => EventType::RoleChanged,
            Item::Principal(_) => EventType::PrincipalChanged,
        }
    }
}

/// An entity was created or updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChanged {
    pub action: ItemAction,
    pub item: Item,
}

/// Outcome of one access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPerformed {
    pub principal_id: String,
    pub resource_kind: String,
    pub resource_value: String,
    pub action_id: String,
    pub allowed: bool,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ItemChanged(ItemChanged),
    CheckPerformed(CheckPerformed),
}

impl EventPayload {
    /// Shorthand for an item-changed payload
    pub fn item_changed(action: ItemAction, item: Item) -> Self {
        EventPayload::ItemChanged(ItemChanged { action, item })
    }
}

/// Dispatched event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: String,

    pub event_type: EventType,

    pub payload: EventPayload,

    /// Taken from the dispatcher's clock at dispatch time
    pub timestamp: DateTime<Utc>,
}
