//! Error types for the authorization core

use crate::events::EventType;
use thiserror::Error;

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Entity lookup found nothing
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity name (e.g. "policy", "compiled_policy")
        entity: &'static str,
        /// Identifier or filter that was looked up
        key: String,
    },

    /// Invalid policy definition
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// ABAC attribute rule failed to parse
    #[error("Invalid attribute rule '{rule}': {reason}")]
    InvalidRule {
        /// The offending rule text
        rule: String,
        /// Parser message
        reason: String,
    },

    /// Dispatch into an event type nobody listens to
    #[error("No subscriber for event type {0}")]
    NoSubscriber(EventType),

    /// Unsubscribe from an event type that was never subscribed
    #[error("Unknown event type {0}")]
    UnknownEventType(EventType),

    /// Unsubscribe with a handle that is not registered
    #[error("Subscription {id} not registered for {event_type}")]
    UnknownSubscription {
        /// Event type the handle was removed from
        event_type: EventType,
        /// Subscription handle id
        id: u64,
    },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Whether this error is a legitimate "no such row" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
