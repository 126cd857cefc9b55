//! ABAC attribute rules
//!
//! Rules are CEL expressions stored on a policy (e.g.
//! `resource.owner_id == principal.id`). The core parses them so broken rules
//! surface early; evaluating them is left to the attribute matching producer.

use crate::error::{AuthzError, Result};
use cel_interpreter::Program;

/// Parse a rule, rejecting empty or syntactically invalid expressions
pub fn validate_rule(rule: &str) -> Result<()> {
    if rule.trim().is_empty() {
        return Err(AuthzError::InvalidRule {
            rule: rule.to_string(),
            reason: "rule is empty".to_string(),
        });
    }

    Program::compile(rule)
        .map(|_| ())
        .map_err(|e| AuthzError::InvalidRule {
            rule: rule.to_string(),
            reason: format!("{:?}", e),
        })
}

/// Validate a batch of rules, returning every failure
pub fn invalid_rules<'a>(rules: impl IntoIterator<Item = &'a String>) -> Vec<AuthzError> {
    rules
        .into_iter()
        .filter_map(|rule| validate_rule(rule).err())
        .collect()
}
