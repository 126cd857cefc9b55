//! Configuration loading and validation

use crate::compiler::CompilerConfig;
use crate::error::{AuthzError, Result};
use crate::spooler::SpoolerOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete authorization core configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub dispatcher: DispatcherSection,

    #[serde(default)]
    pub spooler: SpoolerSection,

    #[serde(default)]
    pub compiler: CompilerSection,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub log: LogSection,

    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DispatcherSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpoolerSection {
    #[serde(default = "default_spool_capacity")]
    pub capacity: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompilerSection {
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuditSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DatabaseSection {
    /// PostgreSQL URL for the flat index; in-memory when unset
    #[serde(default)]
    pub url: Option<String>,
}

fn default_queue_capacity() -> usize { crate::events::DEFAULT_QUEUE_CAPACITY }
fn default_spool_capacity() -> usize { crate::spooler::DEFAULT_CAPACITY }
fn default_flush_interval() -> u64 { 3000 }
fn default_flush_size() -> usize { crate::spooler::DEFAULT_FLUSH_SIZE }
fn default_insert_batch_size() -> usize { crate::compiler::DEFAULT_INSERT_BATCH_SIZE }
fn default_retention_days() -> u32 { 30 }
fn default_cleanup_interval() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }

impl Default for DispatcherSection {
    fn default() -> Self {
        Self { queue_capacity: default_queue_capacity() }
    }
}

impl Default for SpoolerSection {
    fn default() -> Self {
        Self {
            capacity: default_spool_capacity(),
            flush_interval_ms: default_flush_interval(),
            flush_size: default_flush_size(),
        }
    }
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self { insert_batch_size: default_insert_batch_size() }
    }
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl AuthzConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AuthzError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.queue_capacity == 0 {
            return Err(config_error("dispatcher.queue_capacity must be greater than 0"));
        }

        if self.spooler.capacity == 0 {
            return Err(config_error("spooler.capacity must be greater than 0"));
        }
        if self.spooler.flush_size == 0 {
            return Err(config_error("spooler.flush_size must be greater than 0"));
        }
        if self.spooler.flush_interval_ms == 0 {
            return Err(config_error("spooler.flush_interval_ms must be greater than 0"));
        }

        if self.compiler.insert_batch_size == 0 {
            return Err(config_error("compiler.insert_batch_size must be greater than 0"));
        }

        if self.audit.retention_days == 0 {
            return Err(config_error("audit.retention_days must be greater than 0"));
        }
        if self.audit.cleanup_interval_secs == 0 {
            return Err(config_error("audit.cleanup_interval_secs must be greater than 0"));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(config_error("database.url must not be empty when set"));
            }
        }

        Ok(())
    }

    pub fn spooler_options(&self) -> SpoolerOptions {
        SpoolerOptions {
            capacity: self.spooler.capacity,
            flush_interval: Duration::from_millis(self.spooler.flush_interval_ms),
            flush_size: self.spooler.flush_size,
        }
    }

    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            insert_batch_size: self.compiler.insert_batch_size,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.audit.retention_days))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.audit.cleanup_interval_secs)
    }
}

fn config_error(msg: &str) -> AuthzError {
    AuthzError::Config(msg.to_string())
}
