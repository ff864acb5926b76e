//! Configuration types for the usersync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main usersync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// User pool to sync with; `None` disables directory synchronization
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,

    /// Where `ManagedUser` objects live
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Controller loop settings
    #[serde(default)]
    pub controller: ControllerConfig,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory configuration
    pub fn with_directory(mut self, directory: DirectoryConfig) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(directory) = &self.directory {
            directory.validate()?;
        }
        self.object_store.validate()?;
        self.controller.validate()?;
        Ok(())
    }
}

/// User pool identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserPoolRef {
    /// Pool id as issued by the provider
    Id(String),
    /// Pool name, resolved to an id at startup
    Name(String),
}

impl UserPoolRef {
    fn value(&self) -> &str {
        match self {
            UserPoolRef::Id(v) | UserPoolRef::Name(v) => v,
        }
    }
}

/// Directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryConfig {
    /// AWS Cognito user pool
    Cognito {
        /// Pool to manage
        user_pool: UserPoolRef,
        /// AWS region, e.g. `eu-west-1`
        region: String,
        /// Endpoint override (signing proxy, local emulator)
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// In-process directory (not persistent)
    Memory,

    /// Custom directory
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl DirectoryConfig {
    /// Validate the directory configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            DirectoryConfig::Cognito {
                user_pool,
                region,
                endpoint,
            } => {
                if user_pool.value().trim().is_empty() {
                    return Err(crate::Error::config("Cognito user pool cannot be empty"));
                }
                if region.trim().is_empty() && endpoint.is_none() {
                    return Err(crate::Error::config(
                        "Cognito region is required when no endpoint is set",
                    ));
                }
                if let Some(endpoint) = endpoint
                    && !endpoint.starts_with("http://")
                    && !endpoint.starts_with("https://")
                {
                    return Err(crate::Error::config(format!(
                        "Cognito endpoint must use HTTP or HTTPS scheme. Got: {}",
                        endpoint
                    )));
                }
                Ok(())
            }
            DirectoryConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom directory factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom directory config cannot be null",
                    ));
                }
                Ok(())
            }
            DirectoryConfig::Memory => Ok(()),
        }
    }

    /// Get the directory type name
    pub fn type_name(&self) -> &str {
        match self {
            DirectoryConfig::Cognito { .. } => "cognito",
            DirectoryConfig::Memory => "memory",
            DirectoryConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// File-based store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ObjectStoreConfig {
    /// Validate the object store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ObjectStoreConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("File object store path cannot be empty"))
            }
            ObjectStoreConfig::Custom { factory, .. } if factory.is_empty() => Err(
                crate::Error::config("Custom object store factory cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            ObjectStoreConfig::File { .. } => "file",
            ObjectStoreConfig::Memory => "memory",
            ObjectStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fixed delay before retrying a pass that failed against the directory
    #[serde(default = "default_requeue_after_secs")]
    pub requeue_after_secs: u64,

    /// Delay before retrying a pass that failed against the object store
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Upper bound on a single pass; a timed-out pass is retried
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// Number of resources reconciled concurrently
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Interval of the periodic resync trigger
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Capacity of the controller event channel
    ///
    /// When full, events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ControllerConfig {
    /// Validate the controller configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_reconciles == 0 {
            return Err(crate::Error::config(
                "max_concurrent_reconciles must be > 0",
            ));
        }
        if self.reconcile_timeout_secs == 0 {
            return Err(crate::Error::config("reconcile_timeout_secs must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    /// Fixed directory retry delay
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    /// Object store retry delay
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Per-pass timeout
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_after_secs: default_requeue_after_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            resync_interval_secs: default_resync_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_requeue_after_secs() -> u64 {
    300
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_reconcile_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_resync_interval_secs() -> u64 {
    600
}

fn default_event_channel_capacity() -> usize {
    1000
}
