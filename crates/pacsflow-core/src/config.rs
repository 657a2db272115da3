//! Runtime configuration
//!
//! Read once at startup from TOML; every section falls back to its defaults.
//! Values are immutable after load. Invalid settings are a startup failure,
//! never a failure of a running saga.

use crate::error::{Error, Result};
use crate::state::{ExecutionLimits, ResourceConstraints};
use crate::types::ResourceClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacsflowConfig {
    /// Retry policy for outbound peer operations.
    pub retry: RetrySettings,
    /// Fixed per-class capacities.
    pub resources: ResourceSettings,
    /// Per-workflow execution defaults.
    pub workflow: WorkflowSettings,
    /// Where saga checkpoints and imported files live.
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub use_exponential_backoff: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub import_threads: usize,
    pub anonymization_workers: usize,
    pub network_connections: usize,
    /// How long a unit waits for a grant before the saga fails.
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub parallel_processing_limit: usize,
    pub units_per_item: u32,
    /// Interval between scheduled sync runs.
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub state_dir: PathBuf,
    /// Destination of imported files.
    pub library_dir: PathBuf,
}

// ============================================================
// Defaults
// ============================================================

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 8_000,
            use_exponential_backoff: true,
        }
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            import_threads: 4,
            anonymization_workers: 2,
            network_connections: 2,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { parallel_processing_limit: 4, units_per_item: 1, sync_interval_secs: 900 }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".pacsflow/state"),
            library_dir: PathBuf::from(".pacsflow/library"),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl PacsflowConfig {
    /// Load from a TOML file. A missing file means defaults; anything that
    /// fails to parse or validate is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content)
                    .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::config(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for class in ResourceClass::ALL {
            if self.capacity(class) == 0 {
                return Err(Error::config(format!("capacity for {} must be at least 1", class)));
            }
        }
        if self.workflow.parallel_processing_limit == 0 {
            return Err(Error::config("parallel_processing_limit must be at least 1"));
        }
        if self.workflow.units_per_item == 0 {
            return Err(Error::config("units_per_item must be at least 1"));
        }
        if self.workflow.sync_interval_secs == 0 {
            return Err(Error::config("sync_interval_secs must be at least 1"));
        }
        if self.retry.max_retry_delay_ms < self.retry.initial_retry_delay_ms {
            return Err(Error::config(format!(
                "max_retry_delay_ms ({}) is below initial_retry_delay_ms ({})",
                self.retry.max_retry_delay_ms, self.retry.initial_retry_delay_ms
            )));
        }
        Ok(())
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn capacity(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::ImportThread => self.resources.import_threads,
            ResourceClass::AnonymizationWorker => self.resources.anonymization_workers,
            ResourceClass::NetworkConnection => self.resources.network_connections,
        }
    }

    /// Limits a new saga gets unless the caller overrides them.
    pub fn default_limits(&self) -> ExecutionLimits {
        ExecutionLimits::new(
            self.workflow.parallel_processing_limit,
            ResourceConstraints {
                acquire_timeout_ms: self.resources.acquire_timeout_ms,
                units_per_item: self.workflow.units_per_item,
            },
        )
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.workflow.sync_interval_secs)
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}
