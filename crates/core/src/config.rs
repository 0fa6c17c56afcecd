//! Engine tuning configuration.
//!
//! All knobs have sensible defaults; a TOML file is only needed to override
//! them. The CLI maps its flags onto this struct after loading.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

/// When the applier starts consuming ready rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Non-conflicting rows are applied as soon as they are classified,
    /// overlapping the hashing stage.
    #[default]
    Streaming,
    /// Apply begins only after classification completes.
    Deferred,
}

impl std::fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Tuning knobs for a merge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Fingerprint worker count (default: physical cores).
    #[serde(default = "default_workers")]
    pub hash_workers: usize,

    /// Apply worker count (default: same as the fingerprint pool).
    #[serde(default = "default_workers")]
    pub apply_workers: usize,

    /// Read chunk size for hashing and copying, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum rows per store transaction.
    #[serde(default = "default_batch_size")]
    pub commit_batch_size: usize,

    /// Apply scheduling mode.
    #[serde(default)]
    pub apply_mode: ApplyMode,

    /// Minimum interval between progress events, in milliseconds.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

fn default_workers() -> usize {
    num_cpus::get_physical().max(1)
}
fn default_chunk_size() -> usize {
    256 * 1024
}
fn default_batch_size() -> usize {
    256
}
fn default_progress_interval() -> u64 {
    100
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            hash_workers: default_workers(),
            apply_workers: default_workers(),
            chunk_size: default_chunk_size(),
            commit_batch_size: default_batch_size(),
            apply_mode: ApplyMode::default(),
            progress_interval_ms: default_progress_interval(),
        }
    }
}

impl MergeConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(path = %path.display(), "loaded merge configuration");
        config.validate()?;
        Ok(config)
    }

    /// Check that the configured values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hash_workers".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.apply_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "apply_workers".into(),
                detail: "must be at least 1".into(),
            });
        }
        if !(64 * 1024..=1024 * 1024).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size".into(),
                detail: "must be between 64 KiB and 1 MiB".into(),
            });
        }
        if self.commit_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "commit_batch_size".into(),
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Capacity of the bounded hand-off channels: 4x the consuming pool.
    pub fn queue_depth(&self) -> usize {
        self.hash_workers.max(self.apply_workers) * 4
    }
}
