//! Engine configuration.
//!
//! Layered the same way the server's own startup config is: compiled-in
//! defaults, optionally overridden by a TOML file, then by environment
//! variables. There is no hot-reload here — the engine config is read once
//! at construction time.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Knobs for the KV allocator, prefix cache, and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes carved into blocks per page.
    pub page_size: usize,
    /// Bytes per KV block; must not exceed `page_size`.
    pub block_size: usize,
    /// Maximum number of pages the allocator may create.
    pub max_pages: usize,
    /// Token chunk size used for chunked prefill.
    pub prefill_chunk_size: usize,
    /// Weight assigned to a lane that is registered implicitly.
    pub default_lane_weight: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            block_size: 512,
            max_pages: 8,
            prefill_chunk_size: 128,
            default_lane_weight: 1.0,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration, mirroring the checks the allocator and
    /// scheduler perform at construction time so misconfiguration is caught
    /// before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(EngineError::InvalidConfig(
                "block_size must be > 0".to_string(),
            ));
        }
        if self.block_size > self.page_size {
            return Err(EngineError::InvalidConfig(format!(
                "block_size ({}) cannot exceed page_size ({})",
                self.block_size, self.page_size
            )));
        }
        if self.max_pages < 1 {
            return Err(EngineError::InvalidConfig(
                "max_pages must be >= 1".to_string(),
            ));
        }
        if self.prefill_chunk_size == 0 {
            return Err(EngineError::InvalidConfig(
                "prefill_chunk_size must be > 0".to_string(),
            ));
        }
        if self.default_lane_weight <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "default_lane_weight must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load defaults, overlay an optional TOML file, then overlay
    /// `PAGEDINFER_*` environment variables. Missing file is not an error;
    /// a malformed one is.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::InvalidConfig(format!(
                        "failed to read {}: {e}",
                        path.display()
                    ))
                })?;
                config = toml::from_str(&raw).map_err(|e| {
                    EngineError::InvalidConfig(format!(
                        "failed to parse {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_usize("PAGEDINFER_PAGE_SIZE") {
            self.page_size = v;
        }
        if let Some(v) = env_usize("PAGEDINFER_BLOCK_SIZE") {
            self.block_size = v;
        }
        if let Some(v) = env_usize("PAGEDINFER_MAX_PAGES") {
            self.max_pages = v;
        }
        if let Some(v) = env_usize("PAGEDINFER_PREFILL_CHUNK_SIZE") {
            self.prefill_chunk_size = v;
        }
        if let Ok(raw) = env::var("PAGEDINFER_DEFAULT_LANE_WEIGHT") {
            if let Ok(v) = raw.parse::<f64>() {
                self.default_lane_weight = v;
            }
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_block_larger_than_page() {
        let config = EngineConfig {
            block_size: 8192,
            page_size: 4096,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_max_pages() {
        let config = EngineConfig {
            max_pages: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_wins_over_default() {
        // Safe: single-threaded test process, var is restored before return.
        unsafe {
            env::set_var("PAGEDINFER_MAX_PAGES", "16");
        }
        let loaded = EngineConfig::load(None).unwrap();
        unsafe {
            env::remove_var("PAGEDINFER_MAX_PAGES");
        }
        assert_eq!(loaded.max_pages, 16);
    }
}
