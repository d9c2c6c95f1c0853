//! Sandbox configuration: per-trust-level resource ceilings, the update
//! deadline, and the depth bound applied to world-state snapshots.
//!
//! Usually built in code; hosts that ship a tuning file can load it from TOML.

use crate::error::PluginHostError;
use modhost_types::TrustLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound on `max_array_size + max_map_size`.
///
/// Elements of nested arrays and maps count toward those two limits, so
/// their sum is also the deepest a guest value can nest. The engine walks
/// values recursively on the host stack; this keeps that walk shallow
/// enough for a default-sized thread stack.
pub const MAX_NESTED_VALUES: usize = 768;

/// Ceilings applied to one guest engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Interpreter steps allowed per guest call before the step hook aborts it.
    pub max_operations: u64,
    /// Maximum guest call-stack depth.
    pub max_call_levels: usize,
    /// Maximum expression nesting accepted by the compiler.
    pub max_expr_depth: usize,
    /// Largest string a guest may build, in bytes.
    pub max_string_size: usize,
    /// Array elements in one value, nested arrays included.
    pub max_array_size: usize,
    /// Map properties in one value, nested maps included.
    pub max_map_size: usize,
}

impl ResourceLimits {
    pub fn trusted() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_expr_depth: 128,
            max_string_size: 1024 * 1024, // 1MB
            max_array_size: 256,
            max_map_size: 512,
        }
    }

    pub fn untrusted() -> Self {
        Self {
            max_operations: 500_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 256 * 1024, // 256KB
            max_array_size: 128,
            max_map_size: 384,
        }
    }

    fn validate(&self, table: &str) -> Result<(), PluginHostError> {
        if self.max_operations == 0 {
            return Err(PluginHostError::Config(format!(
                "[{table}] max_operations must be greater than zero"
            )));
        }
        if self.max_call_levels == 0 || self.max_expr_depth == 0 {
            return Err(PluginHostError::Config(format!(
                "[{table}] call and expression depth limits must be greater than zero"
            )));
        }
        if self.max_array_size.saturating_add(self.max_map_size) > MAX_NESTED_VALUES {
            return Err(PluginHostError::Config(format!(
                "[{table}] max_array_size + max_map_size must not exceed {MAX_NESTED_VALUES}"
            )));
        }
        Ok(())
    }
}

fn default_state_depth() -> usize {
    6
}

fn default_update_deadline_ms() -> u64 {
    250
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Depth at which world-state objects are cut to null.
    #[serde(default = "default_state_depth")]
    pub state_depth: usize,
    /// Results of an `update` call that took longer than this are discarded.
    #[serde(default = "default_update_deadline_ms")]
    pub update_deadline_ms: u64,
    #[serde(default = "ResourceLimits::trusted")]
    pub trusted: ResourceLimits,
    #[serde(default = "ResourceLimits::untrusted")]
    pub untrusted: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            state_depth: default_state_depth(),
            update_deadline_ms: default_update_deadline_ms(),
            trusted: ResourceLimits::trusted(),
            untrusted: ResourceLimits::untrusted(),
        }
    }
}

impl SandboxConfig {
    pub fn limits_for(&self, trust: TrustLevel) -> &ResourceLimits {
        match trust {
            TrustLevel::Trusted => &self.trusted,
            TrustLevel::Untrusted => &self.untrusted,
        }
    }

    pub fn update_deadline(&self) -> Duration {
        Duration::from_millis(self.update_deadline_ms)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, PluginHostError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| PluginHostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, falling back to defaults when the file
    /// is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No sandbox config at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded sandbox config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse sandbox config {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read sandbox config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), PluginHostError> {
        self.trusted.validate("trusted")?;
        self.untrusted.validate("untrusted")
    }
}
