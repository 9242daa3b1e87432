//! Configuration structures for wasm-bridge.
//!
//! This module defines configuration options for the two layers of the bridge:
//! - [`BridgeConfig`]: Top-level configuration containing all settings
//! - [`EnvironmentConfig`]: Engine-wide settings shared by every runtime
//! - [`RuntimeConfig`]: Per-runtime settings (stack, built-in namespaces, limits)
//! - [`WasiConfig`]: Arguments and environment handed to WASI guests

use serde::{Deserialize, Serialize};

/// Top-level bridge configuration.
///
/// It can be loaded from files (TOML, JSON); see [`crate::config_file`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Engine-wide configuration.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Per-runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Engine-wide configuration.
///
/// These settings are fixed when an environment is created and apply to
/// every runtime built from it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Upper bound, in bytes, for any runtime's call stack.
    #[serde(default = "defaults::max_wasm_stack")]
    pub max_wasm_stack: usize,

    /// Enable fuel metering.
    ///
    /// Runtimes only enforce `max_fuel` when this is on.
    #[serde(default)]
    pub consume_fuel: bool,

    /// Enable epoch-based interruption.
    ///
    /// Runtimes only enforce `epoch_deadline` when this is on.
    #[serde(default)]
    pub epoch_interruption: bool,

    /// Optimize generated code for speed rather than compile time.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_wasm_stack: defaults::max_wasm_stack(),
            consume_fuel: false,
            epoch_interruption: false,
            optimize: defaults::optimize(),
        }
    }
}

/// Per-runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Call stack size in bytes this runtime requires.
    ///
    /// Must be non-zero and no larger than the environment's `max_wasm_stack`.
    /// The engine enforces a single stack limit for every runtime in an
    /// environment, so guests always get the full `max_wasm_stack`; this
    /// value is a minimum the environment has to satisfy, not a per-runtime
    /// cap.
    #[serde(default = "defaults::stack_size")]
    pub stack_size: usize,

    /// Link `wasi_snapshot_preview1` into the runtime.
    #[serde(default)]
    pub enable_wasi: bool,

    /// Link the `spectest` namespace into the runtime.
    #[serde(default)]
    pub enable_spectest: bool,

    /// Stub unresolved function imports at load time so that a later
    /// `attach_function` can satisfy them.
    #[serde(default = "defaults::lazy_imports")]
    pub lazy_imports: bool,

    /// Fuel granted to the runtime at creation.
    #[serde(default)]
    pub max_fuel: Option<u64>,

    /// Epoch ticks allowed per call, re-armed before every call.
    #[serde(default)]
    pub epoch_deadline: Option<u64>,

    /// WASI settings, used when `enable_wasi` is on.
    #[serde(default)]
    pub wasi: WasiConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: defaults::stack_size(),
            enable_wasi: false,
            enable_spectest: false,
            lazy_imports: defaults::lazy_imports(),
            max_fuel: None,
            epoch_deadline: None,
            wasi: WasiConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Enable the WASI namespace.
    #[must_use]
    pub fn with_wasi(mut self) -> Self {
        self.enable_wasi = true;
        self
    }

    /// Enable the spectest namespace.
    #[must_use]
    pub fn with_spectest(mut self) -> Self {
        self.enable_spectest = true;
        self
    }

    /// Set the call stack size.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }
}

/// WASI context settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Program arguments (`argv`), including the program name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Inherit the host's stdin, stdout, and stderr.
    #[serde(default)]
    pub inherit_stdio: bool,
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_wasm_stack() -> usize {
        1024 * 1024
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn stack_size() -> usize {
        64 * 1024
    }

    pub const fn lazy_imports() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();

        assert_eq!(config.environment.max_wasm_stack, 1024 * 1024);
        assert!(!config.environment.consume_fuel);
        assert!(!config.environment.epoch_interruption);
        assert!(config.environment.optimize);

        assert_eq!(config.runtime.stack_size, 64 * 1024);
        assert!(!config.runtime.enable_wasi);
        assert!(!config.runtime.enable_spectest);
        assert!(config.runtime.lazy_imports);
        assert_eq!(config.runtime.max_fuel, None);
        assert_eq!(config.runtime.epoch_deadline, None);
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: BridgeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.environment.max_wasm_stack,
            deserialized.environment.max_wasm_stack
        );
        assert_eq!(config.runtime.stack_size, deserialized.runtime.stack_size);
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::default()
            .with_wasi()
            .with_spectest()
            .with_stack_size(4096);

        assert!(config.enable_wasi);
        assert!(config.enable_spectest);
        assert_eq!(config.stack_size, 4096);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"runtime": {"enable_spectest": true, "max_fuel": 500}}"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();

        assert!(config.runtime.enable_spectest);
        assert_eq!(config.runtime.max_fuel, Some(500));
        // Defaults for unspecified fields
        assert!(config.runtime.lazy_imports);
        assert_eq!(config.environment.max_wasm_stack, 1024 * 1024);
    }
}
