//! Configuration file structures for wasm-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ModuleEntry`]: A module to load, in order
//! - [`InvokeEntry`]: The function to call once modules are loaded

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BridgeConfig, EnvironmentConfig, RuntimeConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [environment]
/// max_wasm_stack = 1048576
/// consume_fuel = true
///
/// [runtime]
/// stack_size = 65536
/// enable_wasi = true
/// max_fuel = 10_000_000
///
/// [runtime.wasi]
/// args = ["app"]
/// inherit_stdio = true
///
/// [[modules]]
/// path = "./app.wasm"
/// name = "app"
///
/// [invoke]
/// function = "_start"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Engine-wide configuration.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Per-runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Modules to load, in load order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,

    /// Function to invoke after loading.
    #[serde(default)]
    pub invoke: Option<InvokeEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// The engine and runtime sections as a [`BridgeConfig`].
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            environment: self.environment.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

/// A module to load at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleEntry {
    /// Path to the WebAssembly module file.
    pub path: String,

    /// Module name to use when the name section does not declare one.
    #[serde(default)]
    pub name: Option<String>,
}

/// A function call to make after all modules are loaded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvokeEntry {
    /// Exported function name.
    pub function: String,

    /// Arguments in text form, parsed against the function's signature.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.runtime.stack_size, 64 * 1024);
        assert!(config.modules.is_empty());
        assert!(config.invoke.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [runtime]
            enable_spectest = true
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.runtime.enable_spectest);
        // Defaults applied
        assert!(!config.runtime.enable_wasi);
        assert_eq!(config.environment.max_wasm_stack, 1024 * 1024);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [environment]
            max_wasm_stack = 2097152
            consume_fuel = true
            epoch_interruption = true

            [runtime]
            stack_size = 131072
            enable_wasi = true
            max_fuel = 5_000_000
            epoch_deadline = 10

            [runtime.wasi]
            args = ["app", "--verbose"]
            env = [["HOME", "/tmp"]]
            inherit_stdio = true

            [[modules]]
            path = "./lib.wasm"
            name = "lib"

            [[modules]]
            path = "./app.wasm"

            [invoke]
            function = "add"
            args = ["2", "3"]
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.environment.max_wasm_stack, 2_097_152);
        assert!(config.environment.consume_fuel);
        assert_eq!(config.runtime.stack_size, 131_072);
        assert_eq!(config.runtime.max_fuel, Some(5_000_000));
        assert_eq!(config.runtime.epoch_deadline, Some(10));
        assert_eq!(config.runtime.wasi.args, vec!["app", "--verbose"]);
        assert_eq!(
            config.runtime.wasi.env,
            vec![("HOME".to_string(), "/tmp".to_string())]
        );
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].name.as_deref(), Some("lib"));
        assert!(config.modules[1].name.is_none());

        let invoke = config.invoke.unwrap();
        assert_eq!(invoke.function, "add");
        assert_eq!(invoke.args, vec!["2", "3"]);
    }

    #[test]
    fn test_bridge_config() {
        let toml = r#"
            [runtime]
            stack_size = 4096
        "#;
        let config = ConfigFile::from_toml(toml).unwrap().bridge_config();
        assert_eq!(config.runtime.stack_size, 4096);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }
}
