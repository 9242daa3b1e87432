//! Common types, errors, and configuration for wasm-bridge.
//!
//! This crate provides shared functionality used across the wasm-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for environments and runtimes
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{BridgeConfig, EnvironmentConfig, RuntimeConfig, WasiConfig};
pub use config_file::{ConfigFile, ConfigFileError, InvokeEntry, ModuleEntry};
pub use error::{HostError, RuntimeError};
