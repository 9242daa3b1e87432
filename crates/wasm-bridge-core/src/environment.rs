//! Engine environment.
//!
//! An [`Environment`] wraps the Wasmtime [`Engine`] and is the factory that
//! turns bytecode into [`Module`]s. It holds no runtime state:
//! - It is thread-safe and can be shared by many runtimes
//! - Each runtime keeps its own handle, so the engine lives until the last
//!   runtime built from it is dropped
//! - Destroying one handle never tears down a runtime that still uses it

use std::sync::Arc;

use tracing::{debug, info, instrument};
use wasmtime::{Config, Engine, OptLevel};

use wasm_bridge_common::{EnvironmentConfig, RuntimeError};

use crate::module::Module;

/// Shared WebAssembly environment.
///
/// # Example
///
/// ```ignore
/// use wasm_bridge_common::RuntimeConfig;
/// use wasm_bridge_core::{Environment, Runtime};
///
/// let env = Environment::default();
/// let module = env.parse_module(&wasm_bytes)?;
/// let mut runtime = Runtime::new(&env, &RuntimeConfig::default())?;
/// runtime.load_module(module)?;
/// ```
#[derive(Clone)]
pub struct Environment {
    engine: Arc<Engine>,
    config: EnvironmentConfig,
}

impl Environment {
    /// Create a new environment with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is rejected.
    pub fn new(config: &EnvironmentConfig) -> Result<Self, RuntimeError> {
        if config.max_wasm_stack == 0 {
            return Err(RuntimeError::invalid_config(
                "max_wasm_stack must be greater than zero",
            ));
        }

        let mut wasmtime_config = Config::new();

        wasmtime_config.max_wasm_stack(config.max_wasm_stack);
        wasmtime_config.consume_fuel(config.consume_fuel);
        wasmtime_config.epoch_interruption(config.epoch_interruption);

        if config.optimize {
            wasmtime_config.cranelift_opt_level(OptLevel::Speed);
        } else {
            wasmtime_config.cranelift_opt_level(OptLevel::None);
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            max_wasm_stack = config.max_wasm_stack,
            consume_fuel = config.consume_fuel,
            epoch_interruption = config.epoch_interruption,
            "Environment initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Parse and validate WebAssembly bytecode into a module.
    ///
    /// The module is not bound to any runtime until it is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Parse`] if the bytecode is malformed.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn parse_module(&self, bytes: &[u8]) -> Result<Module, RuntimeError> {
        Module::from_bytes(self, bytes, None)
    }

    /// Parse bytecode, naming the module `name` if its name section does not.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Parse`] if the bytecode is malformed.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn parse_named_module(&self, name: &str, bytes: &[u8]) -> Result<Module, RuntimeError> {
        Module::from_bytes(self, bytes, Some(name))
    }

    /// Compile a module from WebAssembly text.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Parse`] if the text does not compile.
    #[instrument(skip(self, wat))]
    pub fn parse_wat(&self, wat: &str) -> Result<Module, RuntimeError> {
        Module::from_wat(self, wat)
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the environment configuration.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// Runtimes with an epoch deadline trap with
    /// [`RuntimeError::Interrupted`] once enough increments have passed.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// A handle that can interrupt running calls from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            engine: Arc::clone(&self.engine),
        }
    }

    /// Number of live handles to the underlying engine, runtimes included.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.engine)
    }

    /// Release this handle.
    ///
    /// Runtimes built from this environment keep their own handles, so the
    /// engine is only freed once the last of them is dropped.
    pub fn destroy(self) {
        debug!(
            remaining_handles = self.handle_count() - 1,
            "Environment handle released"
        );
    }
}

impl Default for Environment {
    /// An environment with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if Wasmtime rejects its default configuration on this host.
    fn default() -> Self {
        Self::new(&EnvironmentConfig::default())
            .unwrap_or_else(|e| panic!("default environment configuration rejected: {e}"))
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("max_wasm_stack", &self.config.max_wasm_stack)
            .field("consume_fuel", &self.config.consume_fuel)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

/// Cross-thread handle for interrupting calls.
///
/// Calling [`InterruptHandle::interrupt`] advances the epoch; any call whose
/// deadline has passed traps at its next epoch check.
#[derive(Clone)]
pub struct InterruptHandle {
    engine: Arc<Engine>,
}

impl InterruptHandle {
    /// Advance the epoch by one tick.
    pub fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creation_default() {
        let env = Environment::new(&EnvironmentConfig::default());
        assert!(env.is_ok());
        let env = env.unwrap();
        assert!(!env.config().consume_fuel);
    }

    #[test]
    fn test_environment_rejects_zero_stack() {
        let config = EnvironmentConfig {
            max_wasm_stack: 0,
            ..Default::default()
        };
        let err = Environment::new(&config).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_environment_epoch_increment() {
        let config = EnvironmentConfig {
            epoch_interruption: true,
            ..Default::default()
        };
        let env = Environment::new(&config).unwrap();

        // Should not panic
        env.increment_epoch();
        env.interrupt_handle().interrupt();
    }

    #[test]
    fn test_handle_counting() {
        let env = Environment::default();
        assert_eq!(env.handle_count(), 1);

        let clone = env.clone();
        let handle = env.interrupt_handle();
        assert_eq!(env.handle_count(), 3);

        clone.destroy();
        drop(handle);
        assert_eq!(env.handle_count(), 1);
    }

    #[test]
    fn test_environment_debug() {
        let env = Environment::default();

        let debug_str = format!("{env:?}");
        assert!(debug_str.contains("Environment"));
        assert!(debug_str.contains("max_wasm_stack"));
    }
}
