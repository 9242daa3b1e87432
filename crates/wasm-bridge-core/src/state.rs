//! Per-runtime store data.
//!
//! This module provides:
//! - [`RuntimeState`]: State reachable from host callbacks during a dispatch
//! - [`LogEntry`] and [`LogLevel`]: Structured logs emitted by guest code
//! - [`DispatchState`]: Where the call bridge is in its current dispatch

use std::time::Instant;

use uuid::Uuid;
use wasmtime::{Memory, Store};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::Environment;
use crate::registry::SlotId;
use crate::value::Value;
use wasm_bridge_common::{RuntimeConfig, RuntimeError, WasiConfig};

/// Data owned by a runtime's store.
///
/// Host callbacks reach it through [`crate::CallFrame::state_mut`].
pub struct RuntimeState {
    /// WASI context, linked only when the runtime enables WASI.
    wasi: WasiP1Ctx,

    /// Owning runtime identifier.
    pub runtime_id: Uuid,

    /// Logs collected from guest code.
    pub logs: Vec<LogEntry>,

    /// Values passed to the `spectest` print functions.
    pub spectest_output: Vec<Value>,

    /// Call bridge state for the most recent dispatch.
    pub dispatch: DispatchState,

    /// First memory exported by a loaded module, in load order.
    primary_memory: Option<Memory>,

    /// Memory provided by the `spectest` namespace.
    spectest_memory: Option<Memory>,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// State of the call bridge.
///
/// A dispatch moves `Idle -> Dispatching -> Idle` when the callback succeeds
/// and `Idle -> Dispatching -> Faulted` when it fails. The next host call
/// resets a faulted bridge to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// No callback is running.
    #[default]
    Idle,
    /// A callback is running.
    Dispatching {
        /// Slot being dispatched.
        slot: SlotId,
    },
    /// The last callback returned an error.
    Faulted {
        /// Slot that failed.
        slot: SlotId,
        /// The callback's error message.
        message: String,
    },
}

impl RuntimeState {
    /// Create state for a runtime, building the WASI context from `wasi`.
    pub fn new(runtime_id: Uuid, wasi: &WasiConfig) -> Self {
        let mut builder = WasiCtxBuilder::new();
        builder.args(wasi.args.as_slice()).envs(wasi.env.as_slice());
        if wasi.inherit_stdio {
            builder.inherit_stdio();
        }

        Self {
            wasi: builder.build_p1(),
            runtime_id,
            logs: Vec::new(),
            spectest_output: Vec::new(),
            dispatch: DispatchState::Idle,
            primary_memory: None,
            spectest_memory: None,
        }
    }

    /// The runtime's linear memory.
    ///
    /// This is the first memory exported by a loaded module, falling back to
    /// the `spectest` memory when that namespace is linked.
    pub fn memory(&self) -> Option<Memory> {
        self.primary_memory.or(self.spectest_memory)
    }

    pub(crate) fn has_primary_memory(&self) -> bool {
        self.primary_memory.is_some()
    }

    pub(crate) fn set_primary_memory(&mut self, memory: Memory) {
        self.primary_memory = Some(memory);
    }

    pub(crate) fn set_spectest_memory(&mut self, memory: Memory) {
        self.spectest_memory = Some(memory);
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    pub(crate) fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// Create the store backing a runtime.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub(crate) fn create_store(
    environment: &Environment,
    config: &RuntimeConfig,
    runtime_id: Uuid,
) -> Result<Store<RuntimeState>, RuntimeError> {
    let state = RuntimeState::new(runtime_id, &config.wasi);
    let mut store = Store::new(environment.inner(), state);

    if environment.config().consume_fuel {
        store
            .set_fuel(config.max_fuel.unwrap_or(u64::MAX))
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    } else if config.max_fuel.is_some() {
        return Err(RuntimeError::invalid_config(
            "max_fuel requires an environment with consume_fuel enabled",
        ));
    }

    if config.epoch_deadline.is_some() && !environment.config().epoch_interruption {
        return Err(RuntimeError::invalid_config(
            "epoch_deadline requires an environment with epoch_interruption enabled",
        ));
    }
    arm_epoch_deadline(&mut store, environment, config);

    Ok(store)
}

/// Re-arm the epoch deadline relative to the current epoch.
///
/// Without a configured deadline the store gets an effectively unreachable
/// one, so an epoch-enabled environment never interrupts runtimes that did
/// not ask for it.
pub(crate) fn arm_epoch_deadline(
    store: &mut Store<RuntimeState>,
    environment: &Environment,
    config: &RuntimeConfig,
) {
    if environment.config().epoch_interruption {
        store.set_epoch_deadline(config.epoch_deadline.unwrap_or(UNBOUNDED_EPOCH_DEADLINE));
    }
}

const UNBOUNDED_EPOCH_DEADLINE: u64 = u64::MAX / 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_state_creation() {
        let id = Uuid::new_v4();
        let state = RuntimeState::new(id, &WasiConfig::default());

        assert_eq!(state.runtime_id, id);
        assert!(state.logs.is_empty());
        assert!(state.spectest_output.is_empty());
        assert_eq!(state.dispatch, DispatchState::Idle);
        assert!(state.memory().is_none());
    }

    #[test]
    fn test_runtime_state_logging() {
        let mut state = RuntimeState::new(Uuid::new_v4(), &WasiConfig::default());

        state.log(LogLevel::Info, "Hello".into());
        state.log(LogLevel::Error, "World".into());

        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0].level, LogLevel::Info);
        assert_eq!(state.logs[0].message, "Hello");
        assert_eq!(state.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }
}
