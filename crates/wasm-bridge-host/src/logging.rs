//! Guest logging.
//!
//! Guests call `env.log(level, ptr, len)` with a UTF-8 message in linear
//! memory. The message is recorded in the runtime state and re-emitted
//! through `tracing`.

use tracing::{debug, error, info, warn};

use wasm_bridge_common::HostError;
use wasm_bridge_core::{CallFrame, LogLevel, RuntimeState};

/// Host implementation of `env.log`.
pub struct LoggingHost;

impl LoggingHost {
    /// Signature of the `env.log` import.
    pub const SIGNATURE: &'static str = "v(i*i)";

    /// Record `message` and emit it through `tracing`.
    pub fn log(state: &mut RuntimeState, level: LogLevel, message: &str) {
        state.log(level, message.to_string());

        let runtime_id = state.runtime_id.to_string();
        let runtime_id = runtime_id.as_str();
        match level {
            LogLevel::Debug => debug!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(runtime_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(runtime_id, guest_log = true, "{}", message),
        }
    }

    /// Callback body for `env.log(level: i32, ptr: i32, len: i32)`.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. A message outside
    /// linear memory traps the caller.
    pub fn dispatch(frame: &mut CallFrame<'_, '_>) -> Result<(), HostError> {
        let level = level_from_i32(frame.arg_i32(0)?);
        let ptr = frame.arg_offset(1)?;
        let len = frame.arg_offset(2)?;

        let message = {
            let memory = frame.memory()?;
            String::from_utf8_lossy(memory.read(ptr, len)?).into_owned()
        };

        Self::log(frame.state_mut(), level, &message);
        Ok(())
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// Unknown values map to `Info`.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Convert a [`LogLevel`] to its numeric value.
pub fn level_to_i32(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wasm_bridge_common::WasiConfig;

    fn state() -> RuntimeState {
        RuntimeState::new(Uuid::new_v4(), &WasiConfig::default())
    }

    #[test]
    fn test_logging_stores_in_state() {
        let mut state = state();

        LoggingHost::log(&mut state, LogLevel::Info, "Hello");
        LoggingHost::log(&mut state, LogLevel::Error, "World");

        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0].message, "Hello");
        assert_eq!(state.logs[0].level, LogLevel::Info);
        assert_eq!(state.logs[1].message, "World");
        assert_eq!(state.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_level_round_trip() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(level_from_i32(level_to_i32(level)), level);
        }
        assert_eq!(level_from_i32(99), LogLevel::Info);
        assert_eq!(level_from_i32(-1), LogLevel::Info);
    }
}
