//! Attaching host functions to a runtime.

use tracing::debug;

use wasm_bridge_common::RuntimeError;
use wasm_bridge_core::{Runtime, SlotId};

use crate::abort::{ABORT_SIGNATURE, abort};
use crate::logging::LoggingHost;

/// Namespace the standard host functions are attached under.
pub const HOST_MODULE: &str = "env";

/// Attach every standard host function.
///
/// - `env.log` - Logging from guest code
/// - `env.abort` - AssemblyScript-style abort
///
/// Attach before loading modules that import them, or rely on the runtime's
/// lazy imports.
///
/// # Errors
///
/// Returns an error if attaching fails.
pub fn register_all(runtime: &mut Runtime) -> Result<Vec<SlotId>, RuntimeError> {
    let slots = vec![register_logging(runtime)?, register_abort(runtime)?];
    debug!(count = slots.len(), "Standard host functions attached");
    Ok(slots)
}

/// Attach `env.log(level: i32, ptr: i32, len: i32)`.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in guest memory
/// - `len`: Length of the message in bytes (UTF-8)
pub fn register_logging(runtime: &mut Runtime) -> Result<SlotId, RuntimeError> {
    runtime.attach_function(HOST_MODULE, "log", LoggingHost::SIGNATURE, LoggingHost::dispatch)
}

/// Attach `env.abort(message: i32, file: i32, line: i32, column: i32)`.
pub fn register_abort(runtime: &mut Runtime) -> Result<SlotId, RuntimeError> {
    runtime.attach_function(HOST_MODULE, "abort", ABORT_SIGNATURE, abort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bridge_common::{HostError, RuntimeConfig};
    use wasm_bridge_core::{Environment, LogLevel, Value};

    const LOG_WAT: &str = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 32) "hello from wasm")
            (data (i32.const 64) "\ff\fe")
            (func (export "greet")
                (call $log (i32.const 1) (i32.const 32) (i32.const 15))
                (call $log (i32.const 3) (i32.const 32) (i32.const 5)))
            (func (export "garbled")
                (call $log (i32.const 2) (i32.const 64) (i32.const 2)))
            (func (export "overflow")
                (call $log (i32.const 0) (i32.const 65530) (i32.const 10))))
    "#;

    // "hi" and "a.ts" as length-prefixed UTF-16LE strings at 20 and 40
    const ABORT_WAT: &str = r#"
        (module
            (import "env" "abort" (func $abort (param i32 i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "\04\00\00\00h\00i\00")
            (data (i32.const 36) "\08\00\00\00a\00.\00t\00s\00")
            (func (export "fail")
                (call $abort (i32.const 20) (i32.const 40) (i32.const 12) (i32.const 5)))
            (func (export "fail_bare")
                (call $abort (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 1))))
    "#;

    fn runtime_with_host(wat: &str) -> Runtime {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();
        register_all(&mut runtime).unwrap();
        runtime.load_module(env.parse_wat(wat).unwrap()).unwrap();
        runtime
    }

    #[test]
    fn test_register_all() {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();

        let slots = register_all(&mut runtime).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(runtime.registry().len(), 2);
        assert_eq!(runtime.registry().binding("env", "log"), Some(slots[0]));
        assert_eq!(runtime.registry().binding("env", "abort"), Some(slots[1]));
    }

    #[test]
    fn test_log_reads_guest_memory() {
        let mut runtime = runtime_with_host(LOG_WAT);

        let greet = runtime.find_function("greet").unwrap();
        greet.call(&mut runtime, &[]).unwrap();

        let logs = runtime.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[0].message, "hello from wasm");
        assert_eq!(logs[1].level, LogLevel::Error);
        assert_eq!(logs[1].message, "hello");
    }

    #[test]
    fn test_log_replaces_invalid_utf8() {
        let mut runtime = runtime_with_host(LOG_WAT);

        let garbled = runtime.find_function("garbled").unwrap();
        garbled.call(&mut runtime, &[]).unwrap();

        assert_eq!(runtime.logs()[0].level, LogLevel::Warn);
        assert_eq!(runtime.logs()[0].message, "\u{fffd}\u{fffd}");
    }

    #[test]
    fn test_log_out_of_bounds_traps() {
        let mut runtime = runtime_with_host(LOG_WAT);

        let overflow = runtime.find_function("overflow").unwrap();
        let err = overflow.call(&mut runtime, &[]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Host(HostError::MemoryOutOfBounds { offset: 65530, .. })
        ));
        assert!(runtime.logs().is_empty());
    }

    #[test]
    fn test_abort_decodes_managed_strings() {
        let mut runtime = runtime_with_host(ABORT_WAT);

        let fail = runtime.find_function("fail").unwrap();
        let err = fail.call(&mut runtime, &[]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Host(HostError::Abort { ref message, ref file, line: 12, column: 5 })
                if message == "hi" && file == "a.ts"
        ));

        assert_eq!(runtime.logs().len(), 1);
        assert_eq!(runtime.logs()[0].level, LogLevel::Error);
        assert!(runtime.logs()[0].message.contains("hi at a.ts:12:5"));
    }

    #[test]
    fn test_abort_with_null_strings() {
        let mut runtime = runtime_with_host(ABORT_WAT);

        let fail = runtime.find_function("fail_bare").unwrap();
        let err = fail.call(&mut runtime, &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Host function error: Guest abort:  at :1:1"
        );

        // The runtime stays usable
        let fail = runtime.find_function("fail").unwrap();
        assert!(fail.call(&mut runtime, &[]).is_err());
        assert_eq!(runtime.logs().len(), 2);

        let err = fail.call(&mut runtime, &[Value::I32(1)]).unwrap_err();
        assert!(err.is_type());
    }
}
