//! Error types for wasm-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Errors returned by every host-facing operation
//! - [`HostError`]: Errors raised by host callbacks while the engine waits

use thiserror::Error;

/// Errors returned by environment, runtime, module, and function operations.
///
/// Every variant is a local, recoverable failure. Diagnostics are carried in
/// the error value itself; nothing is read back from shared engine state.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The bytecode could not be parsed or validated.
    #[error("Parse error: {reason}")]
    Parse {
        /// Description of the parse failure.
        reason: String,
    },

    /// A module failed to bind into a runtime.
    #[error("Load error: {reason}")]
    Load {
        /// Description of the load failure.
        reason: String,
    },

    /// An import could not be resolved at load time.
    #[error("Link error: {module}.{name}: {reason}")]
    Link {
        /// Import namespace.
        module: String,
        /// Import field name.
        name: String,
        /// Why the import could not be linked.
        reason: String,
    },

    /// No function matched the requested name or index.
    #[error("Function lookup failed: {name}")]
    FunctionLookup {
        /// The name (or index) that was looked up.
        name: String,
    },

    /// Argument arity or type did not match the declared signature.
    #[error("Type error: {reason}")]
    Type {
        /// Description of the mismatch.
        reason: String,
    },

    /// The engine trapped or reported failure during a call.
    #[error("Call failed: {message}")]
    Call {
        /// Engine-provided diagnostic.
        message: String,
        /// Trap code if the engine reported one.
        trap_code: Option<String>,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// Execution was interrupted by an epoch deadline.
    #[error("Execution interrupted")]
    Interrupted,

    /// The guest called `proc_exit`.
    #[error("Guest exited with code {code}")]
    Exited {
        /// Exit status passed by the guest.
        code: i32,
    },

    /// A linear-memory access fell outside the current memory.
    #[error("Memory access out of bounds: offset {offset} + {len} > {memory_len}")]
    MemoryOutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Memory length at the time of the access.
        memory_len: usize,
    },

    /// The runtime has no linear memory to view.
    #[error("Runtime has no linear memory")]
    NoMemory,

    /// A host callback failed.
    #[error("Host function error: {0}")]
    Host(#[from] HostError),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from host callbacks.
///
/// Returning one of these from a callback traps the WebAssembly call that
/// reached it. The caller of `Function::call` gets it back as
/// [`RuntimeError::Host`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The callback asked to abort the call.
    #[error("Trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// An argument passed by the guest was invalid.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// The callback touched memory outside the current linear memory.
    #[error("Memory access out of bounds: offset {offset} + {len} > {memory_len}")]
    MemoryOutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Memory length during the dispatch.
        memory_len: usize,
    },

    /// The callback wrote a result of the wrong type or index.
    #[error("Result type mismatch: {reason}")]
    ResultType {
        /// Description of the mismatch.
        reason: String,
    },

    /// The guest called an abort-style import.
    #[error("Guest abort: {message} at {file}:{line}:{column}")]
    Abort {
        /// Abort message decoded from guest memory.
        message: String,
        /// Source file reported by the guest.
        file: String,
        /// Source line.
        line: u32,
        /// Source column.
        column: u32,
    },
}

impl RuntimeError {
    /// Create a new `Parse` error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a new `Load` error.
    pub fn load(reason: impl Into<String>) -> Self {
        Self::Load {
            reason: reason.into(),
        }
    }

    /// Create a new `Link` error.
    pub fn link(
        module: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Link {
            module: module.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `FunctionLookup` error.
    pub fn function_lookup(name: impl Into<String>) -> Self {
        Self::FunctionLookup { name: name.into() }
    }

    /// Create a new `Type` error.
    pub fn type_mismatch(reason: impl Into<String>) -> Self {
        Self::Type {
            reason: reason.into(),
        }
    }

    /// Create a new `Call` error.
    pub fn call(message: impl Into<String>, trap_code: Option<String>) -> Self {
        Self::Call {
            message: message.into(),
            trap_code,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is a failed function lookup.
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::FunctionLookup { .. })
    }

    /// Returns `true` if this error is an arity or type mismatch.
    pub fn is_type(&self) -> bool {
        matches!(self, Self::Type { .. })
    }

    /// Returns `true` if this error came out of an engine call.
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Self::Call { .. }
                | Self::Host(_)
                | Self::FuelExhausted
                | Self::Interrupted
                | Self::Exited { .. }
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::Interrupted)
    }
}

impl HostError {
    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Lets host callbacks use `?` on memory and value helpers.
impl From<RuntimeError> for HostError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::MemoryOutOfBounds {
                offset,
                len,
                memory_len,
            } => Self::MemoryOutOfBounds {
                offset,
                len,
                memory_len,
            },
            RuntimeError::Host(inner) => inner,
            other => Self::invalid_argument(other.to_string()),
        }
    }
}
