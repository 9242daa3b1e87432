//! WebAssembly embedding layer over Wasmtime.
//!
//! This crate lets a host load, link, and invoke WebAssembly code, and supply
//! native implementations for the functions that code imports:
//! - [`Environment`]: Shared engine and module factory
//! - [`Module`]: Parsed module with its function descriptors
//! - [`Runtime`]: Execution context that loads modules and owns memory
//! - [`Function`]: Callable handle to a loaded function
//! - [`CallbackRegistry`]: Slot table behind attached host functions
//! - [`MemoryView`]: Bounds-checked window over linear memory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Environment                         │
//! │  (Shared, thread-safe, refcounted)                      │
//! │  - Wasmtime engine                                      │
//! │  - Module parsing and validation                        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Runtime                           │
//! │  (One call at a time)                                   │
//! │  - Store<RuntimeState>: memory, logs, dispatch state    │
//! │  - Linker: attached functions, spectest, WASI           │
//! │  - CallbackRegistry: slot -> host callback              │
//! └─────────────────────────────────────────────────────────┘
//!                 │                         ▲
//!        Function::call              CallFrame dispatch
//!                 ▼                         │
//! ┌─────────────────────────────────────────────────────────┐
//! │                WebAssembly instances                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod environment;
pub mod function;
pub mod memory;
pub mod module;
pub mod namespaces;
pub mod registry;
pub mod runtime;
pub mod signature;
pub mod state;
pub mod value;

pub use bridge::CallFrame;
pub use environment::{Environment, InterruptHandle};
pub use function::Function;
pub use memory::MemoryView;
pub use module::{FunctionInfo, FunctionKind, Module, UNNAMED_MODULE};
pub use registry::{CallbackRegistry, HostCallback, SlotEntry, SlotId, into_callback};
pub use runtime::Runtime;
pub use signature::Signature;
pub use state::{DispatchState, LogEntry, LogLevel, RuntimeState};
pub use value::{Value, ValueType};
