//! Host functions for wasm-bridge runtimes.
//!
//! Every function here is a plain callback attached with
//! [`wasm_bridge_core::Runtime::attach_function`], so it goes through the
//! same slot registry and call bridge as any embedder's callback.
//!
//! # Functions
//!
//! - [`logging`]: `env.log`, structured logging from guest code
//! - [`abort`]: `env.abort`, AssemblyScript-style abort with source location
//! - [`linker`]: attach them all with [`register_all`]

pub mod abort;
pub mod linker;
pub mod logging;

pub use linker::{HOST_MODULE, register_all};
pub use logging::LoggingHost;
