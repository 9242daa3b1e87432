//! `env.abort` for AssemblyScript-style guests.
//!
//! The guest calls `abort(message, file, line, column)` where `message` and
//! `file` point at managed strings: UTF-16LE code units, with the byte length
//! stored as a `u32` in the four bytes before the pointer. A null pointer is
//! an empty string.
//!
//! The call always fails with [`HostError::Abort`], which traps the guest.

use wasm_bridge_common::{HostError, RuntimeError};
use wasm_bridge_core::{CallFrame, LogLevel, MemoryView};

use crate::logging::LoggingHost;

/// Signature of the `env.abort` import.
pub const ABORT_SIGNATURE: &str = "v(**ii)";

/// Callback body for `env.abort(message: i32, file: i32, line: i32, column: i32)`.
pub fn abort(frame: &mut CallFrame<'_, '_>) -> Result<(), HostError> {
    let message_ptr = frame.arg_offset(0)?;
    let file_ptr = frame.arg_offset(1)?;
    #[allow(clippy::cast_sign_loss)]
    let (line, column) = (frame.arg_i32(2)? as u32, frame.arg_i32(3)? as u32);

    let (message, file) = {
        let memory = frame.memory()?;
        (
            read_managed_string(&memory, message_ptr)?,
            read_managed_string(&memory, file_ptr)?,
        )
    };

    LoggingHost::log(
        frame.state_mut(),
        LogLevel::Error,
        &format!("abort: {message} at {file}:{line}:{column}"),
    );

    Err(HostError::Abort {
        message,
        file,
        line,
        column,
    })
}

/// Decode a length-prefixed UTF-16LE string at `ptr`.
///
/// Unpaired surrogates become U+FFFD.
pub fn read_managed_string(memory: &MemoryView<'_>, ptr: usize) -> Result<String, RuntimeError> {
    if ptr == 0 {
        return Ok(String::new());
    }

    let header = ptr.checked_sub(4).ok_or(RuntimeError::MemoryOutOfBounds {
        offset: ptr,
        len: 4,
        memory_len: memory.len(),
    })?;
    let byte_len = memory.read_u32(header)? as usize;
    let bytes = memory.read(ptr, byte_len & !1)?;

    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}
