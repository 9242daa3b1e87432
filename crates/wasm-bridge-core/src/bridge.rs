//! The call bridge between engine code and host callbacks.
//!
//! Engine→host: every attached function is installed in the link table as a
//! trampoline that carries its [`SlotId`]. When WebAssembly code calls the
//! import, [`dispatch`] resolves the slot in the runtime's
//! [`CallbackRegistry`], wraps the engine's operands in a [`CallFrame`], and
//! runs the callback exactly once.
//!
//! Host→engine: [`call_error`] turns whatever the engine returned from a call
//! into a [`RuntimeError`], so the diagnostic always travels with the call
//! that produced it.

use tracing::{debug, warn};
use wasmtime::{Caller, Extern, Trap, Val};
use wasmtime_wasi::I32Exit;

use wasm_bridge_common::{HostError, RuntimeError};

use crate::memory::MemoryView;
use crate::registry::{CallbackRegistry, SlotEntry, SlotId};
use crate::signature::Signature;
use crate::state::{DispatchState, RuntimeState};
use crate::value::Value;

/// The operands and context of one host callback invocation.
///
/// A frame only lives for the duration of the dispatch. Neither it nor the
/// [`MemoryView`]s it hands out can be kept past the callback's return.
pub struct CallFrame<'a, 'b> {
    caller: Caller<'a, RuntimeState>,
    slot: SlotId,
    entry: &'b SlotEntry,
    params: &'b [Val],
    results: &'b mut [Val],
}

impl CallFrame<'_, '_> {
    /// Slot being dispatched.
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Import namespace of the function being called.
    pub fn module(&self) -> &str {
        self.entry.module()
    }

    /// Import field name of the function being called.
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Declared signature of the function being called.
    pub fn signature(&self) -> &Signature {
        self.entry.signature()
    }

    /// Number of arguments.
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    /// Argument `index`.
    pub fn arg(&self, index: usize) -> Result<Value, HostError> {
        self.params
            .get(index)
            .and_then(Value::from_val)
            .ok_or_else(|| {
                HostError::invalid_argument(format!(
                    "{}.{} has no argument {index}",
                    self.module(),
                    self.name()
                ))
            })
    }

    /// All arguments, in order.
    pub fn args(&self) -> Vec<Value> {
        self.params.iter().filter_map(Value::from_val).collect()
    }

    pub fn arg_i32(&self, index: usize) -> Result<i32, HostError> {
        let value = self.arg(index)?;
        value
            .as_i32()
            .ok_or_else(|| self.arg_type_error(index, "i32", value))
    }

    pub fn arg_i64(&self, index: usize) -> Result<i64, HostError> {
        let value = self.arg(index)?;
        value
            .as_i64()
            .ok_or_else(|| self.arg_type_error(index, "i64", value))
    }

    pub fn arg_f32(&self, index: usize) -> Result<f32, HostError> {
        let value = self.arg(index)?;
        value
            .as_f32()
            .ok_or_else(|| self.arg_type_error(index, "f32", value))
    }

    pub fn arg_f64(&self, index: usize) -> Result<f64, HostError> {
        let value = self.arg(index)?;
        value
            .as_f64()
            .ok_or_else(|| self.arg_type_error(index, "f64", value))
    }

    /// Argument `index` read as an unsigned offset into linear memory.
    pub fn arg_offset(&self, index: usize) -> Result<usize, HostError> {
        let value = self.arg(index)?;
        value
            .as_offset()
            .ok_or_else(|| self.arg_type_error(index, "pointer", value))
    }

    fn arg_type_error(&self, index: usize, expected: &str, actual: Value) -> HostError {
        HostError::invalid_argument(format!(
            "{}.{} argument {index}: expected {expected}, got {}",
            self.module(),
            self.name(),
            actual.ty()
        ))
    }

    /// Store result `index`.
    ///
    /// Results start out as zero of their declared type.
    pub fn set_result(&mut self, index: usize, value: Value) -> Result<(), HostError> {
        let expected = self.signature().results().get(index).copied();
        match (expected, self.results.get_mut(index)) {
            (Some(ty), Some(slot)) if ty == value.ty() => {
                *slot = value.to_val();
                Ok(())
            }
            (Some(ty), Some(_)) => Err(HostError::ResultType {
                reason: format!("result {index} is {ty}, got {}", value.ty()),
            }),
            _ => Err(HostError::ResultType {
                reason: format!(
                    "{}.{} has no result {index}",
                    self.entry.module(),
                    self.entry.name()
                ),
            }),
        }
    }

    /// A view of linear memory as it is during this dispatch.
    ///
    /// The calling instance's exported `memory` is preferred; otherwise the
    /// runtime's primary memory is used.
    pub fn memory(&mut self) -> Result<MemoryView<'_>, HostError> {
        let memory = self
            .caller
            .get_export("memory")
            .and_then(Extern::into_memory)
            .or_else(|| self.caller.data().memory())
            .ok_or_else(|| HostError::invalid_argument("runtime has no linear memory"))?;
        Ok(MemoryView::new(memory.data_mut(&mut self.caller)))
    }

    /// Runtime state (logs, recorded output).
    pub fn state(&self) -> &RuntimeState {
        self.caller.data()
    }

    /// Mutable runtime state.
    pub fn state_mut(&mut self) -> &mut RuntimeState {
        self.caller.data_mut()
    }
}

/// Run the callback stored in `slot` for one engine-side call.
///
/// # Panics
///
/// Panics if `slot` is not in `registry`. Trampolines are only installed
/// after their slot is registered, so a miss means the link table and the
/// registry disagree.
pub(crate) fn dispatch(
    registry: &CallbackRegistry,
    slot: SlotId,
    mut caller: Caller<'_, RuntimeState>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let Some(entry) = registry.get(slot) else {
        panic!(
            "call bridge invariant violated: {slot} is installed but not registered in registry {}",
            registry.id()
        );
    };

    entry.record_call();
    caller.data_mut().dispatch = DispatchState::Dispatching { slot };

    for (result, ty) in results.iter_mut().zip(entry.signature().results()) {
        if let Some(zero) = ty.zero() {
            *result = zero.to_val();
        }
    }

    let mut frame = CallFrame {
        caller,
        slot,
        entry: &entry,
        params,
        results,
    };
    let outcome = (entry.callback())(&mut frame);

    let state = frame.caller.data_mut();
    match outcome {
        Ok(()) => {
            state.dispatch = DispatchState::Idle;
            debug!(
                slot = %slot,
                import = %format_args!("{}.{}", entry.module(), entry.name()),
                "Host callback completed"
            );
            Ok(())
        }
        Err(err) => {
            warn!(
                slot = %slot,
                import = %format_args!("{}.{}", entry.module(), entry.name()),
                error = %err,
                "Host callback failed"
            );
            state.dispatch = DispatchState::Faulted {
                slot,
                message: err.to_string(),
            };
            Err(err.into())
        }
    }
}

/// Run whatever slot is bound to `module.name` for an import that was
/// stubbed at load time.
///
/// Unlike a missing slot, a missing binding is an ordinary trap: the host
/// simply has not attached the function yet.
pub(crate) fn dispatch_lazy(
    registry: &CallbackRegistry,
    module: &str,
    name: &str,
    expected: &Signature,
    caller: Caller<'_, RuntimeState>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let Some(slot) = registry.binding(module, name) else {
        return Err(wasmtime::Error::msg(format!(
            "unresolved import {module}.{name}: no host function attached"
        )));
    };

    if let Some(entry) = registry.get(slot) {
        if entry.signature() != expected {
            return Err(wasmtime::Error::msg(format!(
                "import {module}.{name} expects {expected}, attached function is {}",
                entry.signature()
            )));
        }
    }

    dispatch(registry, slot, caller, params, results)
}

/// Convert an error returned by the engine for a call into a [`RuntimeError`].
pub(crate) fn call_error(error: &wasmtime::Error) -> RuntimeError {
    let trap = error.downcast_ref::<Trap>().copied();
    match trap {
        Some(Trap::OutOfFuel) => return RuntimeError::FuelExhausted,
        Some(Trap::Interrupt) => return RuntimeError::Interrupted,
        _ => {}
    }

    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return RuntimeError::Exited { code: exit.0 };
    }

    if let Some(host) = error.downcast_ref::<HostError>() {
        return RuntimeError::Host(host.clone());
    }

    RuntimeError::call(
        error.root_cause().to_string(),
        trap.map(|trap| format!("{trap:?}")),
    )
}
