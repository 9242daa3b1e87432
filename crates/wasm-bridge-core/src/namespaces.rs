//! Built-in import namespaces.
//!
//! - `wasi_snapshot_preview1`, provided by `wasmtime-wasi`
//! - `spectest`, the host module the WebAssembly test suite imports
//!
//! Both are linked once, when the runtime is created. Anything attached later
//! with [`crate::Runtime::attach_function`] shadows them.

use tracing::info;
use wasmtime::{
    Caller, Global, GlobalType, Linker, Memory, MemoryType, Mutability, Ref, RefType, Store,
    Table, TableType, Val, ValType,
};
use wasmtime_wasi::preview1;

use wasm_bridge_common::RuntimeError;

use crate::state::RuntimeState;
use crate::value::Value;

/// Namespace of the spectest host module.
pub const SPECTEST: &str = "spectest";

/// Namespace of WASI preview1.
pub const WASI_PREVIEW1: &str = "wasi_snapshot_preview1";

/// Link WASI preview1 into `linker`.
pub(crate) fn link_wasi(linker: &mut Linker<RuntimeState>) -> Result<(), RuntimeError> {
    preview1::add_to_linker_sync(linker, |state: &mut RuntimeState| state.wasi_mut())
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to link WASI: {e}")))
}

/// Link the `spectest` namespace into `linker`.
///
/// The globals, table, and memory are created in `store`, so the linker can
/// only instantiate into that store afterwards.
pub(crate) fn link_spectest(
    linker: &mut Linker<RuntimeState>,
    store: &mut Store<RuntimeState>,
) -> Result<(), RuntimeError> {
    let failed = |e: wasmtime::Error| {
        RuntimeError::invalid_config(format!("Failed to link {SPECTEST}: {e}"))
    };

    linker.func_wrap(SPECTEST, "print", |_: Caller<'_, RuntimeState>| {}).map_err(failed)?;
    linker
        .func_wrap(SPECTEST, "print_i32", |mut caller: Caller<'_, RuntimeState>, a: i32| {
            print(&mut caller, &[Value::I32(a)]);
        })
        .map_err(failed)?;
    linker
        .func_wrap(SPECTEST, "print_i64", |mut caller: Caller<'_, RuntimeState>, a: i64| {
            print(&mut caller, &[Value::I64(a)]);
        })
        .map_err(failed)?;
    linker
        .func_wrap(SPECTEST, "print_f32", |mut caller: Caller<'_, RuntimeState>, a: f32| {
            print(&mut caller, &[Value::F32(a)]);
        })
        .map_err(failed)?;
    linker
        .func_wrap(SPECTEST, "print_f64", |mut caller: Caller<'_, RuntimeState>, a: f64| {
            print(&mut caller, &[Value::F64(a)]);
        })
        .map_err(failed)?;
    linker
        .func_wrap(
            SPECTEST,
            "print_i32_f32",
            |mut caller: Caller<'_, RuntimeState>, a: i32, b: f32| {
                print(&mut caller, &[Value::I32(a), Value::F32(b)]);
            },
        )
        .map_err(failed)?;
    linker
        .func_wrap(
            SPECTEST,
            "print_f64_f64",
            |mut caller: Caller<'_, RuntimeState>, a: f64, b: f64| {
                print(&mut caller, &[Value::F64(a), Value::F64(b)]);
            },
        )
        .map_err(failed)?;

    let globals = [
        ("global_i32", ValType::I32, Val::I32(666)),
        ("global_i64", ValType::I64, Val::I64(666)),
        ("global_f32", ValType::F32, Val::F32(666.6_f32.to_bits())),
        ("global_f64", ValType::F64, Val::F64(666.6_f64.to_bits())),
    ];
    for (name, ty, value) in globals {
        let global = Global::new(&mut *store, GlobalType::new(ty, Mutability::Const), value)
            .map_err(failed)?;
        linker.define(&mut *store, SPECTEST, name, global).map_err(failed)?;
    }

    let table = Table::new(
        &mut *store,
        TableType::new(RefType::FUNCREF, 10, Some(20)),
        Ref::Func(None),
    )
    .map_err(failed)?;
    linker.define(&mut *store, SPECTEST, "table", table).map_err(failed)?;

    let memory = Memory::new(&mut *store, MemoryType::new(1, Some(2))).map_err(failed)?;
    linker.define(&mut *store, SPECTEST, "memory", memory).map_err(failed)?;
    store.data_mut().set_spectest_memory(memory);

    Ok(())
}

fn print(caller: &mut Caller<'_, RuntimeState>, values: &[Value]) {
    let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
    info!(
        runtime_id = %caller.data().runtime_id,
        values = %rendered.join(", "),
        "spectest print"
    );
    caller.data_mut().spectest_output.extend_from_slice(values);
}
