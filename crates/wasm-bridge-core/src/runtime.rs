//! Runtimes: execution contexts that load modules and run their functions.
//!
//! A [`Runtime`] owns:
//! - the store (linear memory, globals, runtime state)
//! - the link table that resolves imports
//! - the [`CallbackRegistry`] for host functions attached to it
//! - the modules loaded into it, in load order
//!
//! # Import resolution
//!
//! When a module is loaded each of its imports is resolved in this order:
//!
//! 1. a host function attached with [`Runtime::attach_function`]
//! 2. a built-in namespace (`spectest`, WASI) enabled in [`RuntimeConfig`]
//! 3. a lazy stub, for function imports when `lazy_imports` is enabled
//!
//! Built-ins are linked when the runtime is created. Attaching a function with
//! the same module and name shadows them, whether it was attached before or
//! after creation. A lazy stub looks its binding up on every call, so
//! attaching after load still reaches it.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{
    Engine, Extern, ExternType, Func, ImportType, Instance, Linker, Mutability, RefType, Store,
    ValType,
};

use wasm_bridge_common::{HostError, RuntimeConfig, RuntimeError};

use crate::bridge::{self, CallFrame};
use crate::environment::Environment;
use crate::function::Function;
use crate::memory::MemoryView;
use crate::module::{FunctionInfo, Module};
use crate::namespaces;
use crate::registry::{CallbackRegistry, SlotId, into_callback};
use crate::signature::Signature;
use crate::state::{self, DispatchState, LogEntry, RuntimeState};
use crate::value::Value;

/// An execution context bound to an [`Environment`].
///
/// A runtime runs one call at a time; every operation that touches the store
/// takes `&mut self`. Wrap it in a mutex to share it between threads.
pub struct Runtime {
    id: Uuid,
    environment: Environment,
    config: RuntimeConfig,
    store: Store<RuntimeState>,
    linker: Linker<RuntimeState>,
    registry: Arc<CallbackRegistry>,
    modules: Vec<LoadedModule>,
}

struct LoadedModule {
    module: Module,
    instance: Instance,
    /// Resolved function imports, in descriptor order.
    imports: Vec<Func>,
}

impl Runtime {
    /// Create a runtime in `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if `stack_size` is zero or
    /// exceeds the environment's `max_wasm_stack`, if fuel or epoch settings
    /// are not supported by the environment, or if a built-in namespace fails
    /// to link.
    #[instrument(skip(environment, config), fields(stack_size = config.stack_size))]
    pub fn new(environment: &Environment, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let max_stack = environment.config().max_wasm_stack;
        if config.stack_size == 0 || config.stack_size > max_stack {
            return Err(RuntimeError::invalid_config(format!(
                "stack_size must be between 1 and {max_stack} bytes, got {}",
                config.stack_size
            )));
        }

        let id = Uuid::new_v4();
        let mut store = state::create_store(environment, config, id)?;

        let mut linker = Linker::new(environment.inner());
        linker.allow_shadowing(true);

        if config.enable_wasi {
            namespaces::link_wasi(&mut linker)?;
        }
        if config.enable_spectest {
            namespaces::link_spectest(&mut linker, &mut store)?;
        }

        info!(
            runtime_id = %id,
            wasi = config.enable_wasi,
            spectest = config.enable_spectest,
            "Runtime created"
        );

        Ok(Self {
            id,
            environment: environment.clone(),
            config: config.clone(),
            store,
            linker,
            registry: Arc::new(CallbackRegistry::with_id(id)),
            modules: Vec::new(),
        })
    }

    /// Parse bytecode with this runtime's environment.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Parse`] if the bytecode is malformed.
    pub fn parse_module(&self, bytes: &[u8]) -> Result<Module, RuntimeError> {
        self.environment.parse_module(bytes)
    }

    /// Parse bytecode and load it in one step.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Runtime::parse_module`] and
    /// [`Runtime::load_module`].
    pub fn load(&mut self, bytes: &[u8]) -> Result<Module, RuntimeError> {
        let module = self.parse_module(bytes)?;
        self.load_module(module.clone())?;
        Ok(module)
    }

    /// Load a module into this runtime, resolving its imports.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Load`] if the module belongs to another environment
    ///   or runtime, or if instantiation fails (including a trapping start
    ///   function)
    /// - [`RuntimeError::Link`] if an import cannot be resolved or resolves to
    ///   something with the wrong type
    #[instrument(skip(self, module), fields(runtime_id = %self.id, module = %module.name()))]
    pub fn load_module(&mut self, module: Module) -> Result<(), RuntimeError> {
        if !Engine::same(module.inner().engine(), self.environment.inner()) {
            return Err(RuntimeError::load(format!(
                "module '{}' was parsed by a different environment",
                module.name()
            )));
        }

        module.claim(self.id)?;
        let (instance, imports) = match self.instantiate(&module) {
            Ok(loaded) => loaded,
            Err(err) => {
                module.release(self.id);
                return Err(err);
            }
        };

        if !self.store.data().has_primary_memory() {
            if let Some(memory) = primary_memory_export(&module)
                .and_then(|name| instance.get_memory(&mut self.store, &name))
            {
                self.store.data_mut().set_primary_memory(memory);
            }
        }

        info!(
            functions = module.num_functions(),
            imports = module.num_imports(),
            "Module loaded"
        );

        self.modules.push(LoadedModule {
            module,
            instance,
            imports,
        });
        Ok(())
    }

    /// Resolve the imports of a claimed module and instantiate it.
    fn instantiate(&mut self, module: &Module) -> Result<(Instance, Vec<Func>), RuntimeError> {
        let mut externs = Vec::new();
        let mut imports = Vec::new();
        for import in module.inner().imports() {
            let resolved = match self.linker.get(&mut self.store, import.module(), import.name()) {
                Some(item) => {
                    self.check_import(&import, &item)?;
                    item
                }
                None => self.lazy_stub(&import)?,
            };
            if let Extern::Func(func) = &resolved {
                imports.push(*func);
            }
            externs.push(resolved);
        }

        self.prepare_call();
        let instance = Instance::new(&mut self.store, module.inner(), &externs).map_err(|e| {
            warn!(error = %e, "Instantiation failed");
            RuntimeError::load(format!(
                "instantiating '{}' failed: {}",
                module.name(),
                e.root_cause()
            ))
        })?;
        Ok((instance, imports))
    }

    fn check_import(&self, import: &ImportType<'_>, item: &Extern) -> Result<(), RuntimeError> {
        let link_error = |reason: String| RuntimeError::link(import.module(), import.name(), reason);

        match (import.ty(), item) {
            (ExternType::Func(expected), Extern::Func(func)) => {
                let expected = Signature::from_func_type(&expected);
                let actual = Signature::from_func_type(&func.ty(&self.store));
                if expected == actual {
                    Ok(())
                } else {
                    Err(link_error(format!(
                        "signature mismatch: module expects {expected}, linked function is {actual}"
                    )))
                }
            }
            (ExternType::Global(expected), Extern::Global(global)) => {
                let actual = global.ty(&self.store);
                let content_fits = match expected.mutability() {
                    Mutability::Const => actual.content().matches(expected.content()),
                    Mutability::Var => ValType::eq(actual.content(), expected.content()),
                };
                if content_fits && actual.mutability() == expected.mutability() {
                    Ok(())
                } else {
                    Err(link_error(format!(
                        "global type mismatch: module expects {} {}, linked global is {} {}",
                        mutability_name(expected.mutability()),
                        expected.content(),
                        mutability_name(actual.mutability()),
                        actual.content()
                    )))
                }
            }
            (ExternType::Memory(expected), Extern::Memory(memory)) => {
                let actual = memory.ty(&self.store);
                let fits = actual.is_64() == expected.is_64()
                    && actual.is_shared() == expected.is_shared()
                    && limits_fit(
                        (expected.minimum(), expected.maximum()),
                        (actual.minimum(), actual.maximum()),
                    );
                if fits {
                    Ok(())
                } else {
                    Err(link_error(format!(
                        "memory type mismatch: module expects {}, linked memory has {}",
                        describe_limits(expected.minimum(), expected.maximum()),
                        describe_limits(actual.minimum(), actual.maximum())
                    )))
                }
            }
            (ExternType::Table(expected), Extern::Table(table)) => {
                let actual = table.ty(&self.store);
                let fits = RefType::eq(actual.element(), expected.element())
                    && limits_fit(
                        (expected.minimum().into(), expected.maximum().map(Into::into)),
                        (actual.minimum().into(), actual.maximum().map(Into::into)),
                    );
                if fits {
                    Ok(())
                } else {
                    Err(link_error(format!(
                        "table type mismatch: module expects {} {}, linked table is {} {}",
                        expected.element(),
                        describe_limits(expected.minimum().into(), expected.maximum().map(Into::into)),
                        actual.element(),
                        describe_limits(actual.minimum().into(), actual.maximum().map(Into::into))
                    )))
                }
            }
            (expected, _) => Err(link_error(format!(
                "linked item is not a {}",
                extern_kind(&expected)
            ))),
        }
    }

    /// A stub for a function import nothing satisfied yet.
    fn lazy_stub(&mut self, import: &ImportType<'_>) -> Result<Extern, RuntimeError> {
        let module = import.module().to_string();
        let name = import.name().to_string();

        let ExternType::Func(ty) = import.ty() else {
            return Err(RuntimeError::link(
                module,
                name,
                format!("no {} provides this import", extern_kind(&import.ty())),
            ));
        };
        if !self.config.lazy_imports {
            return Err(RuntimeError::link(module, name, "no host function attached"));
        }

        debug!(import = %format_args!("{module}.{name}"), "Installing lazy import stub");

        let expected = Signature::from_func_type(&ty);
        let registry = Arc::clone(&self.registry);
        let func = Func::new(&mut self.store, ty, move |caller, params, results| {
            bridge::dispatch_lazy(&registry, &module, &name, &expected, caller, params, results)
        });
        Ok(Extern::Func(func))
    }

    /// Find the first export named `name`, searching modules in load order.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FunctionLookup`] if no loaded module exports it.
    pub fn find_function(&mut self, name: &str) -> Result<Function, RuntimeError> {
        let found = self.modules.iter().find_map(|loaded| {
            loaded
                .module
                .exports()
                .find(|info| info.name() == name)
                .map(|info| (info.clone(), loaded.instance))
        });

        let (info, instance) = found.ok_or_else(|| RuntimeError::function_lookup(name))?;
        self.export_function(info, instance)
    }

    /// Find the export `name` of the loaded module named `module_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FunctionLookup`] if there is no such module or
    /// it has no such export.
    pub fn find_function_by_module(
        &mut self,
        module_name: &str,
        name: &str,
    ) -> Result<Function, RuntimeError> {
        let found = self
            .modules
            .iter()
            .filter(|loaded| loaded.module.name() == module_name)
            .find_map(|loaded| {
                loaded
                    .module
                    .exports()
                    .find(|info| info.name() == name)
                    .map(|info| (info.clone(), loaded.instance))
            });

        let (info, instance) = found
            .ok_or_else(|| RuntimeError::function_lookup(format!("{module_name}.{name}")))?;
        self.export_function(info, instance)
    }

    /// Callable handle for a descriptor of a module loaded into this runtime.
    ///
    /// Import descriptors resolve to whatever the import was linked to.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FunctionLookup`] if the descriptor's module is
    /// gone or not loaded here.
    pub fn function(&mut self, info: &FunctionInfo) -> Result<Function, RuntimeError> {
        let not_loaded = || {
            RuntimeError::function_lookup(format!(
                "{}: module is not loaded into runtime",
                info.name()
            ))
        };
        let module = info.module().ok_or_else(not_loaded)?;
        let loaded = self
            .modules
            .iter()
            .find(|loaded| loaded.module.ptr_eq(&module))
            .ok_or_else(not_loaded)?;

        if info.is_import() {
            let func = loaded
                .imports
                .get(info.index())
                .copied()
                .ok_or_else(not_loaded)?;
            return Ok(Function::new(info.clone(), func, self.id));
        }

        let instance = loaded.instance;
        self.export_function(info.clone(), instance)
    }

    fn export_function(
        &mut self,
        info: FunctionInfo,
        instance: Instance,
    ) -> Result<Function, RuntimeError> {
        let func = instance
            .get_func(&mut self.store, info.name())
            .ok_or_else(|| RuntimeError::function_lookup(info.name()))?;
        Ok(Function::new(info, func, self.id))
    }

    /// Attach a host function for the import `module.name`.
    ///
    /// The signature uses the compact form described in [`crate::signature`].
    /// The callback is not invoked here. It runs once per call from
    /// WebAssembly code.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Type`] if the signature is malformed or uses a
    /// non-numeric type.
    #[instrument(skip(self, callback), fields(runtime_id = %self.id))]
    pub fn attach_function<F>(
        &mut self,
        module: &str,
        name: &str,
        signature: &str,
        callback: F,
    ) -> Result<SlotId, RuntimeError>
    where
        F: Fn(&mut CallFrame<'_, '_>) -> Result<(), HostError> + Send + Sync + 'static,
    {
        let signature = Signature::parse(signature)?;
        let func_type = signature.to_func_type(self.environment.inner())?;

        let slot = self
            .registry
            .register(module, name, signature, into_callback(callback));

        let registry = Arc::clone(&self.registry);
        self.linker
            .func_new(module, name, func_type, move |caller, params, results| {
                bridge::dispatch(&registry, slot, caller, params, results)
            })
            .map_err(|e| RuntimeError::link(module, name, e.to_string()))?;
        self.registry.bind(module, name, slot);

        debug!(slot = %slot, "Host function attached");
        Ok(slot)
    }

    /// View of the runtime's linear memory.
    ///
    /// The view reflects the memory's size at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoMemory`] if no loaded module exports a
    /// memory and `spectest` is not enabled.
    pub fn memory(&mut self) -> Result<MemoryView<'_>, RuntimeError> {
        let memory = self.store.data().memory().ok_or(RuntimeError::NoMemory)?;
        Ok(MemoryView::new(memory.data_mut(&mut self.store)))
    }

    /// Current size of linear memory in bytes, or zero without one.
    pub fn memory_size(&self) -> usize {
        self.store
            .data()
            .memory()
            .map_or(0, |memory| memory.data_size(&self.store))
    }

    /// Refill the fuel budget.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the environment does not
    /// meter fuel.
    pub fn set_fuel(&mut self, fuel: u64) -> Result<(), RuntimeError> {
        self.store
            .set_fuel(fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))
    }

    /// Fuel left, if the environment meters fuel.
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Logs recorded by host functions.
    pub fn logs(&self) -> &[LogEntry] {
        &self.store.data().logs
    }

    /// Values printed through the `spectest` namespace.
    pub fn spectest_output(&self) -> &[Value] {
        &self.store.data().spectest_output
    }

    /// State of the call bridge after the most recent dispatch.
    pub fn dispatch_state(&self) -> &DispatchState {
        &self.store.data().dispatch
    }

    pub fn state(&self) -> &RuntimeState {
        self.store.data()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Loaded modules, in load order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().map(|loaded| &loaded.module)
    }

    /// Release the runtime.
    ///
    /// The environment stays usable for other runtimes.
    pub fn destroy(self) {
        info!(
            runtime_id = %self.id,
            modules = self.modules.len(),
            host_functions = self.registry.len(),
            "Runtime destroyed"
        );
    }

    /// Re-arm per-call limits and clear a faulted bridge.
    pub(crate) fn prepare_call(&mut self) {
        state::arm_epoch_deadline(&mut self.store, &self.environment, &self.config);

        let state = self.store.data_mut();
        if matches!(state.dispatch, DispatchState::Faulted { .. }) {
            state.dispatch = DispatchState::Idle;
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store<RuntimeState> {
        &mut self.store
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("modules", &self.modules.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// The export `memory` if the module has one, else its first exported memory.
fn primary_memory_export(module: &Module) -> Option<String> {
    let memories: Vec<String> = module
        .inner()
        .exports()
        .filter(|export| matches!(export.ty(), ExternType::Memory(_)))
        .map(|export| export.name().to_string())
        .collect();

    memories
        .iter()
        .find(|name| *name == "memory")
        .or_else(|| memories.first())
        .cloned()
}

/// Import limits match when the provided minimum is at least the declared
/// one and a declared maximum is not exceeded.
fn limits_fit(expected: (u64, Option<u64>), actual: (u64, Option<u64>)) -> bool {
    let (expected_min, expected_max) = expected;
    let (actual_min, actual_max) = actual;
    actual_min >= expected_min
        && match (expected_max, actual_max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected_max), Some(actual_max)) => actual_max <= expected_max,
        }
}

fn describe_limits(minimum: u64, maximum: Option<u64>) -> String {
    match maximum {
        Some(maximum) => format!("limits {minimum}..={maximum}"),
        None => format!("limits {minimum}.."),
    }
}

fn mutability_name(mutability: Mutability) -> &'static str {
    match mutability {
        Mutability::Const => "const",
        Mutability::Var => "mut",
    }
}

fn extern_kind(ty: &ExternType) -> &'static str {
    match ty {
        ExternType::Func(_) => "function",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        ExternType::Memory(_) => "memory",
        #[allow(unreachable_patterns)]
        _ => "extern",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bridge_common::EnvironmentConfig;

    #[test]
    fn test_stack_size_validation() {
        let env = Environment::default();

        let zero = RuntimeConfig::default().with_stack_size(0);
        let err = Runtime::new(&env, &zero).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));

        let too_big = RuntimeConfig::default().with_stack_size(env.config().max_wasm_stack + 1);
        assert!(Runtime::new(&env, &too_big).is_err());

        let exact = RuntimeConfig::default().with_stack_size(env.config().max_wasm_stack);
        assert!(Runtime::new(&env, &exact).is_ok());
    }

    #[test]
    fn test_fuel_requires_metering_environment() {
        let env = Environment::default();
        let config = RuntimeConfig {
            max_fuel: Some(100),
            ..Default::default()
        };
        assert!(Runtime::new(&env, &config).is_err());

        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();
        assert!(runtime.remaining_fuel().is_none());
        assert!(runtime.set_fuel(10).is_err());
    }

    #[test]
    fn test_fuel_budget() {
        let env = Environment::new(&EnvironmentConfig {
            consume_fuel: true,
            ..Default::default()
        })
        .unwrap();
        let config = RuntimeConfig {
            max_fuel: Some(1_000),
            ..Default::default()
        };

        let mut runtime = Runtime::new(&env, &config).unwrap();
        assert_eq!(runtime.remaining_fuel(), Some(1_000));

        runtime.set_fuel(5).unwrap();
        assert_eq!(runtime.remaining_fuel(), Some(5));
    }

    #[test]
    fn test_no_memory_without_modules() {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();

        assert!(matches!(runtime.memory(), Err(RuntimeError::NoMemory)));
        assert_eq!(runtime.memory_size(), 0);
    }

    #[test]
    fn test_spectest_memory_fallback() {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default().with_spectest()).unwrap();

        assert_eq!(runtime.memory_size(), 65536);
        assert_eq!(runtime.memory().unwrap().len(), 65536);
    }

    #[test]
    fn test_primary_memory_prefers_named_export() {
        let env = Environment::default();
        let module = env
            .parse_wat(
                r#"(module
                    (memory (export "scratch") 1)
                    (memory (export "memory") 2))"#,
            )
            .unwrap();
        assert_eq!(primary_memory_export(&module).as_deref(), Some("memory"));

        let module = env
            .parse_wat(r#"(module (memory (export "heap") 1))"#)
            .unwrap();
        assert_eq!(primary_memory_export(&module).as_deref(), Some("heap"));

        let module = env.parse_wat("(module)").unwrap();
        assert_eq!(primary_memory_export(&module), None);
    }

    #[test]
    fn test_attach_rejects_bad_signatures() {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();

        let err = runtime
            .attach_function("env", "f", "i(ii", |_| Ok(()))
            .unwrap_err();
        assert!(err.is_type());

        let err = runtime
            .attach_function("env", "f", "v(V)", |_| Ok(()))
            .unwrap_err();
        assert!(err.is_type());
        assert!(runtime.registry().is_empty());
    }

    #[test]
    fn test_attach_does_not_invoke() {
        let env = Environment::default();
        let mut runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();

        let slot = runtime
            .attach_function("env", "f", "i(i)", |_| panic!("must not run"))
            .unwrap();

        assert_eq!(slot.registry(), runtime.id());
        assert_eq!(runtime.registry().call_count(slot), Some(0));
        assert_eq!(runtime.registry().binding("env", "f"), Some(slot));
    }

    #[test]
    fn test_destroy_keeps_environment() {
        let env = Environment::default();
        let runtime = Runtime::new(&env, &RuntimeConfig::default()).unwrap();
        assert_eq!(env.handle_count(), 2);

        runtime.destroy();
        assert_eq!(env.handle_count(), 1);
        assert!(env.parse_wat("(module)").is_ok());
    }
}
