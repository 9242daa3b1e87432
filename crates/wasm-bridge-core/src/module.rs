//! Parsed WebAssembly modules and their function descriptors.
//!
//! A [`Module`] is produced by [`crate::Environment::parse_module`]. It is
//! validated and compiled but not bound to any runtime. Its functions are
//! described by [`FunctionInfo`]s: imports first, in import order, then
//! exports, in export order.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use wasmtime::ExternType;

use wasm_bridge_common::RuntimeError;

use crate::environment::Environment;
use crate::signature::Signature;
use crate::value::ValueType;

/// Name used for modules whose name section does not name them.
pub const UNNAMED_MODULE: &str = ".unnamed";

/// A parsed WebAssembly module.
///
/// Cloning is cheap; clones share descriptors and the runtime claim.
#[derive(Clone)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    module: wasmtime::Module,
    name: String,
    content_hash: String,
    compiled_at: Instant,

    /// Resolved on first use.
    functions: OnceLock<Vec<FunctionInfo>>,
    num_imports: OnceLock<usize>,

    /// Held by the runtime loading the module; released if loading fails.
    loaded_into: Mutex<Option<Uuid>>,
}

impl Module {
    pub(crate) fn from_bytes(
        environment: &Environment,
        bytes: &[u8],
        name: Option<&str>,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        validate_wasm_header(bytes)?;

        let module = wasmtime::Module::new(environment.inner(), bytes)
            .map_err(|e| RuntimeError::parse(format!("Module validation failed: {e:#}")))?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module parsed"
        );

        Ok(Self::wrap(module, name, content_hash))
    }

    pub(crate) fn from_wat(environment: &Environment, wat: &str) -> Result<Self, RuntimeError> {
        let module = wasmtime::Module::new(environment.inner(), wat)
            .map_err(|e| RuntimeError::parse(format!("WAT compilation failed: {e:#}")))?;

        let content_hash = compute_hash(wat.as_bytes());
        debug!(content_hash = %content_hash, "WAT module compiled");

        Ok(Self::wrap(module, None, content_hash))
    }

    fn wrap(module: wasmtime::Module, name: Option<&str>, content_hash: String) -> Self {
        let name = module
            .name()
            .or(name)
            .unwrap_or(UNNAMED_MODULE)
            .to_string();

        Self {
            inner: Arc::new(ModuleInner {
                module,
                name,
                content_hash,
                compiled_at: Instant::now(),
                functions: OnceLock::new(),
                num_imports: OnceLock::new(),
                loaded_into: Mutex::new(None),
            }),
        }
    }

    /// Module name, or `.unnamed`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fingerprint of the source bytes.
    pub fn content_hash(&self) -> &str {
        &self.inner.content_hash
    }

    /// When this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.inner.compiled_at
    }

    /// Number of function descriptors (imports and exports).
    ///
    /// Functions that are neither imported nor exported have no descriptor
    /// and are not counted, so this can be smaller than the module's
    /// function index space.
    pub fn num_functions(&self) -> usize {
        self.functions().len()
    }

    /// Number of imported functions.
    pub fn num_imports(&self) -> usize {
        *self.inner.num_imports.get_or_init(|| {
            self.functions()
                .iter()
                .take_while(|f| f.is_import())
                .count()
        })
    }

    /// Descriptor at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FunctionLookup`] if `index` is out of range.
    pub fn function(&self, index: usize) -> Result<&FunctionInfo, RuntimeError> {
        self.functions().get(index).ok_or_else(|| {
            RuntimeError::function_lookup(format!(
                "{}[{index}] (module has {} functions)",
                self.name(),
                self.num_functions()
            ))
        })
    }

    /// First descriptor named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FunctionLookup`] if no descriptor matches.
    pub fn function_by_name(&self, name: &str) -> Result<&FunctionInfo, RuntimeError> {
        self.functions()
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| RuntimeError::function_lookup(format!("{}.{name}", self.name())))
    }

    /// All descriptors, imports first.
    pub fn functions(&self) -> &[FunctionInfo] {
        self.inner
            .functions
            .get_or_init(|| describe_functions(&self.inner))
    }

    /// Imported functions, in import order.
    pub fn imports(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions().iter().filter(|f| f.is_import())
    }

    /// Exported functions, in export order.
    pub fn exports(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions().iter().filter(|f| !f.is_import())
    }

    /// Runtime this module has been loaded into, if any.
    pub fn loaded_into(&self) -> Option<Uuid> {
        *self.inner.loaded_into.lock()
    }

    /// Returns `true` if both handles refer to the same parsed module.
    pub fn ptr_eq(&self, other: &Module) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn inner(&self) -> &wasmtime::Module {
        &self.inner.module
    }

    /// Mark the module as owned by `runtime_id`.
    pub(crate) fn claim(&self, runtime_id: Uuid) -> Result<(), RuntimeError> {
        let mut owner = self.inner.loaded_into.lock();
        if let Some(owner) = *owner {
            return Err(RuntimeError::load(format!(
                "module '{}' is already loaded into runtime {owner}",
                self.name()
            )));
        }
        *owner = Some(runtime_id);
        Ok(())
    }

    /// Drop a claim taken by `runtime_id` for a load that did not complete.
    pub(crate) fn release(&self, runtime_id: Uuid) {
        let mut owner = self.inner.loaded_into.lock();
        if *owner == Some(runtime_id) {
            *owner = None;
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.inner.name)
            .field("content_hash", &self.inner.content_hash)
            .field("loaded_into", &self.loaded_into())
            .finish_non_exhaustive()
    }
}

fn describe_functions(inner: &Arc<ModuleInner>) -> Vec<FunctionInfo> {
    let module = Arc::downgrade(inner);

    let imports = inner.module.imports().filter_map(|import| match import.ty() {
        ExternType::Func(ty) => Some((
            import.name().to_string(),
            FunctionKind::Import {
                module: import.module().to_string(),
                field: import.name().to_string(),
            },
            Signature::from_func_type(&ty),
        )),
        _ => None,
    });

    let exports = inner.module.exports().filter_map(|export| match export.ty() {
        ExternType::Func(ty) => Some((
            export.name().to_string(),
            FunctionKind::Export,
            Signature::from_func_type(&ty),
        )),
        _ => None,
    });

    imports
        .chain(exports)
        .enumerate()
        .map(|(index, (name, kind, signature))| FunctionInfo {
            index,
            name,
            kind,
            signature,
            module: Weak::clone(&module),
        })
        .collect()
}

/// Whether a function is imported or exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionKind {
    /// Imported from the host or another module.
    Import {
        /// Import namespace.
        module: String,
        /// Import field name.
        field: String,
    },
    /// Exported by the module.
    Export,
}

/// Descriptor of one function in a [`Module`].
#[derive(Clone)]
pub struct FunctionInfo {
    index: usize,
    name: String,
    kind: FunctionKind,
    signature: Signature,
    module: Weak<ModuleInner>,
}

impl FunctionInfo {
    /// Position within the module's descriptors.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Export name, or the import field name for imports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of parameters.
    pub fn num_args(&self) -> usize {
        self.signature.arity()
    }

    /// Type of parameter `index`.
    pub fn arg_type(&self, index: usize) -> Option<ValueType> {
        self.signature.params().get(index).copied()
    }

    /// Type of the first result.
    pub fn return_type(&self) -> Option<ValueType> {
        self.signature.return_type()
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, FunctionKind::Import { .. })
    }

    /// Import namespace, for imports.
    pub fn import_module(&self) -> Option<&str> {
        match &self.kind {
            FunctionKind::Import { module, .. } => Some(module),
            FunctionKind::Export => None,
        }
    }

    /// Import field name, for imports.
    pub fn import_field(&self) -> Option<&str> {
        match &self.kind {
            FunctionKind::Import { field, .. } => Some(field),
            FunctionKind::Export => None,
        }
    }

    /// The module this function belongs to, while it is still alive.
    pub fn module(&self) -> Option<Module> {
        self.module.upgrade().map(|inner| Module { inner })
    }
}

impl std::fmt::Debug for FunctionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionInfo")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("signature", &self.signature.to_string())
            .finish_non_exhaustive()
    }
}

/// Check the `\0asm` magic number and binary version.
fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() < 8 {
        return Err(RuntimeError::parse("Invalid Wasm: file too small"));
    }

    if &bytes[0..4] != b"\0asm" {
        return Err(RuntimeError::parse("Invalid Wasm: bad magic number"));
    }

    if bytes[4..8] != [0x01, 0x00, 0x00, 0x00] {
        return Err(RuntimeError::parse(format!(
            "Invalid Wasm: unsupported version {:02x?}",
            &bytes[4..8]
        )));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
