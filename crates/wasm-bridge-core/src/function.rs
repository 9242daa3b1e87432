//! Callable function handles.

use tracing::{debug, instrument};
use uuid::Uuid;
use wasmtime::{Func, Val};

use wasm_bridge_common::RuntimeError;

use crate::bridge::call_error;
use crate::module::{FunctionInfo, Module};
use crate::runtime::Runtime;
use crate::signature::Signature;
use crate::value::{Value, ValueType};

/// A function in a loaded module, bound to the runtime that loaded it.
///
/// Obtained from [`Runtime::find_function`], [`Runtime::find_function_by_module`]
/// or [`Runtime::function`].
#[derive(Clone)]
pub struct Function {
    info: FunctionInfo,
    func: Func,
    runtime_id: Uuid,
}

impl Function {
    pub(crate) fn new(info: FunctionInfo, func: Func, runtime_id: Uuid) -> Self {
        Self {
            info,
            func,
            runtime_id,
        }
    }

    /// Call the function with typed arguments.
    ///
    /// Arguments are checked against the signature before the engine is
    /// entered.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Type`] on an arity or type mismatch
    /// - [`RuntimeError::Call`] if the engine traps
    /// - [`RuntimeError::Host`] if a host callback failed
    /// - [`RuntimeError::FuelExhausted`], [`RuntimeError::Interrupted`] or
    ///   [`RuntimeError::Exited`] when execution stops early
    #[instrument(skip(self, runtime, args), fields(function = %self.info.name(), argc = args.len()))]
    pub fn call(&self, runtime: &mut Runtime, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        if runtime.id() != self.runtime_id {
            return Err(RuntimeError::function_lookup(format!(
                "{} belongs to runtime {}, not {}",
                self.info.name(),
                self.runtime_id,
                runtime.id()
            )));
        }

        self.check_args(args)?;

        let params: Vec<Val> = args.iter().map(|arg| arg.to_val()).collect();
        let mut results: Vec<Val> = self
            .signature()
            .results()
            .iter()
            .filter_map(|ty| ty.zero())
            .map(Value::to_val)
            .collect();

        runtime.prepare_call();
        self.func
            .call(runtime.store_mut(), &params, &mut results)
            .map_err(|e| {
                let err = call_error(&e);
                debug!(error = %err, "Call failed");
                err
            })?;

        results
            .iter()
            .map(|val| {
                Value::from_val(val).ok_or_else(|| {
                    RuntimeError::type_mismatch(format!(
                        "{} returned a non-numeric value",
                        self.info.name()
                    ))
                })
            })
            .collect()
    }

    /// Call the function with arguments given as strings.
    ///
    /// Each string is parsed as the corresponding parameter type. Integers
    /// accept decimal, negative, and `0x` hex forms.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Type`] if the count is wrong or a string does
    /// not parse; otherwise the same errors as [`Function::call`].
    pub fn call_with_args(
        &self,
        runtime: &mut Runtime,
        args: &[&str],
    ) -> Result<Vec<Value>, RuntimeError> {
        if args.len() != self.num_args() {
            return Err(self.arity_error(args.len()));
        }

        let values = args
            .iter()
            .zip(self.signature().params())
            .map(|(text, ty)| ty.parse_value(text))
            .collect::<Result<Vec<_>, _>>()?;

        self.call(runtime, &values)
    }

    fn check_args(&self, args: &[Value]) -> Result<(), RuntimeError> {
        let signature = self.signature();
        if !signature.is_numeric() {
            return Err(RuntimeError::type_mismatch(format!(
                "{} has signature {signature}, only numeric types can be passed",
                self.info.name()
            )));
        }

        if args.len() != signature.arity() {
            return Err(self.arity_error(args.len()));
        }

        for (index, (arg, expected)) in args.iter().zip(signature.params()).enumerate() {
            if arg.ty() != *expected {
                return Err(RuntimeError::type_mismatch(format!(
                    "{} argument {index}: expected {expected}, got {}",
                    self.info.name(),
                    arg.ty()
                )));
            }
        }

        Ok(())
    }

    fn arity_error(&self, given: usize) -> RuntimeError {
        RuntimeError::type_mismatch(format!(
            "{} takes {} arguments, {given} given",
            self.info.name(),
            self.num_args()
        ))
    }

    /// Descriptor this handle was created from.
    pub fn info(&self) -> &FunctionInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn signature(&self) -> &Signature {
        self.info.signature()
    }

    pub fn num_args(&self) -> usize {
        self.info.num_args()
    }

    pub fn arg_type(&self, index: usize) -> Option<ValueType> {
        self.info.arg_type(index)
    }

    pub fn return_type(&self) -> Option<ValueType> {
        self.info.return_type()
    }

    pub fn import_module(&self) -> Option<&str> {
        self.info.import_module()
    }

    pub fn import_field(&self) -> Option<&str> {
        self.info.import_field()
    }

    /// The owning module, while it is alive.
    pub fn module(&self) -> Option<Module> {
        self.info.module()
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.info.name())
            .field("signature", &self.signature().to_string())
            .field("runtime_id", &self.runtime_id)
            .finish_non_exhaustive()
    }
}
