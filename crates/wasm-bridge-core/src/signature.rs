//! Compact function signatures.
//!
//! A signature is written as result characters followed by parameter
//! characters in parentheses, one character per value:
//!
//! | char | type |
//! |------|------|
//! | `i`  | i32 |
//! | `I`  | i64 |
//! | `f`  | f32 |
//! | `F`  | f64 |
//! | `*`  | pointer into linear memory (i32) |
//! | `V`  | v128 |
//! | `r`  | reference |
//!
//! `v` or an empty result part means no result, so `i(ii)` is
//! `(i32, i32) -> i32` and `v(*i)` is `(i32, i32) -> ()`.

use std::fmt;
use std::str::FromStr;

use wasmtime::{Engine, FuncType};

use wasm_bridge_common::RuntimeError;

use crate::value::ValueType;

/// Parameter and result types of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    params: Vec<ValueType>,
    results: Vec<ValueType>,
}

impl Signature {
    /// Create a signature from parameter and result types.
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self { params, results }
    }

    /// Parse the compact string form.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Type`] if the string is malformed or uses an
    /// unknown type character.
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let invalid = |why: &str| RuntimeError::type_mismatch(format!("invalid signature '{text}': {why}"));

        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let (results_part, rest) = compact
            .split_once('(')
            .ok_or_else(|| invalid("missing '('"))?;
        let params_part = rest
            .strip_suffix(')')
            .ok_or_else(|| invalid("missing closing ')'"))?;

        let results = if results_part == "v" {
            Vec::new()
        } else {
            decode_types(results_part).ok_or_else(|| invalid("unknown result type"))?
        };
        let params = decode_types(params_part).ok_or_else(|| invalid("unknown parameter type"))?;

        Ok(Self { params, results })
    }

    /// Parameter types, in order.
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Result types, in order.
    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// The first result type, if any.
    pub fn return_type(&self) -> Option<ValueType> {
        self.results.first().copied()
    }

    /// Returns `true` if every parameter and result can be marshaled.
    pub fn is_numeric(&self) -> bool {
        self.params
            .iter()
            .chain(&self.results)
            .all(|ty| ty.is_numeric())
    }

    pub(crate) fn from_func_type(ty: &FuncType) -> Self {
        Self {
            params: ty.params().map(|t| ValueType::from_val_type(&t)).collect(),
            results: ty.results().map(|t| ValueType::from_val_type(&t)).collect(),
        }
    }

    pub(crate) fn to_func_type(&self, engine: &Engine) -> Result<FuncType, RuntimeError> {
        let convert = |types: &[ValueType]| {
            types
                .iter()
                .map(|ty| {
                    ty.to_val_type().ok_or_else(|| {
                        RuntimeError::type_mismatch(format!(
                            "{ty} is not supported in host functions"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        };
        let params = convert(&self.params)?;
        let results = convert(&self.results)?;
        Ok(FuncType::new(engine, params, results))
    }
}

fn decode_types(part: &str) -> Option<Vec<ValueType>> {
    part.chars().map(ValueType::from_code).collect()
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.results.is_empty() {
            f.write_str("v")?;
        }
        for ty in &self.results {
            write!(f, "{}", ty.code())?;
        }
        f.write_str("(")?;
        for ty in &self.params {
            write!(f, "{}", ty.code())?;
        }
        f.write_str(")")
    }
}

impl FromStr for Signature {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let sig = Signature::parse("i(ii)").unwrap();
        assert_eq!(sig.params(), &[ValueType::I32, ValueType::I32]);
        assert_eq!(sig.results(), &[ValueType::I32]);
        assert_eq!(sig.arity(), 2);
        assert_eq!(sig.return_type(), Some(ValueType::I32));
    }

    #[test]
    fn test_parse_void_and_pointer() {
        let sig = Signature::parse("v(*i)").unwrap();
        assert!(sig.results().is_empty());
        assert_eq!(sig.params(), &[ValueType::I32, ValueType::I32]);

        let sig = Signature::parse("()").unwrap();
        assert_eq!(sig, Signature::default());
    }

    #[test]
    fn test_parse_mixed_with_whitespace() {
        let sig = Signature::parse(" F ( i I f ) ").unwrap();
        assert_eq!(
            sig.params(),
            &[ValueType::I32, ValueType::I64, ValueType::F32]
        );
        assert_eq!(sig.results(), &[ValueType::F64]);
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["i(ii)", "v()", "IF(fF)", "v(V)"] {
            assert_eq!(Signature::parse(text).unwrap().to_string(), text);
        }
        // Pointers are written back as plain i32
        assert_eq!(Signature::parse("v(*)").unwrap().to_string(), "v(i)");
    }

    #[test]
    fn test_parse_errors() {
        for text in ["i", "i(i", "x(i)", "i(v)", "i(q)"] {
            let err = Signature::parse(text).unwrap_err();
            assert!(err.is_type(), "expected type error for {text}");
        }
    }

    #[test]
    fn test_is_numeric() {
        assert!(Signature::parse("i(IfF)").unwrap().is_numeric());
        assert!(!Signature::parse("v(r)").unwrap().is_numeric());
    }
}
