//! WebAssembly operand values.
//!
//! [`Value`] is the closed set of values that cross the bridge in either
//! direction. [`ValueType`] describes declared parameter and result types,
//! including the kinds the bridge can describe but not marshal.

use std::fmt;

use wasmtime::{Val, ValType};

use wasm_bridge_common::RuntimeError;

/// Declared type of a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 128-bit vector. Described, never marshaled.
    V128,
    /// Any reference type. Described, never marshaled.
    Ref,
}

impl ValueType {
    /// Decode one signature character.
    ///
    /// `*` is a pointer into linear memory and decodes to `I32`.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'i' | '*' => Some(Self::I32),
            'I' => Some(Self::I64),
            'f' => Some(Self::F32),
            'F' => Some(Self::F64),
            'V' => Some(Self::V128),
            'r' => Some(Self::Ref),
            _ => None,
        }
    }

    /// Signature character for this type.
    pub fn code(self) -> char {
        match self {
            Self::I32 => 'i',
            Self::I64 => 'I',
            Self::F32 => 'f',
            Self::F64 => 'F',
            Self::V128 => 'V',
            Self::Ref => 'r',
        }
    }

    /// Returns `true` for the four kinds [`Value`] can carry.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::F32 | Self::F64)
    }

    /// The zero value of this type, if it is numeric.
    pub fn zero(self) -> Option<Value> {
        match self {
            Self::I32 => Some(Value::I32(0)),
            Self::I64 => Some(Value::I64(0)),
            Self::F32 => Some(Value::F32(0.0)),
            Self::F64 => Some(Value::F64(0.0)),
            Self::V128 | Self::Ref => None,
        }
    }

    /// Parse a textual argument as a value of this type.
    ///
    /// Integers accept decimal, a leading `-`, and a `0x` prefix. Values in
    /// the unsigned range wrap into the signed representation, so
    /// `"4294967295"` is `-1i32`. Floats accept anything `str::parse` does.
    pub fn parse_value(self, text: &str) -> Result<Value, RuntimeError> {
        let text = text.trim();
        let invalid = || RuntimeError::type_mismatch(format!("cannot parse '{text}' as {self}"));

        match self {
            Self::I32 => {
                let (negative, magnitude) = parse_magnitude(text).ok_or_else(invalid)?;
                let value = if negative {
                    if magnitude > 1 << 31 {
                        return Err(invalid());
                    }
                    (magnitude as i64).wrapping_neg() as i32
                } else {
                    u32::try_from(magnitude).map_err(|_| invalid())? as i32
                };
                Ok(Value::I32(value))
            }
            Self::I64 => {
                let (negative, magnitude) = parse_magnitude(text).ok_or_else(invalid)?;
                let value = if negative {
                    if magnitude > 1 << 63 {
                        return Err(invalid());
                    }
                    magnitude.wrapping_neg() as i64
                } else {
                    magnitude as i64
                };
                Ok(Value::I64(value))
            }
            Self::F32 => text.parse().map(Value::F32).map_err(|_| invalid()),
            Self::F64 => text.parse().map(Value::F64).map_err(|_| invalid()),
            Self::V128 | Self::Ref => Err(RuntimeError::type_mismatch(format!(
                "{self} arguments are not supported"
            ))),
        }
    }

    pub(crate) fn from_val_type(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Self::I32,
            ValType::I64 => Self::I64,
            ValType::F32 => Self::F32,
            ValType::F64 => Self::F64,
            ValType::V128 => Self::V128,
            ValType::Ref(_) => Self::Ref,
        }
    }

    pub(crate) fn to_val_type(self) -> Option<ValType> {
        match self {
            Self::I32 => Some(ValType::I32),
            Self::I64 => Some(ValType::I64),
            Self::F32 => Some(ValType::F32),
            Self::F64 => Some(ValType::F64),
            Self::V128 | Self::Ref => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::V128 => "v128",
            Self::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// Split `text` into a sign and an unsigned magnitude (decimal or `0x` hex).
fn parse_magnitude(text: &str) -> Option<(bool, u64)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some((negative, magnitude))
}

/// A WebAssembly operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Value {
    /// The type of this value.
    pub fn ty(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret an i32 value as an unsigned offset into linear memory.
    #[allow(clippy::cast_sign_loss)]
    pub fn as_offset(&self) -> Option<usize> {
        self.as_i32().map(|v| v as u32 as usize)
    }

    pub(crate) fn to_val(self) -> Val {
        match self {
            Self::I32(v) => Val::I32(v),
            Self::I64(v) => Val::I64(v),
            Self::F32(v) => Val::F32(v.to_bits()),
            Self::F64(v) => Val::F64(v.to_bits()),
        }
    }

    pub(crate) fn from_val(val: &Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(Self::I32(*v)),
            Val::I64(v) => Some(Self::I64(*v)),
            Val::F32(bits) => Some(Self::F32(f32::from_bits(*bits))),
            Val::F64(bits) => Some(Self::F64(f64::from_bits(*bits))),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for Value {
    #[allow(clippy::cast_possible_wrap)]
    fn from(v: u32) -> Self {
        Self::I32(v as i32)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}:i32"),
            Self::I64(v) => write!(f, "{v}:i64"),
            Self::F32(v) => write!(f, "{v}:f32"),
            Self::F64(v) => write!(f, "{v}:f64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        for ty in [
            ValueType::I32,
            ValueType::I64,
            ValueType::F32,
            ValueType::F64,
            ValueType::V128,
            ValueType::Ref,
        ] {
            assert_eq!(ValueType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ValueType::from_code('*'), Some(ValueType::I32));
        assert_eq!(ValueType::from_code('x'), None);
    }

    #[test]
    fn test_parse_i32() {
        assert_eq!(ValueType::I32.parse_value("42").unwrap(), Value::I32(42));
        assert_eq!(ValueType::I32.parse_value("-7").unwrap(), Value::I32(-7));
        assert_eq!(ValueType::I32.parse_value("0x2A").unwrap(), Value::I32(42));
        assert_eq!(
            ValueType::I32.parse_value("4294967295").unwrap(),
            Value::I32(-1)
        );
        assert_eq!(
            ValueType::I32.parse_value("-2147483648").unwrap(),
            Value::I32(i32::MIN)
        );
        assert!(ValueType::I32.parse_value("4294967296").is_err());
        assert!(ValueType::I32.parse_value("-2147483649").is_err());
        assert!(ValueType::I32.parse_value("abc").is_err());
    }

    #[test]
    fn test_parse_i64_and_floats() {
        assert_eq!(
            ValueType::I64.parse_value("-9223372036854775808").unwrap(),
            Value::I64(i64::MIN)
        );
        assert_eq!(
            ValueType::I64.parse_value("18446744073709551615").unwrap(),
            Value::I64(-1)
        );
        assert_eq!(ValueType::F32.parse_value("1.5").unwrap(), Value::F32(1.5));
        assert_eq!(ValueType::F64.parse_value("-2e3").unwrap(), Value::F64(-2000.0));

        let err = ValueType::V128.parse_value("0").unwrap_err();
        assert!(err.is_type());
    }

    #[test]
    fn test_val_conversion() {
        for value in [
            Value::I32(-3),
            Value::I64(1 << 40),
            Value::F32(0.25),
            Value::F64(-1.5),
        ] {
            assert_eq!(Value::from_val(&value.to_val()), Some(value));
        }
    }

    #[test]
    fn test_accessors() {
        let v = Value::from(7i32);
        assert_eq!(v.ty(), ValueType::I32);
        assert_eq!(v.as_i32(), Some(7));
        assert_eq!(v.as_i64(), None);
        assert_eq!(Value::from(u32::MAX).as_offset(), Some(u32::MAX as usize));
        assert_eq!(Value::I32(5).to_string(), "5:i32");
    }

    #[test]
    fn test_zero() {
        assert_eq!(ValueType::F64.zero(), Some(Value::F64(0.0)));
        assert_eq!(ValueType::Ref.zero(), None);
    }
}
