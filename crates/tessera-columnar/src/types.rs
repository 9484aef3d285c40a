#![forbid(unsafe_code)]

use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Physical type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    UInt8,
    UInt32,
    Int64,
    UInt64,
    Float64,
    Boolean,
    Utf8,
}

impl ColumnType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::UInt8 | ColumnType::UInt32 | ColumnType::Int64 | ColumnType::UInt64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == ColumnType::Float64
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::UInt8 => "uint8",
            ColumnType::UInt32 => "uint32",
            ColumnType::Int64 => "int64",
            ColumnType::UInt64 => "uint64",
            ColumnType::Float64 => "float64",
            ColumnType::Boolean => "bool",
            ColumnType::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A single scalar: a row value read from a column, or a predicate literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    UInt8(u8),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float64(OrderedFloat<f64>),
    Boolean(bool),
    Utf8(Arc<str>),
}

impl Value {
    pub fn float(v: f64) -> Self {
        Value::Float64(OrderedFloat(v))
    }

    pub fn string(s: &str) -> Self {
        Value::Utf8(Arc::<str>::from(s))
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::UInt8(_) => ColumnType::UInt8,
            Value::UInt32(_) => ColumnType::UInt32,
            Value::Int64(_) => ColumnType::Int64,
            Value::UInt64(_) => ColumnType::UInt64,
            Value::Float64(_) => ColumnType::Float64,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Utf8(_) => ColumnType::Utf8,
        }
    }

    /// Integer view of the value, widened to `i128` so every integer type fits.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::UInt8(v) => Some(*v as i128),
            Value::UInt32(v) => Some(*v as i128),
            Value::Int64(v) => Some(*v as i128),
            Value::UInt64(v) => Some(*v as i128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(v.0),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Integers compare exactly across widths; an integer against a float compares as `f64`.
    /// Returns `None` for incompatible types (e.g. a string against a number) and whenever a
    /// float side is NaN. Equality and hashing still treat NaN as one value.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.as_ref().cmp(b.as_ref())),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Float64(_), _) | (_, Value::Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.as_i128()?.cmp(&other.as_i128()?)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{}", v.0),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt8(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_compare_across_widths() {
        assert_eq!(
            Value::UInt8(200).compare(&Value::Int64(-1)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::UInt64(u64::MAX).compare(&Value::Int64(i64::MAX)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn mixed_types_are_incomparable() {
        assert_eq!(Value::string("a").compare(&Value::Int64(1)), None);
        assert_eq!(Value::Boolean(true).compare(&Value::UInt8(1)), None);
    }

    #[test]
    fn float_against_integer_compares_as_f64() {
        assert_eq!(
            Value::float(1.5).compare(&Value::Int64(1)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn nan_is_unordered_but_still_equal_as_a_key() {
        let nan = Value::float(f64::NAN);
        assert_eq!(nan.compare(&Value::float(1.0)), None);
        assert_eq!(Value::Int64(1).compare(&nan), None);
        assert_eq!(nan.compare(&Value::float(f64::NAN)), None);
        assert_eq!(nan, Value::float(f64::NAN));
    }
}
