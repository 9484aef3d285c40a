#![forbid(unsafe_code)]

use crate::bitmap::Bitmap;
use crate::error::{ColumnarError, ColumnarResult};
use crate::types::{ColumnType, Value};
use ordered_float::OrderedFloat;
use std::sync::Arc;

/// One block's worth of a column: a typed, immutable, cheaply clonable array.
///
/// Consumers match on the variant once per column access and then run a typed loop over the
/// slice, instead of dispatching per row.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    UInt8(Arc<[u8]>),
    UInt32(Arc<[u32]>),
    Int64(Arc<[i64]>),
    UInt64(Arc<[u64]>),
    Float64(Arc<[f64]>),
    Boolean(Arc<[bool]>),
    Utf8(Arc<[Arc<str>]>),
}

fn filter_slice<T: Clone>(values: &[T], mask: &Bitmap) -> Arc<[T]> {
    mask.iter_ones().map(|row| values[row].clone()).collect()
}

fn take_slice<T: Clone>(values: &[T], rows: &[usize]) -> ColumnarResult<Arc<[T]>> {
    rows.iter()
        .map(|&row| {
            values.get(row).cloned().ok_or(ColumnarError::RowOutOfRange {
                row,
                rows: values.len(),
            })
        })
        .collect()
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::UInt8(v) => v.len(),
            ColumnData::UInt32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::UInt64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::UInt8(_) => ColumnType::UInt8,
            ColumnData::UInt32(_) => ColumnType::UInt32,
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::UInt64(_) => ColumnType::UInt64,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::Boolean(_) => ColumnType::Boolean,
            ColumnData::Utf8(_) => ColumnType::Utf8,
        }
    }

    pub fn value(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::UInt8(v) => v.get(row).copied().map(Value::UInt8),
            ColumnData::UInt32(v) => v.get(row).copied().map(Value::UInt32),
            ColumnData::Int64(v) => v.get(row).copied().map(Value::Int64),
            ColumnData::UInt64(v) => v.get(row).copied().map(Value::UInt64),
            ColumnData::Float64(v) => v.get(row).map(|f| Value::Float64(OrderedFloat(*f))),
            ColumnData::Boolean(v) => v.get(row).copied().map(Value::Boolean),
            ColumnData::Utf8(v) => v.get(row).cloned().map(Value::Utf8),
        }
    }

    /// Keep the rows whose bit is set in `mask`.
    pub fn filter(&self, mask: &Bitmap) -> ColumnarResult<ColumnData> {
        if mask.len() != self.len() {
            return Err(ColumnarError::ColumnLengthMismatch {
                column: "filter".to_owned(),
                expected: self.len(),
                actual: mask.len(),
            });
        }
        Ok(match self {
            ColumnData::UInt8(v) => ColumnData::UInt8(filter_slice(v, mask)),
            ColumnData::UInt32(v) => ColumnData::UInt32(filter_slice(v, mask)),
            ColumnData::Int64(v) => ColumnData::Int64(filter_slice(v, mask)),
            ColumnData::UInt64(v) => ColumnData::UInt64(filter_slice(v, mask)),
            ColumnData::Float64(v) => ColumnData::Float64(filter_slice(v, mask)),
            ColumnData::Boolean(v) => ColumnData::Boolean(filter_slice(v, mask)),
            ColumnData::Utf8(v) => ColumnData::Utf8(filter_slice(v, mask)),
        })
    }

    /// Gather `rows` (block-local indices) in the given order.
    pub fn take(&self, rows: &[usize]) -> ColumnarResult<ColumnData> {
        Ok(match self {
            ColumnData::UInt8(v) => ColumnData::UInt8(take_slice(v, rows)?),
            ColumnData::UInt32(v) => ColumnData::UInt32(take_slice(v, rows)?),
            ColumnData::Int64(v) => ColumnData::Int64(take_slice(v, rows)?),
            ColumnData::UInt64(v) => ColumnData::UInt64(take_slice(v, rows)?),
            ColumnData::Float64(v) => ColumnData::Float64(take_slice(v, rows)?),
            ColumnData::Boolean(v) => ColumnData::Boolean(take_slice(v, rows)?),
            ColumnData::Utf8(v) => ColumnData::Utf8(take_slice(v, rows)?),
        })
    }
}

impl From<Vec<u8>> for ColumnData {
    fn from(v: Vec<u8>) -> Self {
        ColumnData::UInt8(v.into())
    }
}

impl From<Vec<u32>> for ColumnData {
    fn from(v: Vec<u32>) -> Self {
        ColumnData::UInt32(v.into())
    }
}

impl From<Vec<i64>> for ColumnData {
    fn from(v: Vec<i64>) -> Self {
        ColumnData::Int64(v.into())
    }
}

impl From<Vec<u64>> for ColumnData {
    fn from(v: Vec<u64>) -> Self {
        ColumnData::UInt64(v.into())
    }
}

impl From<Vec<f64>> for ColumnData {
    fn from(v: Vec<f64>) -> Self {
        ColumnData::Float64(v.into())
    }
}

impl From<Vec<bool>> for ColumnData {
    fn from(v: Vec<bool>) -> Self {
        ColumnData::Boolean(v.into())
    }
}

impl From<Vec<&str>> for ColumnData {
    fn from(v: Vec<&str>) -> Self {
        ColumnData::Utf8(v.into_iter().map(Arc::<str>::from).collect())
    }
}

/// Append-only buffer for one column of the block currently being filled.
pub(crate) enum ColumnBuffer {
    UInt8(Vec<u8>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    Boolean(Vec<bool>),
    Utf8(Vec<Arc<str>>),
}

impl ColumnBuffer {
    pub(crate) fn new(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::UInt8 => ColumnBuffer::UInt8(Vec::with_capacity(capacity)),
            ColumnType::UInt32 => ColumnBuffer::UInt32(Vec::with_capacity(capacity)),
            ColumnType::Int64 => ColumnBuffer::Int64(Vec::with_capacity(capacity)),
            ColumnType::UInt64 => ColumnBuffer::UInt64(Vec::with_capacity(capacity)),
            ColumnType::Float64 => ColumnBuffer::Float64(Vec::with_capacity(capacity)),
            ColumnType::Boolean => ColumnBuffer::Boolean(Vec::with_capacity(capacity)),
            ColumnType::Utf8 => ColumnBuffer::Utf8(Vec::with_capacity(capacity)),
        }
    }

    fn column_type(&self) -> ColumnType {
        match self {
            ColumnBuffer::UInt8(_) => ColumnType::UInt8,
            ColumnBuffer::UInt32(_) => ColumnType::UInt32,
            ColumnBuffer::Int64(_) => ColumnType::Int64,
            ColumnBuffer::UInt64(_) => ColumnType::UInt64,
            ColumnBuffer::Float64(_) => ColumnType::Float64,
            ColumnBuffer::Boolean(_) => ColumnType::Boolean,
            ColumnBuffer::Utf8(_) => ColumnType::Utf8,
        }
    }

    /// Append `value`, narrowing integers that fit the column's width.
    pub(crate) fn push(&mut self, column: &str, value: &Value) -> ColumnarResult<()> {
        let expected = self.column_type();
        let mismatch = || ColumnarError::TypeMismatch {
            column: column.to_owned(),
            expected,
            actual: value.column_type(),
        };
        let int = value.as_i128();

        match self {
            ColumnBuffer::UInt8(v) => {
                let n = int.and_then(|i| u8::try_from(i).ok()).ok_or_else(mismatch)?;
                v.push(n);
            }
            ColumnBuffer::UInt32(v) => {
                let n = int.and_then(|i| u32::try_from(i).ok()).ok_or_else(mismatch)?;
                v.push(n);
            }
            ColumnBuffer::Int64(v) => {
                let n = int.and_then(|i| i64::try_from(i).ok()).ok_or_else(mismatch)?;
                v.push(n);
            }
            ColumnBuffer::UInt64(v) => {
                let n = int.and_then(|i| u64::try_from(i).ok()).ok_or_else(mismatch)?;
                v.push(n);
            }
            ColumnBuffer::Float64(v) => v.push(value.as_f64().ok_or_else(mismatch)?),
            ColumnBuffer::Boolean(v) => match value {
                Value::Boolean(b) => v.push(*b),
                _ => return Err(mismatch()),
            },
            ColumnBuffer::Utf8(v) => match value {
                Value::Utf8(s) => v.push(s.clone()),
                _ => return Err(mismatch()),
            },
        }
        Ok(())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            ColumnBuffer::UInt8(v) => v.truncate(len),
            ColumnBuffer::UInt32(v) => v.truncate(len),
            ColumnBuffer::Int64(v) => v.truncate(len),
            ColumnBuffer::UInt64(v) => v.truncate(len),
            ColumnBuffer::Float64(v) => v.truncate(len),
            ColumnBuffer::Boolean(v) => v.truncate(len),
            ColumnBuffer::Utf8(v) => v.truncate(len),
        }
    }

    /// Freeze the buffered rows into a column array and reset the buffer.
    pub(crate) fn flush(&mut self) -> ColumnData {
        match self {
            ColumnBuffer::UInt8(v) => ColumnData::UInt8(std::mem::take(v).into()),
            ColumnBuffer::UInt32(v) => ColumnData::UInt32(std::mem::take(v).into()),
            ColumnBuffer::Int64(v) => ColumnData::Int64(std::mem::take(v).into()),
            ColumnBuffer::UInt64(v) => ColumnData::UInt64(std::mem::take(v).into()),
            ColumnBuffer::Float64(v) => ColumnData::Float64(std::mem::take(v).into()),
            ColumnBuffer::Boolean(v) => ColumnData::Boolean(std::mem::take(v).into()),
            ColumnBuffer::Utf8(v) => ColumnData::Utf8(std::mem::take(v).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_set_rows_in_order() {
        let col = ColumnData::from(vec![10i64, 20, 30, 40]);
        let mask = Bitmap::pack(&[0, 1, 0, 1]);
        assert_eq!(col.filter(&mask).unwrap(), ColumnData::from(vec![20i64, 40]));
    }

    #[test]
    fn buffer_narrows_integers_that_fit() {
        let mut buf = ColumnBuffer::new(ColumnType::UInt8, 2);
        buf.push("c", &Value::Int64(7)).unwrap();
        assert!(buf.push("c", &Value::Int64(300)).is_err());
        assert_eq!(buf.flush(), ColumnData::from(vec![7u8]));
    }
}
