#![forbid(unsafe_code)]

use crate::types::ColumnType;

pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ColumnarError {
    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("schema mismatch for {table}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("column length mismatch for {column}: expected {expected} rows, got {actual}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("block {block} holds {rows} rows, above the block capacity of {capacity}")]
    BlockOverflow {
        block: usize,
        rows: usize,
        capacity: usize,
    },

    #[error("block {block} out of range ({blocks} blocks)")]
    BlockOutOfRange { block: usize, blocks: usize },

    #[error("row {row} out of range ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },
}
