use tessera_columnar::{ColumnType, ColumnarError};

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ExecError {
    /// A kernel, comparator or column type this engine does not implement.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("filter length mismatch: {left} rows vs {right} rows")]
    FilterLengthMismatch { left: usize, right: usize },

    #[error("aggregate overflow in column {column}")]
    Overflow { column: String },

    #[error("no result was produced for block {block}")]
    MissingBlockResult { block: usize },

    #[error("operator result has no table at index {index}")]
    MissingTable { index: usize },

    #[error("column {column} refers to table {table}, which is not an input here")]
    UnknownTable { table: String, column: String },

    #[error(transparent)]
    Storage(#[from] ColumnarError),
}
