#![forbid(unsafe_code)]

use crate::column::ColumnData;
use crate::error::{ColumnarError, ColumnarResult};
use crate::types::ColumnSchema;
use std::sync::Arc;

/// A fixed-capacity horizontal slice of a table: one column array per schema field.
#[derive(Clone, Debug)]
pub struct Block {
    id: usize,
    schema: Arc<[ColumnSchema]>,
    columns: Vec<ColumnData>,
    rows: usize,
}

impl Block {
    /// Build a block, checking that every column matches the schema and has the same length.
    pub fn new(
        id: usize,
        schema: Arc<[ColumnSchema]>,
        columns: Vec<ColumnData>,
    ) -> ColumnarResult<Self> {
        if columns.len() != schema.len() {
            return Err(ColumnarError::SchemaMismatch {
                table: format!("block {id}"),
                expected: schema.len(),
                actual: columns.len(),
            });
        }

        let rows = columns.first().map(ColumnData::len).unwrap_or(0);
        for (field, column) in schema.iter().zip(&columns) {
            if column.column_type() != field.column_type {
                return Err(ColumnarError::TypeMismatch {
                    column: field.name.clone(),
                    expected: field.column_type,
                    actual: column.column_type(),
                });
            }
            if column.len() != rows {
                return Err(ColumnarError::ColumnLengthMismatch {
                    column: field.name.clone(),
                    expected: rows,
                    actual: column.len(),
                });
            }
        }

        Ok(Self {
            id,
            schema,
            columns,
            rows,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnData> {
        self.columns.get(idx)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnData> {
        let idx = self.schema.iter().position(|c| c.name == name)?;
        self.columns.get(idx)
    }

    pub(crate) fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }
}
