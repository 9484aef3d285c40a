//! Stage outputs: lazily filtered table views plus an optional join hash table.

use crate::error::{ExecError, ExecResult};
use crate::hash_table::JoinHashTable;
use crate::predicate::ColumnReference;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_columnar::{ChunkedColumn, ChunkedFilter, ColumnSchema, Table};

/// A table plus a deferred filter and/or row selection. Nothing is copied until a column is read.
///
/// Reading a column applies the filter first, then the selection indices (which address rows of
/// the filtered view).
#[derive(Clone, Debug)]
pub struct LazyTable {
    table: Arc<Table>,
    filter: Option<ChunkedFilter>,
    indices: Option<Arc<[usize]>>,
    materialized: AHashMap<String, ChunkedColumn>,
}

impl LazyTable {
    /// The whole table, unfiltered.
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            filter: None,
            indices: None,
            materialized: AHashMap::new(),
        }
    }

    /// `table` viewed through `filter`, which must have one chunk per block of matching length.
    pub fn filtered(table: Arc<Table>, filter: ChunkedFilter) -> ExecResult<Self> {
        let aligned = filter.num_chunks() == table.block_count()
            && filter
                .chunks()
                .iter()
                .zip(table.blocks())
                .all(|(chunk, block)| chunk.len() == block.row_count());
        if !aligned {
            return Err(ExecError::FilterLengthMismatch {
                left: filter.len(),
                right: table.row_count(),
            });
        }
        Ok(Self {
            filter: Some(filter),
            ..Self::new(table)
        })
    }

    pub fn with_indices(mut self, indices: impl Into<Arc<[usize]>>) -> Self {
        self.indices = Some(indices.into());
        self
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn filter(&self) -> Option<&ChunkedFilter> {
        self.filter.as_ref()
    }

    pub fn indices(&self) -> Option<&[usize]> {
        self.indices.as_deref()
    }

    /// Rows visible through the filter and selection.
    pub fn num_rows(&self) -> usize {
        match (&self.indices, &self.filter) {
            (Some(indices), _) => indices.len(),
            (None, Some(filter)) => filter.count_ones(),
            (None, None) => self.table.row_count(),
        }
    }

    /// Read a column through the filter and selection. A column set with
    /// [`set_materialized_column`](Self::set_materialized_column) is returned as-is.
    pub fn column_by_name(&self, name: &str) -> ExecResult<ChunkedColumn> {
        if let Some(column) = self.materialized.get(name) {
            return Ok(column.clone());
        }
        let mut column = self.table.column_by_name(name)?;
        if let Some(filter) = &self.filter {
            column = column.filter(filter)?;
        }
        if let Some(indices) = &self.indices {
            column = column.take(indices)?;
        }
        Ok(column)
    }

    pub fn set_materialized_column(&mut self, name: impl Into<String>, column: ChunkedColumn) {
        self.materialized.insert(name.into(), column);
    }
}

/// Output of one query stage: lazy tables (most recently appended first) and, after a hash-build
/// stage, the join hash table.
#[derive(Clone, Debug, Default)]
pub struct OperatorResult {
    tables: VecDeque<LazyTable>,
    hash_table: Option<Arc<JoinHashTable>>,
}

impl OperatorResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `table` at the front, so it becomes table 0.
    pub fn append(&mut self, table: LazyTable) {
        self.tables.push_front(table);
    }

    /// Insert an unfiltered table at the front.
    pub fn append_table(&mut self, table: Arc<Table>) {
        self.append(LazyTable::new(table));
    }

    /// Append every table of `other` after the existing ones. The hash table of `self` wins if
    /// both carry one.
    pub fn extend(&mut self, other: OperatorResult) {
        self.tables.extend(other.tables);
        if self.hash_table.is_none() {
            self.hash_table = other.hash_table;
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &LazyTable> + '_ {
        self.tables.iter()
    }

    pub fn get_table(&self, index: usize) -> ExecResult<&LazyTable> {
        self.tables
            .get(index)
            .ok_or(ExecError::MissingTable { index })
    }

    /// The lazy view over `table` (by identity), if this result holds one.
    pub fn get_table_for(&self, table: &Arc<Table>) -> Option<&LazyTable> {
        self.tables.iter().find(|t| Arc::ptr_eq(t.table(), table))
    }

    pub fn set_hash_table(&mut self, hash_table: JoinHashTable) {
        self.hash_table = Some(Arc::new(hash_table));
    }

    pub fn hash_table(&self) -> Option<&Arc<JoinHashTable>> {
        self.hash_table.as_ref()
    }

    pub fn is_hash_table_available(&self) -> bool {
        self.hash_table.is_some()
    }

    fn position(&self, column: &ColumnReference) -> ExecResult<usize> {
        if !column.is_bound() {
            return if self.tables.is_empty() {
                Err(ExecError::MissingTable { index: 0 })
            } else {
                Ok(0)
            };
        }
        self.tables
            .iter()
            .position(|t| column.refers_to(t.table()))
            .ok_or_else(|| column.unknown_table())
    }

    /// The lazy table a column reference resolves to. Unbound references resolve to table 0.
    pub fn resolve(&self, column: &ColumnReference) -> ExecResult<&LazyTable> {
        let index = self.position(column)?;
        self.get_table(index)
    }

    pub fn set_materialized_column(
        &mut self,
        reference: &ColumnReference,
        column: ChunkedColumn,
    ) -> ExecResult<()> {
        let index = self.position(reference)?;
        let table = self
            .tables
            .get_mut(index)
            .ok_or(ExecError::MissingTable { index })?;
        table.set_materialized_column(reference.column(), column);
        Ok(())
    }

    /// Build a concrete table holding the referenced columns, read through their lazy views.
    pub fn materialize(&self, columns: &[ColumnReference]) -> ExecResult<Table> {
        let mut schema = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        let mut options = None;
        for reference in columns {
            let lazy = self.resolve(reference)?;
            let column = lazy.column_by_name(reference.column())?;
            options.get_or_insert(lazy.table().options());
            schema.push(ColumnSchema::new(reference.column(), column.column_type()));
            data.push(column);
        }
        let options = options.unwrap_or_default();
        let table = Table::from_columns("materialized", schema, &data, options)?;
        log::debug!(
            "materialized {} columns, {} rows",
            table.schema().len(),
            table.row_count()
        );
        Ok(table)
    }
}
