//! Select fused with hash-table construction for a downstream hash join.
//!
//! One pass per block evaluates the predicate tree and inserts every surviving row's join key
//! into a hash table, so the filtered rows are never copied. Each batch fills a private shard;
//! the fan-in stage merges shards in batch order, which keeps the table deterministic.

use crate::error::{ExecError, ExecResult};
use crate::hash_table::{JoinHashTable, RowLocation};
use crate::predicate::{ColumnReference, PredicateTree};
use crate::result::{LazyTable, OperatorResult};
use crate::scheduler::{Scheduler, Slots, TaskChain};
use crate::select::evaluate_tree;
use std::sync::Arc;
use tessera_columnar::{Bitmap, ChunkedFilter, ColumnData, ColumnarError, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashBuildOptions {
    /// Hash-table capacity reserved up front, as a fraction of the table's row count.
    pub reserve_fraction: f64,
}

impl Default for HashBuildOptions {
    fn default() -> Self {
        Self {
            reserve_fraction: 0.1,
        }
    }
}

impl HashBuildOptions {
    fn reserve_for(&self, rows: usize) -> usize {
        let fraction = if self.reserve_fraction.is_finite() {
            self.reserve_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (rows as f64 * fraction) as usize
    }
}

pub struct SelectBuildHash {
    table: Arc<Table>,
    tree: Arc<PredicateTree>,
    join_column: ColumnReference,
    options: HashBuildOptions,
}

impl SelectBuildHash {
    pub fn new(table: Arc<Table>, tree: Arc<PredicateTree>, join_column: ColumnReference) -> Self {
        Self {
            table,
            tree,
            join_column,
            options: HashBuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HashBuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Filter the table, build the join hash table, and append both to `output`.
    ///
    /// On error nothing is appended.
    pub fn execute(&self, scheduler: &Scheduler, output: &mut OperatorResult) -> ExecResult<()> {
        let table = &*self.table;
        let tree = &*self.tree;
        let join_column = self.join_column.column_in(&self.table)?;
        self.tree.check_bindings(&self.table)?;

        let join_type = table.column_type(join_column)?;
        if !join_type.is_integer() {
            return Err(ExecError::UnsupportedOperation(format!(
                "join key {join_column} of type {join_type}; only integer keys can be hashed"
            )));
        }

        let offsets = table.block_row_offsets();
        let batch_size = table.options().batch_size_blocks.max(1);
        let filters: Slots<Bitmap> = Slots::new(table.block_count());
        let shards: Slots<JoinHashTable> = Slots::new(table.batch_count(batch_size));
        let reserve = self.options.reserve_for(table.row_count());
        let source = Arc::clone(&self.table);

        let (offsets, filters, shards) = (&offsets, &filters, &shards);
        let chain = TaskChain::new()
            .then(move |task| {
                table.for_each_batch(|batch_index, batch_size| {
                    let blocks = table.batch_blocks(batch_index, batch_size);
                    task.spawn(move || {
                        let mut shard = JoinHashTable::new();
                        for idx in blocks {
                            let block = table.block(idx)?;
                            let filter = evaluate_tree(block, tree)?;
                            let keys = block.column_by_name(join_column).ok_or_else(|| {
                                ColumnarError::UnknownColumn {
                                    table: table.name().to_owned(),
                                    column: join_column.to_owned(),
                                }
                            })?;
                            insert_rows(&mut shard, keys, &filter, offsets[idx], block.id())?;
                            filters.put(idx, filter);
                        }
                        log::trace!("batch {batch_index}: {} keys", shard.entry_count());
                        shards.put(batch_index, shard);
                        Ok(())
                    });
                });
                Ok(())
            })
            .then(move |_| {
                let filter = ChunkedFilter::new(filters.take_all()?);
                let mut hash_table = JoinHashTable::with_capacity(reserve);
                for shard in shards.take_all()? {
                    hash_table.merge(shard);
                }
                log::debug!(
                    "select+build over {}: {} of {} rows kept, {} distinct keys",
                    source.name(),
                    filter.count_ones(),
                    source.row_count(),
                    hash_table.len()
                );
                output.append(LazyTable::filtered(source, filter)?);
                output.set_hash_table(hash_table);
                Ok(())
            });
        scheduler.run_chain(chain)
    }
}

/// Insert every row set in `filter` into `shard`, keyed by the raw bits of its join value.
fn insert_rows(
    shard: &mut JoinHashTable,
    keys: &ColumnData,
    filter: &Bitmap,
    base_offset: usize,
    block_id: usize,
) -> ExecResult<()> {
    fn insert<T: Copy>(
        shard: &mut JoinHashTable,
        values: &[T],
        filter: &Bitmap,
        base_offset: usize,
        block_id: usize,
        widen: impl Fn(T) -> u64,
    ) {
        for row in filter.iter_ones() {
            let location = RowLocation {
                row_offset: base_offset + row,
                block_id,
            };
            shard.insert(widen(values[row]), location);
        }
    }

    match keys {
        ColumnData::UInt8(v) => insert(shard, v, filter, base_offset, block_id, u64::from),
        ColumnData::UInt32(v) => insert(shard, v, filter, base_offset, block_id, u64::from),
        ColumnData::Int64(v) => insert(shard, v, filter, base_offset, block_id, |k| k as u64),
        ColumnData::UInt64(v) => insert(shard, v, filter, base_offset, block_id, |k| k),
        other => {
            return Err(ExecError::UnsupportedOperation(format!(
                "join key of type {}",
                other.column_type()
            )))
        }
    }
    Ok(())
}

/// The key a value of an integer join column is stored under.
pub fn join_key(value: &Value) -> Option<u64> {
    match value {
        Value::UInt8(v) => Some(u64::from(*v)),
        Value::UInt32(v) => Some(u64::from(*v)),
        Value::Int64(v) => Some(*v as u64),
        Value::UInt64(v) => Some(*v),
        _ => None,
    }
}

impl std::fmt::Debug for SelectBuildHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectBuildHash")
            .field("table", &self.table.name())
            .field("join_column", &self.join_column.column())
            .field("options", &self.options)
            .finish()
    }
}
