#![forbid(unsafe_code)]

use crate::bitmap::Bitmap;
use crate::block::Block;
use crate::column::{ColumnBuffer, ColumnData};
use crate::error::{ColumnarError, ColumnarResult};
use crate::types::{ColumnSchema, ColumnType, Value};
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Maximum rows per block.
    pub block_capacity_rows: usize,
    /// Number of blocks handed to one parallel unit of work.
    pub batch_size_blocks: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_capacity_rows: 65_536,
            batch_size_blocks: 4,
        }
    }
}

/// An ordered sequence of blocks sharing one schema.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    schema: Arc<[ColumnSchema]>,
    blocks: Vec<Block>,
    rows: usize,
    options: TableOptions,
}

impl Table {
    /// Assemble a table from pre-built blocks. Block ids are reassigned to their position.
    pub fn from_blocks(
        name: impl Into<String>,
        schema: Vec<ColumnSchema>,
        blocks: Vec<Block>,
        options: TableOptions,
    ) -> ColumnarResult<Self> {
        let name = name.into();
        let schema: Arc<[ColumnSchema]> = schema.into();
        let capacity = options.block_capacity_rows.max(1);

        let mut rows = 0usize;
        let mut out = Vec::with_capacity(blocks.len());
        for (id, block) in blocks.into_iter().enumerate() {
            if block.schema() != &schema[..] {
                return Err(ColumnarError::SchemaMismatch {
                    table: name,
                    expected: schema.len(),
                    actual: block.schema().len(),
                });
            }
            if block.row_count() > capacity {
                return Err(ColumnarError::BlockOverflow {
                    block: id,
                    rows: block.row_count(),
                    capacity,
                });
            }
            rows += block.row_count();
            out.push(block.with_id(id));
        }

        Ok(Self {
            name,
            schema,
            blocks: out,
            rows,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, idx: usize) -> ColumnarResult<&Block> {
        self.blocks.get(idx).ok_or(ColumnarError::BlockOutOfRange {
            block: idx,
            blocks: self.blocks.len(),
        })
    }

    pub fn column_index(&self, name: &str) -> ColumnarResult<usize> {
        self.schema
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ColumnarError::UnknownColumn {
                table: self.name.clone(),
                column: name.to_owned(),
            })
    }

    pub fn column_type(&self, name: &str) -> ColumnarResult<ColumnType> {
        let idx = self.column_index(name)?;
        Ok(self.schema[idx].column_type)
    }

    /// The whole column, one chunk per block.
    pub fn column_by_name(&self, name: &str) -> ColumnarResult<ChunkedColumn> {
        let idx = self.column_index(name)?;
        let chunks = self
            .blocks
            .iter()
            .filter_map(|b| b.column(idx).cloned())
            .collect();
        Ok(ChunkedColumn {
            column_type: self.schema[idx].column_type,
            chunks,
        })
    }

    /// Global row offset of the first row of every block (prefix sum of block row counts).
    pub fn block_row_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.blocks.len());
        let mut next = 0usize;
        for block in &self.blocks {
            offsets.push(next);
            next += block.row_count();
        }
        offsets
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        (self.blocks.len() + batch_size - 1) / batch_size
    }

    /// Block indices covered by batch `batch_index`.
    pub fn batch_blocks(&self, batch_index: usize, batch_size: usize) -> Range<usize> {
        let batch_size = batch_size.max(1);
        let start = (batch_index * batch_size).min(self.blocks.len());
        let end = (start + batch_size).min(self.blocks.len());
        start..end
    }

    /// Call `f(batch_index, batch_size)` once per batch of `options.batch_size_blocks` blocks.
    pub fn for_each_batch(&self, mut f: impl FnMut(usize, usize)) {
        let batch_size = self.options.batch_size_blocks.max(1);
        for batch_index in 0..self.batch_count(batch_size) {
            f(batch_index, batch_size);
        }
    }

    /// Build a table holding `columns` (all of the same length), re-chunked by `options`.
    pub fn from_columns(
        name: impl Into<String>,
        schema: Vec<ColumnSchema>,
        columns: &[ChunkedColumn],
        options: TableOptions,
    ) -> ColumnarResult<Self> {
        let name = name.into();
        if columns.len() != schema.len() {
            return Err(ColumnarError::SchemaMismatch {
                table: name,
                expected: schema.len(),
                actual: columns.len(),
            });
        }

        let rows = columns.first().map(ChunkedColumn::len).unwrap_or(0);
        for (field, column) in schema.iter().zip(columns) {
            if column.len() != rows {
                return Err(ColumnarError::ColumnLengthMismatch {
                    column: field.name.clone(),
                    expected: rows,
                    actual: column.len(),
                });
            }
        }

        let mut builder = TableBuilder::new(name, schema, options);
        let mut iters: Vec<_> = columns.iter().map(|c| c.iter_values()).collect();
        let mut row = Vec::with_capacity(columns.len());
        for _ in 0..rows {
            row.clear();
            row.extend(iters.iter_mut().filter_map(Iterator::next));
            builder.append_row(&row)?;
        }
        builder.finalize()
    }
}

/// A column viewed across every block of its table.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedColumn {
    column_type: ColumnType,
    chunks: Vec<ColumnData>,
}

impl ChunkedColumn {
    pub fn new(column_type: ColumnType, chunks: Vec<ColumnData>) -> Self {
        Self {
            column_type,
            chunks,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(ColumnData::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, idx: usize) -> Option<&ColumnData> {
        self.chunks.get(idx)
    }

    pub fn chunks(&self) -> &[ColumnData] {
        &self.chunks
    }

    pub fn iter_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.chunks
            .iter()
            .flat_map(|c| (0..c.len()).filter_map(move |row| c.value(row)))
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.iter_values().collect()
    }

    /// Keep rows selected by `filter`; chunk `i` of the filter applies to chunk `i`.
    pub fn filter(&self, filter: &ChunkedFilter) -> ColumnarResult<ChunkedColumn> {
        if filter.num_chunks() != self.chunks.len() {
            return Err(ColumnarError::ColumnLengthMismatch {
                column: "filter chunks".to_owned(),
                expected: self.chunks.len(),
                actual: filter.num_chunks(),
            });
        }
        let chunks = self
            .chunks
            .iter()
            .zip(filter.chunks())
            .map(|(c, mask)| c.filter(mask))
            .collect::<ColumnarResult<Vec<_>>>()?;
        Ok(Self {
            column_type: self.column_type,
            chunks,
        })
    }

    /// Gather global row indices, preserving their order. The result keeps the chunking of
    /// runs of consecutive indices that fall in the same source chunk.
    pub fn take(&self, rows: &[usize]) -> ColumnarResult<ChunkedColumn> {
        let mut offsets = Vec::with_capacity(self.chunks.len());
        let mut next = 0usize;
        for c in &self.chunks {
            offsets.push(next);
            next += c.len();
        }
        let total = next;

        let mut chunks = Vec::new();
        let mut run: Vec<usize> = Vec::new();
        let mut run_chunk: Option<usize> = None;
        for &row in rows {
            if row >= total {
                return Err(ColumnarError::RowOutOfRange { row, rows: total });
            }
            let chunk_idx = offsets.partition_point(|&o| o <= row) - 1;
            if run_chunk != Some(chunk_idx) {
                if let Some(prev) = run_chunk {
                    chunks.push(self.chunks[prev].take(&run)?);
                    run.clear();
                }
                run_chunk = Some(chunk_idx);
            }
            run.push(row - offsets[chunk_idx]);
        }
        if let Some(prev) = run_chunk {
            chunks.push(self.chunks[prev].take(&run)?);
        }

        Ok(Self {
            column_type: self.column_type,
            chunks,
        })
    }
}

/// A table-wide filter: one bitmap per block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkedFilter {
    chunks: Vec<Bitmap>,
}

impl ChunkedFilter {
    pub fn new(chunks: Vec<Bitmap>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bitmap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, idx: usize) -> Option<&Bitmap> {
        self.chunks.get(idx)
    }

    pub fn chunks(&self) -> &[Bitmap] {
        &self.chunks
    }

    pub fn count_ones(&self) -> usize {
        self.chunks.iter().map(Bitmap::count_ones).sum()
    }
}

/// Streams rows into fixed-capacity blocks.
pub struct TableBuilder {
    name: String,
    schema: Arc<[ColumnSchema]>,
    options: TableOptions,
    buffers: Vec<ColumnBuffer>,
    blocks: Vec<Block>,
    current_rows: usize,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>, schema: Vec<ColumnSchema>, options: TableOptions) -> Self {
        let capacity = options.block_capacity_rows.max(1);
        let buffers = schema
            .iter()
            .map(|c| ColumnBuffer::new(c.column_type, capacity))
            .collect();

        Self {
            name: name.into(),
            schema: schema.into(),
            options,
            buffers,
            blocks: Vec::new(),
            current_rows: 0,
        }
    }

    /// Append one row. On error the builder is left unchanged.
    pub fn append_row(&mut self, row: &[Value]) -> ColumnarResult<()> {
        if row.len() != self.buffers.len() {
            return Err(ColumnarError::SchemaMismatch {
                table: self.name.clone(),
                expected: self.buffers.len(),
                actual: row.len(),
            });
        }

        for (idx, value) in row.iter().enumerate() {
            if let Err(err) = self.buffers[idx].push(&self.schema[idx].name, value) {
                for buffer in &mut self.buffers[..idx] {
                    buffer.truncate(self.current_rows);
                }
                return Err(err);
            }
        }

        self.current_rows += 1;
        if self.current_rows == self.options.block_capacity_rows.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> ColumnarResult<()> {
        if self.current_rows == 0 {
            return Ok(());
        }
        let columns = self.buffers.iter_mut().map(ColumnBuffer::flush).collect();
        let block = Block::new(self.blocks.len(), self.schema.clone(), columns)?;
        self.blocks.push(block);
        self.current_rows = 0;
        Ok(())
    }

    pub fn finalize(mut self) -> ColumnarResult<Table> {
        self.flush()?;
        let rows = self.blocks.iter().map(Block::row_count).sum();
        Ok(Table {
            name: self.name,
            schema: self.schema,
            blocks: self.blocks,
            rows,
            options: self.options,
        })
    }
}
