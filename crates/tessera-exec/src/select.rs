//! Predicate evaluation into per-block bitmaps, and the `Select` operator.

use crate::error::{ExecError, ExecResult};
use crate::predicate::{Comparator, Connective, Node, Predicate, PredicateTree};
use crate::result::{LazyTable, OperatorResult};
use crate::scheduler::{Scheduler, Slots, TaskChain};
use std::sync::Arc;
use tessera_columnar::{Bitmap, Block, ChunkedFilter, ColumnData, ColumnarError, Table, Value};

/// Evaluate `tree` against one block. The bitmap has one bit per row of the block.
pub fn evaluate_tree(block: &Block, tree: &PredicateTree) -> ExecResult<Bitmap> {
    evaluate_node(block, tree.root())
}

pub fn evaluate_node(block: &Block, node: &Node) -> ExecResult<Bitmap> {
    match node {
        Node::Leaf(predicate) => evaluate_predicate(block, predicate),
        Node::Connective {
            connective,
            left,
            right,
        } => {
            let left = evaluate_node(block, left)?;
            if *connective == Connective::None {
                return Ok(left);
            }
            let right = evaluate_node(block, right)?;
            combine(left, &right, *connective)
        }
    }
}

/// Combine two filters of the same length under `connective`.
pub fn combine(mut left: Bitmap, right: &Bitmap, connective: Connective) -> ExecResult<Bitmap> {
    if connective == Connective::None {
        return Ok(left);
    }
    if left.len() != right.len() {
        return Err(ExecError::FilterLengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    match connective {
        Connective::And => left.and_inplace(right),
        Connective::Or => left.or_inplace(right),
        Connective::None => {}
    }
    Ok(left)
}

pub fn evaluate_predicate(block: &Block, predicate: &Predicate) -> ExecResult<Bitmap> {
    let name = predicate.column.column();
    let column = block
        .column_by_name(name)
        .ok_or_else(|| ColumnarError::UnknownColumn {
            table: format!("block {}", block.id()),
            column: name.to_owned(),
        })?;
    check_literal(name, column, &predicate.value)?;
    if let Some(hi) = &predicate.value2 {
        check_literal(name, column, hi)?;
    }

    let fast = match column {
        ColumnData::UInt8(values) => integral_filter(values, predicate),
        ColumnData::UInt32(values) => integral_filter(values, predicate),
        ColumnData::Int64(values) => integral_filter(values, predicate),
        ColumnData::UInt64(values) => integral_filter(values, predicate),
        ColumnData::Float64(values) => float_filter(values, predicate),
        ColumnData::Boolean(values) => match (&predicate.value, &predicate.value2) {
            (Value::Boolean(lo), hi) => {
                let hi = match hi {
                    Some(Value::Boolean(hi)) => Some(*hi),
                    _ => None,
                };
                Some(ordered_filter(values, predicate.comparator, *lo, hi))
            }
            _ => None,
        },
        ColumnData::Utf8(values) => match (&predicate.value, &predicate.value2) {
            (Value::Utf8(lo), hi) => {
                let hi = match hi {
                    Some(Value::Utf8(hi)) => Some(&**hi),
                    _ => None,
                };
                Some(utf8_filter(values, predicate.comparator, lo, hi))
            }
            _ => None,
        },
    };

    let filter = match fast {
        Some(filter) => filter,
        None => generic_filter(column, predicate),
    };
    log::trace!(
        "block {}: {} of {} rows pass {} {:?} {}",
        block.id(),
        filter.count_ones(),
        filter.len(),
        name,
        predicate.comparator,
        predicate.value
    );
    Ok(filter)
}

fn check_literal(column: &str, data: &ColumnData, literal: &Value) -> ExecResult<()> {
    let column_type = data.column_type();
    let literal_type = literal.column_type();
    let compatible = (column_type.is_numeric() && literal_type.is_numeric())
        || column_type == literal_type;
    if compatible {
        Ok(())
    } else {
        Err(ExecError::TypeMismatch {
            column: column.to_owned(),
            expected: column_type,
            actual: literal_type,
        })
    }
}

fn pack_with<T>(values: &[T], mut keep: impl FnMut(&T) -> bool) -> Bitmap {
    let bytemap: Vec<u8> = values.iter().map(|v| keep(v) as u8).collect();
    Bitmap::pack(&bytemap)
}

/// Integer column types with a single-comparison range test.
trait Integral: Copy + Ord {
    fn from_literal(value: &Value) -> Option<Self>;
    /// `self - lo` with unsigned wraparound.
    fn wrapping_offset(self, lo: Self) -> u64;
}

impl Integral for u8 {
    fn from_literal(value: &Value) -> Option<Self> {
        value.as_i128().and_then(|v| u8::try_from(v).ok())
    }

    fn wrapping_offset(self, lo: Self) -> u64 {
        self.wrapping_sub(lo) as u64
    }
}

impl Integral for u32 {
    fn from_literal(value: &Value) -> Option<Self> {
        value.as_i128().and_then(|v| u32::try_from(v).ok())
    }

    fn wrapping_offset(self, lo: Self) -> u64 {
        self.wrapping_sub(lo) as u64
    }
}

impl Integral for i64 {
    fn from_literal(value: &Value) -> Option<Self> {
        value.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    fn wrapping_offset(self, lo: Self) -> u64 {
        (self as u64).wrapping_sub(lo as u64)
    }
}

impl Integral for u64 {
    fn from_literal(value: &Value) -> Option<Self> {
        value.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    fn wrapping_offset(self, lo: Self) -> u64 {
        self.wrapping_sub(lo)
    }
}

/// Typed loop over an integer column. `None` when a literal does not fit the column's width.
fn integral_filter<T: Integral>(values: &[T], predicate: &Predicate) -> Option<Bitmap> {
    let lo = T::from_literal(&predicate.value)?;
    if predicate.is_range() {
        let hi = T::from_literal(predicate.value2.as_ref()?)?;
        let diff = hi.wrapping_offset(lo);
        return Some(pack_with(values, |&v| v.wrapping_offset(lo) <= diff));
    }
    Some(compare_with(values, predicate.comparator, |&v| v.cmp(&lo)))
}

/// IEEE comparison: every ordered test against NaN fails and only `NotEqual` holds.
fn float_filter(values: &[f64], predicate: &Predicate) -> Option<Bitmap> {
    let lo = predicate.value.as_f64()?;
    if predicate.is_range() {
        let hi = predicate.value2.as_ref()?.as_f64()?;
        return Some(pack_with(values, |&v| lo <= v && v <= hi));
    }
    Some(match predicate.comparator {
        Comparator::Equal => pack_with(values, |&v| v == lo),
        Comparator::NotEqual => pack_with(values, |&v| v != lo),
        Comparator::Less => pack_with(values, |&v| v < lo),
        Comparator::LessEqual => pack_with(values, |&v| v <= lo),
        Comparator::Greater => pack_with(values, |&v| v > lo),
        Comparator::GreaterEqual => pack_with(values, |&v| v >= lo),
    })
}

/// Ordered comparison; the range form keeps `lo <= v <= hi`.
fn ordered_filter<T: Copy + Ord>(
    values: &[T],
    comparator: Comparator,
    lo: T,
    hi: Option<T>,
) -> Bitmap {
    match (comparator, hi) {
        (Comparator::NotEqual, Some(hi)) => pack_with(values, |&v| lo <= v && v <= hi),
        _ => compare_with(values, comparator, |v| v.cmp(&lo)),
    }
}

fn utf8_filter(values: &[Arc<str>], comparator: Comparator, lo: &str, hi: Option<&str>) -> Bitmap {
    match (comparator, hi) {
        (Comparator::NotEqual, Some(hi)) => pack_with(values, |v| lo <= &**v && &**v <= hi),
        _ => compare_with(values, comparator, |v| (**v).cmp(lo)),
    }
}

/// One monomorphic loop per comparator.
fn compare_with<T>(
    values: &[T],
    comparator: Comparator,
    ord: impl Fn(&T) -> std::cmp::Ordering,
) -> Bitmap {
    use std::cmp::Ordering::*;
    match comparator {
        Comparator::Equal => pack_with(values, |v| ord(v) == Equal),
        Comparator::NotEqual => pack_with(values, |v| ord(v) != Equal),
        Comparator::Less => pack_with(values, |v| ord(v) == Less),
        Comparator::LessEqual => pack_with(values, |v| ord(v) != Greater),
        Comparator::Greater => pack_with(values, |v| ord(v) == Greater),
        Comparator::GreaterEqual => pack_with(values, |v| ord(v) != Less),
    }
}

/// Scalar comparison, one row at a time, for literals the typed loops cannot represent
/// (a negative literal against an unsigned column, a fractional literal against an integer one).
fn generic_filter(column: &ColumnData, predicate: &Predicate) -> Bitmap {
    let range = predicate
        .value2
        .as_ref()
        .filter(|_| predicate.comparator == Comparator::NotEqual);
    Bitmap::from_fn(column.len(), |row| {
        let Some(value) = column.value(row) else {
            return false;
        };
        match range {
            Some(hi) => {
                value.compare(&predicate.value).is_some_and(|o| o.is_ge())
                    && value.compare(hi).is_some_and(|o| o.is_le())
            }
            None => predicate
                .comparator
                .accepts_partial(value.compare(&predicate.value)),
        }
    })
}

/// What a `Select` evaluates: a predicate tree, or two selections combined per block.
#[derive(Clone, Debug)]
pub enum Selection {
    Tree(Arc<PredicateTree>),
    Composite {
        connective: Connective,
        left: Box<Selection>,
        right: Box<Selection>,
    },
}

impl Selection {
    pub fn composite(connective: Connective, left: Selection, right: Selection) -> Self {
        Selection::Composite {
            connective,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn evaluate(&self, block: &Block) -> ExecResult<Bitmap> {
        match self {
            Selection::Tree(tree) => evaluate_tree(block, tree),
            Selection::Composite {
                connective,
                left,
                right,
            } => {
                let left = left.evaluate(block)?;
                if *connective == Connective::None {
                    return Ok(left);
                }
                combine(left, &right.evaluate(block)?, *connective)
            }
        }
    }

    /// Fails with [`ExecError::UnknownTable`] if any leaf is bound to a table other than `table`.
    pub fn check_bindings(&self, table: &Arc<Table>) -> ExecResult<()> {
        match self {
            Selection::Tree(tree) => tree.check_bindings(table),
            Selection::Composite { left, right, .. } => {
                left.check_bindings(table)?;
                right.check_bindings(table)
            }
        }
    }
}

impl From<PredicateTree> for Selection {
    fn from(tree: PredicateTree) -> Self {
        Selection::Tree(Arc::new(tree))
    }
}

/// Evaluate `selection` over every block of `table`, one parallel unit per batch.
pub fn evaluate_table(
    table: &Table,
    selection: &Selection,
    scheduler: &Scheduler,
) -> ExecResult<ChunkedFilter> {
    let slots = Slots::new(table.block_count());
    let batch_size = table.options().batch_size_blocks;
    let slots_ref = &slots;

    let chain = TaskChain::new().then(move |task| {
        table.for_each_batch(|batch_index, batch_size| {
            let blocks = table.batch_blocks(batch_index, batch_size);
            task.spawn(move || {
                for idx in blocks {
                    let block = table.block(idx)?;
                    slots_ref.put(idx, selection.evaluate(block)?);
                }
                Ok(())
            });
        });
        Ok(())
    });
    scheduler.run_chain(chain)?;

    let filter = ChunkedFilter::new(slots.take_all()?);
    log::debug!(
        "select over {}: {} of {} rows in {} blocks (batch size {})",
        table.name(),
        filter.count_ones(),
        table.row_count(),
        table.block_count(),
        batch_size
    );
    Ok(filter)
}

/// Filters a table and appends the filtered view to an [`OperatorResult`].
#[derive(Clone, Debug)]
pub struct Select {
    table: Arc<Table>,
    selection: Selection,
}

impl Select {
    pub fn new(table: Arc<Table>, selection: impl Into<Selection>) -> Self {
        Self {
            table,
            selection: selection.into(),
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn execute(&self, scheduler: &Scheduler, output: &mut OperatorResult) -> ExecResult<()> {
        self.selection.check_bindings(&self.table)?;
        let filter = evaluate_table(&self.table, &self.selection, scheduler)?;
        output.append(LazyTable::filtered(Arc::clone(&self.table), filter)?);
        Ok(())
    }
}
