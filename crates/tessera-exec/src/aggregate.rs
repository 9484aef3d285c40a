//! SUM / MEAN aggregation, optionally grouped by one or more columns.
//!
//! Groups are the unique values of the group-by column, in first-occurrence order. A composite
//! grouping takes the Cartesian product of its children's groups, so combinations that never occur
//! in the data still produce an output row (SUM `0`, MEAN `NaN`).
//!
//! Each block computes one partial (sum, count) per group from a per-block equality filter; the
//! partials are folded in block order after the fan-out barrier.

use crate::error::{ExecError, ExecResult};
use crate::predicate::{ColumnReference, Comparator, Connective, Predicate};
use crate::scheduler::{Scheduler, Slots, TaskChain};
use crate::select::{combine, evaluate_predicate};
use ahash::AHashSet;
use std::fmt;
use std::str::FromStr;
use tessera_columnar::{
    Bitmap, Block, ColumnData, ColumnSchema, ColumnType, ColumnarError, Table, TableBuilder, Value,
};

/// Name of the output column holding the aggregate.
pub const AGGREGATE_FIELD: &str = "aggregate";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKernel {
    Sum,
    /// Recognized, but not implemented: executing it fails with
    /// [`ExecError::UnsupportedOperation`].
    Count,
    Mean,
}

impl AggregateKernel {
    pub fn output_type(self) -> ColumnType {
        match self {
            AggregateKernel::Sum | AggregateKernel::Count => ColumnType::Int64,
            AggregateKernel::Mean => ColumnType::Float64,
        }
    }
}

impl FromStr for AggregateKernel {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUM" => Ok(AggregateKernel::Sum),
            "COUNT" => Ok(AggregateKernel::Count),
            "MEAN" | "AVG" => Ok(AggregateKernel::Mean),
            _ => Err(ExecError::UnsupportedOperation(format!(
                "unknown aggregate kernel {s}"
            ))),
        }
    }
}

impl fmt::Display for AggregateKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateKernel::Sum => "SUM",
            AggregateKernel::Count => "COUNT",
            AggregateKernel::Mean => "MEAN",
        })
    }
}

/// Group-by columns: a single column, or the Cartesian product of two groupings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grouping {
    Column(String),
    Composite {
        left: Box<Grouping>,
        right: Box<Grouping>,
    },
}

impl Grouping {
    pub fn column(name: impl Into<String>) -> Self {
        Grouping::Column(name.into())
    }

    pub fn composite(left: Grouping, right: Grouping) -> Self {
        Grouping::Composite {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Left-nested composite over `names`; `None` when `names` is empty.
    pub fn from_columns<I, S>(names: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(Grouping::column)
            .reduce(Grouping::composite)
    }

    /// Group-by column names, left to right.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Grouping::Column(name) => vec![name.as_str()],
            Grouping::Composite { left, right } => {
                let mut out = left.columns();
                out.extend(right.columns());
                out
            }
        }
    }

    fn width(&self) -> usize {
        match self {
            Grouping::Column(_) => 1,
            Grouping::Composite { left, right } => left.width() + right.width(),
        }
    }

    /// Every group key (one value per group-by column). Single columns list their unique values
    /// in first-occurrence order; composites pair every left key with every right key.
    pub fn keys(&self, table: &Table) -> ExecResult<Vec<Vec<Value>>> {
        match self {
            Grouping::Column(name) => Ok(unique_values(table, name)?
                .into_iter()
                .map(|v| vec![v])
                .collect()),
            Grouping::Composite { left, right } => {
                let left = left.keys(table)?;
                let right = right.keys(table)?;
                let mut out = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    for r in &right {
                        let mut key = Vec::with_capacity(l.len() + r.len());
                        key.extend_from_slice(l);
                        key.extend_from_slice(r);
                        out.push(key);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Rows of `block` belonging to the group `key`.
    fn filter(&self, block: &Block, key: &[Value]) -> ExecResult<Bitmap> {
        match self {
            Grouping::Column(name) => {
                let value = key.first().cloned().ok_or_else(|| {
                    ExecError::UnsupportedOperation(format!("empty group key for {name}"))
                })?;
                if matches!(&value, Value::Float64(f) if f.0.is_nan()) {
                    return nan_rows(block, name);
                }
                let column = ColumnReference::unbound(name.as_str());
                let predicate = Predicate::new(column, Comparator::Equal, value);
                evaluate_predicate(block, &predicate)
            }
            Grouping::Composite { left, right } => {
                let (lkey, rkey) = key.split_at(left.width().min(key.len()));
                let filter = left.filter(block, lkey)?;
                combine(filter, &right.filter(block, rkey)?, Connective::And)
            }
        }
    }
}

/// A NaN group key never compares equal, so its rows are matched by identity.
fn nan_rows(block: &Block, name: &str) -> ExecResult<Bitmap> {
    match block.column_by_name(name) {
        Some(ColumnData::Float64(values)) => {
            Ok(Bitmap::from_fn(values.len(), |row| values[row].is_nan()))
        }
        Some(other) => Ok(Bitmap::from_fn(other.len(), |_| false)),
        None => Err(ColumnarError::UnknownColumn {
            table: format!("block {}", block.id()),
            column: name.to_owned(),
        }
        .into()),
    }
}

/// Distinct values of `column`, in first-occurrence order.
pub fn unique_values(table: &Table, column: &str) -> ExecResult<Vec<Value>> {
    let column = table.column_by_name(column)?;
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for value in column.iter_values() {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Partial {
    int_sum: i128,
    float_sum: f64,
    count: usize,
}

impl Partial {
    fn merge(&mut self, other: &Partial) {
        self.int_sum += other.int_sum;
        self.float_sum += other.float_sum;
        self.count += other.count;
    }
}

fn accumulate(column: &ColumnData, rows: Option<&Bitmap>) -> ExecResult<Partial> {
    fn ints<T: Copy + Into<i128>>(values: &[T], rows: Option<&Bitmap>) -> Partial {
        let mut partial = Partial::default();
        match rows {
            Some(rows) => {
                for row in rows.iter_ones() {
                    partial.int_sum += Into::<i128>::into(values[row]);
                    partial.count += 1;
                }
            }
            None => {
                partial.int_sum = values.iter().map(|&v| Into::<i128>::into(v)).sum();
                partial.count = values.len();
            }
        }
        partial
    }

    Ok(match column {
        ColumnData::UInt8(v) => ints(v, rows),
        ColumnData::UInt32(v) => ints(v, rows),
        ColumnData::Int64(v) => ints(v, rows),
        ColumnData::UInt64(v) => ints(v, rows),
        ColumnData::Float64(v) => {
            let mut partial = Partial::default();
            match rows {
                Some(rows) => {
                    for row in rows.iter_ones() {
                        partial.float_sum += v[row];
                        partial.count += 1;
                    }
                }
                None => {
                    partial.float_sum = v.iter().sum();
                    partial.count = v.len();
                }
            }
            partial
        }
        other => {
            return Err(ExecError::UnsupportedOperation(format!(
                "aggregate over {} column",
                other.column_type()
            )))
        }
    })
}

/// Aggregate one column of a table, optionally grouped.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    kernel: AggregateKernel,
    aggregate_column: String,
    grouping: Option<Grouping>,
}

impl Aggregate {
    pub fn new(
        kernel: AggregateKernel,
        aggregate_column: impl Into<String>,
        grouping: Option<Grouping>,
    ) -> Self {
        Self {
            kernel,
            aggregate_column: aggregate_column.into(),
            grouping,
        }
    }

    pub fn kernel(&self) -> AggregateKernel {
        self.kernel
    }

    pub fn grouping(&self) -> Option<&Grouping> {
        self.grouping.as_ref()
    }

    /// Output schema: one string key column per group-by column, then [`AGGREGATE_FIELD`].
    pub fn output_schema(&self) -> Vec<ColumnSchema> {
        let mut schema: Vec<ColumnSchema> = self
            .grouping
            .iter()
            .flat_map(Grouping::columns)
            .map(|name| ColumnSchema::new(name, ColumnType::Utf8))
            .collect();
        schema.push(ColumnSchema::new(AGGREGATE_FIELD, self.kernel.output_type()));
        schema
    }

    pub fn execute(&self, table: &Table, scheduler: &Scheduler) -> ExecResult<Table> {
        if self.kernel == AggregateKernel::Count {
            return Err(ExecError::UnsupportedOperation(
                "COUNT aggregate is not supported".to_owned(),
            ));
        }
        let column_type = table.column_type(&self.aggregate_column)?;
        let supported = match self.kernel {
            AggregateKernel::Sum => column_type.is_integer(),
            _ => column_type.is_numeric(),
        };
        if !supported {
            return Err(ExecError::UnsupportedOperation(format!(
                "{} over {} column {}",
                self.kernel, column_type, self.aggregate_column
            )));
        }

        let keys = match &self.grouping {
            Some(grouping) => grouping.keys(table)?,
            None => vec![Vec::new()],
        };
        log::debug!(
            "{} of {} over {}: {} groups, {} blocks",
            self.kernel,
            self.aggregate_column,
            table.name(),
            keys.len(),
            table.block_count()
        );

        let slots: Slots<Vec<Partial>> = Slots::new(table.block_count());
        let (keys_ref, slots_ref) = (&keys, &slots);
        let chain = TaskChain::new().then(move |task| {
            table.for_each_batch(|batch_index, batch_size| {
                let blocks = table.batch_blocks(batch_index, batch_size);
                task.spawn(move || {
                    for idx in blocks {
                        let block = table.block(idx)?;
                        slots_ref.put(idx, self.block_partials(block, keys_ref)?);
                    }
                    Ok(())
                });
            });
            Ok(())
        });
        scheduler.run_chain(chain)?;

        let mut totals = vec![Partial::default(); keys.len()];
        for partials in slots.take_all()? {
            for (total, partial) in totals.iter_mut().zip(&partials) {
                total.merge(partial);
            }
        }
        self.build_output(table, &keys, &totals, column_type)
    }

    fn block_partials(&self, block: &Block, keys: &[Vec<Value>]) -> ExecResult<Vec<Partial>> {
        let column = block
            .column_by_name(&self.aggregate_column)
            .ok_or_else(|| ColumnarError::UnknownColumn {
                table: format!("block {}", block.id()),
                column: self.aggregate_column.clone(),
            })?;
        match &self.grouping {
            None => Ok(vec![accumulate(column, None)?]),
            Some(grouping) => keys
                .iter()
                .map(|key| accumulate(column, Some(&grouping.filter(block, key)?)))
                .collect(),
        }
    }

    fn build_output(
        &self,
        table: &Table,
        keys: &[Vec<Value>],
        totals: &[Partial],
        column_type: ColumnType,
    ) -> ExecResult<Table> {
        let mut builder = TableBuilder::new(AGGREGATE_FIELD, self.output_schema(), table.options());
        let mut row = Vec::new();
        for (key, total) in keys.iter().zip(totals) {
            row.clear();
            row.extend(key.iter().map(|v| Value::string(&v.to_string())));
            row.push(self.finish(total, column_type)?);
            builder.append_row(&row)?;
        }
        Ok(builder.finalize()?)
    }

    fn finish(&self, total: &Partial, column_type: ColumnType) -> ExecResult<Value> {
        match self.kernel {
            AggregateKernel::Sum => i64::try_from(total.int_sum)
                .map(Value::Int64)
                .map_err(|_| ExecError::Overflow {
                    column: self.aggregate_column.clone(),
                }),
            AggregateKernel::Mean => {
                let sum = if column_type == ColumnType::Float64 {
                    total.float_sum
                } else {
                    total.int_sum as f64
                };
                Ok(Value::float(sum / total.count as f64))
            }
            AggregateKernel::Count => Err(ExecError::UnsupportedOperation(
                "COUNT aggregate is not supported".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kernel_names_parse_case_insensitively() {
        assert_eq!("sum".parse::<AggregateKernel>().unwrap(), AggregateKernel::Sum);
        assert_eq!("Avg".parse::<AggregateKernel>().unwrap(), AggregateKernel::Mean);
        assert_eq!("COUNT".parse::<AggregateKernel>().unwrap(), AggregateKernel::Count);
        assert!(matches!(
            "median".parse::<AggregateKernel>(),
            Err(ExecError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn from_columns_nests_to_the_left() {
        let grouping = Grouping::from_columns(["a", "b", "c"]).unwrap();
        assert_eq!(
            grouping,
            Grouping::composite(
                Grouping::composite(Grouping::column("a"), Grouping::column("b")),
                Grouping::column("c"),
            )
        );
        assert_eq!(grouping.columns(), vec!["a", "b", "c"]);
        assert_eq!(grouping.width(), 3);
        assert!(Grouping::from_columns(Vec::<String>::new()).is_none());
    }

    #[test]
    fn output_schema_has_string_keys() {
        let agg = Aggregate::new(
            AggregateKernel::Mean,
            "x",
            Grouping::from_columns(["g", "h"]),
        );
        assert_eq!(
            agg.output_schema(),
            vec![
                ColumnSchema::new("g", ColumnType::Utf8),
                ColumnSchema::new("h", ColumnType::Utf8),
                ColumnSchema::new(AGGREGATE_FIELD, ColumnType::Float64),
            ]
        );
    }

    #[test]
    fn partial_sums_respect_the_row_filter() {
        let column = ColumnData::from(vec![1i64, 2, 3, 4]);
        let rows = Bitmap::pack(&[1, 0, 1, 0]);
        let partial = accumulate(&column, Some(&rows)).unwrap();
        assert_eq!(partial.int_sum, 4);
        assert_eq!(partial.count, 2);
        assert!(accumulate(&ColumnData::from(vec!["a"]), None).is_err());
    }
}
