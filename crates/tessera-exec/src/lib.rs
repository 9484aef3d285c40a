//! Execution core over block-chunked columnar tables.
//!
//! - [`predicate`]: predicate trees handed over by the planner.
//! - [`select`]: predicate evaluation into per-block bitmaps, and the [`Select`] operator.
//! - [`aggregate`]: SUM / MEAN, optionally grouped (including composite Cartesian groupings).
//! - [`fused`]: select fused with join hash-table construction.
//! - [`scheduler`]: stage chains fanning per-batch work out over a thread pool.
//!
//! Operators write [`LazyTable`]s (and optionally a [`JoinHashTable`]) into an
//! [`OperatorResult`]; filtered rows are never copied until a column is read.

#![forbid(unsafe_code)]

pub mod aggregate;
mod error;
pub mod fused;
mod hash_table;
pub mod predicate;
mod result;
pub mod scheduler;
pub mod select;

pub use crate::aggregate::{Aggregate, AggregateKernel, Grouping, AGGREGATE_FIELD};
pub use crate::error::{ExecError, ExecResult};
pub use crate::fused::{HashBuildOptions, SelectBuildHash};
pub use crate::hash_table::{JoinHashTable, RowLocation};
pub use crate::predicate::{
    ColumnReference, Comparator, Connective, Node, Predicate, PredicateTree,
};
pub use crate::result::{LazyTable, OperatorResult};
pub use crate::scheduler::{Scheduler, SchedulerOptions, Task, TaskChain};
pub use crate::select::{Select, Selection};
