//! Block-chunked columnar storage view.
//!
//! This crate focuses on:
//! - Typed, immutable column arrays grouped into fixed-capacity blocks.
//! - Tables as ordered block sequences, with batching helpers for block-parallel scans.
//! - Packed one-bit-per-row filters (`Bitmap`, `ChunkedFilter`) and lazy filter application.

#![forbid(unsafe_code)]

mod bitmap;
mod block;
mod column;
mod error;
mod table;
mod types;

pub use crate::bitmap::Bitmap;
pub use crate::block::Block;
pub use crate::column::ColumnData;
pub use crate::error::{ColumnarError, ColumnarResult};
pub use crate::table::{ChunkedColumn, ChunkedFilter, Table, TableBuilder, TableOptions};
pub use crate::types::{ColumnSchema, ColumnType, Value};
