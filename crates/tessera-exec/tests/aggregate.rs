#![cfg(not(target_arch = "wasm32"))]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tessera_columnar::{ColumnSchema, ColumnType, Table, TableBuilder, TableOptions, Value};
use tessera_exec::{
    Aggregate, AggregateKernel, ExecError, Grouping, Scheduler, SchedulerOptions, AGGREGATE_FIELD,
};

fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerOptions {
        num_threads: Some(4),
    })
}

fn table(rows: &[(&str, &str, i64)], block_rows: usize) -> Table {
    let options = TableOptions {
        block_capacity_rows: block_rows,
        batch_size_blocks: 2,
    };
    let mut builder = TableBuilder::new(
        "sales",
        vec![
            ColumnSchema::new("g", ColumnType::Utf8),
            ColumnSchema::new("h", ColumnType::Utf8),
            ColumnSchema::new("x", ColumnType::Int64),
        ],
        options,
    );
    for (g, h, x) in rows {
        builder
            .append_row(&[Value::string(g), Value::string(h), Value::Int64(*x)])
            .unwrap();
    }
    builder.finalize().unwrap()
}

fn column(table: &Table, name: &str) -> Vec<Value> {
    table.column_by_name(name).unwrap().to_values()
}

fn strings(values: &[&str]) -> Vec<Value> {
    values.iter().map(|s| Value::string(s)).collect()
}

#[test]
fn sum_and_mean_grouped_by_one_column() {
    let t = table(&[("a", "p", 1), ("a", "q", 2), ("b", "p", 3), ("b", "q", 4)], 3);

    let sum = Aggregate::new(AggregateKernel::Sum, "x", Some(Grouping::column("g")))
        .execute(&t, &scheduler())
        .unwrap();
    assert_eq!(sum.name(), AGGREGATE_FIELD);
    assert_eq!(
        sum.schema(),
        &[
            ColumnSchema::new("g", ColumnType::Utf8),
            ColumnSchema::new(AGGREGATE_FIELD, ColumnType::Int64),
        ][..]
    );
    assert_eq!(column(&sum, "g"), strings(&["a", "b"]));
    assert_eq!(
        column(&sum, AGGREGATE_FIELD),
        vec![Value::Int64(3), Value::Int64(7)]
    );

    let mean = Aggregate::new(AggregateKernel::Mean, "x", Some(Grouping::column("g")))
        .execute(&t, &Scheduler::inline())
        .unwrap();
    assert_eq!(
        column(&mean, AGGREGATE_FIELD),
        vec![Value::float(1.5), Value::float(3.5)]
    );
}

#[test]
fn without_group_by_yields_one_row() {
    let t = table(&[("a", "p", 1), ("a", "q", 2), ("b", "p", 3), ("b", "q", 4)], 2);
    let sum = Aggregate::new(AggregateKernel::Sum, "x", None)
        .execute(&t, &scheduler())
        .unwrap();
    assert_eq!(
        sum.schema(),
        &[ColumnSchema::new(AGGREGATE_FIELD, ColumnType::Int64)][..]
    );
    assert_eq!(column(&sum, AGGREGATE_FIELD), vec![Value::Int64(10)]);

    let mean = Aggregate::new(AggregateKernel::Mean, "x", None)
        .execute(&t, &scheduler())
        .unwrap();
    assert_eq!(column(&mean, AGGREGATE_FIELD), vec![Value::float(2.5)]);
}

#[test]
fn composite_group_by_keeps_every_combination() {
    let t = table(&[("a", "p", 1), ("a", "p", 2), ("b", "q", 4)], 2);
    let grouping = Grouping::from_columns(["g", "h"]);

    let sum = Aggregate::new(AggregateKernel::Sum, "x", grouping.clone())
        .execute(&t, &scheduler())
        .unwrap();
    assert_eq!(sum.row_count(), 4);
    assert_eq!(column(&sum, "g"), strings(&["a", "a", "b", "b"]));
    assert_eq!(column(&sum, "h"), strings(&["p", "q", "p", "q"]));
    assert_eq!(
        column(&sum, AGGREGATE_FIELD),
        vec![Value::Int64(3), Value::Int64(0), Value::Int64(0), Value::Int64(4)]
    );

    let mean = Aggregate::new(AggregateKernel::Mean, "x", grouping)
        .execute(&t, &scheduler())
        .unwrap();
    let means: Vec<f64> = column(&mean, AGGREGATE_FIELD)
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(means[0], 1.5);
    assert!(means[1].is_nan());
    assert!(means[2].is_nan());
    assert_eq!(means[3], 4.0);
}

#[test]
fn count_is_rejected_before_any_work() {
    let t = table(&[("a", "p", 1)], 2);
    let err = Aggregate::new(AggregateKernel::Count, "x", Some(Grouping::column("g")))
        .execute(&t, &scheduler())
        .unwrap_err();
    assert!(matches!(err, ExecError::UnsupportedOperation(_)));
}

#[test]
fn sum_over_strings_is_unsupported() {
    let t = table(&[("a", "p", 1)], 2);
    let err = Aggregate::new(AggregateKernel::Sum, "h", None)
        .execute(&t, &scheduler())
        .unwrap_err();
    assert!(matches!(err, ExecError::UnsupportedOperation(_)));
}

#[test]
fn sum_outside_i64_overflows() {
    let t = table(&[("a", "p", i64::MAX), ("a", "q", 1)], 1);
    let err = Aggregate::new(AggregateKernel::Sum, "x", None)
        .execute(&t, &scheduler())
        .unwrap_err();
    assert_eq!(err, ExecError::Overflow { column: "x".into() });
}

#[test]
fn numeric_group_keys_are_rendered_as_strings() {
    let mut builder = TableBuilder::new(
        "t",
        vec![
            ColumnSchema::new("k", ColumnType::UInt32),
            ColumnSchema::new("v", ColumnType::Float64),
        ],
        TableOptions::default(),
    );
    for (k, v) in [(7u32, 1.0), (3, 2.0), (7, 4.0)] {
        builder.append_row(&[Value::UInt32(k), Value::float(v)]).unwrap();
    }
    let t = builder.finalize().unwrap();
    let mean = Aggregate::new(AggregateKernel::Mean, "v", Some(Grouping::column("k")))
        .execute(&t, &Scheduler::inline())
        .unwrap();
    assert_eq!(column(&mean, "k"), strings(&["7", "3"]));
    assert_eq!(
        column(&mean, AGGREGATE_FIELD),
        vec![Value::float(2.5), Value::float(2.0)]
    );
}

#[test]
fn nan_group_key_collects_its_rows() {
    let mut builder = TableBuilder::new(
        "t",
        vec![
            ColumnSchema::new("k", ColumnType::Float64),
            ColumnSchema::new("x", ColumnType::Int64),
        ],
        TableOptions {
            block_capacity_rows: 2,
            batch_size_blocks: 1,
        },
    );
    for (k, x) in [(f64::NAN, 1i64), (1.0, 2), (f64::NAN, 4)] {
        builder.append_row(&[Value::float(k), Value::Int64(x)]).unwrap();
    }
    let t = builder.finalize().unwrap();
    let sum = Aggregate::new(AggregateKernel::Sum, "x", Some(Grouping::column("k")))
        .execute(&t, &scheduler())
        .unwrap();
    assert_eq!(column(&sum, "k"), strings(&["NaN", "1"]));
    assert_eq!(
        column(&sum, AGGREGATE_FIELD),
        vec![Value::Int64(5), Value::Int64(2)]
    );
}

proptest! {
    #[test]
    fn group_by_sum_matches_a_scan(
        rows in proptest::collection::vec((0u8..5, -100i64..100), 0..120),
        block_rows in 1usize..16,
    ) {
        let names = ["k0", "k1", "k2", "k3", "k4"];
        let data: Vec<(&str, &str, i64)> =
            rows.iter().map(|&(k, x)| (names[k as usize], "h", x)).collect();
        let t = table(&data, block_rows);

        let out = Aggregate::new(AggregateKernel::Sum, "x", Some(Grouping::column("g")))
            .execute(&t, &scheduler())
            .unwrap();

        let mut expected: BTreeMap<String, i64> = BTreeMap::new();
        for (g, _, x) in &data {
            *expected.entry((*g).to_owned()).or_default() += x;
        }
        let actual: BTreeMap<String, i64> = column(&out, "g")
            .into_iter()
            .zip(column(&out, AGGREGATE_FIELD))
            .map(|(g, x)| match x {
                Value::Int64(x) => (g.to_string(), x),
                other => panic!("unexpected aggregate {other:?}"),
            })
            .collect();
        prop_assert_eq!(out.row_count(), expected.len());
        prop_assert_eq!(actual, expected);
    }
}

proptest! {
    #[test]
    fn composite_group_by_covers_the_cartesian_product(
        rows in proptest::collection::vec((0u8..4, 0u8..3, -100i64..100), 1..120),
        block_rows in 1usize..16,
    ) {
        let gs = ["g0", "g1", "g2", "g3"];
        let hs = ["h0", "h1", "h2"];
        let data: Vec<(&str, &str, i64)> = rows
            .iter()
            .map(|&(g, h, x)| (gs[g as usize], hs[h as usize], x))
            .collect();
        let t = table(&data, block_rows);

        let out = Aggregate::new(AggregateKernel::Sum, "x", Grouping::from_columns(["g", "h"]))
            .execute(&t, &scheduler())
            .unwrap();

        let mut left: Vec<&str> = Vec::new();
        let mut right: Vec<&str> = Vec::new();
        for (g, h, _) in &data {
            if !left.contains(g) {
                left.push(*g);
            }
            if !right.contains(h) {
                right.push(*h);
            }
        }
        prop_assert_eq!(out.row_count(), left.len() * right.len());

        let keys: Vec<(String, String)> = column(&out, "g")
            .into_iter()
            .zip(column(&out, "h"))
            .map(|(g, h)| (g.to_string(), h.to_string()))
            .collect();
        let expected_keys: Vec<(String, String)> = left
            .iter()
            .flat_map(|g| right.iter().map(move |h| ((*g).to_owned(), (*h).to_owned())))
            .collect();
        prop_assert_eq!(&keys, &expected_keys);

        for ((g, h), sum) in keys.iter().zip(column(&out, AGGREGATE_FIELD)) {
            let scan: i64 = data
                .iter()
                .filter(|(rg, rh, _)| *rg == g.as_str() && *rh == h.as_str())
                .map(|(_, _, x)| x)
                .sum();
            prop_assert_eq!(sum, Value::Int64(scan), "group ({}, {})", g, h);
        }
    }
}
