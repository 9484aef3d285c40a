#![cfg(not(target_arch = "wasm32"))]

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tessera_columnar::{ColumnSchema, ColumnType, Table, TableBuilder, TableOptions, Value};
use tessera_exec::fused::join_key;
use tessera_exec::{
    ColumnReference, Comparator, ExecError, HashBuildOptions, Node, OperatorResult, Predicate,
    PredicateTree, RowLocation, Scheduler, SchedulerOptions, SelectBuildHash,
};

fn customers(rows: i64, block_rows: usize) -> Arc<Table> {
    let options = TableOptions {
        block_capacity_rows: block_rows,
        batch_size_blocks: 3,
    };
    let mut builder = TableBuilder::new(
        "customers",
        vec![
            ColumnSchema::new("id", ColumnType::Int64),
            ColumnSchema::new("nation", ColumnType::UInt8),
            ColumnSchema::new("name", ColumnType::Utf8),
        ],
        options,
    );
    for id in 0..rows {
        builder
            .append_row(&[
                Value::Int64(id % 10),
                Value::UInt8((id % 5) as u8),
                Value::string(&format!("c{id}")),
            ])
            .unwrap();
    }
    Arc::new(builder.finalize().unwrap())
}

fn nation_between(lo: u8, hi: u8) -> Arc<PredicateTree> {
    Arc::new(PredicateTree::new(Node::leaf(Predicate::between(
        ColumnReference::unbound("nation"),
        lo,
        hi,
    ))))
}

fn schedulers() -> Vec<Scheduler> {
    vec![
        Scheduler::inline(),
        Scheduler::new(SchedulerOptions {
            num_threads: Some(4),
        }),
    ]
}

#[test]
fn surviving_rows_are_indexed_by_location() {
    let table = customers(57, 8);
    for scheduler in schedulers() {
        let op = SelectBuildHash::new(
            Arc::clone(&table),
            nation_between(1, 2),
            ColumnReference::new(&table, "id"),
        );
        let mut result = OperatorResult::new();
        op.execute(&scheduler, &mut result).unwrap();

        assert!(result.is_hash_table_available());
        let hash_table = result.hash_table().unwrap();

        let mut expected = 0;
        for row in 0..57usize {
            let nation = row % 5;
            let key = join_key(&Value::Int64((row % 10) as i64)).unwrap();
            let location = RowLocation {
                row_offset: row,
                block_id: row / 8,
            };
            let present = hash_table.probe(key).contains(&location);
            assert_eq!(present, (1..=2).contains(&nation), "row {row}");
            expected += usize::from(present);
        }
        assert_eq!(hash_table.entry_count(), expected);

        let lazy = result.get_table(0).unwrap();
        assert_eq!(lazy.num_rows(), expected);
        assert_eq!(lazy.filter().unwrap().num_chunks(), table.block_count());
    }
}

#[test]
fn locations_under_a_key_are_in_table_order() {
    let table = customers(40, 4);
    let op = SelectBuildHash::new(
        Arc::clone(&table),
        nation_between(0, 4),
        ColumnReference::unbound("id"),
    )
    .with_options(HashBuildOptions {
        reserve_fraction: 0.5,
    });
    let mut result = OperatorResult::new();
    op.execute(
        &Scheduler::new(SchedulerOptions {
            num_threads: Some(3),
        }),
        &mut result,
    )
    .unwrap();

    let offsets: Vec<usize> = result
        .hash_table()
        .unwrap()
        .probe(3)
        .iter()
        .map(|l| l.row_offset)
        .collect();
    assert_eq!(offsets, vec![3, 13, 23, 33]);
}

#[test]
fn rows_failing_the_predicate_are_absent() {
    let table = customers(20, 6);
    let tree = Arc::new(PredicateTree::new(Node::leaf(Predicate::new(
        ColumnReference::unbound("name"),
        Comparator::Equal,
        "nobody",
    ))));
    let mut result = OperatorResult::new();
    SelectBuildHash::new(Arc::clone(&table), tree, ColumnReference::unbound("id"))
        .execute(&Scheduler::inline(), &mut result)
        .unwrap();

    let hash_table = result.hash_table().unwrap();
    assert!(hash_table.is_empty());
    assert_eq!(result.get_table(0).unwrap().num_rows(), 0);
}

#[test]
fn string_join_keys_are_unsupported() {
    let table = customers(10, 4);
    let mut result = OperatorResult::new();
    let err = SelectBuildHash::new(
        Arc::clone(&table),
        nation_between(0, 1),
        ColumnReference::unbound("name"),
    )
    .execute(&Scheduler::inline(), &mut result)
    .unwrap_err();
    assert!(matches!(err, ExecError::UnsupportedOperation(_)));
    assert!(result.is_empty());
    assert!(!result.is_hash_table_available());
}

#[test]
fn predicate_error_discards_every_partial_result() {
    let table = customers(30, 4);
    for scheduler in schedulers() {
        let tree = Arc::new(PredicateTree::new(Node::leaf(Predicate::new(
            ColumnReference::unbound("missing"),
            Comparator::Equal,
            1i64,
        ))));
        let mut result = OperatorResult::new();
        let err = SelectBuildHash::new(Arc::clone(&table), tree, ColumnReference::unbound("id"))
            .execute(&scheduler, &mut result)
            .unwrap_err();
        assert!(matches!(err, ExecError::Storage(_)));
        assert!(result.is_empty());
        assert!(!result.is_hash_table_available());
    }
}

#[test]
fn references_bound_to_another_table_are_rejected() {
    let table = customers(10, 4);
    let other = customers(10, 4);

    let mut result = OperatorResult::new();
    let err = SelectBuildHash::new(
        Arc::clone(&table),
        nation_between(0, 4),
        ColumnReference::new(&other, "id"),
    )
    .execute(&Scheduler::inline(), &mut result)
    .unwrap_err();
    assert_eq!(
        err,
        ExecError::UnknownTable {
            table: "customers".into(),
            column: "id".into(),
        }
    );
    assert!(result.is_empty());

    let foreign_tree = Arc::new(PredicateTree::new(Node::leaf(Predicate::new(
        ColumnReference::new(&other, "nation"),
        Comparator::Equal,
        1u8,
    ))));
    let err = SelectBuildHash::new(
        Arc::clone(&table),
        foreign_tree,
        ColumnReference::new(&table, "id"),
    )
    .execute(&Scheduler::inline(), &mut result)
    .unwrap_err();
    assert!(matches!(err, ExecError::UnknownTable { .. }));
    assert!(!result.is_hash_table_available());
}
