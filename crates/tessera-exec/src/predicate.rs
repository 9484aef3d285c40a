//! Predicate trees handed to the engines by the planner.

use crate::error::{ExecError, ExecResult};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};
use tessera_columnar::{Table, Value};

/// Locates a column: an optional (non-owning) table identity plus a column name.
///
/// An unbound reference (no table) resolves against whichever table the consuming operator is
/// working on.
#[derive(Clone)]
pub struct ColumnReference {
    table: Option<Weak<Table>>,
    column: String,
}

impl ColumnReference {
    pub fn new(table: &Arc<Table>, column: impl Into<String>) -> Self {
        Self {
            table: Some(Arc::downgrade(table)),
            column: column.into(),
        }
    }

    pub fn unbound(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    pub fn refers_to(&self, table: &Arc<Table>) -> bool {
        self.table
            .as_ref()
            .is_some_and(|t| std::ptr::eq(t.as_ptr(), Arc::as_ptr(table)))
    }

    /// The column name, if this reference is unbound or bound to `table`.
    pub fn column_in(&self, table: &Arc<Table>) -> ExecResult<&str> {
        if self.is_bound() && !self.refers_to(table) {
            return Err(self.unknown_table());
        }
        Ok(&self.column)
    }

    pub(crate) fn unknown_table(&self) -> ExecError {
        ExecError::UnknownTable {
            table: self.table().map(|t| t.name().to_owned()).unwrap_or_default(),
            column: self.column.clone(),
        }
    }
}

impl PartialEq for ColumnReference {
    fn eq(&self, other: &Self) -> bool {
        let same_table = match (&self.table, &other.table) {
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_table && self.column == other.column
    }
}

impl fmt::Debug for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table().map(|t| t.name().to_owned());
        f.debug_struct("ColumnReference")
            .field("table", &table)
            .field("column", &self.column)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Comparator {
    /// Whether `ordering` (row value against literal) satisfies the comparator.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Equal => ordering == Ordering::Equal,
            Comparator::NotEqual => ordering != Ordering::Equal,
            Comparator::Less => ordering == Ordering::Less,
            Comparator::LessEqual => ordering != Ordering::Greater,
            Comparator::Greater => ordering == Ordering::Greater,
            Comparator::GreaterEqual => ordering != Ordering::Less,
        }
    }

    /// Like [`accepts`](Self::accepts) for a possibly unordered pair (a NaN operand): only
    /// `NotEqual` holds between unordered values.
    pub fn accepts_partial(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            Some(ordering) => self.accepts(ordering),
            None => self == Comparator::NotEqual,
        }
    }
}

/// `column <comparator> value`.
///
/// A `NotEqual` predicate carrying a second literal is a range test: rows with
/// `value <= v <= value2` survive.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: ColumnReference,
    pub comparator: Comparator,
    pub value: Value,
    pub value2: Option<Value>,
}

impl Predicate {
    pub fn new(column: ColumnReference, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            column,
            comparator,
            value: value.into(),
            value2: None,
        }
    }

    /// Inclusive range `lo <= column <= hi`.
    pub fn between(column: ColumnReference, lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self {
            column,
            comparator: Comparator::NotEqual,
            value: lo.into(),
            value2: Some(hi.into()),
        }
    }

    pub fn is_range(&self) -> bool {
        self.comparator == Comparator::NotEqual && self.value2.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Connective {
    And,
    Or,
    /// Pass-through of the left child.
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Leaf(Predicate),
    Connective {
        connective: Connective,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    pub fn leaf(predicate: Predicate) -> Self {
        Node::Leaf(predicate)
    }

    pub fn connective(connective: Connective, left: Node, right: Node) -> Self {
        Node::Connective {
            connective,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Node, right: Node) -> Self {
        Self::connective(Connective::And, left, right)
    }

    pub fn or(left: Node, right: Node) -> Self {
        Self::connective(Connective::Or, left, right)
    }

    fn check_bindings(&self, table: &Arc<Table>) -> ExecResult<()> {
        match self {
            Node::Leaf(p) => p.column.column_in(table).map(drop),
            Node::Connective { left, right, .. } => {
                left.check_bindings(table)?;
                right.check_bindings(table)
            }
        }
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Leaf(p) => {
                if !out.contains(&p.column.column()) {
                    out.push(p.column.column());
                }
            }
            Node::Connective { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }
}

/// An immutable predicate tree. Safe to evaluate repeatedly and from many threads.
#[derive(Clone, Debug, PartialEq)]
pub struct PredicateTree {
    root: Node,
}

impl PredicateTree {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Distinct column names referenced by the leaves, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_columns(&mut out);
        out
    }

    /// Fails with [`ExecError::UnknownTable`] if any leaf is bound to a table other than `table`.
    pub fn check_bindings(&self, table: &Arc<Table>) -> ExecResult<()> {
        self.root.check_bindings(table)
    }
}

impl From<Predicate> for PredicateTree {
    fn from(predicate: Predicate) -> Self {
        Self::new(Node::Leaf(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_columnar::{ColumnSchema, ColumnType, TableBuilder, TableOptions};

    fn table(name: &str) -> Arc<Table> {
        let schema = vec![ColumnSchema::new("a", ColumnType::Int64)];
        Arc::new(
            TableBuilder::new(name, schema, TableOptions::default())
                .finalize()
                .unwrap(),
        )
    }

    #[test]
    fn references_compare_by_table_identity() {
        let (t1, t2) = (table("t"), table("t"));
        let r1 = ColumnReference::new(&t1, "a");
        assert!(r1.refers_to(&t1));
        assert!(!r1.refers_to(&t2));
        assert_ne!(r1, ColumnReference::new(&t2, "a"));
        assert_eq!(r1, ColumnReference::new(&t1, "a"));
        assert!(!ColumnReference::unbound("a").is_bound());
    }

    #[test]
    fn tree_lists_distinct_columns() {
        let p = |c: &str| {
            Node::leaf(Predicate::new(
                ColumnReference::unbound(c),
                Comparator::Equal,
                1i64,
            ))
        };
        let tree = PredicateTree::new(Node::and(p("x"), Node::or(p("y"), p("x"))));
        assert_eq!(tree.columns(), vec!["x", "y"]);
        assert!(Predicate::between(ColumnReference::unbound("x"), 1i64, 2i64).is_range());
    }
}
