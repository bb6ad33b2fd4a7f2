//! Relational algebra plans consumed by the translator.

pub mod description;

use std::fmt;

use relc_error::{DbError, Result};

use crate::expr::ScalarExpr;
use crate::registry::column::{ColumnDef, ColumnRef};

/// Side of a join to build the hash table on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSide {
    Left,
    Right,
}

/// Strategy hint for a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinImpl {
    NestedLoop,
    Hash { build: BuildSide },
}

impl JoinImpl {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NestedLoop => "nested_loop",
            Self::Hash { .. } => "hash",
        }
    }
}

impl fmt::Display for JoinImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NestedLoop => write!(f, "nested_loop"),
            Self::Hash { build } => write!(f, "hash(build={build:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSemantic {
    All,
    Distinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: ColumnRef,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFunction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// Input column, `None` only for `count(*)`.
    pub arg: Option<ColumnRef>,
    pub output: ColumnDef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelOperator {
    BaseTable {
        table: String,
        /// Table column names and the columns they define.
        columns: Vec<(String, ColumnDef)>,
    },
    Selection {
        predicate: ScalarExpr,
    },
    Map {
        computed: Vec<(ColumnDef, ScalarExpr)>,
    },
    Renaming {
        renamed: Vec<(ColumnDef, ColumnRef)>,
    },
    Projection {
        semantic: SetSemantic,
        columns: Vec<ColumnRef>,
    },
    CrossProduct,
    InnerJoin {
        predicate: ScalarExpr,
        join_impl: Option<JoinImpl>,
    },
    /// Left rows extended with a boolean marking if any right row matched.
    MarkJoin {
        predicate: ScalarExpr,
        mark: ColumnDef,
        join_impl: Option<JoinImpl>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Aggregation {
        group_by: Vec<ColumnRef>,
        aggregates: Vec<Aggregate>,
    },
    /// Produce the final result table.
    Materialize {
        columns: Vec<ColumnRef>,
        names: Vec<String>,
    },
}

impl RelOperator {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BaseTable { .. } => "base_table",
            Self::Selection { .. } => "selection",
            Self::Map { .. } => "map",
            Self::Renaming { .. } => "renaming",
            Self::Projection { .. } => "projection",
            Self::CrossProduct => "cross_product",
            Self::InnerJoin { .. } => "inner_join",
            Self::MarkJoin { .. } => "mark_join",
            Self::Sort { .. } => "sort",
            Self::Aggregation { .. } => "aggregation",
            Self::Materialize { .. } => "materialize",
        }
    }
}

/// A relational operator with its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<T> {
    pub node: T,
    pub children: Vec<Node<T>>,
}

impl<T> Node<T> {
    pub fn new(node: T, children: Vec<Node<T>>) -> Self {
        Node { node, children }
    }

    pub fn leaf(node: T) -> Self {
        Node {
            node,
            children: Vec::new(),
        }
    }

    /// Split into the operator and its children.
    pub fn into_parts(self) -> (T, Vec<Node<T>>) {
        (self.node, self.children)
    }
}

fn check_num_children<T>(children: &[Node<T>], expected: usize) -> Result<()> {
    let len = children.len();
    if len != expected {
        let noun = if expected == 1 { "child" } else { "children" };
        return Err(DbError::new(format!(
            "Expected {expected} {noun} to operator, have {len}"
        )));
    }
    Ok(())
}

pub fn one_child_exact<T>(mut children: Vec<Node<T>>) -> Result<Node<T>> {
    check_num_children(&children, 1)?;
    children
        .pop()
        .ok_or_else(|| DbError::new("Missing child for operator"))
}

pub fn two_children_exact<T>(children: Vec<Node<T>>) -> Result<[Node<T>; 2]> {
    check_num_children(&children, 2)?;
    <[Node<T>; 2]>::try_from(children).map_err(|_| DbError::new("Expected 2 children to operator"))
}

impl Node<RelOperator> {
    /// Columns produced by this node, in order.
    pub fn output_columns(&self) -> Result<Vec<ColumnRef>> {
        let child = |idx: usize| {
            self.children
                .get(idx)
                .ok_or_else(|| {
                    DbError::new("Missing child for operator").with_field("op", self.node.name())
                })
                .and_then(|c| c.output_columns())
        };

        Ok(match &self.node {
            RelOperator::BaseTable { columns, .. } => {
                columns.iter().map(|(_, def)| def.reference()).collect()
            }
            RelOperator::Selection { .. } | RelOperator::Sort { .. } => child(0)?,
            RelOperator::Map { computed } => {
                let mut cols = child(0)?;
                cols.extend(computed.iter().map(|(def, _)| def.reference()));
                cols
            }
            RelOperator::Renaming { renamed } => {
                let mut cols = child(0)?;
                cols.retain(|c| !renamed.iter().any(|(_, from)| from == c));
                cols.extend(renamed.iter().map(|(def, _)| def.reference()));
                cols
            }
            RelOperator::Projection { columns, .. } => columns.clone(),
            RelOperator::CrossProduct | RelOperator::InnerJoin { .. } => {
                let mut cols = child(0)?;
                cols.extend(child(1)?);
                cols
            }
            RelOperator::MarkJoin { mark, .. } => {
                let mut cols = child(0)?;
                cols.push(mark.reference());
                cols
            }
            RelOperator::Aggregation {
                group_by,
                aggregates,
            } => {
                let mut cols = group_by.clone();
                cols.extend(aggregates.iter().map(|agg| agg.output.reference()));
                cols
            }
            RelOperator::Materialize { .. } => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::column::{ColumnId, ColumnManager};
    use crate::types::datatype::DataType;

    fn scan(columns: &mut ColumnManager, table: &str, names: &[&str]) -> Node<RelOperator> {
        let columns = names
            .iter()
            .map(|name| {
                let def = columns.create_def(table, *name, DataType::int64()).unwrap();
                (name.to_string(), def)
            })
            .collect();
        Node::leaf(RelOperator::BaseTable {
            table: table.to_string(),
            columns,
        })
    }

    #[test]
    fn take_children() {
        let mut columns = ColumnManager::new();
        let node = Node::new(RelOperator::CrossProduct, vec![
            scan(&mut columns, "a", &["x"]),
            scan(&mut columns, "b", &["y"]),
        ]);
        let err = one_child_exact(node.children.clone()).unwrap_err();
        assert!(err.get_msg().contains("have 2"), "{err}");

        let (op, children) = node.into_parts();
        assert_eq!(RelOperator::CrossProduct, op);
        let [left, right] = two_children_exact(children).unwrap();
        assert!(matches!(left.node, RelOperator::BaseTable { ref table, .. } if table == "a"));
        assert!(matches!(right.node, RelOperator::BaseTable { ref table, .. } if table == "b"));
    }

    #[test]
    fn output_columns_of_mark_join() {
        let mut columns = ColumnManager::new();
        let left = scan(&mut columns, "l", &["a", "b"]);
        let right = scan(&mut columns, "r", &["c"]);
        let mark = columns.create_def("mark", "m", DataType::bool()).unwrap();

        let join = Node::new(
            RelOperator::MarkJoin {
                predicate: ScalarExpr::bool(true),
                mark,
                join_impl: None,
            },
            vec![left, right],
        );

        let out = join.output_columns().unwrap();
        assert_eq!(
            vec![
                ColumnRef(ColumnId(0)),
                ColumnRef(ColumnId(1)),
                mark.reference()
            ],
            out
        );
    }
}
