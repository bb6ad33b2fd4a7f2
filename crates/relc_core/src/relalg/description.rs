//! Name based plan descriptions.
//!
//! A description refers to tables and columns by name. Binding resolves the
//! names against a schema and creates the registry columns for every
//! operator, producing a plan ready for translation.

use indexmap::IndexMap;
use relc_error::{DbError, Result, ResultExt};
use serde::{Deserialize, Serialize};

use super::{
    Aggregate,
    AggregateFunction,
    BuildSide,
    JoinImpl,
    Node,
    RelOperator,
    SetSemantic,
    SortKey,
};
use crate::expr::value::ConstValue;
use crate::expr::{ArithOp, CompareOp, ScalarExpr};
use crate::registry::CompileContext;
use crate::registry::column::ColumnRef;
use crate::types::column::ColumnType;
use crate::types::datatype::{DataType, ScalarType};

/// A complete query: the tables it reads and the plan over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescription {
    #[serde(default)]
    pub tables: IndexMap<String, TableDescription>,
    pub plan: PlanDescription,
}

impl QueryDescription {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse query description")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub columns: Vec<ColumnDescription>,
    /// Table contents, only needed for execution.
    #[serde(default)]
    pub rows: Vec<Vec<Option<ConstValue>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinImplDescription {
    NestedLoop,
    /// Hash join building on the right input.
    Hash,
    HashBuildLeft,
}

impl From<JoinImplDescription> for JoinImpl {
    fn from(value: JoinImplDescription) -> Self {
        match value {
            JoinImplDescription::NestedLoop => JoinImpl::NestedLoop,
            JoinImplDescription::Hash => JoinImpl::Hash {
                build: BuildSide::Right,
            },
            JoinImplDescription::HashBuildLeft => JoinImpl::Hash {
                build: BuildSide::Left,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedExpr {
    pub name: String,
    pub expr: ExprDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameDescription {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKeyDescription {
    pub column: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunctionDescription {
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDescription {
    pub function: AggregateFunctionDescription,
    /// Omitted for `count(*)`.
    #[serde(default)]
    pub arg: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanDescription {
    Scan {
        table: String,
        #[serde(default)]
        alias: Option<String>,
        /// Subset of columns to read, all columns if omitted.
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
    Select {
        input: Box<PlanDescription>,
        predicate: ExprDescription,
    },
    Map {
        input: Box<PlanDescription>,
        columns: Vec<NamedExpr>,
    },
    Rename {
        input: Box<PlanDescription>,
        columns: Vec<RenameDescription>,
    },
    Project {
        input: Box<PlanDescription>,
        columns: Vec<String>,
        #[serde(default)]
        distinct: bool,
    },
    CrossProduct {
        left: Box<PlanDescription>,
        right: Box<PlanDescription>,
    },
    Join {
        left: Box<PlanDescription>,
        right: Box<PlanDescription>,
        predicate: ExprDescription,
        #[serde(default)]
        join_impl: Option<JoinImplDescription>,
    },
    MarkJoin {
        left: Box<PlanDescription>,
        right: Box<PlanDescription>,
        predicate: ExprDescription,
        mark: String,
        #[serde(default)]
        join_impl: Option<JoinImplDescription>,
    },
    Sort {
        input: Box<PlanDescription>,
        keys: Vec<SortKeyDescription>,
    },
    Aggregate {
        input: Box<PlanDescription>,
        #[serde(default)]
        group_by: Vec<String>,
        aggregates: Vec<AggregateDescription>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprDescription {
    Column(String),
    Const {
        #[serde(default)]
        value: Option<ConstValue>,
        #[serde(rename = "type")]
        datatype: DataType,
    },
    And(Vec<ExprDescription>),
    Or(Vec<ExprDescription>),
    Not(Box<ExprDescription>),
    IsNull(Box<ExprDescription>),
    Eq(Box<ExprDescription>, Box<ExprDescription>),
    NotEq(Box<ExprDescription>, Box<ExprDescription>),
    Lt(Box<ExprDescription>, Box<ExprDescription>),
    LtEq(Box<ExprDescription>, Box<ExprDescription>),
    Gt(Box<ExprDescription>, Box<ExprDescription>),
    GtEq(Box<ExprDescription>, Box<ExprDescription>),
    Add(Box<ExprDescription>, Box<ExprDescription>),
    Sub(Box<ExprDescription>, Box<ExprDescription>),
    Mul(Box<ExprDescription>, Box<ExprDescription>),
    Div(Box<ExprDescription>, Box<ExprDescription>),
    Mod(Box<ExprDescription>, Box<ExprDescription>),
    Cast {
        expr: Box<ExprDescription>,
        to: DataType,
    },
}

/// A column visible to operators above a bound node.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScopeColumn {
    /// Table alias for scanned columns, empty for computed columns.
    qualifier: String,
    name: String,
    column: ColumnRef,
}

#[derive(Debug)]
struct BoundPlan {
    node: Node<RelOperator>,
    scope: Vec<ScopeColumn>,
}

/// Binds a name based description into a plan.
#[derive(Debug)]
pub struct PlanBinder<'a> {
    ctx: &'a mut CompileContext,
    tables: &'a IndexMap<String, TableDescription>,
}

impl<'a> PlanBinder<'a> {
    pub fn new(ctx: &'a mut CompileContext, tables: &'a IndexMap<String, TableDescription>) -> Self {
        PlanBinder { ctx, tables }
    }

    /// Bind a plan, finishing it with a materialize of every output column.
    pub fn bind(&mut self, plan: &PlanDescription) -> Result<Node<RelOperator>> {
        let bound = self.bind_plan(plan)?;
        let columns = bound.scope.iter().map(|c| c.column).collect();
        let names = bound.scope.iter().map(|c| c.name.clone()).collect();

        Ok(Node::new(
            RelOperator::Materialize { columns, names },
            vec![bound.node],
        ))
    }

    fn bind_plan(&mut self, plan: &PlanDescription) -> Result<BoundPlan> {
        match plan {
            PlanDescription::Scan {
                table,
                alias,
                columns,
            } => self.bind_scan(table, alias.as_deref(), columns.as_deref()),
            PlanDescription::Select { input, predicate } => {
                let input = self.bind_plan(input)?;
                let predicate = self.bind_expr(predicate, &input.scope)?;
                Ok(BoundPlan {
                    node: Node::new(RelOperator::Selection { predicate }, vec![input.node]),
                    scope: input.scope,
                })
            }
            PlanDescription::Map { input, columns } => {
                let mut input = self.bind_plan(input)?;
                let scope_name = self.ctx.columns.unique_scope("map");
                let mut computed = Vec::with_capacity(columns.len());
                let mut added = Vec::with_capacity(columns.len());
                for named in columns {
                    let expr = self.bind_expr(&named.expr, &input.scope)?;
                    let datatype = expr.datatype(&self.ctx.columns)?;
                    let def = self.ctx.columns.create_def(&scope_name, &named.name, datatype)?;
                    added.push(ScopeColumn {
                        qualifier: String::new(),
                        name: named.name.clone(),
                        column: def.reference(),
                    });
                    computed.push((def, expr));
                }
                input.scope.extend(added);
                Ok(BoundPlan {
                    node: Node::new(RelOperator::Map { computed }, vec![input.node]),
                    scope: input.scope,
                })
            }
            PlanDescription::Rename { input, columns } => {
                let mut input = self.bind_plan(input)?;
                let scope_name = self.ctx.columns.unique_scope("rename");
                let mut renamed = Vec::with_capacity(columns.len());
                for rename in columns {
                    let from = resolve_column(&input.scope, &rename.from)?;
                    let column_type: ColumnType = self.ctx.columns.column_type(from.id())?.clone();
                    let def = self.ctx.columns.create_def(&scope_name, &rename.to, column_type)?;
                    renamed.push((def, from));
                }
                input.scope.retain(|c| !renamed.iter().any(|(_, from)| *from == c.column));
                input
                    .scope
                    .extend(renamed.iter().zip(columns).map(|((def, _), rename)| ScopeColumn {
                        qualifier: String::new(),
                        name: rename.to.clone(),
                        column: def.reference(),
                    }));
                Ok(BoundPlan {
                    node: Node::new(RelOperator::Renaming { renamed }, vec![input.node]),
                    scope: input.scope,
                })
            }
            PlanDescription::Project {
                input,
                columns,
                distinct,
            } => {
                let input = self.bind_plan(input)?;
                let mut scope = Vec::with_capacity(columns.len());
                for name in columns {
                    let column = resolve_column(&input.scope, name)?;
                    let entry = input
                        .scope
                        .iter()
                        .find(|c| c.column == column)
                        .cloned()
                        .ok_or_else(|| DbError::new("Missing column in scope"))?;
                    scope.push(entry);
                }
                let semantic = if *distinct {
                    SetSemantic::Distinct
                } else {
                    SetSemantic::All
                };
                Ok(BoundPlan {
                    node: Node::new(
                        RelOperator::Projection {
                            semantic,
                            columns: scope.iter().map(|c| c.column).collect(),
                        },
                        vec![input.node],
                    ),
                    scope,
                })
            }
            PlanDescription::CrossProduct { left, right } => {
                let (left, right) = (self.bind_plan(left)?, self.bind_plan(right)?);
                let mut scope = left.scope;
                scope.extend(right.scope);
                Ok(BoundPlan {
                    node: Node::new(RelOperator::CrossProduct, vec![left.node, right.node]),
                    scope,
                })
            }
            PlanDescription::Join {
                left,
                right,
                predicate,
                join_impl,
            } => {
                let (left, right) = (self.bind_plan(left)?, self.bind_plan(right)?);
                let mut scope = left.scope;
                scope.extend(right.scope);
                let predicate = self.bind_expr(predicate, &scope)?;
                Ok(BoundPlan {
                    node: Node::new(
                        RelOperator::InnerJoin {
                            predicate,
                            join_impl: join_impl.map(JoinImpl::from),
                        },
                        vec![left.node, right.node],
                    ),
                    scope,
                })
            }
            PlanDescription::MarkJoin {
                left,
                right,
                predicate,
                mark,
                join_impl,
            } => {
                let (left, right) = (self.bind_plan(left)?, self.bind_plan(right)?);
                let mut joined = left.scope.clone();
                joined.extend(right.scope);
                let predicate = self.bind_expr(predicate, &joined)?;

                let scope_name = self.ctx.columns.unique_scope("mark");
                let mark_def = self
                    .ctx
                    .columns
                    .create_def(&scope_name, mark, DataType::bool())?;

                let mut scope = left.scope;
                scope.push(ScopeColumn {
                    qualifier: String::new(),
                    name: mark.clone(),
                    column: mark_def.reference(),
                });

                Ok(BoundPlan {
                    node: Node::new(
                        RelOperator::MarkJoin {
                            predicate,
                            mark: mark_def,
                            join_impl: join_impl.map(JoinImpl::from),
                        },
                        vec![left.node, right.node],
                    ),
                    scope,
                })
            }
            PlanDescription::Sort { input, keys } => {
                let input = self.bind_plan(input)?;
                let keys = keys
                    .iter()
                    .map(|key| {
                        Ok(SortKey {
                            column: resolve_column(&input.scope, &key.column)?,
                            desc: key.desc,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(BoundPlan {
                    node: Node::new(RelOperator::Sort { keys }, vec![input.node]),
                    scope: input.scope,
                })
            }
            PlanDescription::Aggregate {
                input,
                group_by,
                aggregates,
            } => self.bind_aggregate(input, group_by, aggregates),
        }
    }

    fn bind_scan(
        &mut self,
        table: &str,
        alias: Option<&str>,
        columns: Option<&[String]>,
    ) -> Result<BoundPlan> {
        let desc = self
            .tables
            .get(table)
            .ok_or_else(|| DbError::new(format!("Missing table '{table}'")))?;

        let qualifier = alias.unwrap_or(table).to_string();
        let scope_name = self.ctx.columns.unique_scope(&qualifier);

        let selected: Vec<&ColumnDescription> = match columns {
            Some(names) => names
                .iter()
                .map(|name| {
                    desc.columns
                        .iter()
                        .find(|c| &c.name == name)
                        .ok_or_else(|| {
                            DbError::new(format!("Missing column '{name}' in table '{table}'"))
                        })
                })
                .collect::<Result<Vec<_>>>()?,
            None => desc.columns.iter().collect(),
        };

        let mut defs = Vec::with_capacity(selected.len());
        let mut scope = Vec::with_capacity(selected.len());
        for col in selected {
            let def = self
                .ctx
                .columns
                .create_def(&scope_name, &col.name, col.datatype)?;
            defs.push((col.name.clone(), def));
            scope.push(ScopeColumn {
                qualifier: qualifier.clone(),
                name: col.name.clone(),
                column: def.reference(),
            });
        }

        Ok(BoundPlan {
            node: Node::leaf(RelOperator::BaseTable {
                table: table.to_string(),
                columns: defs,
            }),
            scope,
        })
    }

    fn bind_aggregate(
        &mut self,
        input: &PlanDescription,
        group_by: &[String],
        aggregates: &[AggregateDescription],
    ) -> Result<BoundPlan> {
        let input = self.bind_plan(input)?;

        let mut scope = Vec::with_capacity(group_by.len() + aggregates.len());
        let mut groups = Vec::with_capacity(group_by.len());
        for name in group_by {
            let column = resolve_column(&input.scope, name)?;
            if let Some(entry) = input.scope.iter().find(|c| c.column == column) {
                scope.push(entry.clone());
            }
            groups.push(column);
        }

        let scope_name = self.ctx.columns.unique_scope("agg");
        let mut bound = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let arg = agg
                .arg
                .as_deref()
                .map(|name| resolve_column(&input.scope, name))
                .transpose()?;

            let function = match agg.function {
                AggregateFunctionDescription::Count => AggregateFunction::Count,
                AggregateFunctionDescription::Sum => AggregateFunction::Sum,
                AggregateFunctionDescription::Min => AggregateFunction::Min,
                AggregateFunctionDescription::Max => AggregateFunction::Max,
            };

            let datatype = match (function, arg) {
                (AggregateFunction::Count, _) => DataType::int64(),
                (_, Some(arg)) => self.ctx.columns.datatype(arg.id())?.with_nullable(true),
                (_, None) => {
                    return Err(DbError::new("Aggregate requires an argument")
                        .with_field("function", function.as_str()));
                }
            };

            let output = self.ctx.columns.create_def(&scope_name, &agg.name, datatype)?;
            scope.push(ScopeColumn {
                qualifier: String::new(),
                name: agg.name.clone(),
                column: output.reference(),
            });
            bound.push(Aggregate {
                function,
                arg,
                output,
            });
        }

        Ok(BoundPlan {
            node: Node::new(
                RelOperator::Aggregation {
                    group_by: groups,
                    aggregates: bound,
                },
                vec![input.node],
            ),
            scope,
        })
    }

    fn bind_expr(&self, expr: &ExprDescription, scope: &[ScopeColumn]) -> Result<ScalarExpr> {
        let binary = |l: &ExprDescription, r: &ExprDescription| -> Result<(ScalarExpr, ScalarExpr)> {
            Ok((self.bind_expr(l, scope)?, self.bind_expr(r, scope)?))
        };
        let compare = |op: CompareOp, l: &ExprDescription, r: &ExprDescription| -> Result<ScalarExpr> {
            let (l, r) = binary(l, r)?;
            Ok(ScalarExpr::compare(op, l, r))
        };
        let arith = |op: ArithOp, l: &ExprDescription, r: &ExprDescription| -> Result<ScalarExpr> {
            let (l, r) = binary(l, r)?;
            Ok(ScalarExpr::arith(op, l, r))
        };

        Ok(match expr {
            ExprDescription::Column(name) => ScalarExpr::column(resolve_column(scope, name)?),
            ExprDescription::Const { value, datatype } => match value {
                Some(value) => ScalarExpr::constant(value.clone(), *datatype),
                None => ScalarExpr::Null(datatype.scalar),
            },
            ExprDescription::And(children) => ScalarExpr::and(
                children
                    .iter()
                    .map(|c| self.bind_expr(c, scope))
                    .collect::<Result<_>>()?,
            ),
            ExprDescription::Or(children) => ScalarExpr::or(
                children
                    .iter()
                    .map(|c| self.bind_expr(c, scope))
                    .collect::<Result<_>>()?,
            ),
            ExprDescription::Not(child) => ScalarExpr::not(self.bind_expr(child, scope)?),
            ExprDescription::IsNull(child) => ScalarExpr::is_null(self.bind_expr(child, scope)?),
            ExprDescription::Eq(l, r) => compare(CompareOp::Eq, l, r)?,
            ExprDescription::NotEq(l, r) => compare(CompareOp::NotEq, l, r)?,
            ExprDescription::Lt(l, r) => compare(CompareOp::Lt, l, r)?,
            ExprDescription::LtEq(l, r) => compare(CompareOp::LtEq, l, r)?,
            ExprDescription::Gt(l, r) => compare(CompareOp::Gt, l, r)?,
            ExprDescription::GtEq(l, r) => compare(CompareOp::GtEq, l, r)?,
            ExprDescription::Add(l, r) => arith(ArithOp::Add, l, r)?,
            ExprDescription::Sub(l, r) => arith(ArithOp::Sub, l, r)?,
            ExprDescription::Mul(l, r) => arith(ArithOp::Mul, l, r)?,
            ExprDescription::Div(l, r) => arith(ArithOp::Div, l, r)?,
            ExprDescription::Mod(l, r) => arith(ArithOp::Mod, l, r)?,
            ExprDescription::Cast { expr, to } => {
                let to: ScalarType = to.scalar;
                ScalarExpr::cast(self.bind_expr(expr, scope)?, to)
            }
        })
    }
}

/// Resolve `alias.column` or an unambiguous bare `column`.
fn resolve_column(scope: &[ScopeColumn], name: &str) -> Result<ColumnRef> {
    let matches: Vec<&ScopeColumn> = match name.split_once('.') {
        Some((qualifier, column)) => scope
            .iter()
            .filter(|c| c.qualifier == qualifier && c.name == column)
            .collect(),
        None => scope.iter().filter(|c| c.name == name).collect(),
    };

    match matches.as_slice() {
        [col] => Ok(col.column),
        [] => Err(DbError::new(format!("Missing column '{name}'"))),
        _ => Err(DbError::new(format!("Ambiguous column '{name}'"))
            .with_field("candidates", matches.len())),
    }
}
