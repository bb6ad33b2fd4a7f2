//! Translation of relational plans into sub-operator programs.
//!
//! Each relational operator appends operators to the region currently being
//! built and returns the stream (or, for the final materialize, the result
//! table) it produces.

mod plan_aggregate;
mod plan_join;
mod plan_mark_join;
mod plan_materialize;
mod plan_scan;
mod plan_select;
mod plan_sort;

pub use plan_sort::sort_comparator;
use relc_error::{DbError, Result};
use tracing::trace;

use crate::config::CompileConfig;
use crate::expr::ScalarExpr;
use crate::expr::region::ExprRegion;
use crate::registry::CompileContext;
use crate::registry::column::{ColumnDef, ColumnRef};
use crate::relalg::{JoinImpl, Node, RelOperator, one_child_exact, two_children_exact};
use crate::subop::{OpId, Program, RegionId, SubOperator, ValueId, ValueKind};
use crate::types::state::{Member, StateMembers};

/// Translate a relational plan into a program returning the plan's result.
pub fn translate_plan(
    ctx: &mut CompileContext,
    config: &CompileConfig,
    plan: Node<RelOperator>,
) -> Result<Program> {
    let mut state = TranslateState::new(ctx, config);
    let root = state.translate(plan)?;
    state.append_sink(SubOperator::Return { values: vec![root] })?;
    Ok(state.program)
}

#[derive(Debug)]
pub struct TranslateState<'a> {
    pub ctx: &'a mut CompileContext,
    pub config: &'a CompileConfig,
    pub program: Program,
    /// Region new operators are appended to.
    region: RegionId,
}

impl<'a> TranslateState<'a> {
    pub fn new(ctx: &'a mut CompileContext, config: &'a CompileConfig) -> Self {
        let program = Program::new();
        let region = program.body();
        TranslateState {
            ctx,
            config,
            program,
            region,
        }
    }

    pub fn translate(&mut self, node: Node<RelOperator>) -> Result<ValueId> {
        trace!(op = node.node.name(), "translating");

        let (op, children) = node.into_parts();
        match op {
            RelOperator::BaseTable { table, columns } => self.translate_base_table(table, columns),
            RelOperator::Selection { predicate } => {
                let input = one_child_exact(children)?;
                self.translate_selection(input, predicate)
            }
            RelOperator::Map { computed } => {
                let input = one_child_exact(children)?;
                self.translate_map(input, computed)
            }
            RelOperator::Renaming { renamed } => {
                let input = one_child_exact(children)?;
                self.translate_renaming(input, renamed)
            }
            RelOperator::Projection { semantic, columns } => {
                let input = one_child_exact(children)?;
                self.translate_projection(input, semantic, columns)
            }
            RelOperator::CrossProduct => {
                let [left, right] = two_children_exact(children)?;
                self.translate_nested_loop_join(left, right, None)
            }
            RelOperator::InnerJoin {
                predicate,
                join_impl,
            } => {
                let [left, right] = two_children_exact(children)?;
                let join_impl = join_impl.unwrap_or(self.config.default_join_impl);
                self.translate_inner_join(left, right, predicate, join_impl)
            }
            RelOperator::MarkJoin {
                predicate,
                mark,
                join_impl,
            } => {
                let [left, right] = two_children_exact(children)?;
                let join_impl = join_impl.unwrap_or(self.config.default_join_impl);
                match join_impl {
                    JoinImpl::NestedLoop => {
                        self.translate_nested_loop_mark_join(left, right, predicate, mark)
                    }
                    JoinImpl::Hash { .. } => {
                        self.translate_hash_mark_join(left, right, predicate, mark)
                    }
                }
            }
            RelOperator::Sort { keys } => {
                let input = one_child_exact(children)?;
                self.translate_sort(input, keys)
            }
            RelOperator::Aggregation {
                group_by,
                aggregates,
            } => {
                let input = one_child_exact(children)?;
                self.translate_aggregation(input, group_by, aggregates)
            }
            RelOperator::Materialize { columns, names } => {
                let input = one_child_exact(children)?;
                self.translate_materialize(input, columns, names)
            }
        }
    }

    /// Append an operator producing a value to the current region.
    pub(crate) fn append(&mut self, op: SubOperator) -> Result<ValueId> {
        self.program.append_value(self.region, op)
    }

    /// Append an operator that produces nothing.
    pub(crate) fn append_sink(&mut self, op: SubOperator) -> Result<OpId> {
        self.program.append(self.region, op)
    }

    /// Run `f` once per row of `input` inside a nested map body.
    ///
    /// `f` receives the body's argument stream and returns the stream the
    /// body produces.
    pub(crate) fn nested_map<F>(&mut self, input: ValueId, f: F) -> Result<ValueId>
    where
        F: FnOnce(&mut Self, ValueId) -> Result<ValueId>,
    {
        let body = self.program.new_region();
        let arg = self.program.add_region_arg(body, ValueKind::Stream)?;

        let outer = self.region;
        self.region = body;
        let result = f(self, arg).and_then(|out| {
            self.append_sink(SubOperator::Return { values: vec![out] })?;
            Ok(())
        });
        self.region = outer;
        result?;

        self.append(SubOperator::NestedMap { input, body })
    }

    /// Evaluate a predicate into a new column and keep rows where it's true.
    pub(crate) fn apply_predicate(
        &mut self,
        input: ValueId,
        predicate: &ScalarExpr,
    ) -> Result<ValueId> {
        let (mapped, cond) = self.compute_condition(input, predicate, "select")?;
        self.append(SubOperator::Filter {
            input: mapped,
            conditions: vec![cond],
        })
    }

    /// Evaluate a boolean expression into a new column.
    pub(crate) fn compute_condition(
        &mut self,
        input: ValueId,
        predicate: &ScalarExpr,
        scope_prefix: &str,
    ) -> Result<(ValueId, ColumnRef)> {
        let datatype = predicate.datatype(&self.ctx.columns)?;
        let scope = self.ctx.columns.unique_scope(scope_prefix);
        let cond = self.ctx.columns.create_def(&scope, "cond", datatype)?;

        let (region, inputs) =
            ExprRegion::bind_columns(std::slice::from_ref(predicate), &self.ctx.columns)?;
        let mapped = self.append(SubOperator::Map {
            input,
            computed: vec![cond],
            inputs,
            region,
        })?;

        Ok((mapped, cond.reference()))
    }

    /// Members mirroring a list of columns, named after the columns.
    pub(crate) fn members_for_columns(&mut self, columns: &[ColumnRef]) -> Result<Vec<Member>> {
        columns
            .iter()
            .map(|col| {
                let name = self.ctx.columns.get(col.id())?.name.clone();
                let datatype = self.ctx.columns.datatype(col.id())?;
                Ok(Member::new(self.ctx.members.unique_member(&name), datatype))
            })
            .collect()
    }
}

/// Mapping used when materializing columns into members.
pub(crate) fn write_mapping(columns: &[ColumnRef], members: &[Member]) -> Vec<(ColumnRef, String)> {
    columns
        .iter()
        .zip(members)
        .map(|(col, member)| (*col, member.name.clone()))
        .collect()
}

/// Mapping used when scanning members back into the original columns.
pub(crate) fn read_mapping(columns: &[ColumnRef], members: &[Member]) -> Vec<(String, ColumnDef)> {
    columns
        .iter()
        .zip(members)
        .map(|(col, member)| (member.name.clone(), ColumnDef(col.id())))
        .collect()
}

pub(crate) fn state_members(members: &[Member]) -> StateMembers {
    StateMembers::new(members.to_vec())
}

/// Error for a column that should be an output of a child plan.
pub(crate) fn missing_column(ctx: &CompileContext, col: ColumnRef, op: &str) -> DbError {
    DbError::new("Column not produced by input")
        .with_field("column", ctx.columns.display_name(col.id()))
        .with_field("op", op)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::types::datatype::DataType;

    /// Base table node with int64 columns.
    pub fn scan(ctx: &mut CompileContext, table: &str, names: &[&str]) -> Node<RelOperator> {
        scan_typed(ctx, table, &names.iter().map(|n| (*n, DataType::int64())).collect::<Vec<_>>())
    }

    pub fn scan_typed(
        ctx: &mut CompileContext,
        table: &str,
        columns: &[(&str, DataType)],
    ) -> Node<RelOperator> {
        let scope = ctx.columns.unique_scope(table);
        let columns = columns
            .iter()
            .map(|(name, datatype)| {
                let def = ctx.columns.create_def(&scope, name, *datatype).unwrap();
                (name.to_string(), def)
            })
            .collect();
        Node::leaf(RelOperator::BaseTable {
            table: table.to_string(),
            columns,
        })
    }

    /// Wrap a plan in a final materialize of all its output columns.
    pub fn materialize(ctx: &CompileContext, plan: Node<RelOperator>) -> Node<RelOperator> {
        let columns = plan.output_columns().unwrap();
        let names = columns
            .iter()
            .map(|c| ctx.columns.get(c.id()).unwrap().name.clone())
            .collect();
        Node::new(RelOperator::Materialize { columns, names }, vec![plan])
    }

    pub fn op_names(program: &Program) -> Vec<&'static str> {
        program
            .all_ops()
            .into_iter()
            .map(|op| program.op(op).unwrap().name())
            .collect()
    }
}
