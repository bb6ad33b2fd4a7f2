use relc_error::Result;
use tracing::warn;

use super::TranslateState;
use super::plan_join::EquiJoinCondition;
use crate::expr::ScalarExpr;
use crate::registry::column::ColumnDef;
use crate::relalg::{Node, RelOperator};
use crate::subop::{SubOperator, ValueId};

impl TranslateState<'_> {
    /// Mark join evaluating the right input once per left row.
    pub fn translate_nested_loop_mark_join(
        &mut self,
        left: Node<RelOperator>,
        right: Node<RelOperator>,
        predicate: ScalarExpr,
        mark: ColumnDef,
    ) -> Result<ValueId> {
        let left_stream = self.translate(left)?;

        self.nested_map(left_stream, |this, _row| {
            let flag = this.append(SubOperator::CreateFlag)?;
            let right_stream = this.translate(right)?;
            let (mapped, cond) = this.compute_condition(right_stream, &predicate, "mark")?;
            this.append_sink(SubOperator::SetFlag {
                input: mapped,
                flag,
                condition: cond,
            })?;
            this.append(SubOperator::GetFlag { flag, mark })
        })
    }

    /// Mark join probing a multimap built from the right input.
    ///
    /// Falls back to a nested loop mark join if the predicate has no
    /// equalities between the two inputs.
    pub fn translate_hash_mark_join(
        &mut self,
        left: Node<RelOperator>,
        right: Node<RelOperator>,
        predicate: ScalarExpr,
        mark: ColumnDef,
    ) -> Result<ValueId> {
        let left_cols = left.output_columns()?;
        let right_cols = right.output_columns()?;
        let cond = EquiJoinCondition::extract(self, predicate.clone(), &left_cols, &right_cols)?;
        if !cond.has_keys() {
            warn!("hash mark join requested without equality keys, using nested loop mark join");
            return self.translate_nested_loop_mark_join(left, right, predicate, mark);
        }

        // Marks are per left row, the right side is always the one built.
        let table = self.build_join_hash_table(right, &right_cols, &cond.right)?;
        let left_stream = self.translate(left)?;

        self.nested_map(left_stream, |this, row| {
            let flag = this.append(SubOperator::CreateFlag)?;
            let matched = this.probe_join_hash_table(row, &table, &cond.left)?;

            let residual = cond.residual.clone().unwrap_or(ScalarExpr::bool(true));
            let (mapped, matches) = this.compute_condition(matched, &residual, "mark")?;
            this.append_sink(SubOperator::SetFlag {
                input: mapped,
                flag,
                condition: matches,
            })?;
            this.append(SubOperator::GetFlag { flag, mark })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use crate::config::CompileConfig;
    use crate::expr::{CompareOp, ScalarExpr};
    use crate::registry::CompileContext;
    use crate::relalg::{BuildSide, JoinImpl, Node, RelOperator};
    use crate::subop::verify::verify_program;
    use crate::types::datatype::DataType;

    fn mark_join(
        ctx: &mut CompileContext,
        join_impl: JoinImpl,
        predicate_op: CompareOp,
    ) -> Node<RelOperator> {
        let left = scan(ctx, "l", &["a"]);
        let right = scan(ctx, "r", &["b"]);
        let a = left.output_columns().unwrap()[0];
        let b = right.output_columns().unwrap()[0];
        let mark = ctx.columns.create_def("mark", "m", DataType::bool()).unwrap();

        let plan = Node::new(
            RelOperator::MarkJoin {
                predicate: ScalarExpr::compare(
                    predicate_op,
                    ScalarExpr::column(a),
                    ScalarExpr::column(b),
                ),
                mark,
                join_impl: Some(join_impl),
            },
            vec![left, right],
        );
        materialize(ctx, plan)
    }

    #[test]
    fn nested_loop_mark_join() {
        let mut ctx = CompileContext::new();
        let plan = mark_join(&mut ctx, JoinImpl::NestedLoop, CompareOp::Eq);
        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();

        assert_eq!(
            vec![
                "get_external",
                "scan",
                "nested_map",
                "create_flag",
                "get_external",
                "scan",
                "map",
                "set_flag",
                "get_flag",
                "return",
                "create",
                "materialize",
                "convert_to_explicit",
                "return"
            ],
            op_names(&program)
        );
    }

    #[test]
    fn hash_mark_join() {
        let mut ctx = CompileContext::new();
        let plan = mark_join(
            &mut ctx,
            JoinImpl::Hash {
                build: BuildSide::Right,
            },
            CompareOp::Eq,
        );
        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();

        assert_eq!(
            vec![
                "get_external",
                "scan",
                "create",
                "insert",
                "get_external",
                "scan",
                "nested_map",
                "create_flag",
                "lookup",
                "scan_list",
                "gather",
                "map",
                "set_flag",
                "get_flag",
                "return",
                "create",
                "materialize",
                "convert_to_explicit",
                "return"
            ],
            op_names(&program)
        );
    }

    #[test]
    fn hash_mark_join_without_keys() {
        let mut ctx = CompileContext::new();
        let plan = mark_join(
            &mut ctx,
            JoinImpl::Hash {
                build: BuildSide::Right,
            },
            CompareOp::Lt,
        );
        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();
        assert!(!op_names(&program).contains(&"lookup"));
    }
}
