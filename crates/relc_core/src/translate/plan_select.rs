use relc_error::{Result, not_implemented};

use super::TranslateState;
use crate::expr::ScalarExpr;
use crate::expr::region::ExprRegion;
use crate::registry::column::{ColumnDef, ColumnRef};
use crate::relalg::{Node, RelOperator, SetSemantic};
use crate::subop::{SubOperator, ValueId};

impl TranslateState<'_> {
    pub fn translate_selection(
        &mut self,
        input: Node<RelOperator>,
        predicate: ScalarExpr,
    ) -> Result<ValueId> {
        let stream = self.translate(input)?;
        self.apply_predicate(stream, &predicate)
    }

    pub fn translate_map(
        &mut self,
        input: Node<RelOperator>,
        computed: Vec<(ColumnDef, ScalarExpr)>,
    ) -> Result<ValueId> {
        let stream = self.translate(input)?;
        if computed.is_empty() {
            return Ok(stream);
        }

        let (defs, exprs): (Vec<_>, Vec<_>) = computed.into_iter().unzip();
        let (region, inputs) = ExprRegion::bind_columns(&exprs, &self.ctx.columns)?;

        self.append(SubOperator::Map {
            input: stream,
            computed: defs,
            inputs,
            region,
        })
    }

    pub fn translate_renaming(
        &mut self,
        input: Node<RelOperator>,
        renamed: Vec<(ColumnDef, ColumnRef)>,
    ) -> Result<ValueId> {
        let stream = self.translate(input)?;
        self.append(SubOperator::Renaming {
            input: stream,
            renamed,
        })
    }

    pub fn translate_projection(
        &mut self,
        input: Node<RelOperator>,
        semantic: SetSemantic,
        columns: Vec<ColumnRef>,
    ) -> Result<ValueId> {
        if semantic == SetSemantic::Distinct {
            not_implemented!("distinct projection");
        }

        let available = input.output_columns()?;
        if let Some(missing) = columns.iter().find(|c| !available.contains(c)) {
            return Err(super::missing_column(self.ctx, *missing, "projection"));
        }

        // Streams carry extra columns around, consumers only read what they
        // name.
        self.translate(input)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use crate::config::CompileConfig;
    use crate::expr::{CompareOp, ScalarExpr};
    use crate::registry::CompileContext;
    use crate::relalg::{Node, RelOperator};
    use crate::subop::verify::verify_program;
    use crate::types::datatype::DataType;

    #[test]
    fn selection_maps_then_filters() {
        let mut ctx = CompileContext::new();
        let input = scan(&mut ctx, "t", &["a"]);
        let a = input.output_columns().unwrap()[0];
        let plan = Node::new(
            RelOperator::Selection {
                predicate: ScalarExpr::compare(
                    CompareOp::Gt,
                    ScalarExpr::column(a),
                    ScalarExpr::constant(1i64, DataType::int64()),
                ),
            },
            vec![input],
        );
        let plan = materialize(&ctx, plan);

        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();
        assert_eq!(
            vec![
                "get_external",
                "scan",
                "map",
                "filter",
                "create",
                "materialize",
                "convert_to_explicit",
                "return"
            ],
            op_names(&program)
        );
    }

    #[test]
    fn map_and_rename() {
        let mut ctx = CompileContext::new();
        let input = scan(&mut ctx, "t", &["a"]);
        let a = input.output_columns().unwrap()[0];
        let doubled = ctx.columns.create_def("m", "doubled", DataType::int64()).unwrap();
        let renamed = ctx.columns.create_def("r", "b", DataType::int64()).unwrap();

        let plan = Node::new(
            RelOperator::Map {
                computed: vec![(
                    doubled,
                    ScalarExpr::arith(
                        crate::expr::ArithOp::Mul,
                        ScalarExpr::column(a),
                        ScalarExpr::constant(2i64, DataType::int64()),
                    ),
                )],
            },
            vec![input],
        );
        let plan = Node::new(
            RelOperator::Renaming {
                renamed: vec![(renamed, doubled.reference())],
            },
            vec![plan],
        );
        let plan = materialize(&ctx, plan);

        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();
        assert!(op_names(&program).contains(&"renaming"));
    }

    #[test]
    fn projection_of_unknown_column() {
        let mut ctx = CompileContext::new();
        let input = scan(&mut ctx, "t", &["a"]);
        let other = ctx.columns.create_def("x", "b", DataType::int64()).unwrap();
        let plan = Node::new(
            RelOperator::Projection {
                semantic: crate::relalg::SetSemantic::All,
                columns: vec![other.reference()],
            },
            vec![input],
        );

        let err = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap_err();
        assert_eq!("Column not produced by input", err.get_msg());
    }
}
