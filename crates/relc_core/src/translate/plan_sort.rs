use relc_error::Result;

use super::{TranslateState, missing_column, read_mapping, state_members, write_mapping};
use crate::expr::region::ExprRegion;
use crate::expr::{CompareOp, ScalarExpr};
use crate::relalg::{Node, RelOperator, SortKey};
use crate::subop::{SubOperator, ValueId};
use crate::types::datatype::DataType;
use crate::types::state::StateType;

impl TranslateState<'_> {
    pub fn translate_sort(
        &mut self,
        input: Node<RelOperator>,
        keys: Vec<SortKey>,
    ) -> Result<ValueId> {
        let columns = input.output_columns()?;
        let stream = self.translate(input)?;

        let members = self.members_for_columns(&columns)?;
        let vector = self.append(SubOperator::Create {
            ty: StateType::Vector(state_members(&members)),
        })?;
        self.append_sink(SubOperator::Materialize {
            input: stream,
            state: vector,
            mapping: write_mapping(&columns, &members),
        })?;

        let mut key_members = Vec::with_capacity(keys.len());
        let mut key_types = Vec::with_capacity(keys.len());
        for key in &keys {
            let idx = columns
                .iter()
                .position(|c| *c == key.column)
                .ok_or_else(|| missing_column(self.ctx, key.column, "sort"))?;
            key_members.push(members[idx].name.clone());
            key_types.push(members[idx].datatype);
        }

        let desc: Vec<bool> = keys.iter().map(|k| k.desc).collect();
        let comparator = sort_comparator(&key_types, &desc);
        let view = self.append(SubOperator::CreateSortedView {
            state: vector,
            members: key_members,
            comparator,
        })?;

        self.append(SubOperator::Scan {
            state: view,
            mapping: read_mapping(&columns, &members),
        })
    }
}

/// Strict less-than between two rows of sort keys.
///
/// Arguments are the keys of the first row followed by the keys of the
/// second. Nulls order before all other values, descending keys reverse the
/// whole order for that key.
pub fn sort_comparator(key_types: &[DataType], desc: &[bool]) -> ExprRegion {
    let n = key_types.len();
    let mut params = key_types.to_vec();
    params.extend_from_slice(key_types);

    // Built from the last key back so earlier keys take precedence.
    let mut acc = ScalarExpr::bool(false);
    for idx in (0..n).rev() {
        let (a, b) = if desc[idx] {
            (ScalarExpr::arg(n + idx), ScalarExpr::arg(idx))
        } else {
            (ScalarExpr::arg(idx), ScalarExpr::arg(n + idx))
        };

        let lt = ScalarExpr::or(vec![
            ScalarExpr::and(vec![
                ScalarExpr::is_null(a.clone()),
                ScalarExpr::not(ScalarExpr::is_null(b.clone())),
            ]),
            ScalarExpr::is_true(ScalarExpr::compare(CompareOp::Lt, a.clone(), b.clone())),
        ]);
        let eq = ScalarExpr::or(vec![
            ScalarExpr::and(vec![
                ScalarExpr::is_null(a.clone()),
                ScalarExpr::is_null(b.clone()),
            ]),
            ScalarExpr::is_true(ScalarExpr::eq(a, b)),
        ]);

        acc = ScalarExpr::if_else(
            lt,
            ScalarExpr::bool(true),
            ScalarExpr::if_else(eq, acc, ScalarExpr::bool(false)),
        );
    }

    ExprRegion::new(params, vec![acc])
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use super::*;
    use crate::config::CompileConfig;
    use crate::expr::value::ConstValue;
    use crate::lowering::raw::RawScalar;
    use crate::lowering::scalar::compile_region;
    use crate::lowering::scalar::constant::encode_value;
    use crate::registry::CompileContext;
    use crate::subop::verify::verify_program;
    use crate::types::datatype::ScalarType;

    #[test]
    fn sort_through_sorted_view() {
        let mut ctx = CompileContext::new();
        let input = scan(&mut ctx, "t", &["a", "b"]);
        let b = input.output_columns().unwrap()[1];
        let plan = Node::new(
            RelOperator::Sort {
                keys: vec![SortKey {
                    column: b,
                    desc: true,
                }],
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
                "create",
                "materialize",
                "create_sorted_view",
                "scan",
                "create",
                "materialize",
                "convert_to_explicit",
                "return"
            ],
            op_names(&program)
        );
    }

    #[test]
    fn comparator_orders_nulls_first() {
        let types = [DataType::nullable(ScalarType::Int(64))];
        let compiled = compile_region("cmp", &sort_comparator(&types, &[false])).unwrap();
        let null = encode_value(None, &types[0]).unwrap();
        let one = encode_value(Some(&ConstValue::Int(1)), &types[0]).unwrap();
        let two = encode_value(Some(&ConstValue::Int(2)), &types[0]).unwrap();

        let lt = |a: &RawScalar, b: &RawScalar| {
            compiled
                .call_predicate(&[a.clone(), b.clone()])
                .unwrap()
        };
        assert!(lt(&null, &one));
        assert!(!lt(&one, &null));
        assert!(!lt(&null, &null));
        assert!(!lt(&one, &one));
        assert!(lt(&one, &two));

        let desc = compile_region("cmp", &sort_comparator(&types, &[true])).unwrap();
        assert!(desc.call_predicate(&[two.clone(), one.clone()]).unwrap());
        assert!(desc.call_predicate(&[one, null]).unwrap());
    }
}
