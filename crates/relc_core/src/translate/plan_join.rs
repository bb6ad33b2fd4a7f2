use relc_error::Result;
use tracing::warn;

use super::{TranslateState, read_mapping, state_members, write_mapping};
use crate::expr::region::ExprRegion;
use crate::expr::{CompareOp, ScalarExpr};
use crate::registry::column::{ColumnDef, ColumnRef};
use crate::relalg::{BuildSide, JoinImpl, Node, RelOperator};
use crate::subop::{SubOperator, ValueId};
use crate::types::column::ColumnType;
use crate::types::datatype::DataType;
use crate::types::state::StateType;

/// Equality conditions between columns of the two join inputs, along with
/// whatever else the predicate checks.
#[derive(Debug, Clone, PartialEq)]
pub struct EquiJoinCondition {
    /// Key columns from the left input.
    pub left: Vec<ColumnRef>,
    /// Key columns from the right input, matching `left` by position.
    pub right: Vec<ColumnRef>,
    /// Remaining conjuncts.
    pub residual: Option<ScalarExpr>,
}

impl EquiJoinCondition {
    /// Split a join predicate into column equalities and a residual.
    ///
    /// Equalities only become keys if both sides have the same scalar type
    /// since lookups compare raw key values.
    pub fn extract(
        state: &TranslateState<'_>,
        predicate: ScalarExpr,
        left_cols: &[ColumnRef],
        right_cols: &[ColumnRef],
    ) -> Result<Self> {
        let mut cond = EquiJoinCondition {
            left: Vec::new(),
            right: Vec::new(),
            residual: None,
        };
        let mut residual = Vec::new();

        for conjunct in predicate.split_conjunction() {
            if let ScalarExpr::Compare {
                op: CompareOp::Eq,
                left,
                right,
            } = &conjunct
            {
                if let (ScalarExpr::Column(a), ScalarExpr::Column(b)) = (left.as_ref(), right.as_ref())
                {
                    let pair = if left_cols.contains(a) && right_cols.contains(b) {
                        Some((*a, *b))
                    } else if left_cols.contains(b) && right_cols.contains(a) {
                        Some((*b, *a))
                    } else {
                        None
                    };

                    if let Some((l, r)) = pair {
                        let lt = state.ctx.columns.datatype(l.id())?;
                        let rt = state.ctx.columns.datatype(r.id())?;
                        if lt.scalar == rt.scalar {
                            cond.left.push(l);
                            cond.right.push(r);
                            continue;
                        }
                    }
                }
            }
            residual.push(conjunct);
        }

        cond.residual = match residual.len() {
            0 => None,
            1 => residual.pop(),
            _ => Some(ScalarExpr::and(residual)),
        };

        Ok(cond)
    }

    pub fn has_keys(&self) -> bool {
        !self.left.is_empty()
    }
}

/// A multimap holding the rows of one join input, keyed on its join keys.
#[derive(Debug)]
pub(crate) struct JoinHashTable {
    pub state: ValueId,
    pub ty: StateType,
    /// Members in the order the build columns were given.
    pub mapping: Vec<(String, ColumnDef)>,
    pub key_types: Vec<DataType>,
}

impl TranslateState<'_> {
    pub fn translate_inner_join(
        &mut self,
        left: Node<RelOperator>,
        right: Node<RelOperator>,
        predicate: ScalarExpr,
        join_impl: JoinImpl,
    ) -> Result<ValueId> {
        let build = match join_impl {
            JoinImpl::NestedLoop => {
                return self.translate_nested_loop_join(left, right, Some(predicate));
            }
            JoinImpl::Hash { build } => build,
        };

        let left_cols = left.output_columns()?;
        let right_cols = right.output_columns()?;
        let cond = EquiJoinCondition::extract(self, predicate.clone(), &left_cols, &right_cols)?;
        if !cond.has_keys() {
            warn!("hash join requested without equality keys, using nested loop join");
            return self.translate_nested_loop_join(left, right, Some(predicate));
        }

        let (build, build_cols, build_keys, probe, probe_keys) = match build {
            BuildSide::Left => (left, left_cols, cond.left, right, cond.right),
            BuildSide::Right => (right, right_cols, cond.right, left, cond.left),
        };

        let table = self.build_join_hash_table(build, &build_cols, &build_keys)?;
        let probe_stream = self.translate(probe)?;

        let matched = self.probe_join_hash_table(probe_stream, &table, &probe_keys)?;
        match &cond.residual {
            Some(residual) => self.apply_predicate(matched, residual),
            None => Ok(matched),
        }
    }

    /// Materialize the left input into a vector and scan it once per right
    /// row.
    pub fn translate_nested_loop_join(
        &mut self,
        left: Node<RelOperator>,
        right: Node<RelOperator>,
        predicate: Option<ScalarExpr>,
    ) -> Result<ValueId> {
        let left_cols = left.output_columns()?;
        let left_stream = self.translate(left)?;

        let members = self.members_for_columns(&left_cols)?;
        let vector = self.append(SubOperator::Create {
            ty: StateType::Vector(state_members(&members)),
        })?;
        self.append_sink(SubOperator::Materialize {
            input: left_stream,
            state: vector,
            mapping: write_mapping(&left_cols, &members),
        })?;

        let right_stream = self.translate(right)?;

        self.nested_map(right_stream, |this, _row| {
            let scan = this.append(SubOperator::Scan {
                state: vector,
                mapping: read_mapping(&left_cols, &members),
            })?;
            match &predicate {
                Some(predicate) => this.apply_predicate(scan, predicate),
                None => Ok(scan),
            }
        })
    }

    /// Insert all rows of `build` into a new multimap keyed on `keys`.
    pub(crate) fn build_join_hash_table(
        &mut self,
        build: Node<RelOperator>,
        build_cols: &[ColumnRef],
        keys: &[ColumnRef],
    ) -> Result<JoinHashTable> {
        let stream = self.translate(build)?;

        let values: Vec<ColumnRef> = build_cols
            .iter()
            .filter(|c| !keys.contains(c))
            .copied()
            .collect();
        let key_members = self.members_for_columns(keys)?;
        let value_members = self.members_for_columns(&values)?;

        let ty = StateType::MultiMap {
            keys: state_members(&key_members),
            values: state_members(&value_members),
        };
        let state = self.append(SubOperator::Create { ty: ty.clone() })?;

        let mut insert_mapping = write_mapping(keys, &key_members);
        insert_mapping.extend(write_mapping(&values, &value_members));
        self.append_sink(SubOperator::Insert {
            input: stream,
            state,
            mapping: insert_mapping,
            eq: None,
        })?;

        let mut mapping = read_mapping(keys, &key_members);
        mapping.extend(read_mapping(&values, &value_members));

        Ok(JoinHashTable {
            state,
            ty,
            mapping,
            key_types: key_members.iter().map(|m| m.datatype).collect(),
        })
    }

    /// Extend each probe row with every matching build row.
    pub(crate) fn probe_join_hash_table(
        &mut self,
        probe: ValueId,
        table: &JoinHashTable,
        keys: &[ColumnRef],
    ) -> Result<ValueId> {
        let probe_types = keys
            .iter()
            .map(|k| self.ctx.columns.datatype(k.id()))
            .collect::<Result<Vec<_>>>()?;

        let scope = self.ctx.columns.unique_scope("join");
        let list = self
            .ctx
            .columns
            .create_def(&scope, "matches", ColumnType::lookup_result(&table.ty))?;
        let entry = self
            .ctx
            .columns
            .create_def(&scope, "entry", ColumnType::entry_ref(table.ty.clone()))?;

        let looked_up = self.append(SubOperator::Lookup {
            input: probe,
            state: table.state,
            keys: keys.to_vec(),
            reference: list,
            eq: Some(ExprRegion::join_key_equality(&table.key_types, &probe_types)?),
        })?;
        let scanned = self.append(SubOperator::ScanList {
            input: looked_up,
            list: list.reference(),
            elem: entry,
        })?;
        self.append(SubOperator::Gather {
            input: scanned,
            reference: entry.reference(),
            mapping: table.mapping.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use super::*;
    use crate::config::CompileConfig;
    use crate::registry::CompileContext;
    use crate::subop::verify::verify_program;

    fn join(
        ctx: &mut CompileContext,
        join_impl: JoinImpl,
        residual: bool,
    ) -> Node<RelOperator> {
        let left = scan(ctx, "l", &["a", "b"]);
        let right = scan(ctx, "r", &["c", "d"]);
        let l = left.output_columns().unwrap();
        let r = right.output_columns().unwrap();

        let mut conjuncts = vec![ScalarExpr::eq(ScalarExpr::column(r[0]), ScalarExpr::column(l[0]))];
        if residual {
            conjuncts.push(ScalarExpr::compare(
                CompareOp::Lt,
                ScalarExpr::column(l[1]),
                ScalarExpr::column(r[1]),
            ));
        }

        let plan = Node::new(
            RelOperator::InnerJoin {
                predicate: ScalarExpr::and(conjuncts),
                join_impl: Some(join_impl),
            },
            vec![left, right],
        );
        materialize(ctx, plan)
    }

    #[test]
    fn extract_keys_either_order() {
        let mut ctx = CompileContext::new();
        let plan = join(&mut ctx, JoinImpl::NestedLoop, true);
        let input = &plan.children[0];
        let RelOperator::InnerJoin { predicate, .. } = &input.node else {
            panic!("expected join");
        };
        let l = input.children[0].output_columns().unwrap();
        let r = input.children[1].output_columns().unwrap();

        let config = CompileConfig::new();
        let state = TranslateState::new(&mut ctx, &config);
        let cond = EquiJoinCondition::extract(&state, predicate.clone(), &l, &r).unwrap();
        assert_eq!(vec![l[0]], cond.left);
        assert_eq!(vec![r[0]], cond.right);
        assert!(cond.residual.is_some());
    }

    #[test]
    fn nested_loop_join() {
        let mut ctx = CompileContext::new();
        let plan = join(&mut ctx, JoinImpl::NestedLoop, false);
        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();

        let names = op_names(&program);
        assert!(names.contains(&"nested_map"));
        assert!(!names.contains(&"lookup"));
    }

    #[test]
    fn hash_join_with_residual() {
        let mut ctx = CompileContext::new();
        let plan = join(
            &mut ctx,
            JoinImpl::Hash {
                build: BuildSide::Right,
            },
            true,
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
                "lookup",
                "scan_list",
                "gather",
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
    fn hash_join_without_keys_uses_nested_loop() {
        let mut ctx = CompileContext::new();
        let left = scan(&mut ctx, "l", &["a"]);
        let right = scan(&mut ctx, "r", &["b"]);
        let a = left.output_columns().unwrap()[0];
        let b = right.output_columns().unwrap()[0];
        let plan = Node::new(
            RelOperator::InnerJoin {
                predicate: ScalarExpr::compare(
                    CompareOp::Lt,
                    ScalarExpr::column(a),
                    ScalarExpr::column(b),
                ),
                join_impl: Some(JoinImpl::Hash {
                    build: BuildSide::Left,
                }),
            },
            vec![left, right],
        );
        let plan = materialize(&ctx, plan);

        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        verify_program(&program, &ctx.columns).unwrap();
        assert!(op_names(&program).contains(&"nested_map"));
    }
}
