use relc_error::{DbError, Result};

use super::{TranslateState, missing_column, read_mapping, state_members};
use crate::expr::region::ExprRegion;
use crate::expr::{ArithOp, CompareOp, ScalarExpr};
use crate::registry::column::ColumnRef;
use crate::relalg::{Aggregate, AggregateFunction, Node, RelOperator};
use crate::subop::{SubOperator, ValueId};
use crate::types::column::ColumnType;
use crate::types::datatype::DataType;
use crate::types::state::{Member, StateType};

impl TranslateState<'_> {
    /// Group rows into a map keyed on the grouping columns, reducing each
    /// aggregate into a value member of the group's entry.
    ///
    /// Groups are only created for input rows, an empty input produces no
    /// rows even without grouping columns.
    pub fn translate_aggregation(
        &mut self,
        input: Node<RelOperator>,
        group_by: Vec<ColumnRef>,
        aggregates: Vec<Aggregate>,
    ) -> Result<ValueId> {
        let available = input.output_columns()?;
        for col in group_by
            .iter()
            .chain(aggregates.iter().filter_map(|agg| agg.arg.as_ref()))
        {
            if !available.contains(col) {
                return Err(missing_column(self.ctx, *col, "aggregation"));
            }
        }

        let stream = self.translate(input)?;

        let key_members = self.members_for_columns(&group_by)?;
        let mut agg_members = Vec::with_capacity(aggregates.len());
        for agg in &aggregates {
            let datatype = self.aggregate_type(agg)?;
            let actual = self.ctx.columns.datatype(agg.output.id())?;
            if actual != datatype {
                return Err(DbError::new("Aggregate output has unexpected type")
                    .with_field("function", agg.function.as_str())
                    .with_field("expected", datatype)
                    .with_field("got", actual));
            }
            let name = self.ctx.columns.get(agg.output.id())?.name.clone();
            agg_members.push(Member::new(self.ctx.members.unique_member(&name), datatype));
        }

        let ty = StateType::Map {
            keys: state_members(&key_members),
            values: state_members(&agg_members),
        };
        let map = self.append(SubOperator::Create { ty: ty.clone() })?;

        let key_types: Vec<DataType> = key_members.iter().map(|m| m.datatype).collect();
        let initial = ExprRegion::new(
            Vec::new(),
            aggregates
                .iter()
                .zip(&agg_members)
                .map(|(agg, member)| match agg.function {
                    AggregateFunction::Count => ScalarExpr::constant(0i64, DataType::int64()),
                    _ => ScalarExpr::Null(member.datatype.scalar),
                })
                .collect(),
        );

        let scope = self.ctx.columns.unique_scope("agg_ref");
        let entry = self
            .ctx
            .columns
            .create_def(&scope, "entry", ColumnType::entry_ref(ty))?;
        let grouped = self.append(SubOperator::LookupOrInsert {
            input: stream,
            state: map,
            keys: group_by.clone(),
            reference: entry,
            eq: Some(ExprRegion::key_equality(&key_types, &key_types)?),
            initial,
        })?;

        let (columns, region) = self.reduce_region(&aggregates, &agg_members)?;
        self.append_sink(SubOperator::Reduce {
            input: grouped,
            reference: entry.reference(),
            columns,
            members: agg_members.iter().map(|m| m.name.clone()).collect(),
            region,
        })?;

        let mut mapping = read_mapping(&group_by, &key_members);
        mapping.extend(
            aggregates
                .iter()
                .zip(&agg_members)
                .map(|(agg, member)| (member.name.clone(), agg.output)),
        );

        self.append(SubOperator::Scan {
            state: map,
            mapping,
        })
    }

    fn aggregate_type(&self, agg: &Aggregate) -> Result<DataType> {
        match (agg.function, agg.arg) {
            (AggregateFunction::Count, _) => Ok(DataType::int64()),
            (_, Some(arg)) => Ok(self.ctx.columns.datatype(arg.id())?.with_nullable(true)),
            (function, None) => Err(DbError::new("Aggregate requires an argument")
                .with_field("function", function.as_str())),
        }
    }

    /// Region folding one input row into the current aggregate values.
    ///
    /// Arguments are the current values of all aggregates followed by the
    /// distinct argument columns.
    fn reduce_region(
        &self,
        aggregates: &[Aggregate],
        members: &[Member],
    ) -> Result<(Vec<ColumnRef>, ExprRegion)> {
        let mut columns: Vec<ColumnRef> = Vec::new();
        for arg in aggregates.iter().filter_map(|agg| agg.arg) {
            if !columns.contains(&arg) {
                columns.push(arg);
            }
        }

        let mut params: Vec<DataType> = members.iter().map(|m| m.datatype).collect();
        for col in &columns {
            params.push(self.ctx.columns.datatype(col.id())?);
        }

        let mut results = Vec::with_capacity(aggregates.len());
        for (idx, (agg, member)) in aggregates.iter().zip(members).enumerate() {
            let acc = ScalarExpr::arg(idx);
            let input = agg.arg.and_then(|arg| {
                columns
                    .iter()
                    .position(|c| *c == arg)
                    .map(|pos| ScalarExpr::arg(members.len() + pos))
            });

            let one = ScalarExpr::constant(1i64, DataType::int64());
            let result = match (agg.function, input) {
                (AggregateFunction::Count, None) => ScalarExpr::arith(ArithOp::Add, acc, one),
                (AggregateFunction::Count, Some(x)) => ScalarExpr::if_else(
                    ScalarExpr::is_null(x),
                    acc.clone(),
                    ScalarExpr::arith(ArithOp::Add, acc, one),
                ),
                (AggregateFunction::Sum, Some(x)) => {
                    let sum = ScalarExpr::cast(
                        ScalarExpr::arith(ArithOp::Add, acc.clone(), x.clone()),
                        member.datatype.scalar,
                    );
                    ScalarExpr::if_else(
                        ScalarExpr::is_null(x.clone()),
                        acc.clone(),
                        ScalarExpr::if_else(ScalarExpr::is_null(acc), x, sum),
                    )
                }
                (AggregateFunction::Min, Some(x)) => extremum(CompareOp::Lt, acc, x),
                (AggregateFunction::Max, Some(x)) => extremum(CompareOp::Gt, acc, x),
                (function, None) => {
                    return Err(DbError::new("Aggregate requires an argument")
                        .with_field("function", function.as_str()));
                }
            };
            results.push(result);
        }

        Ok((columns, ExprRegion::new(params, results)))
    }
}

/// Keep `x` if the accumulator is null or `x` compares true against it.
fn extremum(op: CompareOp, acc: ScalarExpr, x: ScalarExpr) -> ScalarExpr {
    let replace = ScalarExpr::or(vec![
        ScalarExpr::is_null(acc.clone()),
        ScalarExpr::is_true(ScalarExpr::compare(op, x.clone(), acc.clone())),
    ]);
    ScalarExpr::if_else(
        ScalarExpr::is_null(x.clone()),
        acc.clone(),
        ScalarExpr::if_else(replace, x, acc),
    )
}
