use std::fmt;

use relc_error::{DbError, Result};

use super::{ArgTypes, CompareOp, ScalarExpr};
use crate::registry::column::{ColumnManager, ColumnRef};
use crate::types::datatype::DataType;

/// A function body embedded in a sub-operator.
///
/// Takes a fixed list of typed arguments and produces one value per result
/// expression. Result expressions may only reference arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprRegion {
    pub params: Vec<DataType>,
    pub results: Vec<ScalarExpr>,
}

impl ExprRegion {
    pub fn new(params: Vec<DataType>, results: Vec<ScalarExpr>) -> Self {
        ExprRegion { params, results }
    }

    /// Bind column-referencing expressions into a region.
    ///
    /// Returns the region along with the columns that need to be passed in
    /// as arguments, in argument order.
    pub fn bind_columns(
        exprs: &[ScalarExpr],
        columns: &ColumnManager,
    ) -> Result<(ExprRegion, Vec<ColumnRef>)> {
        let mut inputs: Vec<ColumnRef> = Vec::new();
        for expr in exprs {
            for col in expr.column_refs() {
                if !inputs.contains(&col) {
                    inputs.push(col);
                }
            }
        }

        let params = inputs
            .iter()
            .map(|col| columns.datatype(col.id()))
            .collect::<Result<Vec<_>>>()?;

        let results = exprs
            .iter()
            .map(|expr| expr.columns_to_args(&inputs))
            .collect::<Result<Vec<_>>>()?;

        Ok((ExprRegion { params, results }, inputs))
    }

    /// Null aware equality between two key lists.
    ///
    /// Arguments are the left keys followed by the right keys. Two nulls are
    /// considered equal.
    pub fn key_equality(left: &[DataType], right: &[DataType]) -> Result<ExprRegion> {
        if left.len() != right.len() {
            return Err(DbError::new("Key lists differ in length")
                .with_field("left", left.len())
                .with_field("right", right.len()));
        }

        let n = left.len();
        let mut conjuncts = Vec::with_capacity(n);
        for idx in 0..n {
            let l = ScalarExpr::arg(idx);
            let r = ScalarExpr::arg(n + idx);
            let eq = ScalarExpr::is_true(ScalarExpr::eq(l.clone(), r.clone()));

            if left[idx].nullable || right[idx].nullable {
                conjuncts.push(ScalarExpr::or(vec![
                    ScalarExpr::and(vec![ScalarExpr::is_null(l), ScalarExpr::is_null(r)]),
                    eq,
                ]));
            } else {
                conjuncts.push(eq);
            }
        }

        let result = if conjuncts.is_empty() {
            ScalarExpr::bool(true)
        } else {
            ScalarExpr::and(conjuncts)
        };

        let mut params = left.to_vec();
        params.extend_from_slice(right);

        Ok(ExprRegion {
            params,
            results: vec![result],
        })
    }

    /// Equality where nulls never match, as used for join keys.
    pub fn join_key_equality(left: &[DataType], right: &[DataType]) -> Result<ExprRegion> {
        if left.len() != right.len() {
            return Err(DbError::new("Key lists differ in length")
                .with_field("left", left.len())
                .with_field("right", right.len()));
        }

        let n = left.len();
        let conjuncts: Vec<_> = (0..n)
            .map(|idx| {
                ScalarExpr::compare(CompareOp::Eq, ScalarExpr::arg(idx), ScalarExpr::arg(n + idx))
            })
            .collect();

        let result = if conjuncts.is_empty() {
            ScalarExpr::bool(true)
        } else {
            ScalarExpr::is_true(ScalarExpr::and(conjuncts))
        };

        let mut params = left.to_vec();
        params.extend_from_slice(right);

        Ok(ExprRegion {
            params,
            results: vec![result],
        })
    }

    /// Clone the region body with arguments rebound.
    ///
    /// Each original argument `i` is replaced with `mapping[i]`, which may
    /// only reference arguments in `params`.
    pub fn rebind(&self, params: Vec<DataType>, mapping: &[ScalarExpr]) -> Result<ExprRegion> {
        if mapping.len() != self.params.len() {
            return Err(DbError::new("Argument count mismatch when rebinding region")
                .with_field("expected", self.params.len())
                .with_field("got", mapping.len()));
        }

        let results = self
            .results
            .iter()
            .map(|expr| expr.substitute_args(mapping))
            .collect::<Result<Vec<_>>>()?;

        Ok(ExprRegion { params, results })
    }

    pub fn result_types(&self) -> Result<Vec<DataType>> {
        let env = ArgTypes(&self.params);
        self.results.iter().map(|expr| expr.datatype(&env)).collect()
    }

    /// Check that results only reference in-range arguments and type check.
    pub fn validate(&self) -> Result<()> {
        for expr in &self.results {
            if !expr.column_refs().is_empty() {
                return Err(DbError::new("Region result references a column directly")
                    .with_field("expr", expr));
            }
            if let Some(max) = expr.max_arg() {
                if max >= self.params.len() {
                    return Err(DbError::new("Region argument out of range")
                        .with_field("arg", max)
                        .with_field("num_args", self.params.len()));
                }
            }
        }
        self.result_types()?;
        Ok(())
    }
}

impl fmt::Display for ExprRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{idx}: {param}")?;
        }
        write!(f, ") -> [")?;
        for (idx, result) in self.results.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{result}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datatype::ScalarType;

    #[test]
    fn bind_columns_shared_inputs() {
        let mut columns = ColumnManager::new();
        let a = columns.create_def("t", "a", DataType::int64()).unwrap();
        let b = columns
            .create_def("t", "b", DataType::nullable(ScalarType::Int(64)))
            .unwrap();

        let exprs = [
            ScalarExpr::eq(ScalarExpr::column(a.reference()), ScalarExpr::column(b.reference())),
            ScalarExpr::is_null(ScalarExpr::column(b.reference())),
        ];

        let (region, inputs) = ExprRegion::bind_columns(&exprs, &columns).unwrap();
        assert_eq!(vec![a.reference(), b.reference()], inputs);
        assert_eq!(
            vec![DataType::int64(), DataType::nullable(ScalarType::Int(64))],
            region.params
        );
        region.validate().unwrap();
        assert_eq!(
            vec![DataType::nullable(ScalarType::Bool), DataType::bool()],
            region.result_types().unwrap()
        );
    }

    #[test]
    fn rebind_swaps_halves() {
        let region = ExprRegion::join_key_equality(&[DataType::int64()], &[DataType::int64()])
            .unwrap();
        let rebound = region
            .rebind(
                region.params.clone(),
                &[ScalarExpr::arg(1), ScalarExpr::arg(0)],
            )
            .unwrap();

        assert_eq!(
            ScalarExpr::is_true(ScalarExpr::and(vec![ScalarExpr::eq(
                ScalarExpr::arg(1),
                ScalarExpr::arg(0)
            )])),
            rebound.results[0]
        );
    }

    #[test]
    fn rebind_wrong_arity() {
        let region = ExprRegion::key_equality(&[DataType::int64()], &[DataType::int64()]).unwrap();
        assert!(region.rebind(vec![], &[ScalarExpr::arg(0)]).is_err());
    }

    #[test]
    fn validate_out_of_range() {
        let region = ExprRegion::new(vec![DataType::bool()], vec![ScalarExpr::arg(1)]);
        assert!(region.validate().is_err());
    }
}
