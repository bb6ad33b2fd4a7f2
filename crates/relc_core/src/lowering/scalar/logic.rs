use relc_error::Result;

use super::{Lowered, ScalarLowering};
use crate::expr::{ConjunctionOp, ScalarExpr};
use crate::lowering::raw::{BinaryOp, RawValueId};
use crate::types::datatype::{DataType, ScalarType};

impl ScalarLowering<'_> {
    /// Split a lowered value into its null flag (if nullable) and raw value.
    pub(crate) fn unpack(&mut self, lowered: &Lowered) -> Result<(Option<RawValueId>, RawValueId)> {
        if lowered.datatype.nullable {
            let is_null = self.builder.extract(lowered.value, 0)?;
            let value = self.builder.extract(lowered.value, 1)?;
            Ok((Some(is_null), value))
        } else {
            Ok((None, lowered.value))
        }
    }

    /// Three valued AND/OR, folded left to right with selects.
    ///
    /// The running result treats nulls as the neutral element. The null flag
    /// of the result is only set if the result wasn't decided by a
    /// non-null operand.
    pub(crate) fn lower_conjunction(
        &mut self,
        op: ConjunctionOp,
        children: &[ScalarExpr],
    ) -> Result<Option<Lowered>> {
        if children.is_empty() {
            return Ok(None);
        }

        let mut result: Option<RawValueId> = None;
        let mut is_null: Option<RawValueId> = None;

        for child in children {
            let lowered = self.lower(child)?;
            if lowered.datatype.scalar != ScalarType::Bool {
                return Ok(None);
            }
            let (null, value) = self.unpack(&lowered)?;

            let next = match (op, result) {
                (ConjunctionOp::And, None) => match null {
                    Some(null) => {
                        let t = self.builder.const_bool(true);
                        self.builder.select(null, t, value)?
                    }
                    None => value,
                },
                (ConjunctionOp::And, Some(prev)) => {
                    let f = self.builder.const_bool(false);
                    let when_valid = self.builder.select(value, prev, f)?;
                    match null {
                        Some(null) => self.builder.select(null, prev, when_valid)?,
                        None => when_valid,
                    }
                }
                (ConjunctionOp::Or, None) => match null {
                    Some(null) => {
                        let f = self.builder.const_bool(false);
                        self.builder.select(null, f, value)?
                    }
                    None => value,
                },
                (ConjunctionOp::Or, Some(prev)) => {
                    let t = self.builder.const_bool(true);
                    let when_valid = self.builder.select(value, t, prev)?;
                    match null {
                        Some(null) => self.builder.select(null, prev, when_valid)?,
                        None => when_valid,
                    }
                }
            };
            result = Some(next);

            if let Some(null) = null {
                is_null = Some(match is_null {
                    Some(prev) => self.builder.binary(BinaryOp::Or, prev, null)?,
                    None => null,
                });
            }
        }

        let Some(result) = result else {
            return Ok(None);
        };

        match is_null {
            None => Ok(Some(Lowered::new(result, DataType::bool()))),
            Some(is_null) => {
                // A decided result is never null.
                let is_null = match op {
                    ConjunctionOp::And => {
                        let f = self.builder.const_bool(false);
                        self.builder.select(result, is_null, f)?
                    }
                    ConjunctionOp::Or => {
                        let f = self.builder.const_bool(false);
                        self.builder.select(result, f, is_null)?
                    }
                };
                let tuple = self.builder.tuple(vec![is_null, result]);
                Ok(Some(Lowered::new(
                    tuple,
                    DataType::nullable(ScalarType::Bool),
                )))
            }
        }
    }

    /// Flip the value, keeping the null flag as is.
    pub(crate) fn lower_not(&mut self, child: &ScalarExpr) -> Result<Option<Lowered>> {
        let lowered = self.lower(child)?;
        if lowered.datatype.scalar != ScalarType::Bool {
            return Ok(None);
        }

        let t = self.builder.const_bool(true);
        if lowered.datatype.nullable {
            let value = self.builder.extract(lowered.value, 1)?;
            let flipped = self.builder.binary(BinaryOp::Xor, value, t)?;
            let out = self.builder.insert(lowered.value, 1, flipped)?;
            Ok(Some(Lowered::new(out, lowered.datatype)))
        } else {
            let flipped = self.builder.binary(BinaryOp::Xor, lowered.value, t)?;
            Ok(Some(Lowered::new(flipped, lowered.datatype)))
        }
    }

    pub(crate) fn lower_is_null(&mut self, child: &ScalarExpr) -> Result<Lowered> {
        let lowered = self.lower(child)?;
        let value = if lowered.datatype.nullable {
            self.builder.extract(lowered.value, 0)?
        } else {
            self.builder.const_bool(false)
        };
        Ok(Lowered::new(value, DataType::bool()))
    }

    /// Collapse a boolean to non-nullable, null is false.
    pub(crate) fn collapse_bool(&mut self, lowered: &Lowered) -> Result<RawValueId> {
        match self.unpack(lowered)? {
            (Some(null), value) => {
                let f = self.builder.const_bool(false);
                self.builder.select(null, f, value)
            }
            (None, value) => Ok(value),
        }
    }

    pub(crate) fn lower_is_true(&mut self, child: &ScalarExpr) -> Result<Lowered> {
        let lowered = self.lower(child)?;
        let value = self.collapse_bool(&lowered)?;
        Ok(Lowered::new(value, DataType::bool()))
    }

    pub(crate) fn lower_combine_null(
        &mut self,
        value: &ScalarExpr,
        is_null: &ScalarExpr,
    ) -> Result<Option<Lowered>> {
        let value = self.lower(value)?;
        let flag = self.lower(is_null)?;
        if flag.datatype.scalar != ScalarType::Bool {
            return Ok(None);
        }
        let flag = self.collapse_bool(&flag)?;

        let (existing, raw) = self.unpack(&value)?;
        let is_null = match existing {
            Some(existing) => self.builder.binary(BinaryOp::Or, existing, flag)?,
            None => flag,
        };
        let tuple = self.builder.tuple(vec![is_null, raw]);
        Ok(Some(Lowered::new(tuple, value.datatype.with_nullable(true))))
    }

    pub(crate) fn lower_if_else(
        &mut self,
        condition: &ScalarExpr,
        then: &ScalarExpr,
        otherwise: &ScalarExpr,
    ) -> Result<Option<Lowered>> {
        let cond = self.lower(condition)?;
        if cond.datatype.scalar != ScalarType::Bool {
            return Ok(None);
        }
        let cond = self.collapse_bool(&cond)?;

        let mut then = self.lower(then)?;
        let mut otherwise = self.lower(otherwise)?;
        if then.datatype.scalar != otherwise.datatype.scalar {
            return Ok(None);
        }
        if then.datatype.nullable != otherwise.datatype.nullable {
            then = self.make_nullable(then);
            otherwise = self.make_nullable(otherwise);
        }

        let value = self.builder.select(cond, then.value, otherwise.value)?;
        Ok(Some(Lowered::new(value, then.datatype)))
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::ScalarExpr;
    use crate::expr::region::ExprRegion;
    use crate::lowering::raw::{RawScalar, RawType};
    use crate::lowering::scalar::compile_region;
    use crate::types::datatype::{DataType, ScalarType};

    fn nb(v: Option<bool>) -> RawScalar {
        match v {
            Some(b) => RawScalar::valid(RawScalar::bool(b)),
            None => RawScalar::null(&RawType::I1),
        }
    }

    fn decode(v: &RawScalar) -> Option<bool> {
        if v.is_null() {
            None
        } else {
            match v {
                RawScalar::Tuple(fields) => fields[1].try_as_bool(),
                other => other.try_as_bool(),
            }
        }
    }

    fn eval(expr: ScalarExpr, args: &[Option<bool>]) -> Option<bool> {
        let params = vec![DataType::nullable(ScalarType::Bool); args.len()];
        let region = ExprRegion::new(params, vec![expr]);
        let compiled = compile_region("logic", &region).unwrap();
        let args: Vec<_> = args.iter().map(|v| nb(*v)).collect();
        decode(&compiled.call(&args).unwrap()[0])
    }

    fn and2() -> ScalarExpr {
        ScalarExpr::and(vec![ScalarExpr::arg(0), ScalarExpr::arg(1)])
    }

    fn or2() -> ScalarExpr {
        ScalarExpr::or(vec![ScalarExpr::arg(0), ScalarExpr::arg(1)])
    }

    #[test]
    fn and_three_valued() {
        assert_eq!(Some(false), eval(and2(), &[None, Some(false)]));
        assert_eq!(Some(false), eval(and2(), &[Some(false), None]));
        assert_eq!(None, eval(and2(), &[None, Some(true)]));
        assert_eq!(None, eval(and2(), &[Some(true), None]));
        assert_eq!(None, eval(and2(), &[None, None]));
        assert_eq!(Some(true), eval(and2(), &[Some(true), Some(true)]));
        assert_eq!(Some(false), eval(and2(), &[Some(true), Some(false)]));
    }

    #[test]
    fn or_three_valued() {
        assert_eq!(Some(true), eval(or2(), &[None, Some(true)]));
        assert_eq!(Some(true), eval(or2(), &[Some(true), None]));
        assert_eq!(None, eval(or2(), &[None, Some(false)]));
        assert_eq!(None, eval(or2(), &[Some(false), None]));
        assert_eq!(None, eval(or2(), &[None, None]));
        assert_eq!(Some(false), eval(or2(), &[Some(false), Some(false)]));
    }

    #[test]
    fn three_operand_and() {
        let expr = ScalarExpr::and(vec![
            ScalarExpr::arg(0),
            ScalarExpr::arg(1),
            ScalarExpr::arg(2),
        ]);
        assert_eq!(Some(false), eval(expr.clone(), &[None, Some(true), Some(false)]));
        assert_eq!(None, eval(expr.clone(), &[Some(true), None, Some(true)]));
        assert_eq!(Some(true), eval(expr, &[Some(true), Some(true), Some(true)]));
    }

    #[test]
    fn not_keeps_null() {
        let not = || ScalarExpr::not(ScalarExpr::arg(0));
        assert_eq!(None, eval(not(), &[None]));
        assert_eq!(Some(false), eval(not(), &[Some(true)]));
        assert_eq!(Some(true), eval(not(), &[Some(false)]));
    }

    #[test]
    fn non_nullable_and_is_plain() {
        let region = ExprRegion::new(
            vec![DataType::bool(), DataType::bool()],
            vec![ScalarExpr::and(vec![ScalarExpr::arg(0), ScalarExpr::arg(1)])],
        );
        let compiled = compile_region("and", &region).unwrap();
        assert_eq!(vec![DataType::bool()], compiled.result_types);
        let out = compiled.call(&[RawScalar::TRUE, RawScalar::FALSE]).unwrap();
        assert_eq!(RawScalar::FALSE, out[0]);
    }

    #[test]
    fn is_true_collapses_null() {
        let expr = ScalarExpr::is_true(ScalarExpr::arg(0));
        let region = ExprRegion::new(vec![DataType::nullable(ScalarType::Bool)], vec![expr]);
        let compiled = compile_region("is_true", &region).unwrap();
        assert_eq!(RawScalar::FALSE, compiled.call(&[nb(None)]).unwrap()[0]);
        assert_eq!(RawScalar::TRUE, compiled.call(&[nb(Some(true))]).unwrap()[0]);
    }

    #[test]
    fn if_else_mixed_nullability() {
        let expr = ScalarExpr::if_else(
            ScalarExpr::arg(0),
            ScalarExpr::arg(1),
            ScalarExpr::Null(ScalarType::Int(64)),
        );
        let region = ExprRegion::new(vec![DataType::bool(), DataType::int64()], vec![expr]);
        let compiled = compile_region("if", &region).unwrap();
        assert_eq!(vec![DataType::nullable(ScalarType::Int(64))], compiled.result_types);

        let out = compiled.call(&[RawScalar::TRUE, RawScalar::Int(7)]).unwrap();
        assert_eq!(RawScalar::valid(RawScalar::Int(7)), out[0]);
        let out = compiled.call(&[RawScalar::FALSE, RawScalar::Int(7)]).unwrap();
        assert!(out[0].is_null());
    }
}
