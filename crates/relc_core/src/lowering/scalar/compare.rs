use relc_error::Result;

use super::{Lowered, NullHandler, ScalarLowering};
use crate::expr::{CompareOp, ScalarExpr};
use crate::lowering::raw::{FloatPredicate, IntPredicate, RawType};
use crate::types::datatype::ScalarType;

const fn signed_predicate(op: CompareOp) -> IntPredicate {
    match op {
        CompareOp::Eq => IntPredicate::Eq,
        CompareOp::NotEq => IntPredicate::Ne,
        CompareOp::Lt => IntPredicate::Slt,
        CompareOp::LtEq => IntPredicate::Sle,
        CompareOp::Gt => IntPredicate::Sgt,
        CompareOp::GtEq => IntPredicate::Sge,
    }
}

const fn unsigned_predicate(op: CompareOp) -> IntPredicate {
    match op {
        CompareOp::Eq => IntPredicate::Eq,
        CompareOp::NotEq => IntPredicate::Ne,
        CompareOp::Lt => IntPredicate::Ult,
        CompareOp::LtEq => IntPredicate::Ule,
        CompareOp::Gt => IntPredicate::Ugt,
        CompareOp::GtEq => IntPredicate::Uge,
    }
}

const fn float_predicate(op: CompareOp) -> FloatPredicate {
    match op {
        CompareOp::Eq => FloatPredicate::Oeq,
        CompareOp::NotEq => FloatPredicate::One,
        CompareOp::Lt => FloatPredicate::Olt,
        CompareOp::LtEq => FloatPredicate::Ole,
        CompareOp::Gt => FloatPredicate::Ogt,
        CompareOp::GtEq => FloatPredicate::Oge,
    }
}

impl ScalarLowering<'_> {
    pub(crate) fn lower_compare(
        &mut self,
        op: CompareOp,
        left: &ScalarExpr,
        right: &ScalarExpr,
    ) -> Result<Option<Lowered>> {
        let left = self.lower(left)?;
        let right = self.lower(right)?;

        let left_scalar = left.datatype.scalar;
        let right_scalar = right.datatype.scalar;

        let mut nulls = NullHandler::new();
        let mut l = nulls.get_value(self.builder, &left)?;
        let mut r = nulls.get_value(self.builder, &right)?;

        let result = match (left_scalar, right_scalar) {
            (ScalarType::Decimal { scale: s1, .. }, ScalarType::Decimal { scale: s2, .. })
                if s1 == s2 =>
            {
                // Decimals of differing precision may have different widths.
                let lw = self.builder.value_type(l).int_width();
                let rw = self.builder.value_type(r).int_width();
                if let (Some(lw), Some(rw)) = (lw, rw) {
                    let width = lw.max(rw);
                    l = self.builder.resize_int(l, width)?;
                    r = self.builder.resize_int(r, width)?;
                }
                self.builder.icmp(signed_predicate(op), l, r)?
            }
            (l_ty, r_ty) if l_ty != r_ty => return Ok(None),
            (ScalarType::UInt(_) | ScalarType::Index, _) => {
                self.builder.icmp(unsigned_predicate(op), l, r)?
            }
            (scalar, _) if scalar.is_integer_like() => {
                self.builder.icmp(signed_predicate(op), l, r)?
            }
            (scalar, _) if scalar.is_float() => self.builder.fcmp(float_predicate(op), l, r)?,
            // Strings and links have no raw ordering.
            _ => return Ok(None),
        };

        debug_assert_eq!(&RawType::I1, self.builder.value_type(result));
        Ok(Some(nulls.combine_result(self.builder, result, ScalarType::Bool)?))
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::region::ExprRegion;
    use crate::expr::{CompareOp, ScalarExpr};
    use crate::lowering::raw::RawScalar;
    use crate::lowering::scalar::compile_region;
    use crate::types::datatype::{DataType, ScalarType};

    fn compare(op: CompareOp, ty: &str, l: RawScalar, r: RawScalar) -> RawScalar {
        let dt: DataType = ty.parse().unwrap();
        let region = ExprRegion::new(
            vec![dt, dt],
            vec![ScalarExpr::compare(op, ScalarExpr::arg(0), ScalarExpr::arg(1))],
        );
        let compiled = compile_region("cmp", &region).unwrap();
        compiled.call(&[l, r]).unwrap().remove(0)
    }

    #[test]
    fn signed_int_compare() {
        let out = compare(CompareOp::Lt, "int32", RawScalar::Int(-5), RawScalar::Int(3));
        assert_eq!(RawScalar::TRUE, out);
        let out = compare(CompareOp::GtEq, "int32", RawScalar::Int(-5), RawScalar::Int(3));
        assert_eq!(RawScalar::FALSE, out);
    }

    #[test]
    fn unsigned_compare() {
        // 200 as uint8 is stored sign extended as -56.
        let out = compare(CompareOp::Gt, "uint8", RawScalar::Int(-56), RawScalar::Int(3));
        assert_eq!(RawScalar::TRUE, out);
    }

    #[test]
    fn date_and_decimal_compare() {
        let out = compare(CompareOp::Lt, "date", RawScalar::Int(-1), RawScalar::Int(0));
        assert_eq!(RawScalar::TRUE, out);
        let out = compare(
            CompareOp::Eq,
            "decimal(30,2)",
            RawScalar::Int(1i128 << 80),
            RawScalar::Int(1i128 << 80),
        );
        assert_eq!(RawScalar::TRUE, out);
    }

    #[test]
    fn decimal_mixed_widths() {
        let region = ExprRegion::new(
            vec![
                "decimal(10,2)".parse().unwrap(),
                "decimal(30,2)".parse().unwrap(),
            ],
            vec![ScalarExpr::compare(
                CompareOp::Lt,
                ScalarExpr::arg(0),
                ScalarExpr::arg(1),
            )],
        );
        let compiled = compile_region("cmp", &region).unwrap();
        let out = compiled
            .call(&[RawScalar::Int(-100), RawScalar::Int(1i128 << 70)])
            .unwrap();
        assert_eq!(RawScalar::TRUE, out[0]);
    }

    #[test]
    fn float_compare_ordered() {
        let out = compare(CompareOp::Eq, "float64", RawScalar::F64(f64::NAN), RawScalar::F64(f64::NAN));
        assert_eq!(RawScalar::FALSE, out);
        let out = compare(CompareOp::NotEq, "float64", RawScalar::F64(f64::NAN), RawScalar::F64(1.0));
        assert_eq!(RawScalar::FALSE, out);
        let out = compare(CompareOp::LtEq, "float32", RawScalar::F32(1.0), RawScalar::F32(1.5));
        assert_eq!(RawScalar::TRUE, out);
    }

    #[test]
    fn nullable_compare_propagates_null() {
        let out = compare(
            CompareOp::Eq,
            "int64?",
            RawScalar::null(&crate::lowering::raw::RawType::I64),
            RawScalar::valid(RawScalar::Int(1)),
        );
        assert!(out.is_null());
    }

    #[test]
    fn string_compare_unsupported() {
        let region = ExprRegion::new(
            vec![DataType::new(ScalarType::String); 2],
            vec![ScalarExpr::eq(ScalarExpr::arg(0), ScalarExpr::arg(1))],
        );
        let err = compile_region("cmp", &region).unwrap_err();
        assert!(err.get_msg().contains("No lowering"));
    }
}
