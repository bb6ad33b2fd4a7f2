use relc_error::Result;

use super::constant::pow10;
use super::{Lowered, ScalarLowering};
use crate::expr::ScalarExpr;
use crate::lowering::raw::{BinaryOp, CastKind, RawScalar, RawType, RawValueId};
use crate::types::datatype::{DataType, ScalarType};

impl ScalarLowering<'_> {
    pub(crate) fn lower_cast(&mut self, expr: &ScalarExpr, to: ScalarType) -> Result<Option<Lowered>> {
        let lowered = self.lower(expr)?;
        let from = lowered.datatype.scalar;
        if from == to {
            return Ok(Some(lowered));
        }

        let (is_null, value) = self.unpack(&lowered)?;
        let Some(value) = self.cast_value(value, from, to)? else {
            return Ok(None);
        };

        Ok(Some(match is_null {
            Some(is_null) => {
                let tuple = self.builder.tuple(vec![is_null, value]);
                Lowered::new(tuple, DataType::nullable(to))
            }
            None => Lowered::new(value, DataType::new(to)),
        }))
    }

    /// Cast a non-null raw value.
    fn cast_value(
        &mut self,
        value: RawValueId,
        from: ScalarType,
        to: ScalarType,
    ) -> Result<Option<RawValueId>> {
        let to_raw = RawType::for_scalar(&to);

        let out = match (from, to) {
            (ScalarType::Int(_) | ScalarType::UInt(_), ScalarType::Float(_)) => {
                let kind = if matches!(from, ScalarType::UInt(_)) {
                    CastKind::UIToFP
                } else {
                    CastKind::SIToFP
                };
                self.builder.cast(kind, value, to_raw)
            }
            (
                ScalarType::Int(_) | ScalarType::UInt(_),
                ScalarType::Decimal { scale, .. },
            ) => {
                let Some(width) = to_raw.int_width() else {
                    return Ok(None);
                };
                let widened = self.extend_int(value, from, width)?;
                let factor = self.builder.const_int(pow10(scale)?, width);
                self.builder.binary(BinaryOp::Mul, widened, factor)?
            }
            (
                ScalarType::Int(_) | ScalarType::UInt(_),
                ScalarType::Int(_) | ScalarType::UInt(_),
            ) => {
                let Some(width) = to_raw.int_width() else {
                    return Ok(None);
                };
                self.extend_int(value, from, width)?
            }
            (ScalarType::Float(_), ScalarType::Int(_)) => {
                self.builder.cast(CastKind::FPToSI, value, to_raw)
            }
            (ScalarType::Float(_), ScalarType::UInt(_)) => {
                self.builder.cast(CastKind::FPToUI, value, to_raw)
            }
            (ScalarType::Float(_), ScalarType::Float(w)) => {
                let kind = if w > float_width(&from) {
                    CastKind::FPExt
                } else {
                    CastKind::FPTrunc
                };
                self.builder.cast(kind, value, to_raw)
            }
            (ScalarType::Float(fw), ScalarType::Decimal { scale, .. }) => {
                let factor = self.float_pow10(scale, fw);
                let scaled = self.builder.binary(BinaryOp::Mul, value, factor)?;
                self.builder.cast(CastKind::FPToSI, scaled, to_raw)
            }
            (ScalarType::Decimal { scale: s1, .. }, ScalarType::Decimal { scale: s2, .. }) => {
                let (Some(from_width), Some(to_width)) = (
                    self.builder.value_type(value).int_width(),
                    to_raw.int_width(),
                ) else {
                    return Ok(None);
                };
                let width = from_width.max(to_width);
                let widened = self.builder.resize_int(value, width)?;
                let rescaled = if s2 > s1 {
                    let factor = self.builder.const_int(pow10(s2 - s1)?, width);
                    self.builder.binary(BinaryOp::Mul, widened, factor)?
                } else if s1 > s2 {
                    let factor = self.builder.const_int(pow10(s1 - s2)?, width);
                    self.builder.binary(BinaryOp::SDiv, widened, factor)?
                } else {
                    widened
                };
                self.builder.resize_int(rescaled, to_width)?
            }
            (ScalarType::Decimal { scale, .. }, ScalarType::Float(fw)) => {
                let as_float = self.builder.cast(CastKind::SIToFP, value, to_raw);
                let factor = self.float_pow10(scale, fw);
                self.builder.binary(BinaryOp::FDiv, as_float, factor)?
            }
            (ScalarType::Decimal { scale, .. }, ScalarType::Int(_) | ScalarType::UInt(_)) => {
                let (Some(from_width), Some(to_width)) = (
                    self.builder.value_type(value).int_width(),
                    to_raw.int_width(),
                ) else {
                    return Ok(None);
                };
                let factor = self.builder.const_int(pow10(scale)?, from_width);
                let truncated = self.builder.binary(BinaryOp::SDiv, value, factor)?;
                self.builder.resize_int(truncated, to_width)?
            }
            _ => return Ok(None),
        };

        Ok(Some(out))
    }

    /// Resize an integer, zero extending unsigned sources.
    fn extend_int(&mut self, value: RawValueId, from: ScalarType, width: u16) -> Result<RawValueId> {
        let from_width = self.builder.value_type(value).int_width().unwrap_or(width);
        if matches!(from, ScalarType::UInt(_)) && from_width < width {
            return Ok(self.builder.cast(CastKind::ZExt, value, RawType::Int(width)));
        }
        self.builder.resize_int(value, width)
    }

    /// Power of ten multiplier for float/decimal conversions.
    ///
    /// The multiplier is always computed in single precision and extended
    /// when the float operand is wider.
    fn float_pow10(&mut self, scale: u8, float_width: u8) -> RawValueId {
        let factor = self
            .builder
            .constant(RawScalar::F32(10f32.powf(scale as f32)), RawType::Float(32));
        if float_width > 32 {
            self.builder
                .cast(CastKind::FPExt, factor, RawType::Float(float_width))
        } else {
            factor
        }
    }
}

fn float_width(scalar: &ScalarType) -> u8 {
    match scalar {
        ScalarType::Float(w) => *w,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::ScalarExpr;
    use crate::expr::region::ExprRegion;
    use crate::lowering::raw::{RawScalar, RawType};
    use crate::lowering::scalar::compile_region;
    use crate::types::datatype::{DataType, ScalarType};

    fn cast(from: &str, to: ScalarType, value: RawScalar) -> RawScalar {
        let region = ExprRegion::new(
            vec![from.parse().unwrap()],
            vec![ScalarExpr::cast(ScalarExpr::arg(0), to)],
        );
        let compiled = compile_region("cast", &region).unwrap();
        compiled.call(&[value]).unwrap().remove(0)
    }

    fn decimal(precision: u8, scale: u8) -> ScalarType {
        ScalarType::Decimal { precision, scale }
    }

    #[test]
    fn int_to_decimal_and_back() {
        for v in [-12345i128, -1, 0, 7, 99999] {
            let dec = cast("int32", decimal(12, 3), RawScalar::Int(v));
            assert_eq!(RawScalar::Int(v * 1000), dec);

            let back = {
                let region = ExprRegion::new(
                    vec![DataType::new(decimal(12, 3))],
                    vec![ScalarExpr::cast(ScalarExpr::arg(0), ScalarType::Int(32))],
                );
                let compiled = compile_region("back", &region).unwrap();
                compiled.call(&[dec]).unwrap().remove(0)
            };
            assert_eq!(RawScalar::Int(v), back);
        }
    }

    #[test]
    fn decimal_rescale() {
        assert_eq!(
            RawScalar::Int(12500),
            cast("decimal(10,2)", decimal(20, 4), RawScalar::Int(125))
        );
        assert_eq!(
            RawScalar::Int(12),
            cast("decimal(10,3)", decimal(10, 2), RawScalar::Int(125))
        );
    }

    #[test]
    fn decimal_to_float() {
        let out = cast("decimal(10,2)", ScalarType::Float(64), RawScalar::Int(150));
        assert_eq!(RawScalar::F64(1.5), out);
    }

    #[test]
    fn float_to_decimal() {
        let out = cast("float64", decimal(10, 2), RawScalar::F64(2.75));
        assert_eq!(RawScalar::Int(275), out);
    }

    #[test]
    fn int_widths() {
        assert_eq!(RawScalar::Int(-1), cast("int8", ScalarType::Int(64), RawScalar::Int(-1)));
        assert_eq!(RawScalar::Int(255), cast("uint8", ScalarType::Int(32), RawScalar::Int(-1)));
        assert_eq!(RawScalar::Int(1), cast("int64", ScalarType::Int(8), RawScalar::Int(257)));
        assert_eq!(RawScalar::F64(-3.0), cast("int32", ScalarType::Float(64), RawScalar::Int(-3)));
        assert_eq!(RawScalar::Int(-3), cast("float32", ScalarType::Int(32), RawScalar::F32(-3.7)));
    }

    #[test]
    fn nullable_cast_keeps_flag() {
        let out = cast("int32?", ScalarType::Int(64), RawScalar::null(&RawType::Int(32)));
        assert!(out.is_null());
        let out = cast("int32?", ScalarType::Int(64), RawScalar::valid(RawScalar::Int(4)));
        assert_eq!(RawScalar::valid(RawScalar::Int(4)), out);
    }

    #[test]
    fn string_cast_unsupported() {
        let region = ExprRegion::new(
            vec![DataType::new(ScalarType::String)],
            vec![ScalarExpr::cast(ScalarExpr::arg(0), ScalarType::Int(32))],
        );
        assert!(compile_region("cast", &region).is_err());
    }
}
