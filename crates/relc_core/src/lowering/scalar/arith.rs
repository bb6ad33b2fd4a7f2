use relc_error::Result;

use super::constant::pow10;
use super::{Lowered, NullHandler, ScalarLowering};
use crate::expr::{ArithOp, ScalarExpr, arith_result_type};
use crate::lowering::raw::{BinaryOp, RawType};
use crate::types::datatype::ScalarType;

impl ScalarLowering<'_> {
    pub(crate) fn lower_arith(
        &mut self,
        op: ArithOp,
        left: &ScalarExpr,
        right: &ScalarExpr,
    ) -> Result<Option<Lowered>> {
        let left = self.lower(left)?;
        let right = self.lower(right)?;
        let Ok(result_type) = arith_result_type(op, &left.datatype.scalar, &right.datatype.scalar)
        else {
            return Ok(None);
        };

        let mut nulls = NullHandler::new();
        let l = nulls.get_value(self.builder, &left)?;
        let r = nulls.get_value(self.builder, &right)?;

        let value = match (left.datatype.scalar, result_type) {
            (ScalarType::Int(_), _) => {
                let raw_op = match op {
                    ArithOp::Add => BinaryOp::Add,
                    ArithOp::Sub => BinaryOp::Sub,
                    ArithOp::Mul => BinaryOp::Mul,
                    ArithOp::Div => BinaryOp::SDiv,
                    ArithOp::Mod => BinaryOp::SRem,
                };
                self.builder.binary(raw_op, l, r)?
            }
            (ScalarType::UInt(_), _) => {
                let raw_op = match op {
                    ArithOp::Add => BinaryOp::Add,
                    ArithOp::Sub => BinaryOp::Sub,
                    ArithOp::Mul => BinaryOp::Mul,
                    ArithOp::Div => BinaryOp::UDiv,
                    ArithOp::Mod => BinaryOp::URem,
                };
                self.builder.binary(raw_op, l, r)?
            }
            (ScalarType::Float(_), _) => {
                let raw_op = match op {
                    ArithOp::Add => BinaryOp::Add,
                    ArithOp::Sub => BinaryOp::Sub,
                    ArithOp::Mul => BinaryOp::Mul,
                    ArithOp::Div => BinaryOp::FDiv,
                    ArithOp::Mod => BinaryOp::FRem,
                };
                self.builder.binary(raw_op, l, r)?
            }
            (ScalarType::Decimal { .. }, ScalarType::Decimal { .. }) => {
                let Some(width) = RawType::for_scalar(&result_type).int_width() else {
                    return Ok(None);
                };
                let l = self.builder.resize_int(l, width)?;
                let r = self.builder.resize_int(r, width)?;
                match op {
                    // Scales are equal, or add up for multiplication.
                    ArithOp::Add => self.builder.binary(BinaryOp::Add, l, r)?,
                    ArithOp::Sub => self.builder.binary(BinaryOp::Sub, l, r)?,
                    ArithOp::Mul => self.builder.binary(BinaryOp::Mul, l, r)?,
                    ArithOp::Mod => self.builder.binary(BinaryOp::SRem, l, r)?,
                    ArithOp::Div => {
                        // Keep the left scale: l * 10^s_right / r
                        let right_scale = right.datatype.scalar.decimal_scale().unwrap_or(0);
                        let factor = self.builder.const_int(pow10(right_scale)?, width);
                        let scaled = self.builder.binary(BinaryOp::Mul, l, factor)?;
                        self.builder.binary(BinaryOp::SDiv, scaled, r)?
                    }
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(nulls.combine_result(self.builder, value, result_type)?))
    }
}
