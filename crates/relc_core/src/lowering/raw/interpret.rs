use relc_error::{DbError, Result};

use super::{
    BinaryOp,
    CastKind,
    FloatPredicate,
    IntPredicate,
    RawBlock,
    RawFunction,
    RawOp,
    RawScalar,
    RawType,
    RawValueId,
    normalize_int,
    to_unsigned,
};

/// Reference interpreter for raw functions.
#[derive(Debug)]
pub struct RawInterpreter<'a> {
    func: &'a RawFunction,
    values: Vec<Option<RawScalar>>,
    /// Cells backing stack slots.
    memory: Vec<RawScalar>,
}

impl<'a> RawInterpreter<'a> {
    /// Call a function with the given arguments.
    pub fn call(func: &'a RawFunction, args: &[RawScalar]) -> Result<Vec<RawScalar>> {
        if args.len() != func.params().len() {
            return Err(DbError::new("Wrong number of arguments to raw function")
                .with_field("function", &func.name)
                .with_field("expected", func.params().len())
                .with_field("got", args.len()));
        }

        let mut interp = RawInterpreter {
            func,
            values: vec![None; func.value_types.len()],
            memory: Vec::new(),
        };

        for (param, arg) in func.params().iter().zip(args) {
            interp.set(*param, arg.clone());
        }

        interp.exec_block(&func.body)?;

        func.results().iter().map(|v| interp.get(*v).cloned()).collect()
    }

    fn set(&mut self, value: RawValueId, scalar: RawScalar) {
        self.values[value.0 as usize] = Some(scalar);
    }

    fn get(&self, value: RawValueId) -> Result<&RawScalar> {
        self.values[value.0 as usize]
            .as_ref()
            .ok_or_else(|| DbError::new(format!("Use of undefined raw value {value}")))
    }

    fn get_int(&self, value: RawValueId) -> Result<i128> {
        self.get(value)?
            .try_as_int()
            .ok_or_else(|| DbError::new(format!("Expected integer for {value}")))
    }

    fn get_index(&self, value: RawValueId) -> Result<u64> {
        self.get(value)?
            .try_as_index()
            .ok_or_else(|| DbError::new(format!("Expected index for {value}")))
    }

    fn get_float(&self, value: RawValueId) -> Result<f64> {
        match self.get(value)? {
            RawScalar::F32(v) => Ok(*v as f64),
            RawScalar::F64(v) => Ok(*v),
            _ => Err(DbError::new(format!("Expected float for {value}"))),
        }
    }

    fn get_bytes(&self, value: RawValueId) -> Result<&[u8]> {
        match self.get(value)? {
            RawScalar::Bytes(b) => Ok(b),
            _ => Err(DbError::new(format!("Expected bytes for {value}"))),
        }
    }

    fn get_slot(&self, value: RawValueId) -> Result<usize> {
        match self.get(value)? {
            RawScalar::Ptr(Some(idx)) => Ok(*idx),
            _ => Err(DbError::new(format!("Expected valid pointer for {value}"))),
        }
    }

    fn exec_block(&mut self, block: &RawBlock) -> Result<()> {
        for inst in &block.insts {
            let out = self.exec_op(&inst.op, inst.result)?;
            if let (Some(result), Some(out)) = (inst.result, out) {
                self.set(result, out);
            }
        }
        Ok(())
    }

    fn exec_op(&mut self, op: &RawOp, result: Option<RawValueId>) -> Result<Option<RawScalar>> {
        let result_type = result.map(|r| self.func.value_type(r).clone());

        let out = match op {
            RawOp::Const(v) => v.clone(),
            RawOp::Undef => RawScalar::zero(&result_type.clone().unwrap_or(RawType::I1)),
            RawOp::Binary { op, lhs, rhs } => self.exec_binary(*op, *lhs, *rhs)?,
            RawOp::ICmp { pred, lhs, rhs } => self.exec_icmp(*pred, *lhs, *rhs)?,
            RawOp::FCmp { pred, lhs, rhs } => {
                let l = self.get_float(*lhs)?;
                let r = self.get_float(*rhs)?;
                let v = if l.is_nan() || r.is_nan() {
                    false
                } else {
                    match pred {
                        FloatPredicate::Oeq => l == r,
                        FloatPredicate::One => l != r,
                        FloatPredicate::Olt => l < r,
                        FloatPredicate::Ole => l <= r,
                        FloatPredicate::Ogt => l > r,
                        FloatPredicate::Oge => l >= r,
                    }
                };
                RawScalar::bool(v)
            }
            RawOp::Select {
                cond,
                if_true,
                if_false,
            } => {
                if self.get_int(*cond)? != 0 {
                    self.get(*if_true)?.clone()
                } else {
                    self.get(*if_false)?.clone()
                }
            }
            RawOp::Cast { kind, value } => {
                let to = result_type
                    .as_ref()
                    .ok_or_else(|| DbError::new("Cast without result"))?;
                self.exec_cast(*kind, *value, to)?
            }
            RawOp::MakeTuple(values) => RawScalar::Tuple(
                values
                    .iter()
                    .map(|v| self.get(*v).cloned())
                    .collect::<Result<Vec<_>>>()?,
            ),
            RawOp::Extract { tuple, index } => match self.get(*tuple)? {
                RawScalar::Tuple(fields) => fields
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| DbError::new("Tuple index out of range"))?,
                _ => return Err(DbError::new("Extract from non-tuple value")),
            },
            RawOp::Insert {
                tuple,
                index,
                value,
            } => {
                let mut out = self.get(*tuple)?.clone();
                let value = self.get(*value)?.clone();
                match &mut out {
                    RawScalar::Tuple(fields) if *index < fields.len() => fields[*index] = value,
                    _ => return Err(DbError::new("Invalid tuple insert")),
                }
                out
            }
            RawOp::BytesLen(bytes) => RawScalar::Index(self.get_bytes(*bytes)?.len() as u64),
            RawOp::LoadWord { bytes, offset } => {
                let offset = self.get_index(*offset)? as usize;
                let bytes = self.get_bytes(*bytes)?;
                let word: [u8; 8] = bytes
                    .get(offset..offset + 8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| DbError::new("Word load out of bounds"))?;
                RawScalar::Index(u64::from_le_bytes(word))
            }
            RawOp::LoadByte { bytes, offset } => {
                let offset = self.get_index(*offset)? as usize;
                let bytes = self.get_bytes(*bytes)?;
                let b = bytes
                    .get(offset)
                    .ok_or_else(|| DbError::new("Byte load out of bounds"))?;
                RawScalar::Index(*b as u64)
            }
            RawOp::For {
                lower,
                upper,
                step,
                init,
                body,
            } => {
                let lower = self.get_index(*lower)?;
                let upper = self.get_index(*upper)?;
                let step = self.get_index(*step)?;
                if step == 0 {
                    return Err(DbError::new("Loop step cannot be zero"));
                }

                let (iv_arg, carried_arg) = match body.args.as_slice() {
                    [iv, carried] => (*iv, *carried),
                    _ => return Err(DbError::new("Malformed loop body arguments")),
                };
                let next_val = match body.yields.as_slice() {
                    [next] => *next,
                    _ => return Err(DbError::new("Malformed loop body yields")),
                };

                let mut carried = self.get(*init)?.clone();
                let mut iv = lower;
                while iv < upper {
                    self.set(iv_arg, RawScalar::Index(iv));
                    self.set(carried_arg, carried);
                    self.exec_block(body)?;
                    carried = self.get(next_val)?.clone();
                    iv += step;
                }
                carried
            }
            RawOp::Alloca => {
                self.memory.push(RawScalar::FALSE);
                RawScalar::Ptr(Some(self.memory.len() - 1))
            }
            RawOp::Store { ptr, value } => {
                let slot = self.get_slot(*ptr)?;
                let value = self.get(*value)?.clone();
                self.memory[slot] = value;
                return Ok(None);
            }
            RawOp::Load { ptr } => {
                let slot = self.get_slot(*ptr)?;
                self.memory[slot].clone()
            }
            RawOp::GlobalBytes(idx) => {
                let global = self
                    .func
                    .globals
                    .get(*idx)
                    .ok_or_else(|| DbError::new("Unknown global"))?;
                RawScalar::Bytes(global.data.clone())
            }
        };

        Ok(Some(out))
    }

    fn exec_binary(&self, op: BinaryOp, lhs: RawValueId, rhs: RawValueId) -> Result<RawScalar> {
        let ty = self.func.value_type(lhs);
        match ty {
            RawType::Int(width) => {
                let width = *width;
                let l = self.get_int(lhs)?;
                let r = self.get_int(rhs)?;
                let ul = to_unsigned(l, width);
                let ur = to_unsigned(r, width);

                let v = match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::SDiv => {
                        if r == 0 {
                            return Err(DbError::new("Division by zero"));
                        }
                        l.wrapping_div(r)
                    }
                    BinaryOp::SRem => {
                        if r == 0 {
                            return Err(DbError::new("Division by zero"));
                        }
                        l.wrapping_rem(r)
                    }
                    BinaryOp::UDiv => {
                        if ur == 0 {
                            return Err(DbError::new("Division by zero"));
                        }
                        (ul / ur) as i128
                    }
                    BinaryOp::URem => {
                        if ur == 0 {
                            return Err(DbError::new("Division by zero"));
                        }
                        (ul % ur) as i128
                    }
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::LShr => {
                        let shift = ur as u32;
                        if shift >= 128 { 0 } else { (ul >> shift) as i128 }
                    }
                    BinaryOp::FDiv | BinaryOp::FRem => {
                        return Err(DbError::new("Float operation on integer"));
                    }
                };
                Ok(RawScalar::Int(normalize_int(v, width)))
            }
            RawType::Index => {
                let l = self.get_index(lhs)?;
                let r = self.get_index(rhs)?;
                let v = match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::SDiv | BinaryOp::UDiv => l
                        .checked_div(r)
                        .ok_or_else(|| DbError::new("Division by zero"))?,
                    BinaryOp::SRem | BinaryOp::URem => l
                        .checked_rem(r)
                        .ok_or_else(|| DbError::new("Division by zero"))?,
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::LShr => l.checked_shr(r as u32).unwrap_or(0),
                    BinaryOp::FDiv | BinaryOp::FRem => {
                        return Err(DbError::new("Float operation on index"));
                    }
                };
                Ok(RawScalar::Index(v))
            }
            RawType::Float(width) => {
                let l = self.get_float(lhs)?;
                let r = self.get_float(rhs)?;
                let v = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::FDiv => l / r,
                    BinaryOp::FRem => l % r,
                    other => {
                        return Err(DbError::new(format!("Integer operation on float: {other:?}")));
                    }
                };
                Ok(float_of_width(*width, v))
            }
            other => Err(DbError::new(format!("Binary operation on {other}"))),
        }
    }

    fn exec_icmp(&self, pred: IntPredicate, lhs: RawValueId, rhs: RawValueId) -> Result<RawScalar> {
        let (sl, sr, ul, ur) = match self.func.value_type(lhs) {
            RawType::Int(width) => {
                let l = self.get_int(lhs)?;
                let r = self.get_int(rhs)?;
                (l, r, to_unsigned(l, *width), to_unsigned(r, *width))
            }
            RawType::Index => {
                let l = self.get_index(lhs)?;
                let r = self.get_index(rhs)?;
                (l as i64 as i128, r as i64 as i128, l as u128, r as u128)
            }
            other => return Err(DbError::new(format!("Integer comparison on {other}"))),
        };

        let v = match pred {
            IntPredicate::Eq => sl == sr,
            IntPredicate::Ne => sl != sr,
            IntPredicate::Slt => sl < sr,
            IntPredicate::Sle => sl <= sr,
            IntPredicate::Sgt => sl > sr,
            IntPredicate::Sge => sl >= sr,
            IntPredicate::Ult => ul < ur,
            IntPredicate::Ule => ul <= ur,
            IntPredicate::Ugt => ul > ur,
            IntPredicate::Uge => ul >= ur,
        };
        Ok(RawScalar::bool(v))
    }

    fn exec_cast(&self, kind: CastKind, value: RawValueId, to: &RawType) -> Result<RawScalar> {
        let from = self.func.value_type(value);
        let bad_cast = || {
            DbError::new("Invalid raw cast")
                .with_field("kind", format!("{kind:?}"))
                .with_field("from", from)
                .with_field("to", to)
        };

        Ok(match (kind, from, to) {
            (CastKind::Trunc, RawType::Int(_), RawType::Int(w)) => {
                RawScalar::Int(normalize_int(self.get_int(value)?, *w))
            }
            (CastKind::SExt, RawType::Int(1), RawType::Int(w)) => {
                let v = if self.get_int(value)? != 0 { -1 } else { 0 };
                RawScalar::Int(normalize_int(v, *w))
            }
            (CastKind::SExt, RawType::Int(_), RawType::Int(w)) => {
                RawScalar::Int(normalize_int(self.get_int(value)?, *w))
            }
            (CastKind::ZExt, RawType::Int(from_w), RawType::Int(w)) => {
                let v = to_unsigned(self.get_int(value)?, *from_w) as i128;
                RawScalar::Int(normalize_int(v, *w))
            }
            (CastKind::SIToFP, RawType::Int(_), RawType::Float(w)) => {
                float_of_width(*w, self.get_int(value)? as f64)
            }
            (CastKind::UIToFP, RawType::Int(from_w), RawType::Float(w)) => {
                float_of_width(*w, to_unsigned(self.get_int(value)?, *from_w) as f64)
            }
            (CastKind::FPToSI, RawType::Float(_), RawType::Int(w)) => {
                RawScalar::Int(normalize_int(self.get_float(value)? as i128, *w))
            }
            (CastKind::FPToUI, RawType::Float(_), RawType::Int(w)) => {
                RawScalar::Int(normalize_int(self.get_float(value)? as u128 as i128, *w))
            }
            (CastKind::FPExt | CastKind::FPTrunc, RawType::Float(_), RawType::Float(w)) => {
                float_of_width(*w, self.get_float(value)?)
            }
            (CastKind::IndexCast, RawType::Int(_), RawType::Index) => {
                RawScalar::Index(self.get_int(value)? as u64)
            }
            (CastKind::IndexCast, RawType::Index, RawType::Int(w)) => {
                RawScalar::Int(normalize_int(self.get_index(value)? as i64 as i128, *w))
            }
            (CastKind::IndexCast, RawType::Index, RawType::Index) => {
                RawScalar::Index(self.get_index(value)?)
            }
            _ => return Err(bad_cast()),
        })
    }
}

fn float_of_width(width: u8, v: f64) -> RawScalar {
    if width == 32 {
        RawScalar::F32(v as f32)
    } else {
        RawScalar::F64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::raw::builder::RawBuilder;

    #[test]
    fn wrapping_narrow_add() {
        let mut b = RawBuilder::new("add", &[RawType::Int(8), RawType::Int(8)]);
        let x = b.param(0).unwrap();
        let y = b.param(1).unwrap();
        let out = b.binary(BinaryOp::Add, x, y).unwrap();
        let func = b.finish(vec![out]).unwrap();

        let res = RawInterpreter::call(&func, &[RawScalar::Int(100), RawScalar::Int(100)]).unwrap();
        assert_eq!(vec![RawScalar::Int(-56)], res);
    }

    #[test]
    fn loop_sums_bytes() {
        let mut b = RawBuilder::new("sum", &[RawType::Bytes]);
        let bytes = b.param(0).unwrap();
        let len = b.bytes_len(bytes);
        let zero = b.const_index(0);
        let one = b.const_index(1);
        let out = b
            .for_loop(zero, len, one, zero, |b, iv, acc| {
                let byte = b.load_byte(bytes, iv);
                b.binary(BinaryOp::Add, acc, byte)
            })
            .unwrap();
        let func = b.finish(vec![out]).unwrap();

        let res = RawInterpreter::call(&func, &[RawScalar::Bytes(vec![1, 2, 3])]).unwrap();
        assert_eq!(vec![RawScalar::Index(6)], res);
    }

    #[test]
    fn signed_vs_unsigned_compare() {
        let mut b = RawBuilder::new("cmp", &[RawType::Int(8), RawType::Int(8)]);
        let x = b.param(0).unwrap();
        let y = b.param(1).unwrap();
        let slt = b.icmp(IntPredicate::Slt, x, y).unwrap();
        let ult = b.icmp(IntPredicate::Ult, x, y).unwrap();
        let func = b.finish(vec![slt, ult]).unwrap();

        let res = RawInterpreter::call(&func, &[RawScalar::Int(-1), RawScalar::Int(1)]).unwrap();
        assert_eq!(vec![RawScalar::TRUE, RawScalar::FALSE], res);
    }

    #[test]
    fn division_by_zero_errors() {
        let mut b = RawBuilder::new("div", &[RawType::I64, RawType::I64]);
        let x = b.param(0).unwrap();
        let y = b.param(1).unwrap();
        let out = b.binary(BinaryOp::SDiv, x, y).unwrap();
        let func = b.finish(vec![out]).unwrap();

        assert!(RawInterpreter::call(&func, &[RawScalar::Int(1), RawScalar::Int(0)]).is_err());
    }

    #[test]
    fn wrong_arg_count() {
        let b = RawBuilder::new("f", &[RawType::I64]);
        let func = b.finish(vec![]).unwrap();
        assert!(RawInterpreter::call(&func, &[]).is_err());
    }
}
