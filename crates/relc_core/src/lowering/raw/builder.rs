use relc_error::{DbError, Result};

use super::{
    BinaryOp,
    CastKind,
    FloatPredicate,
    IntPredicate,
    RawBlock,
    RawFunction,
    RawGlobal,
    RawInst,
    RawOp,
    RawScalar,
    RawType,
    RawValueId,
};

/// Incrementally builds a raw function.
///
/// Instructions are appended to the innermost open block. Stack slots are
/// always placed at the start of the entry block regardless of which block
/// is currently open.
#[derive(Debug)]
pub struct RawBuilder {
    name: String,
    value_types: Vec<RawType>,
    globals: Vec<RawGlobal>,
    /// Open blocks, the entry block is always first.
    blocks: Vec<RawBlock>,
    /// Number of hoisted instructions at the start of the entry block.
    hoisted: usize,
}

impl RawBuilder {
    pub fn new(name: impl Into<String>, params: &[RawType]) -> Self {
        let mut builder = RawBuilder {
            name: name.into(),
            value_types: Vec::new(),
            globals: Vec::new(),
            blocks: Vec::new(),
            hoisted: 0,
        };

        let args = params.iter().map(|ty| builder.new_value(ty.clone())).collect();
        builder.blocks.push(RawBlock {
            args,
            insts: Vec::new(),
            yields: Vec::new(),
        });

        builder
    }

    pub fn param(&self, idx: usize) -> Result<RawValueId> {
        self.blocks[0]
            .args
            .get(idx)
            .copied()
            .ok_or_else(|| DbError::new("Function parameter out of range").with_field("idx", idx))
    }

    pub fn value_type(&self, value: RawValueId) -> &RawType {
        &self.value_types[value.0 as usize]
    }

    fn new_value(&mut self, ty: RawType) -> RawValueId {
        let id = RawValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        id
    }

    fn current_block(&mut self) -> &mut RawBlock {
        // Entry block pushed on construction and never popped.
        let idx = self.blocks.len() - 1;
        &mut self.blocks[idx]
    }

    fn emit(&mut self, op: RawOp, ty: RawType) -> RawValueId {
        let result = self.new_value(ty);
        self.current_block().insts.push(RawInst {
            result: Some(result),
            op,
        });
        result
    }

    fn emit_void(&mut self, op: RawOp) {
        self.current_block().insts.push(RawInst { result: None, op });
    }

    pub fn constant(&mut self, value: RawScalar, ty: RawType) -> RawValueId {
        self.emit(RawOp::Const(value), ty)
    }

    pub fn const_bool(&mut self, value: bool) -> RawValueId {
        self.constant(RawScalar::bool(value), RawType::I1)
    }

    pub fn const_int(&mut self, value: i128, width: u16) -> RawValueId {
        self.constant(
            RawScalar::Int(super::normalize_int(value, width)),
            RawType::Int(width),
        )
    }

    pub fn const_index(&mut self, value: u64) -> RawValueId {
        self.constant(RawScalar::Index(value), RawType::Index)
    }

    pub fn undef(&mut self, ty: RawType) -> RawValueId {
        self.emit(RawOp::Undef, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: RawValueId, rhs: RawValueId) -> Result<RawValueId> {
        let ty = self.value_type(lhs).clone();
        if &ty != self.value_type(rhs) {
            return Err(DbError::new("Binary operand types differ")
                .with_field("op", format!("{op:?}"))
                .with_field("lhs", &ty)
                .with_field("rhs", self.value_type(rhs)));
        }

        let float_op = matches!(op, BinaryOp::FDiv | BinaryOp::FRem);
        let valid = match &ty {
            RawType::Float(_) => matches!(
                op,
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::FDiv | BinaryOp::FRem
            ),
            RawType::Int(_) | RawType::Index => !float_op,
            _ => false,
        };
        if !valid {
            return Err(DbError::new("Invalid binary operation for type")
                .with_field("op", format!("{op:?}"))
                .with_field("type", &ty));
        }

        Ok(self.emit(RawOp::Binary { op, lhs, rhs }, ty))
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: RawValueId, rhs: RawValueId) -> Result<RawValueId> {
        let ty = self.value_type(lhs);
        if !matches!(ty, RawType::Int(_) | RawType::Index) || ty != self.value_type(rhs) {
            return Err(DbError::new("Invalid operands for integer comparison")
                .with_field("lhs", self.value_type(lhs))
                .with_field("rhs", self.value_type(rhs)));
        }
        Ok(self.emit(RawOp::ICmp { pred, lhs, rhs }, RawType::I1))
    }

    pub fn fcmp(
        &mut self,
        pred: FloatPredicate,
        lhs: RawValueId,
        rhs: RawValueId,
    ) -> Result<RawValueId> {
        let ty = self.value_type(lhs);
        if !matches!(ty, RawType::Float(_)) || ty != self.value_type(rhs) {
            return Err(DbError::new("Invalid operands for float comparison")
                .with_field("lhs", self.value_type(lhs))
                .with_field("rhs", self.value_type(rhs)));
        }
        Ok(self.emit(RawOp::FCmp { pred, lhs, rhs }, RawType::I1))
    }

    pub fn select(
        &mut self,
        cond: RawValueId,
        if_true: RawValueId,
        if_false: RawValueId,
    ) -> Result<RawValueId> {
        if self.value_type(cond) != &RawType::I1 {
            return Err(DbError::new("Select condition must be i1")
                .with_field("type", self.value_type(cond)));
        }
        let ty = self.value_type(if_true).clone();
        if &ty != self.value_type(if_false) {
            return Err(DbError::new("Select arms have different types")
                .with_field("true", &ty)
                .with_field("false", self.value_type(if_false)));
        }
        Ok(self.emit(
            RawOp::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        ))
    }

    pub fn cast(&mut self, kind: CastKind, value: RawValueId, to: RawType) -> RawValueId {
        self.emit(RawOp::Cast { kind, value }, to)
    }

    /// Sign extend or truncate an integer to the given width.
    pub fn resize_int(&mut self, value: RawValueId, width: u16) -> Result<RawValueId> {
        let from = self
            .value_type(value)
            .int_width()
            .ok_or_else(|| DbError::new("Expected integer value to resize"))?;
        Ok(match from.cmp(&width) {
            std::cmp::Ordering::Equal => value,
            std::cmp::Ordering::Less => self.cast(CastKind::SExt, value, RawType::Int(width)),
            std::cmp::Ordering::Greater => self.cast(CastKind::Trunc, value, RawType::Int(width)),
        })
    }

    pub fn tuple(&mut self, values: Vec<RawValueId>) -> RawValueId {
        let types = values.iter().map(|v| self.value_type(*v).clone()).collect();
        self.emit(RawOp::MakeTuple(values), RawType::Tuple(types))
    }

    pub fn extract(&mut self, tuple: RawValueId, index: usize) -> Result<RawValueId> {
        let ty = match self.value_type(tuple) {
            RawType::Tuple(types) => types.get(index).cloned(),
            _ => None,
        }
        .ok_or_else(|| {
            DbError::new("Invalid tuple extract")
                .with_field("type", self.value_type(tuple))
                .with_field("index", index)
        })?;
        Ok(self.emit(RawOp::Extract { tuple, index }, ty))
    }

    pub fn insert(&mut self, tuple: RawValueId, index: usize, value: RawValueId) -> Result<RawValueId> {
        let ty = self.value_type(tuple).clone();
        match &ty {
            RawType::Tuple(types) if types.get(index) == Some(self.value_type(value)) => (),
            _ => {
                return Err(DbError::new("Invalid tuple insert")
                    .with_field("type", &ty)
                    .with_field("index", index));
            }
        }
        Ok(self.emit(
            RawOp::Insert {
                tuple,
                index,
                value,
            },
            ty,
        ))
    }

    pub fn bytes_len(&mut self, bytes: RawValueId) -> RawValueId {
        self.emit(RawOp::BytesLen(bytes), RawType::Index)
    }

    pub fn load_word(&mut self, bytes: RawValueId, offset: RawValueId) -> RawValueId {
        self.emit(RawOp::LoadWord { bytes, offset }, RawType::Index)
    }

    pub fn load_byte(&mut self, bytes: RawValueId, offset: RawValueId) -> RawValueId {
        self.emit(RawOp::LoadByte { bytes, offset }, RawType::Index)
    }

    /// Emit a counted loop from `lower` to `upper` carrying `init`.
    ///
    /// `body` receives the induction variable and the carried value and
    /// returns the next carried value.
    pub fn for_loop<F>(
        &mut self,
        lower: RawValueId,
        upper: RawValueId,
        step: RawValueId,
        init: RawValueId,
        body: F,
    ) -> Result<RawValueId>
    where
        F: FnOnce(&mut Self, RawValueId, RawValueId) -> Result<RawValueId>,
    {
        let carried_ty = self.value_type(init).clone();
        let iv = self.new_value(RawType::Index);
        let carried = self.new_value(carried_ty.clone());
        self.blocks.push(RawBlock {
            args: vec![iv, carried],
            insts: Vec::new(),
            yields: Vec::new(),
        });

        let next = body(self, iv, carried);
        // Always pop to keep the block stack consistent.
        let mut block = match self.blocks.pop() {
            Some(block) => block,
            None => return Err(DbError::new("Missing loop body block")),
        };
        let next = next?;

        if self.value_type(next) != &carried_ty {
            return Err(DbError::new("Loop carried value changed type")
                .with_field("init", &carried_ty)
                .with_field("next", self.value_type(next)));
        }
        block.yields = vec![next];

        Ok(self.emit(
            RawOp::For {
                lower,
                upper,
                step,
                init,
                body: block,
            },
            carried_ty,
        ))
    }

    /// Allocate a stack slot at function entry.
    pub fn alloca_hoisted(&mut self) -> RawValueId {
        let result = self.new_value(RawType::Ptr);
        let at = self.hoisted;
        self.blocks[0].insts.insert(
            at,
            RawInst {
                result: Some(result),
                op: RawOp::Alloca,
            },
        );
        self.hoisted += 1;
        result
    }

    pub fn store(&mut self, ptr: RawValueId, value: RawValueId) {
        self.emit_void(RawOp::Store { ptr, value });
    }

    pub fn load(&mut self, ptr: RawValueId, ty: RawType) -> RawValueId {
        self.emit(RawOp::Load { ptr }, ty)
    }

    /// Reference a global constant byte string.
    pub fn global_bytes(&mut self, data: Vec<u8>) -> RawValueId {
        let idx = match self.globals.iter().position(|g| g.data == data) {
            Some(idx) => idx,
            None => {
                let name = format!("db_constant_string{}", self.globals.len());
                self.globals.push(RawGlobal { name, data });
                self.globals.len() - 1
            }
        };
        self.emit(RawOp::GlobalBytes(idx), RawType::Bytes)
    }

    pub fn finish(mut self, results: Vec<RawValueId>) -> Result<RawFunction> {
        if self.blocks.len() != 1 {
            return Err(DbError::new("Unterminated block when finishing function")
                .with_field("open_blocks", self.blocks.len()));
        }
        let mut body = self.blocks.remove(0);
        body.yields = results;

        Ok(RawFunction {
            name: self.name,
            body,
            value_types: self.value_types,
            globals: self.globals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoisted_alloca_inside_loop() {
        let mut b = RawBuilder::new("f", &[]);
        let zero = b.const_index(0);
        let ten = b.const_index(10);
        let one = b.const_index(1);
        let init = b.const_bool(false);

        let out = b
            .for_loop(zero, ten, one, init, |b, _iv, carried| {
                let slot = b.alloca_hoisted();
                b.store(slot, carried);
                Ok(b.load(slot, RawType::I1))
            })
            .unwrap();
        let func = b.finish(vec![out]).unwrap();

        assert!(matches!(func.body.insts[0].op, RawOp::Alloca));
        assert_eq!(1, func.count_insts(|op| matches!(op, RawOp::Alloca)));
    }

    #[test]
    fn binary_type_mismatch() {
        let mut b = RawBuilder::new("f", &[RawType::I64, RawType::Int(32)]);
        let a = b.param(0).unwrap();
        let c = b.param(1).unwrap();
        assert!(b.binary(BinaryOp::Add, a, c).is_err());
        assert!(b.binary(BinaryOp::FDiv, a, a).is_err());
    }

    #[test]
    fn globals_dedup() {
        let mut b = RawBuilder::new("f", &[]);
        let v1 = b.global_bytes(b"abc".to_vec());
        let v2 = b.global_bytes(b"abc".to_vec());
        let func = b.finish(vec![v1, v2]).unwrap();
        assert_eq!(1, func.globals.len());
        assert_eq!("db_constant_string0", func.globals[0].name);
    }
}
