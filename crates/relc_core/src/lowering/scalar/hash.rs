use relc_error::{DbError, Result};

use super::{Lowered, ScalarLowering};
use crate::expr::ScalarExpr;
use crate::lowering::raw::builder::RawBuilder;
use crate::lowering::raw::{BinaryOp, CastKind, RawType, RawValueId};
use crate::types::datatype::DataType;

/// Multiplier used when mixing words into the running hash.
pub const HASH_MAGIC: u64 = 0xbf58476d1ce4e5b9;

/// Bytes consumed per iteration of the word loop.
const WORD_SIZE: u64 = 8;

impl ScalarLowering<'_> {
    pub(crate) fn lower_hash(&mut self, children: &[ScalarExpr]) -> Result<Lowered> {
        let mut fields = Vec::with_capacity(children.len());
        for child in children {
            fields.push(self.lower(child)?);
        }

        let initial = self.builder.const_index(0);
        let hash = hash_fields(self.builder, &fields, initial)?;
        Ok(Lowered::new(hash, DataType::index()))
    }
}

/// Fold each field into the running hash, using the field's own type to
/// decide nullability.
pub fn hash_fields(
    builder: &mut RawBuilder,
    fields: &[Lowered],
    initial: RawValueId,
) -> Result<RawValueId> {
    let mut total = initial;
    for field in fields {
        total = hash_value(builder, field, total)?;
    }
    Ok(total)
}

/// Hash a single value. Nulls leave the running hash unchanged.
pub fn hash_value(builder: &mut RawBuilder, value: &Lowered, total: RawValueId) -> Result<RawValueId> {
    if value.datatype.nullable {
        let is_null = builder.extract(value.value, 0)?;
        let raw = builder.extract(value.value, 1)?;
        let hashed = hash_raw(builder, raw, total)?;
        return builder.select(is_null, total, hashed);
    }
    hash_raw(builder, value.value, total)
}

fn hash_raw(builder: &mut RawBuilder, value: RawValueId, total: RawValueId) -> Result<RawValueId> {
    let ty = builder.value_type(value).clone();
    match ty {
        RawType::Int(128) => {
            let shift = builder.const_int(64, 128);
            let high = builder.binary(BinaryOp::LShr, value, shift)?;
            let high = builder.cast(CastKind::Trunc, high, RawType::I64);
            let low = builder.cast(CastKind::Trunc, value, RawType::I64);
            let total = hash_int(builder, high, total)?;
            hash_int(builder, low, total)
        }
        RawType::Int(_) | RawType::Index => hash_int(builder, value, total),
        RawType::Bytes => hash_bytes(builder, value, total),
        RawType::Float(_) => Err(DbError::new("Hashing floating point values is not supported")),
        other => Err(DbError::new("Cannot hash value of raw type").with_field("type", other)),
    }
}

/// `(index(v) * MAGIC) ^ total`
fn hash_int(builder: &mut RawBuilder, value: RawValueId, total: RawValueId) -> Result<RawValueId> {
    let as_index = match builder.value_type(value) {
        RawType::Index => value,
        _ => builder.cast(CastKind::IndexCast, value, RawType::Index),
    };
    let magic = builder.const_index(HASH_MAGIC);
    let mixed = builder.binary(BinaryOp::Mul, as_index, magic)?;
    builder.binary(BinaryOp::Xor, mixed, total)
}

/// Hash 8 byte words, then the remaining tail bytes one at a time.
fn hash_bytes(builder: &mut RawBuilder, bytes: RawValueId, total: RawValueId) -> Result<RawValueId> {
    let len = builder.bytes_len(bytes);
    let word_size = builder.const_index(WORD_SIZE);
    let words = builder.binary(BinaryOp::UDiv, len, word_size)?;
    let word_end = builder.binary(BinaryOp::Mul, words, word_size)?;
    let zero = builder.const_index(0);
    let one = builder.const_index(1);

    let total = builder.for_loop(zero, word_end, word_size, total, |b, offset, acc| {
        let word = b.load_word(bytes, offset);
        hash_int(b, word, acc)
    })?;

    builder.for_loop(word_end, len, one, total, |b, offset, acc| {
        let byte = b.load_byte(bytes, offset);
        hash_int(b, byte, acc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::region::ExprRegion;
    use crate::lowering::raw::{RawOp, RawScalar};
    use crate::lowering::scalar::compile_region;
    use crate::types::datatype::ScalarType;

    fn mix(v: u64, total: u64) -> u64 {
        v.wrapping_mul(HASH_MAGIC) ^ total
    }

    fn hash_args(types: &[&str], args: &[RawScalar]) -> u64 {
        let params: Vec<DataType> = types.iter().map(|t| t.parse().unwrap()).collect();
        let exprs = (0..params.len()).map(ScalarExpr::arg).collect();
        let region = ExprRegion::new(params, vec![ScalarExpr::Hash(exprs)]);
        let compiled = compile_region("hash", &region).unwrap();
        compiled.call(args).unwrap()[0].try_as_index().unwrap()
    }

    #[test]
    fn hash_single_int() {
        assert_eq!(mix(5, 0), hash_args(&["int64"], &[RawScalar::Int(5)]));
        assert_eq!(
            mix(-1i64 as u64, 0),
            hash_args(&["int32"], &[RawScalar::Int(-1)])
        );
    }

    #[test]
    fn swapped_fields_collide() {
        // Fields are folded with xor, lookups recheck full keys.
        let a = hash_args(&["int64", "int64"], &[RawScalar::Int(1), RawScalar::Int(2)]);
        let b = hash_args(&["int64", "int64"], &[RawScalar::Int(2), RawScalar::Int(1)]);
        assert_eq!(mix(2, mix(1, 0)), a);
        assert_eq!(a, b);
    }

    #[test]
    fn null_leaves_hash_unchanged() {
        let with_null = hash_args(
            &["int64", "int64?"],
            &[RawScalar::Int(9), RawScalar::null(&RawType::I64)],
        );
        let without = hash_args(&["int64"], &[RawScalar::Int(9)]);
        assert_eq!(without, with_null);

        let valid = hash_args(
            &["int64", "int64?"],
            &[RawScalar::Int(9), RawScalar::valid(RawScalar::Int(3))],
        );
        assert_eq!(mix(3, without), valid);
    }

    #[test]
    fn hash_wide_decimal_splits_words() {
        let v: i128 = (7i128 << 64) | 11;
        let out = hash_args(&["decimal(30,0)"], &[RawScalar::Int(v)]);
        assert_eq!(mix(11, mix(7, 0)), out);
    }

    #[test]
    fn hash_bytes_words_and_tail() {
        let data = b"abcdefghij".to_vec();
        let mut expected = 0;
        expected = mix(u64::from_le_bytes(data[0..8].try_into().unwrap()), expected);
        expected = mix(data[8] as u64, expected);
        expected = mix(data[9] as u64, expected);

        assert_eq!(expected, hash_args(&["string"], &[RawScalar::Bytes(data)]));
        assert_eq!(0, hash_args(&["string"], &[RawScalar::Bytes(Vec::new())]));
    }

    #[test]
    fn hash_string_emits_two_loops() {
        let region = ExprRegion::new(
            vec![DataType::new(ScalarType::String)],
            vec![ScalarExpr::Hash(vec![ScalarExpr::arg(0)])],
        );
        let compiled = compile_region("hash", &region).unwrap();
        assert_eq!(2, compiled.function.count_insts(|op| matches!(op, RawOp::For { .. })));
    }

    #[test]
    fn hash_float_rejected() {
        let region = ExprRegion::new(
            vec![DataType::new(ScalarType::Float(64))],
            vec![ScalarExpr::Hash(vec![ScalarExpr::arg(0)])],
        );
        let err = compile_region("hash", &region).unwrap_err();
        assert!(err.get_msg().contains("floating point"));
    }
}
