//! Mutable boolean cells.
//!
//! A flag is a stack slot allocated once at function entry. Creating a flag
//! inside a loop resets it on every iteration without allocating again.

use relc_error::{DbError, Result};

use crate::lowering::raw::builder::RawBuilder;
use crate::lowering::raw::{RawType, RawValueId};

/// Allocate a flag and initialize it to false at the current position.
pub fn create_flag(builder: &mut RawBuilder) -> RawValueId {
    let slot = builder.alloca_hoisted();
    let init = builder.const_bool(false);
    builder.store(slot, init);
    slot
}

pub fn set_flag(builder: &mut RawBuilder, flag: RawValueId, value: RawValueId) -> Result<()> {
    check_flag(builder, flag)?;
    if builder.value_type(value) != &RawType::I1 {
        return Err(DbError::new("Flag value must be a boolean")
            .with_field("type", builder.value_type(value)));
    }
    builder.store(flag, value);
    Ok(())
}

pub fn get_flag(builder: &mut RawBuilder, flag: RawValueId) -> Result<RawValueId> {
    check_flag(builder, flag)?;
    Ok(builder.load(flag, RawType::I1))
}

fn check_flag(builder: &RawBuilder, flag: RawValueId) -> Result<()> {
    if builder.value_type(flag) != &RawType::Ptr {
        return Err(DbError::new("Not a flag").with_field("type", builder.value_type(flag)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::raw::interpret::RawInterpreter;
    use crate::lowering::raw::{BinaryOp, RawOp, RawScalar};

    #[test]
    fn flag_inside_loop_resets_each_iteration() {
        // Count iterations where the flag was already set on entry, which
        // should be none since each iteration re-creates the flag.
        let mut b = RawBuilder::new("flags", &[]);
        let zero = b.const_index(0);
        let three = b.const_index(3);
        let one = b.const_index(1);

        let out = b
            .for_loop(zero, three, one, zero, |b, _iv, acc| {
                let flag = create_flag(b);
                let before = get_flag(b, flag)?;
                let t = b.const_bool(true);
                set_flag(b, flag, t)?;

                let as_index = b.cast(
                    crate::lowering::raw::CastKind::ZExt,
                    before,
                    RawType::Int(64),
                );
                let as_index =
                    b.cast(crate::lowering::raw::CastKind::IndexCast, as_index, RawType::Index);
                b.binary(BinaryOp::Add, acc, as_index)
            })
            .unwrap();

        let set_after = {
            let flag = create_flag(&mut b);
            let t = b.const_bool(true);
            set_flag(&mut b, flag, t).unwrap();
            get_flag(&mut b, flag).unwrap()
        };

        let func = b.finish(vec![out, set_after]).unwrap();
        assert_eq!(2, func.count_insts(|op| matches!(op, RawOp::Alloca)));
        assert!(matches!(func.body.insts[0].op, RawOp::Alloca));
        assert!(matches!(func.body.insts[1].op, RawOp::Alloca));

        let results = RawInterpreter::call(&func, &[]).unwrap();
        assert_eq!(RawScalar::Index(0), results[0]);
        assert_eq!(RawScalar::TRUE, results[1]);
    }

    #[test]
    fn set_flag_requires_bool() {
        let mut b = RawBuilder::new("flags", &[]);
        let flag = create_flag(&mut b);
        let v = b.const_index(1);
        assert!(set_flag(&mut b, flag, v).is_err());
        assert!(get_flag(&mut b, v).is_err());
    }
}
