//! Raw, non-nullable scalar code.
//!
//! Values are SSA, blocks are structured. A function body is a single block
//! whose arguments are the function parameters and whose yielded values are
//! the function results. Loops carry a single value.

pub mod builder;
pub mod interpret;

use std::fmt;

use crate::types::datatype::{DataType, DateUnit, IntervalUnit, ScalarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawValueId(pub u32);

impl fmt::Display for RawValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawType {
    /// Integer with the given bit width. Width 1 is a boolean.
    Int(u16),
    /// Float with the given bit width.
    Float(u8),
    /// Index sized unsigned integer.
    Index,
    /// Byte buffer (string payloads).
    Bytes,
    /// Pointer to a cell or row.
    Ptr,
    Tuple(Vec<RawType>),
}

impl RawType {
    pub const I1: RawType = RawType::Int(1);
    pub const I64: RawType = RawType::Int(64);

    /// Raw representation of a logical type.
    pub fn for_datatype(datatype: &DataType) -> RawType {
        let base = Self::for_scalar(&datatype.scalar);
        if datatype.nullable {
            RawType::Tuple(vec![RawType::I1, base])
        } else {
            base
        }
    }

    pub fn for_scalar(scalar: &ScalarType) -> RawType {
        match scalar {
            ScalarType::Bool => RawType::I1,
            ScalarType::Int(w) | ScalarType::UInt(w) => RawType::Int(*w as u16),
            ScalarType::Float(w) => RawType::Float(*w),
            ScalarType::Decimal { precision, .. } => {
                if *precision < 19 {
                    RawType::Int(64)
                } else {
                    RawType::Int(128)
                }
            }
            ScalarType::String => RawType::Bytes,
            ScalarType::Date(DateUnit::Day) => RawType::Int(32),
            ScalarType::Date(DateUnit::Millisecond) => RawType::Int(64),
            ScalarType::Timestamp(_) | ScalarType::Duration(_) => RawType::Int(64),
            ScalarType::Interval(IntervalUnit::Months) => RawType::Int(32),
            ScalarType::Interval(IntervalUnit::DayTime) => RawType::Int(64),
            ScalarType::Index => RawType::Index,
            ScalarType::Link => RawType::Ptr,
        }
    }

    pub fn int_width(&self) -> Option<u16> {
        match self {
            Self::Int(w) => Some(*w),
            _ => None,
        }
    }
}

impl fmt::Display for RawType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(w) => write!(f, "i{w}"),
            Self::Float(w) => write!(f, "f{w}"),
            Self::Index => write!(f, "index"),
            Self::Bytes => write!(f, "bytes"),
            Self::Ptr => write!(f, "ptr"),
            Self::Tuple(types) => {
                write!(f, "tuple<")?;
                for (idx, ty) in types.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A raw runtime value.
///
/// Integers are stored sign-extended from their declared width, except for
/// booleans which are always 0 or 1.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScalar {
    Int(i128),
    F32(f32),
    F64(f64),
    Index(u64),
    Bytes(Vec<u8>),
    Ptr(Option<usize>),
    Tuple(Vec<RawScalar>),
}

impl RawScalar {
    pub const TRUE: RawScalar = RawScalar::Int(1);
    pub const FALSE: RawScalar = RawScalar::Int(0);

    pub const fn bool(v: bool) -> Self {
        RawScalar::Int(v as i128)
    }

    /// Zero value for a type. Used as the base value of nulls.
    pub fn zero(ty: &RawType) -> Self {
        match ty {
            RawType::Int(_) => RawScalar::Int(0),
            RawType::Float(32) => RawScalar::F32(0.0),
            RawType::Float(_) => RawScalar::F64(0.0),
            RawType::Index => RawScalar::Index(0),
            RawType::Bytes => RawScalar::Bytes(Vec::new()),
            RawType::Ptr => RawScalar::Ptr(None),
            RawType::Tuple(types) => RawScalar::Tuple(types.iter().map(Self::zero).collect()),
        }
    }

    /// Null value for a nullable logical type.
    pub fn null(base: &RawType) -> Self {
        RawScalar::Tuple(vec![RawScalar::TRUE, Self::zero(base)])
    }

    /// Wrap a non-null value for a nullable slot.
    pub fn valid(value: RawScalar) -> Self {
        RawScalar::Tuple(vec![RawScalar::FALSE, value])
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match self {
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn try_as_int(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_as_index(&self) -> Option<u64> {
        match self {
            Self::Index(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret a (possibly nullable) boolean, null is false.
    pub fn is_true(&self) -> bool {
        match self {
            Self::Tuple(fields) if fields.len() == 2 => {
                fields[0].try_as_bool() == Some(false) && fields[1].try_as_bool() == Some(true)
            }
            other => other.try_as_bool() == Some(true),
        }
    }

    /// If this is a nullable value with the null flag set.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Tuple(fields) if fields.len() == 2 => fields[0].try_as_bool() == Some(true),
            _ => false,
        }
    }
}

impl fmt::Display for RawScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Index(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
            Self::Ptr(Some(p)) => write!(f, "ptr({p})"),
            Self::Ptr(None) => write!(f, "ptr(null)"),
            Self::Tuple(fields) => {
                write!(f, "(")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Sign-extend the low `width` bits of `v`. Booleans are masked to a single
/// bit.
pub const fn normalize_int(v: i128, width: u16) -> i128 {
    if width == 1 {
        v & 1
    } else if width >= 128 {
        v
    } else {
        let shift = 128 - width as u32;
        (v << shift) >> shift
    }
}

/// Unsigned view of the low `width` bits of `v`.
pub const fn to_unsigned(v: i128, width: u16) -> u128 {
    if width >= 128 {
        v as u128
    } else {
        (v as u128) & ((1u128 << width) - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    LShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// Ordered float predicates, false if either operand is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Trunc,
    SExt,
    ZExt,
    SIToFP,
    UIToFP,
    FPToSI,
    FPToUI,
    FPExt,
    FPTrunc,
    IndexCast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawOp {
    Const(RawScalar),
    Undef,
    Binary {
        op: BinaryOp,
        lhs: RawValueId,
        rhs: RawValueId,
    },
    ICmp {
        pred: IntPredicate,
        lhs: RawValueId,
        rhs: RawValueId,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: RawValueId,
        rhs: RawValueId,
    },
    Select {
        cond: RawValueId,
        if_true: RawValueId,
        if_false: RawValueId,
    },
    Cast {
        kind: CastKind,
        value: RawValueId,
    },
    MakeTuple(Vec<RawValueId>),
    Extract {
        tuple: RawValueId,
        index: usize,
    },
    Insert {
        tuple: RawValueId,
        index: usize,
        value: RawValueId,
    },
    BytesLen(RawValueId),
    /// Load 8 bytes little endian at a byte offset.
    LoadWord {
        bytes: RawValueId,
        offset: RawValueId,
    },
    LoadByte {
        bytes: RawValueId,
        offset: RawValueId,
    },
    /// Counted loop carrying a single value.
    For {
        lower: RawValueId,
        upper: RawValueId,
        step: RawValueId,
        init: RawValueId,
        body: RawBlock,
    },
    /// Stack slot holding a boolean cell.
    Alloca,
    Store {
        ptr: RawValueId,
        value: RawValueId,
    },
    Load {
        ptr: RawValueId,
    },
    GlobalBytes(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawInst {
    pub result: Option<RawValueId>,
    pub op: RawOp,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBlock {
    pub args: Vec<RawValueId>,
    pub insts: Vec<RawInst>,
    pub yields: Vec<RawValueId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawGlobal {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFunction {
    pub name: String,
    pub body: RawBlock,
    pub value_types: Vec<RawType>,
    pub globals: Vec<RawGlobal>,
}

impl RawFunction {
    pub fn params(&self) -> &[RawValueId] {
        &self.body.args
    }

    pub fn results(&self) -> &[RawValueId] {
        &self.body.yields
    }

    pub fn value_type(&self, value: RawValueId) -> &RawType {
        &self.value_types[value.0 as usize]
    }

    /// Count instructions matching a predicate, including nested loop bodies.
    pub fn count_insts(&self, pred: impl Fn(&RawOp) -> bool) -> usize {
        fn count(block: &RawBlock, pred: &dyn Fn(&RawOp) -> bool) -> usize {
            block
                .insts
                .iter()
                .map(|inst| {
                    let nested = match &inst.op {
                        RawOp::For { body, .. } => count(body, pred),
                        _ => 0,
                    };
                    nested + usize::from(pred(&inst.op))
                })
                .sum()
        }
        count(&self.body, &pred)
    }
}

impl fmt::Display for RawFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (idx, arg) in self.body.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}: {}", self.value_type(*arg))?;
        }
        writeln!(f, ") {{")?;
        for global in &self.globals {
            writeln!(f, "  global @{} = {:?}", global.name, String::from_utf8_lossy(&global.data))?;
        }
        self.fmt_block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

impl RawFunction {
    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: &RawBlock, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for inst in &block.insts {
            write!(f, "{pad}")?;
            if let Some(result) = inst.result {
                write!(f, "{result} = ")?;
            }
            match &inst.op {
                RawOp::Const(v) => write!(f, "const {v}")?,
                RawOp::Undef => write!(f, "undef")?,
                RawOp::Binary { op, lhs, rhs } => write!(f, "{op:?} {lhs}, {rhs}")?,
                RawOp::ICmp { pred, lhs, rhs } => write!(f, "icmp {pred:?} {lhs}, {rhs}")?,
                RawOp::FCmp { pred, lhs, rhs } => write!(f, "fcmp {pred:?} {lhs}, {rhs}")?,
                RawOp::Select {
                    cond,
                    if_true,
                    if_false,
                } => write!(f, "select {cond}, {if_true}, {if_false}")?,
                RawOp::Cast { kind, value } => write!(f, "{kind:?} {value}")?,
                RawOp::MakeTuple(values) => {
                    write!(f, "tuple")?;
                    for v in values {
                        write!(f, " {v}")?;
                    }
                }
                RawOp::Extract { tuple, index } => write!(f, "extract {tuple}[{index}]")?,
                RawOp::Insert {
                    tuple,
                    index,
                    value,
                } => write!(f, "insert {value} into {tuple}[{index}]")?,
                RawOp::BytesLen(v) => write!(f, "bytes_len {v}")?,
                RawOp::LoadWord { bytes, offset } => write!(f, "load_word {bytes}[{offset}]")?,
                RawOp::LoadByte { bytes, offset } => write!(f, "load_byte {bytes}[{offset}]")?,
                RawOp::For {
                    lower,
                    upper,
                    step,
                    init,
                    body,
                } => {
                    write!(f, "for {lower} to {upper} step {step} iter {init} (")?;
                    for (idx, arg) in body.args.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    writeln!(f, ") {{")?;
                    self.fmt_block(f, body, depth + 1)?;
                    write!(f, "{pad}}}")?;
                }
                RawOp::Alloca => write!(f, "alloca")?,
                RawOp::Store { ptr, value } => write!(f, "store {value}, {ptr}")?,
                RawOp::Load { ptr } => write!(f, "load {ptr}")?,
                RawOp::GlobalBytes(idx) => write!(f, "global @{}", self.globals[*idx].name)?,
            }
            if let Some(result) = inst.result {
                write!(f, " : {}", self.value_type(result))?;
            }
            writeln!(f)?;
        }
        write!(f, "{pad}yield")?;
        for v in &block.yields {
            write!(f, " {v}")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datatype::TimeUnit;

    #[test]
    fn raw_type_conversion() {
        let cases = [
            (DataType::bool(), RawType::I1),
            (DataType::new(ScalarType::UInt(16)), RawType::Int(16)),
            (
                DataType::new(ScalarType::Decimal {
                    precision: 18,
                    scale: 2,
                }),
                RawType::Int(64),
            ),
            (
                DataType::new(ScalarType::Decimal {
                    precision: 19,
                    scale: 2,
                }),
                RawType::Int(128),
            ),
            (DataType::new(ScalarType::Date(DateUnit::Day)), RawType::Int(32)),
            (
                DataType::new(ScalarType::Date(DateUnit::Millisecond)),
                RawType::Int(64),
            ),
            (
                DataType::new(ScalarType::Timestamp(TimeUnit::Nanosecond)),
                RawType::Int(64),
            ),
            (
                DataType::new(ScalarType::Interval(IntervalUnit::Months)),
                RawType::Int(32),
            ),
            (
                DataType::new(ScalarType::Interval(IntervalUnit::DayTime)),
                RawType::Int(64),
            ),
            (DataType::new(ScalarType::String), RawType::Bytes),
            (
                DataType::nullable(ScalarType::Float(32)),
                RawType::Tuple(vec![RawType::I1, RawType::Float(32)]),
            ),
        ];

        for (dt, expected) in cases {
            assert_eq!(expected, RawType::for_datatype(&dt), "{dt}");
        }
    }

    #[test]
    fn normalize_widths() {
        assert_eq!(-1, normalize_int(0xFF, 8));
        assert_eq!(127, normalize_int(127, 8));
        assert_eq!(1, normalize_int(3, 1));
        assert_eq!(255, to_unsigned(-1, 8));
        assert_eq!(u128::MAX, to_unsigned(-1, 128));
    }

    #[test]
    fn null_helpers() {
        let null = RawScalar::null(&RawType::I64);
        assert!(null.is_null());
        assert!(!null.is_true());
        assert!(RawScalar::valid(RawScalar::TRUE).is_true());
        assert!(RawScalar::TRUE.is_true());
    }
}
