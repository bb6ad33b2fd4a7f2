pub mod region;
pub mod value;

use std::fmt;

use relc_error::{DbError, Result};
use value::ConstValue;

use crate::registry::column::{ColumnManager, ColumnRef};
use crate::types::datatype::{DECIMAL_128_MAX_PRECISION, DataType, ScalarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjunctionOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator to use when the operands are swapped.
    pub const fn flip(&self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    const fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// Nullable scalar expression.
///
/// Relational plans reference columns directly. Expressions embedded in
/// sub-operators only reference the arguments of their enclosing region.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Constant {
        value: ConstValue,
        datatype: DataType,
    },
    /// Null value of the given type.
    Null(ScalarType),
    Column(ColumnRef),
    Arg(usize),
    Conjunction {
        op: ConjunctionOp,
        children: Vec<ScalarExpr>,
    },
    Not(Box<ScalarExpr>),
    Compare {
        op: CompareOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Arith {
        op: ArithOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        to: ScalarType,
    },
    IsNull(Box<ScalarExpr>),
    /// Pack a value with an explicit null flag.
    CombineNull {
        value: Box<ScalarExpr>,
        is_null: Box<ScalarExpr>,
    },
    /// Collapse a nullable boolean, null is false.
    IsTrue(Box<ScalarExpr>),
    IfElse {
        condition: Box<ScalarExpr>,
        then: Box<ScalarExpr>,
        otherwise: Box<ScalarExpr>,
    },
    Hash(Vec<ScalarExpr>),
    /// The link value marking the end of a chain.
    InvalidLink,
}

/// Provides types for the leaves of an expression.
pub trait TypeEnv {
    fn column_type(&self, col: ColumnRef) -> Result<DataType>;
    fn arg_type(&self, idx: usize) -> Result<DataType>;
}

impl TypeEnv for ColumnManager {
    fn column_type(&self, col: ColumnRef) -> Result<DataType> {
        self.datatype(col.id())
    }

    fn arg_type(&self, idx: usize) -> Result<DataType> {
        Err(DbError::new("Region argument used outside of a region").with_field("arg", idx))
    }
}

/// Argument types for a region.
#[derive(Debug, Clone, Copy)]
pub struct ArgTypes<'a>(pub &'a [DataType]);

impl TypeEnv for ArgTypes<'_> {
    fn column_type(&self, col: ColumnRef) -> Result<DataType> {
        Err(DbError::new("Column referenced directly inside a region")
            .with_field("column", col.id()))
    }

    fn arg_type(&self, idx: usize) -> Result<DataType> {
        self.0.get(idx).copied().ok_or_else(|| {
            DbError::new("Region argument out of range")
                .with_field("arg", idx)
                .with_field("num_args", self.0.len())
        })
    }
}

impl ScalarExpr {
    pub fn constant(value: impl Into<ConstValue>, datatype: DataType) -> Self {
        ScalarExpr::Constant {
            value: value.into(),
            datatype,
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::constant(value, DataType::bool())
    }

    pub fn column(col: ColumnRef) -> Self {
        ScalarExpr::Column(col)
    }

    pub fn arg(idx: usize) -> Self {
        ScalarExpr::Arg(idx)
    }

    pub fn and(children: Vec<ScalarExpr>) -> Self {
        ScalarExpr::Conjunction {
            op: ConjunctionOp::And,
            children,
        }
    }

    pub fn or(children: Vec<ScalarExpr>) -> Self {
        ScalarExpr::Conjunction {
            op: ConjunctionOp::Or,
            children,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: ScalarExpr) -> Self {
        ScalarExpr::Not(Box::new(expr))
    }

    pub fn compare(op: CompareOp, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: ScalarExpr, right: ScalarExpr) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    pub fn arith(op: ArithOp, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn cast(expr: ScalarExpr, to: ScalarType) -> Self {
        ScalarExpr::Cast {
            expr: Box::new(expr),
            to,
        }
    }

    pub fn is_null(expr: ScalarExpr) -> Self {
        ScalarExpr::IsNull(Box::new(expr))
    }

    pub fn is_true(expr: ScalarExpr) -> Self {
        ScalarExpr::IsTrue(Box::new(expr))
    }

    pub fn combine_null(value: ScalarExpr, is_null: ScalarExpr) -> Self {
        ScalarExpr::CombineNull {
            value: Box::new(value),
            is_null: Box::new(is_null),
        }
    }

    pub fn if_else(condition: ScalarExpr, then: ScalarExpr, otherwise: ScalarExpr) -> Self {
        ScalarExpr::IfElse {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Compute the output type of this expression.
    pub fn datatype(&self, env: &impl TypeEnv) -> Result<DataType> {
        Ok(match self {
            Self::Constant { datatype, .. } => *datatype,
            Self::Null(scalar) => DataType::nullable(*scalar),
            Self::Column(col) => env.column_type(*col)?,
            Self::Arg(idx) => env.arg_type(*idx)?,
            Self::Conjunction { children, .. } => {
                let mut nullable = false;
                for child in children {
                    let dt = child.datatype(env)?;
                    expect_bool(&dt, "conjunction")?;
                    nullable |= dt.nullable;
                }
                DataType::bool().with_nullable(nullable)
            }
            Self::Not(expr) => {
                let dt = expr.datatype(env)?;
                expect_bool(&dt, "not")?;
                dt
            }
            Self::Compare { left, right, .. } => {
                let left = left.datatype(env)?;
                let right = right.datatype(env)?;
                comparable_operands(&left.scalar, &right.scalar)?;
                DataType::bool().with_nullable(left.nullable || right.nullable)
            }
            Self::Arith { op, left, right } => {
                let left = left.datatype(env)?;
                let right = right.datatype(env)?;
                let scalar = arith_result_type(*op, &left.scalar, &right.scalar)?;
                DataType::new(scalar).with_nullable(left.nullable || right.nullable)
            }
            Self::Cast { expr, to } => {
                let dt = expr.datatype(env)?;
                DataType::new(*to).with_nullable(dt.nullable)
            }
            Self::IsNull(expr) => {
                expr.datatype(env)?;
                DataType::bool()
            }
            Self::CombineNull { value, is_null } => {
                expect_bool(&is_null.datatype(env)?.base(), "null flag")?;
                value.datatype(env)?.with_nullable(true)
            }
            Self::IsTrue(expr) => {
                expect_bool(&expr.datatype(env)?, "is true")?;
                DataType::bool()
            }
            Self::IfElse {
                condition,
                then,
                otherwise,
            } => {
                expect_bool(&condition.datatype(env)?, "if condition")?;
                let then = then.datatype(env)?;
                let otherwise = otherwise.datatype(env)?;
                if then.scalar != otherwise.scalar {
                    return Err(DbError::new("Branches of if have different types")
                        .with_field("then", then)
                        .with_field("otherwise", otherwise));
                }
                then.with_nullable(then.nullable || otherwise.nullable)
            }
            Self::Hash(exprs) => {
                for expr in exprs {
                    expr.datatype(env)?;
                }
                DataType::index()
            }
            Self::InvalidLink => DataType::link(),
        })
    }

    /// Visit every direct child.
    pub fn for_each_child(&self, f: &mut impl FnMut(&ScalarExpr)) {
        match self {
            Self::Constant { .. } | Self::Null(_) | Self::Column(_) | Self::Arg(_) => (),
            Self::InvalidLink => (),
            Self::Conjunction { children, .. } | Self::Hash(children) => {
                children.iter().for_each(f)
            }
            Self::Not(expr) | Self::Cast { expr, .. } | Self::IsNull(expr) | Self::IsTrue(expr) => {
                f(expr)
            }
            Self::Compare { left, right, .. } | Self::Arith { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::CombineNull { value, is_null } => {
                f(value);
                f(is_null);
            }
            Self::IfElse {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                f(then);
                f(otherwise);
            }
        }
    }

    pub fn for_each_child_mut(&mut self, f: &mut impl FnMut(&mut ScalarExpr)) {
        match self {
            Self::Constant { .. } | Self::Null(_) | Self::Column(_) | Self::Arg(_) => (),
            Self::InvalidLink => (),
            Self::Conjunction { children, .. } | Self::Hash(children) => {
                children.iter_mut().for_each(f)
            }
            Self::Not(expr) | Self::Cast { expr, .. } | Self::IsNull(expr) | Self::IsTrue(expr) => {
                f(expr)
            }
            Self::Compare { left, right, .. } | Self::Arith { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::CombineNull { value, is_null } => {
                f(value);
                f(is_null);
            }
            Self::IfElse {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                f(then);
                f(otherwise);
            }
        }
    }

    /// Columns referenced by this expression, in order of first appearance.
    pub fn column_refs(&self) -> Vec<ColumnRef> {
        let mut cols = Vec::new();
        self.collect_column_refs(&mut cols);
        cols
    }

    fn collect_column_refs(&self, cols: &mut Vec<ColumnRef>) {
        if let Self::Column(col) = self {
            if !cols.contains(col) {
                cols.push(*col);
            }
            return;
        }
        self.for_each_child(&mut |child| child.collect_column_refs(cols));
    }

    /// Largest argument index referenced, if any.
    pub fn max_arg(&self) -> Option<usize> {
        let mut max = None;
        self.visit_args(&mut |idx| max = Some(max.map_or(idx, |m: usize| m.max(idx))));
        max
    }

    fn visit_args(&self, f: &mut impl FnMut(usize)) {
        if let Self::Arg(idx) = self {
            f(*idx);
            return;
        }
        self.for_each_child(&mut |child| child.visit_args(f));
    }

    /// Replace each argument `i` with `mapping[i]`.
    pub fn substitute_args(&self, mapping: &[ScalarExpr]) -> Result<ScalarExpr> {
        if let Self::Arg(idx) = self {
            return mapping.get(*idx).cloned().ok_or_else(|| {
                DbError::new("Argument out of range during substitution")
                    .with_field("arg", idx)
                    .with_field("num_args", mapping.len())
            });
        }

        let mut out = self.clone();
        let mut result = Ok(());
        out.for_each_child_mut(&mut |child| {
            if result.is_err() {
                return;
            }
            match child.substitute_args(mapping) {
                Ok(new) => *child = new,
                Err(e) => result = Err(e),
            }
        });
        result?;

        Ok(out)
    }

    /// Replace column references with arguments according to `cols`.
    pub fn columns_to_args(&self, cols: &[ColumnRef]) -> Result<ScalarExpr> {
        if let Self::Column(col) = self {
            let idx = cols
                .iter()
                .position(|c| c == col)
                .ok_or_else(|| DbError::new("Column not bound").with_field("column", col.id()))?;
            return Ok(ScalarExpr::Arg(idx));
        }

        let mut out = self.clone();
        let mut result = Ok(());
        out.for_each_child_mut(&mut |child| {
            if result.is_err() {
                return;
            }
            match child.columns_to_args(cols) {
                Ok(new) => *child = new,
                Err(e) => result = Err(e),
            }
        });
        result?;

        Ok(out)
    }

    /// Split a conjunction into its parts.
    pub fn split_conjunction(self) -> Vec<ScalarExpr> {
        match self {
            Self::Conjunction {
                op: ConjunctionOp::And,
                children,
            } => children
                .into_iter()
                .flat_map(|c| c.split_conjunction())
                .collect(),
            other => vec![other],
        }
    }
}

fn expect_bool(dt: &DataType, ctx: &str) -> Result<()> {
    if dt.scalar != ScalarType::Bool {
        return Err(DbError::new(format!("Expected boolean for {ctx}, got {dt}")));
    }
    Ok(())
}

/// Check that two types can be compared on their raw representations.
pub fn comparable_operands(left: &ScalarType, right: &ScalarType) -> Result<()> {
    match (left, right) {
        (ScalarType::Decimal { scale: s1, .. }, ScalarType::Decimal { scale: s2, .. }) => {
            if s1 != s2 {
                return Err(DbError::new("Decimal scales must match for comparison")
                    .with_field("left", left)
                    .with_field("right", right));
            }
            Ok(())
        }
        (l, r) if l == r => Ok(()),
        _ => Err(DbError::new("Cannot compare values of different types")
            .with_field("left", left)
            .with_field("right", right)),
    }
}

/// Result type of an arithmetic operation.
pub fn arith_result_type(op: ArithOp, left: &ScalarType, right: &ScalarType) -> Result<ScalarType> {
    match (left, right) {
        (
            ScalarType::Decimal {
                precision: p1,
                scale: s1,
            },
            ScalarType::Decimal {
                precision: p2,
                scale: s2,
            },
        ) => match op {
            ArithOp::Add | ArithOp::Sub | ArithOp::Mod => {
                if s1 != s2 {
                    return Err(DbError::new("Decimal scales must match")
                        .with_field("op", op.symbol())
                        .with_field("left", left)
                        .with_field("right", right));
                }
                Ok(ScalarType::Decimal {
                    precision: *p1.max(p2),
                    scale: *s1,
                })
            }
            ArithOp::Mul => {
                let scale = s1 + s2;
                if scale > DECIMAL_128_MAX_PRECISION {
                    return Err(DbError::new("Decimal scale overflow in multiplication")
                        .with_field("scale", scale));
                }
                Ok(ScalarType::Decimal {
                    precision: (p1 + p2).clamp(scale.max(1), DECIMAL_128_MAX_PRECISION),
                    scale,
                })
            }
            ArithOp::Div => Ok(ScalarType::Decimal {
                precision: (*p1.max(p2)).max(p1 + s2).min(DECIMAL_128_MAX_PRECISION),
                scale: *s1,
            }),
        },
        (ScalarType::Int(_), ScalarType::Int(_))
        | (ScalarType::UInt(_), ScalarType::UInt(_))
        | (ScalarType::Float(_), ScalarType::Float(_))
            if left == right =>
        {
            Ok(*left)
        }
        _ => Err(DbError::new("Unsupported operand types for arithmetic")
            .with_field("op", op.symbol())
            .with_field("left", left)
            .with_field("right", right)),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[ScalarExpr], sep: &str) -> fmt::Result {
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { value, datatype } => write!(f, "{value}::{datatype}"),
            Self::Null(scalar) => write!(f, "NULL::{scalar}"),
            Self::Column(col) => write!(f, "{}", col.id()),
            Self::Arg(idx) => write!(f, "%{idx}"),
            Self::Conjunction { op, children } => {
                let sep = match op {
                    ConjunctionOp::And => " AND ",
                    ConjunctionOp::Or => " OR ",
                };
                write!(f, "(")?;
                write_list(f, children, sep)?;
                write!(f, ")")
            }
            Self::Not(expr) => write!(f, "NOT {expr}"),
            Self::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Arith { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Self::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Self::CombineNull { value, is_null } => write!(f, "COMBINE_NULL({value}, {is_null})"),
            Self::IsTrue(expr) => write!(f, "{expr} IS TRUE"),
            Self::IfElse {
                condition,
                then,
                otherwise,
            } => write!(f, "IF({condition}, {then}, {otherwise})"),
            Self::Hash(exprs) => {
                write!(f, "HASH(")?;
                write_list(f, exprs, ", ")?;
                write!(f, ")")
            }
            Self::InvalidLink => write!(f, "INVALID_LINK"),
        }
    }
}
