//! Lowering of nullable scalar expressions to raw code.
//!
//! Nullable values are represented as a `(is_null, value)` tuple. Lowering
//! patterns either produce a value, or decline with `None` when they don't
//! support the operand types, which turns into an error naming the
//! expression.

pub mod arith;
pub mod cast;
pub mod compare;
pub mod constant;
pub mod flag;
pub mod hash;
pub mod logic;

use relc_error::{DbError, Result};
use tracing::trace;

use super::raw::builder::RawBuilder;
use super::raw::interpret::RawInterpreter;
use super::raw::{BinaryOp, RawFunction, RawScalar, RawType, RawValueId};
use crate::expr::ScalarExpr;
use crate::expr::region::ExprRegion;
use crate::types::datatype::{DataType, ScalarType};

/// A lowered value along with its logical type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lowered {
    pub value: RawValueId,
    pub datatype: DataType,
}

impl Lowered {
    pub const fn new(value: RawValueId, datatype: DataType) -> Self {
        Lowered { value, datatype }
    }
}

/// Unpacks nullable operands and combines their null flags for the result.
#[derive(Debug, Default)]
pub struct NullHandler {
    nulls: Vec<RawValueId>,
}

impl NullHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the raw value of an operand, recording its null flag.
    pub fn get_value(&mut self, builder: &mut RawBuilder, operand: &Lowered) -> Result<RawValueId> {
        if !operand.datatype.nullable {
            return Ok(operand.value);
        }
        let is_null = builder.extract(operand.value, 0)?;
        self.nulls.push(is_null);
        builder.extract(operand.value, 1)
    }

    /// Wrap a raw result, null if any of the operands were null.
    pub fn combine_result(
        self,
        builder: &mut RawBuilder,
        value: RawValueId,
        scalar: ScalarType,
    ) -> Result<Lowered> {
        let mut iter = self.nulls.into_iter();
        let Some(first) = iter.next() else {
            return Ok(Lowered::new(value, DataType::new(scalar)));
        };

        let mut is_null = first;
        for null in iter {
            is_null = builder.binary(BinaryOp::Or, is_null, null)?;
        }
        let tuple = builder.tuple(vec![is_null, value]);
        Ok(Lowered::new(tuple, DataType::nullable(scalar)))
    }
}

/// Lowers expressions into an open raw builder.
#[derive(Debug)]
pub struct ScalarLowering<'a> {
    builder: &'a mut RawBuilder,
    args: Vec<Lowered>,
}

impl<'a> ScalarLowering<'a> {
    pub fn new(builder: &'a mut RawBuilder, args: Vec<Lowered>) -> Self {
        ScalarLowering { builder, args }
    }

    pub fn builder(&mut self) -> &mut RawBuilder {
        self.builder
    }

    pub fn lower(&mut self, expr: &ScalarExpr) -> Result<Lowered> {
        let lowered = match expr {
            ScalarExpr::Constant { value, datatype } => Some(self.lower_constant(value, datatype)?),
            ScalarExpr::Null(scalar) => Some(self.lower_null(*scalar)?),
            ScalarExpr::Column(col) => {
                return Err(DbError::new("Column referenced in region body")
                    .with_field("column", col.id()));
            }
            ScalarExpr::Arg(idx) => Some(*self.args.get(*idx).ok_or_else(|| {
                DbError::new("Region argument out of range")
                    .with_field("arg", idx)
                    .with_field("num_args", self.args.len())
            })?),
            ScalarExpr::Conjunction { op, children } => self.lower_conjunction(*op, children)?,
            ScalarExpr::Not(child) => self.lower_not(child)?,
            ScalarExpr::Compare { op, left, right } => self.lower_compare(*op, left, right)?,
            ScalarExpr::Arith { op, left, right } => self.lower_arith(*op, left, right)?,
            ScalarExpr::Cast { expr, to } => self.lower_cast(expr, *to)?,
            ScalarExpr::IsNull(child) => Some(self.lower_is_null(child)?),
            ScalarExpr::CombineNull { value, is_null } => self.lower_combine_null(value, is_null)?,
            ScalarExpr::IsTrue(child) => Some(self.lower_is_true(child)?),
            ScalarExpr::IfElse {
                condition,
                then,
                otherwise,
            } => self.lower_if_else(condition, then, otherwise)?,
            ScalarExpr::Hash(children) => Some(self.lower_hash(children)?),
            ScalarExpr::InvalidLink => {
                let value = self.builder.constant(RawScalar::Ptr(None), RawType::Ptr);
                Some(Lowered::new(value, DataType::link()))
            }
        };

        lowered.ok_or_else(|| {
            DbError::new("No lowering available for expression").with_field("expr", expr)
        })
    }

    /// Lower a constant, strings become references to global byte strings.
    fn lower_constant(
        &mut self,
        value: &crate::expr::value::ConstValue,
        datatype: &DataType,
    ) -> Result<Lowered> {
        let raw = constant::encode_constant(value, &datatype.scalar)?;
        let base = match raw {
            RawScalar::Bytes(data) => self.builder.global_bytes(data),
            other => self
                .builder
                .constant(other, RawType::for_scalar(&datatype.scalar)),
        };

        if datatype.nullable {
            let not_null = self.builder.const_bool(false);
            let tuple = self.builder.tuple(vec![not_null, base]);
            Ok(Lowered::new(tuple, *datatype))
        } else {
            Ok(Lowered::new(base, *datatype))
        }
    }

    fn lower_null(&mut self, scalar: ScalarType) -> Result<Lowered> {
        let datatype = DataType::nullable(scalar);
        let undef = self.builder.undef(RawType::for_datatype(&datatype));
        let is_null = self.builder.const_bool(true);
        let value = self.builder.insert(undef, 0, is_null)?;
        Ok(Lowered::new(value, datatype))
    }

    /// Wrap a non-null value so it can stand in for a nullable one.
    fn make_nullable(&mut self, lowered: Lowered) -> Lowered {
        if lowered.datatype.nullable {
            return lowered;
        }
        let not_null = self.builder.const_bool(false);
        let tuple = self.builder.tuple(vec![not_null, lowered.value]);
        Lowered::new(tuple, lowered.datatype.with_nullable(true))
    }
}

/// A region compiled to a raw function.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRegion {
    pub function: RawFunction,
    pub result_types: Vec<DataType>,
}

impl CompiledRegion {
    pub fn call(&self, args: &[RawScalar]) -> Result<Vec<RawScalar>> {
        RawInterpreter::call(&self.function, args)
    }

    /// Call a region producing a single boolean, null counts as false.
    pub fn call_predicate(&self, args: &[RawScalar]) -> Result<bool> {
        let results = self.call(args)?;
        match results.as_slice() {
            [result] => Ok(result.is_true()),
            _ => Err(DbError::new("Expected a single predicate result")
                .with_field("function", &self.function.name)
                .with_field("results", results.len())),
        }
    }
}

/// Compile an expression region into a raw function.
pub fn compile_region(name: &str, region: &ExprRegion) -> Result<CompiledRegion> {
    region.validate()?;

    let param_types: Vec<_> = region.params.iter().map(RawType::for_datatype).collect();
    let mut builder = RawBuilder::new(name, &param_types);

    let args = region
        .params
        .iter()
        .enumerate()
        .map(|(idx, datatype)| Ok(Lowered::new(builder.param(idx)?, *datatype)))
        .collect::<Result<Vec<_>>>()?;

    let mut results = Vec::with_capacity(region.results.len());
    let mut result_types = Vec::with_capacity(region.results.len());
    {
        let mut lowering = ScalarLowering::new(&mut builder, args);
        for expr in &region.results {
            let lowered = lowering.lower(expr)?;
            results.push(lowered.value);
            result_types.push(lowered.datatype);
        }
    }

    let function = builder.finish(results)?;
    trace!(%name, num_values = function.value_types.len(), "compiled region");

    Ok(CompiledRegion {
        function,
        result_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::value::ConstValue;
    use crate::lowering::raw::RawOp;

    fn nullable_bool(v: Option<bool>) -> RawScalar {
        match v {
            Some(b) => RawScalar::valid(RawScalar::bool(b)),
            None => RawScalar::null(&RawType::I1),
        }
    }

    #[test]
    fn constants_of_each_kind() {
        let region = ExprRegion::new(
            vec![],
            vec![
                ScalarExpr::constant(ConstValue::from("1992-10-11"), "date".parse().unwrap()),
                ScalarExpr::constant(ConstValue::from("12.5"), "decimal(10,2)?".parse().unwrap()),
                ScalarExpr::constant(ConstValue::from("abc"), "string".parse().unwrap()),
                ScalarExpr::Null(ScalarType::Int(64)),
            ],
        );
        let compiled = compile_region("consts", &region).unwrap();
        assert_eq!(region.result_types().unwrap(), compiled.result_types);

        let out = compiled.call(&[]).unwrap();
        assert_eq!(RawScalar::Int(8319), out[0]);
        assert_eq!(RawScalar::valid(RawScalar::Int(1250)), out[1]);
        assert_eq!(RawScalar::Bytes(b"abc".to_vec()), out[2]);
        assert!(out[3].is_null());
        assert_eq!(1, compiled.function.globals.len());
    }

    #[test]
    fn column_in_region_is_error() {
        let region = ExprRegion {
            params: vec![],
            results: vec![ScalarExpr::Column(crate::registry::column::ColumnRef(
                crate::registry::column::ColumnId(0),
            ))],
        };
        assert!(compile_region("bad", &region).is_err());
    }

    #[test]
    fn null_handler_combines_flags() {
        let nb = DataType::nullable(ScalarType::Bool);
        let region = ExprRegion::new(
            vec![nb, nb],
            vec![ScalarExpr::eq(ScalarExpr::arg(0), ScalarExpr::arg(1))],
        );
        let compiled = compile_region("eq", &region).unwrap();
        let ors = compiled.function.count_insts(|op| {
            matches!(
                op,
                RawOp::Binary {
                    op: BinaryOp::Or,
                    ..
                }
            )
        });
        assert_eq!(1, ors);

        let out = compiled
            .call(&[nullable_bool(Some(true)), nullable_bool(None)])
            .unwrap();
        assert!(out[0].is_null());
        let out = compiled
            .call(&[nullable_bool(Some(true)), nullable_bool(Some(true))])
            .unwrap();
        assert!(out[0].is_true());
    }

    #[test]
    fn result_types_match_type_rules() {
        let params: Vec<DataType> = ["int32?", "decimal(10,2)", "float64", "bool?"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let region = ExprRegion::new(
            params,
            vec![
                ScalarExpr::cast(ScalarExpr::arg(0), ScalarType::Int(64)),
                ScalarExpr::arith(
                    crate::expr::ArithOp::Mul,
                    ScalarExpr::arg(1),
                    ScalarExpr::arg(1),
                ),
                ScalarExpr::cast(ScalarExpr::arg(2), ScalarType::Decimal {
                    precision: 12,
                    scale: 3,
                }),
                ScalarExpr::not(ScalarExpr::arg(3)),
                ScalarExpr::is_true(ScalarExpr::arg(3)),
                ScalarExpr::Hash(vec![ScalarExpr::arg(0), ScalarExpr::arg(1)]),
                ScalarExpr::combine_null(ScalarExpr::arg(1), ScalarExpr::arg(3)),
            ],
        );
        let compiled = compile_region("types", &region).unwrap();
        assert_eq!(region.result_types().unwrap(), compiled.result_types);

        let expected: Vec<_> = compiled
            .result_types
            .iter()
            .map(RawType::for_datatype)
            .collect();
        let returned: Vec<_> = compiled
            .function
            .results()
            .iter()
            .map(|v| compiled.function.value_type(*v).clone())
            .collect();
        assert_eq!(expected, returned);
    }
}
