use std::fmt;
use std::str::FromStr;

use relc_error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Maximum precision for a decimal stored in 64 bits.
pub const DECIMAL_64_MAX_PRECISION: u8 = 18;
/// Maximum precision for any decimal.
pub const DECIMAL_128_MAX_PRECISION: u8 = 38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateUnit {
    Day,
    Millisecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    /// Number of units in a single second.
    pub const fn units_per_second(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Millisecond => 1_000,
            Self::Microsecond => 1_000_000,
            Self::Nanosecond => 1_000_000_000,
        }
    }

    const fn suffix(&self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Millisecond => "ms",
            Self::Microsecond => "us",
            Self::Nanosecond => "ns",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        Some(match s {
            "s" => Self::Second,
            "ms" => Self::Millisecond,
            "us" => Self::Microsecond,
            "ns" => Self::Nanosecond,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Months,
    DayTime,
}

/// Non-nullable scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    /// Signed integer with the given bit width.
    Int(u8),
    /// Unsigned integer with the given bit width.
    UInt(u8),
    /// Float with the given bit width (32 or 64).
    Float(u8),
    Decimal {
        precision: u8,
        scale: u8,
    },
    String,
    Date(DateUnit),
    Timestamp(TimeUnit),
    Interval(IntervalUnit),
    Duration(TimeUnit),
    /// Index sized unsigned integer. Produced by hashing.
    Index,
    /// Intrusive link to another row in the same state.
    Link,
}

impl ScalarType {
    /// If this type lowers to a raw integer and should be compared with signed
    /// integer predicates.
    pub const fn is_integer_like(&self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Int(_)
                | Self::Decimal { .. }
                | Self::Date(_)
                | Self::Timestamp(_)
                | Self::Interval(_)
                | Self::Duration(_)
        )
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn decimal_scale(&self) -> Option<u8> {
        match self {
            Self::Decimal { scale, .. } => Some(*scale),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int(w) => write!(f, "int{w}"),
            Self::UInt(w) => write!(f, "uint{w}"),
            Self::Float(w) => write!(f, "float{w}"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::String => write!(f, "string"),
            Self::Date(DateUnit::Day) => write!(f, "date"),
            Self::Date(DateUnit::Millisecond) => write!(f, "date(ms)"),
            Self::Timestamp(unit) => write!(f, "timestamp({})", unit.suffix()),
            Self::Interval(IntervalUnit::Months) => write!(f, "interval(months)"),
            Self::Interval(IntervalUnit::DayTime) => write!(f, "interval(daytime)"),
            Self::Duration(unit) => write!(f, "duration({})", unit.suffix()),
            Self::Index => write!(f, "index"),
            Self::Link => write!(f, "link"),
        }
    }
}

/// A scalar type with an orthogonal nullable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataType {
    pub scalar: ScalarType,
    pub nullable: bool,
}

impl DataType {
    pub const fn new(scalar: ScalarType) -> Self {
        DataType {
            scalar,
            nullable: false,
        }
    }

    pub const fn nullable(scalar: ScalarType) -> Self {
        DataType {
            scalar,
            nullable: true,
        }
    }

    pub const fn bool() -> Self {
        Self::new(ScalarType::Bool)
    }

    pub const fn int64() -> Self {
        Self::new(ScalarType::Int(64))
    }

    pub const fn index() -> Self {
        Self::new(ScalarType::Index)
    }

    pub const fn link() -> Self {
        Self::new(ScalarType::Link)
    }

    pub const fn with_nullable(self, nullable: bool) -> Self {
        DataType {
            scalar: self.scalar,
            nullable,
        }
    }

    /// Returns the non-nullable version of this type.
    pub const fn base(self) -> Self {
        self.with_nullable(false)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scalar)?;
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

impl FromStr for DataType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (s, nullable) = match s.strip_suffix('?') {
            Some(s) => (s, true),
            None => (s, false),
        };

        let scalar = parse_scalar_type(s)
            .ok_or_else(|| DbError::new(format!("Unknown data type: '{s}'")))?;

        if let ScalarType::Decimal { precision, scale } = scalar {
            if precision == 0 || precision > DECIMAL_128_MAX_PRECISION {
                return Err(DbError::new("Decimal precision out of range")
                    .with_field("precision", precision));
            }
            if scale > precision {
                return Err(DbError::new("Decimal scale cannot exceed precision")
                    .with_field("precision", precision)
                    .with_field("scale", scale));
            }
        }

        Ok(DataType { scalar, nullable })
    }
}

fn parse_scalar_type(s: &str) -> Option<ScalarType> {
    let width = |rest: &str| -> Option<u8> {
        let w: u8 = rest.parse().ok()?;
        matches!(w, 8 | 16 | 32 | 64 | 128).then_some(w)
    };

    Some(match s {
        "bool" | "boolean" => ScalarType::Bool,
        "string" | "text" => ScalarType::String,
        "date" => ScalarType::Date(DateUnit::Day),
        "date(ms)" => ScalarType::Date(DateUnit::Millisecond),
        "interval(months)" => ScalarType::Interval(IntervalUnit::Months),
        "interval(daytime)" => ScalarType::Interval(IntervalUnit::DayTime),
        "float32" => ScalarType::Float(32),
        "float64" => ScalarType::Float(64),
        "index" => ScalarType::Index,
        "link" => ScalarType::Link,
        other => {
            if let Some(rest) = other.strip_prefix("uint") {
                ScalarType::UInt(width(rest)?)
            } else if let Some(rest) = other.strip_prefix("int") {
                ScalarType::Int(width(rest)?)
            } else if let Some(args) = parenthesized(other, "decimal") {
                let (p, s) = args.split_once(',')?;
                ScalarType::Decimal {
                    precision: p.trim().parse().ok()?,
                    scale: s.trim().parse().ok()?,
                }
            } else if let Some(args) = parenthesized(other, "timestamp") {
                ScalarType::Timestamp(TimeUnit::from_suffix(args.trim())?)
            } else if let Some(args) = parenthesized(other, "duration") {
                ScalarType::Duration(TimeUnit::from_suffix(args.trim())?)
            } else {
                return None;
            }
        }
    })
}

fn parenthesized<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.strip_prefix(prefix)?.strip_prefix('(')?.strip_suffix(')')
}

impl TryFrom<String> for DataType {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}
