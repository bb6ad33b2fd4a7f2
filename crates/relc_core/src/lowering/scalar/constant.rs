use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use num_traits::PrimInt;
use relc_error::{DbError, Result};

use crate::expr::value::ConstValue;
use crate::lowering::raw::{RawScalar, RawType};
use crate::types::datatype::{DataType, DateUnit, ScalarType, TimeUnit};

/// Number of days between 0001-01-01 and 1970-01-01.
pub const EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub const MILLISECONDS_IN_DAY: i64 = 86_400_000;

/// A 128-bit integer split into two 64-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalWords {
    pub low: u64,
    pub high: u64,
}

impl DecimalWords {
    pub const fn from_i128(v: i128) -> Self {
        DecimalWords {
            low: v as u64,
            high: ((v as u128) >> 64) as u64,
        }
    }

    pub const fn to_i128(self) -> i128 {
        (((self.high as u128) << 64) | self.low as u128) as i128
    }
}

/// 10^exp as a 128-bit integer.
pub fn pow10(exp: u8) -> Result<i128> {
    10i128
        .checked_pow(exp as u32)
        .ok_or_else(|| DbError::new("Power of ten overflows 128 bits").with_field("exp", exp))
}

/// Parses decimal strings into scaled integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalParser<T: PrimInt> {
    precision: u8,
    scale: u8,
    _type: PhantomData<T>,
}

pub type Decimal128Parser = DecimalParser<i128>;

impl<T: PrimInt> DecimalParser<T> {
    pub fn new(precision: u8, scale: u8) -> Self {
        DecimalParser {
            precision,
            scale,
            _type: PhantomData,
        }
    }

    pub fn parse(&self, s: &str) -> Option<T> {
        let bs = s.trim().as_bytes();
        let (neg, bs) = match bs.first() {
            Some(b'-') => (true, &bs[1..]),
            Some(b'+') => (false, &bs[1..]),
            _ => (false, bs),
        };

        let mut val = T::zero();
        let mut digits: u8 = 0;
        let mut decimals: u8 = 0;
        let mut seen_digit = false;

        let ten = T::from(10)?;
        let mut iter = bs.iter();

        for b in iter.by_ref() {
            match b {
                b'0'..=b'9' => {
                    seen_digit = true;
                    if digits == 0 && *b == b'0' {
                        continue;
                    }
                    digits += 1;
                    val = val.checked_mul(&ten)?.checked_add(&T::from(b - b'0')?)?;
                }
                b'.' => break,
                _ => return None,
            }
        }

        for b in iter {
            match b {
                b'0'..=b'9' => {
                    seen_digit = true;
                    // Digits past the scale are truncated.
                    if decimals == self.scale {
                        continue;
                    }
                    decimals += 1;
                    digits += 1;
                    val = val.checked_mul(&ten)?.checked_add(&T::from(b - b'0')?)?;
                }
                _ => return None,
            }
        }

        if !seen_digit {
            return None;
        }

        // Scale up for missing fractional digits.
        while decimals < self.scale {
            val = val.checked_mul(&ten)?;
            decimals += 1;
            digits += 1;
        }

        if digits > self.precision {
            return None;
        }

        if neg {
            val = T::zero() - val;
        }

        Some(val)
    }
}

/// Parse a decimal literal into its scaled two-word representation.
pub fn parse_decimal(value: &ConstValue, precision: u8, scale: u8) -> Result<DecimalWords> {
    let v = match value {
        ConstValue::String(s) => Decimal128Parser::new(precision, scale)
            .parse(s)
            .ok_or_else(|| {
                DbError::new("Failed to parse decimal literal")
                    .with_field("literal", s)
                    .with_field("precision", precision)
                    .with_field("scale", scale)
            })?,
        ConstValue::Int(i) => {
            let v = (*i as i128)
                .checked_mul(pow10(scale)?)
                .ok_or_else(|| DbError::new("Decimal literal overflows"))?;
            if v.unsigned_abs() >= pow10(precision)?.unsigned_abs() {
                return Err(DbError::new("Decimal literal exceeds precision")
                    .with_field("literal", i)
                    .with_field("precision", precision));
            }
            v
        }
        other => {
            return Err(DbError::new("Invalid literal for decimal").with_field("literal", other));
        }
    };

    Ok(DecimalWords::from_i128(v))
}

pub fn parse_date_days(s: &str) -> Result<i32> {
    let date = NaiveDate::from_str(s.trim()).map_err(|e| {
        DbError::with_source(format!("Failed to parse date literal '{s}'"), Box::new(e))
    })?;
    Ok(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
}

/// Date literal as a day or millisecond count.
pub fn parse_date(value: &ConstValue, unit: DateUnit) -> Result<i64> {
    let days = match value {
        ConstValue::String(s) => parse_date_days(s)? as i64,
        ConstValue::Int(i) => *i,
        other => {
            return Err(DbError::new("Invalid literal for date").with_field("literal", other));
        }
    };

    Ok(match unit {
        DateUnit::Day => days,
        DateUnit::Millisecond => days * MILLISECONDS_IN_DAY,
    })
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    let s = s.trim();
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::from_str(s)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Timestamp literal as a count of `unit` since the epoch.
pub fn parse_timestamp(value: &ConstValue, unit: TimeUnit) -> Result<i64> {
    match value {
        ConstValue::Int(i) => Ok(*i),
        ConstValue::String(s) => {
            let dt = parse_naive_datetime(s).ok_or_else(|| {
                DbError::new("Failed to parse timestamp literal").with_field("literal", s)
            })?;
            let dt = dt.and_utc();
            match unit {
                TimeUnit::Second => Ok(dt.timestamp()),
                TimeUnit::Millisecond => Ok(dt.timestamp_millis()),
                TimeUnit::Microsecond => Ok(dt.timestamp_micros()),
                TimeUnit::Nanosecond => dt.timestamp_nanos_opt().ok_or_else(|| {
                    DbError::new("Timestamp out of range for nanoseconds").with_field("literal", s)
                }),
            }
        }
        other => Err(DbError::new("Invalid literal for timestamp").with_field("literal", other)),
    }
}

/// Interval literal, either an integer count or a string holding one.
pub fn parse_interval(value: &ConstValue) -> Result<i64> {
    match value {
        ConstValue::Int(i) => Ok(*i),
        ConstValue::String(s) => s.trim().parse::<i64>().map_err(|e| {
            DbError::with_source(format!("Failed to parse interval literal '{s}'"), Box::new(e))
        }),
        other => Err(DbError::new("Invalid literal for interval").with_field("literal", other)),
    }
}

fn check_int_range(v: i128, scalar: &ScalarType) -> Result<i128> {
    let in_range = match scalar {
        ScalarType::Int(w) => {
            let w = *w as u32;
            w >= 128 || (v >= -(1i128 << (w - 1)) && v < (1i128 << (w - 1)))
        }
        ScalarType::UInt(w) => {
            let w = *w as u32;
            v >= 0 && (w >= 127 || v < (1i128 << w))
        }
        _ => true,
    };
    if !in_range {
        return Err(DbError::new("Integer literal out of range")
            .with_field("literal", v)
            .with_field("type", scalar));
    }
    Ok(v)
}

/// Interpret a literal as a raw value of the given scalar type.
pub fn encode_constant(value: &ConstValue, scalar: &ScalarType) -> Result<RawScalar> {
    let invalid = || {
        DbError::new("Invalid literal for type")
            .with_field("literal", value)
            .with_field("type", scalar)
    };

    Ok(match scalar {
        ScalarType::Bool => match value {
            ConstValue::Bool(b) => RawScalar::bool(*b),
            ConstValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" => RawScalar::TRUE,
                "false" | "f" => RawScalar::FALSE,
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        },
        ScalarType::Int(_) | ScalarType::UInt(_) => {
            let v = match value {
                ConstValue::Int(i) => *i as i128,
                ConstValue::String(s) => s.trim().parse::<i128>().map_err(|_| invalid())?,
                _ => return Err(invalid()),
            };
            RawScalar::Int(check_int_range(v, scalar)?)
        }
        ScalarType::Float(w) => {
            let v = match value {
                ConstValue::Float(f) => *f,
                ConstValue::Int(i) => *i as f64,
                ConstValue::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
                ConstValue::Bool(_) => return Err(invalid()),
            };
            if *w == 32 {
                RawScalar::F32(v as f32)
            } else {
                RawScalar::F64(v)
            }
        }
        ScalarType::Decimal { precision, scale } => {
            RawScalar::Int(parse_decimal(value, *precision, *scale)?.to_i128())
        }
        ScalarType::String => match value {
            ConstValue::String(s) => RawScalar::Bytes(s.as_bytes().to_vec()),
            _ => return Err(invalid()),
        },
        ScalarType::Date(unit) => RawScalar::Int(parse_date(value, *unit)? as i128),
        ScalarType::Timestamp(unit) => RawScalar::Int(parse_timestamp(value, *unit)? as i128),
        ScalarType::Interval(_) => RawScalar::Int(parse_interval(value)? as i128),
        ScalarType::Duration(_) => match value {
            ConstValue::Int(i) => RawScalar::Int(*i as i128),
            _ => return Err(invalid()),
        },
        ScalarType::Index => match value {
            ConstValue::Int(i) if *i >= 0 => RawScalar::Index(*i as u64),
            _ => return Err(invalid()),
        },
        ScalarType::Link => return Err(invalid()),
    })
}

/// Encode a literal for a possibly nullable slot.
pub fn encode_value(value: Option<&ConstValue>, datatype: &DataType) -> Result<RawScalar> {
    match (value, datatype.nullable) {
        (Some(v), false) => encode_constant(v, &datatype.scalar),
        (Some(v), true) => Ok(RawScalar::valid(encode_constant(v, &datatype.scalar)?)),
        (None, true) => Ok(RawScalar::null(&RawType::for_scalar(&datatype.scalar))),
        (None, false) => Err(DbError::new("Null value for non-nullable type")
            .with_field("type", datatype)),
    }
}

/// Format a raw value according to its logical type.
pub fn format_raw(value: &RawScalar, datatype: &DataType) -> String {
    if datatype.nullable {
        return match value {
            RawScalar::Tuple(fields) if fields.len() == 2 => {
                if value.is_null() {
                    "NULL".to_string()
                } else {
                    format_raw(&fields[1], &datatype.base())
                }
            }
            other => other.to_string(),
        };
    }

    match (&datatype.scalar, value) {
        (ScalarType::Bool, RawScalar::Int(v)) => (*v != 0).to_string(),
        (ScalarType::Decimal { scale, .. }, RawScalar::Int(v)) => format_decimal(*v, *scale),
        (ScalarType::String, RawScalar::Bytes(b)) => String::from_utf8_lossy(b).to_string(),
        (ScalarType::Date(unit), RawScalar::Int(v)) => {
            let days = match unit {
                DateUnit::Day => *v as i64,
                DateUnit::Millisecond => (*v as i64).div_euclid(MILLISECONDS_IN_DAY),
            };
            NaiveDate::from_num_days_from_ce_opt(days as i32 + EPOCH_DAYS_FROM_CE)
                .map(|d| d.to_string())
                .unwrap_or_else(|| v.to_string())
        }
        (ScalarType::Timestamp(unit), RawScalar::Int(v)) => {
            let v = *v as i64;
            let per_sec = unit.units_per_second();
            let secs = v.div_euclid(per_sec);
            let nanos = (v.rem_euclid(per_sec) * (1_000_000_000 / per_sec)) as u32;
            DateTime::from_timestamp(secs, nanos)
                .map(|dt| dt.naive_utc().to_string())
                .unwrap_or_else(|| v.to_string())
        }
        (_, other) => other.to_string(),
    }
}

fn format_decimal(v: i128, scale: u8) -> String {
    if scale == 0 {
        return v.to_string();
    }
    let neg = v < 0;
    let digits = v.unsigned_abs().to_string();
    let scale = scale as usize;
    let digits = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
    } else {
        digits
    };
    let (int_part, frac_part) = digits.split_at(digits.len() - scale);
    format!("{}{int_part}.{frac_part}", if neg { "-" } else { "" })
}
