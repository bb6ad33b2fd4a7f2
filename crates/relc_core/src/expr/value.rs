use std::fmt;

use relc_error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Literal value as it appears in a plan, before being interpreted according
/// to a declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConstValue {
    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(DbError::new(format!("Expected a boolean, got {other}"))),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::String(s) => s
                .parse()
                .map_err(|_| DbError::new(format!("Expected an integer, got '{s}'"))),
            other => Err(DbError::new(format!("Expected an integer, got {other}"))),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(DbError::new(format!("Expected a string, got {other}"))),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<bool> for ConstValue {
    fn from(value: bool) -> Self {
        ConstValue::Bool(value)
    }
}

impl From<i64> for ConstValue {
    fn from(value: i64) -> Self {
        ConstValue::Int(value)
    }
}

impl From<f64> for ConstValue {
    fn from(value: f64) -> Self {
        ConstValue::Float(value)
    }
}

impl From<&str> for ConstValue {
    fn from(value: &str) -> Self {
        ConstValue::String(value.to_string())
    }
}

impl From<String> for ConstValue {
    fn from(value: String) -> Self {
        ConstValue::String(value)
    }
}
