use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Returns early with a "not implemented" error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {
        return Err($crate::DbError::new(format!("Not yet implemented: {}", format!($($arg)+))))
    };
}

/// Error type used throughout the compiler.
///
/// Boxed to keep `Result`s small since errors are expected to be rare and
/// only travel up to whoever is driving the compilation.
#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    msg: String,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(String, String)>,
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Attach an additional field to the error for display.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for (key, value) in &self.inner.fields {
            write!(f, "\n  {key}: {value}")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if let Some(bt) = self.get_backtrace() {
            write!(f, "\nBacktrace: {bt}")?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for DbError {
    fn from(value: fmt::Error) -> Self {
        DbError::with_source("Format error", Box::new(value))
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        DbError::with_source("IO error", Box::new(value))
    }
}

/// Wrap foreign errors with additional context.
pub trait ResultExt<T, E> {
    fn context(self, msg: &'static str) -> Result<T, DbError>;
    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T, DbError>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T, DbError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T, DbError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, msg: &'static str) -> Result<T, DbError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T, DbError> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::new(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unimplemented_thing(v: i32) -> Result<i32> {
        if v > 0 {
            not_implemented!("positive values: {v}");
        }
        Ok(v)
    }

    #[test]
    fn not_implemented_returns_error() {
        let err = unimplemented_thing(3).unwrap_err();
        assert_eq!("Not yet implemented: positive values: 3", err.get_msg());
        assert_eq!(-1, unimplemented_thing(-1).unwrap());
    }

    #[test]
    fn display_includes_fields() {
        let err = DbError::new("Bad operand").with_field("operator", "filter");
        assert_eq!(Some("filter"), err.get_field("operator"));
        let s = err.to_string();
        assert!(s.starts_with("Bad operand\n  operator: filter"), "{s}");
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<i32, std::num::ParseIntError> = "abc".parse::<i32>();
        let err = res.context("failed to parse").unwrap_err();
        assert_eq!("failed to parse", err.get_msg());
        assert!(err.source().is_some());
    }

    #[test]
    fn required_on_none() {
        let err = None::<i32>.required("missing value").unwrap_err();
        assert_eq!("missing value", err.get_msg());
    }
}
