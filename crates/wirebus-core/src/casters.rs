//! Argument casters: convert and validate one JSON value.
//!
//! A caster either returns the (possibly transformed) value or a
//! [`CastError`]; the dispatch layer converts failures into an
//! invalid-argument rejection rather than letting them propagate.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::errors::CastError;

/// A shared conversion/validation function for one argument value.
pub type Caster = Arc<dyn Fn(&Value) -> Result<Value, CastError> + Send + Sync>;

/// Require an integer (accepts JSON numbers with zero fraction).
pub fn integer() -> Caster {
    Arc::new(|v| {
        v.as_i64()
            .map(Value::from)
            .ok_or_else(|| CastError::new(format!("{v} is not an integer")))
    })
}

/// Require a string.
pub fn string() -> Caster {
    Arc::new(|v| {
        v.as_str()
            .map(Value::from)
            .ok_or_else(|| CastError::new(format!("{v} is not a string")))
    })
}

/// Require a boolean.
pub fn boolean() -> Caster {
    Arc::new(|v| {
        v.as_bool()
            .map(Value::from)
            .ok_or_else(|| CastError::new(format!("{v} is not a boolean")))
    })
}

/// Require a number (integer or float).
pub fn number() -> Caster {
    Arc::new(|v| {
        v.as_f64()
            .map(Value::from)
            .ok_or_else(|| CastError::new(format!("{v} is not a number")))
    })
}

/// Require a string matching `pattern`.
///
/// When the pattern has a capture group, the first group replaces the
/// value; otherwise the whole string passes through unchanged.
///
/// # Panics
///
/// Panics if `pattern` is not a valid regex; casters are built at
/// registration time, so a bad pattern is a startup bug.
pub fn matching(pattern: &str) -> Caster {
    let re = Regex::new(pattern).expect("invalid caster pattern");
    Arc::new(move |v| {
        let s = v
            .as_str()
            .ok_or_else(|| CastError::new(format!("{v} is not a string")))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| CastError::new(format!("{s:?} does not match {}", re.as_str())))?;
        match caps.get(1) {
            Some(group) => Ok(Value::from(group.as_str())),
            None => Ok(Value::from(s)),
        }
    })
}

/// Require the value to be one of `values`.
pub fn choice(values: Vec<Value>) -> Caster {
    Arc::new(move |v| {
        if values.contains(v) {
            Ok(v.clone())
        } else {
            Err(CastError::new(format!("{v} is not an allowed choice")))
        }
    })
}
