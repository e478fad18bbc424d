//! # Typed Values
//!
//! Data points carry one of four wire types. Values travel as text on the wire
//! and are converted with the same rules in both directions: server updates,
//! echoed writes and local setter calls all go through [`DataType::parse`] or
//! [`DataType::coerce`].

use std::fmt;

use crate::error::ProtocolError;

/// The declared type of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Int,
    Bool,
    Str,
}

impl DataType {
    /// Parses the `dtype` field of a report.
    pub fn from_wire(s: &str) -> Result<Self, ProtocolError> {
        match s.trim() {
            "float" => Ok(DataType::Float),
            "int" => Ok(DataType::Int),
            "bool" => Ok(DataType::Bool),
            "str" | "string" => Ok(DataType::Str),
            other => Err(ProtocolError::UnknownDataType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Int => "int",
            DataType::Bool => "bool",
            DataType::Str => "str",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Float | DataType::Int)
    }

    /// The value a point holds right after it is (re)typed.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Float => Value::Float(0.0),
            DataType::Int => Value::Int(0),
            DataType::Bool => Value::Bool(false),
            DataType::Str => Value::Str(String::new()),
        }
    }

    /// Converts wire text into a value of this type.
    ///
    /// Booleans never fail: `yes`, `true` and `1` (any case) are true, anything
    /// else is false. Floats reject NaN so that clamping stays meaningful.
    pub fn parse(&self, input: &str) -> Option<Value> {
        let text = input.trim();
        match self {
            DataType::Float => text
                .parse::<f64>()
                .ok()
                .filter(|f| !f.is_nan())
                .map(Value::Float),
            DataType::Int => text.parse::<i64>().ok().map(Value::Int),
            DataType::Bool => Some(Value::Bool(matches!(
                text.to_ascii_lowercase().as_str(),
                "yes" | "true" | "1"
            ))),
            DataType::Str => Some(Value::Str(input.to_string())),
        }
    }

    /// Converts an already typed value into this type.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Str(s)) => self.parse(s),
            (DataType::Float, Value::Float(f)) if !f.is_nan() => Some(Value::Float(*f)),
            (DataType::Float, Value::Float(_)) => None,
            (DataType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (DataType::Float, Value::Bool(b)) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            (DataType::Int, Value::Int(i)) => Some(Value::Int(*i)),
            (DataType::Int, Value::Float(f)) if f.is_finite() => Some(Value::Int(f.trunc() as i64)),
            (DataType::Int, Value::Float(_)) => None,
            (DataType::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (DataType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (DataType::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
            (DataType::Bool, Value::Float(f)) => Some(Value::Bool(*f != 0.0)),
            (DataType::Str, other) => Some(Value::Str(other.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data point value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Caps a numeric value into `[min, max]`. Strings and booleans pass through.
    ///
    /// The lower bound is applied first and the upper bound second, so the
    /// result never exceeds `max` even when `min > max`.
    pub fn clamp_to(self, min: &Value, max: &Value) -> Value {
        match self {
            Value::Float(mut f) => {
                if let Some(lo) = min.as_f64() {
                    if f < lo {
                        f = lo;
                    }
                }
                if let Some(hi) = max.as_f64() {
                    if f > hi {
                        f = hi;
                    }
                }
                Value::Float(f)
            }
            Value::Int(mut i) => {
                if let Some(lo) = min.as_f64() {
                    if (i as f64) < lo {
                        i = lo.ceil() as i64;
                    }
                }
                if let Some(hi) = max.as_f64() {
                    if (i as f64) > hi {
                        i = hi.floor() as i64;
                    }
                }
                Value::Int(i)
            }
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => f.write_str(if *v { "True" } else { "False" }),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
