//! User-facing values that cross the endpoint boundary.
//!
//! Procedures, callbacks, and completion handlers all traffic in [`Arg`]:
//! plain data, a callable, or a structured error. Plain data rides on
//! `serde_json::Value` and passes through the marshaling pipeline untouched.
//! Errors cross by value as [`StructuredError`] and never carry callable
//! identity with them.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::Callback;
use crate::error::{CrosscallError, Result};

/// A structured error value as it crosses the boundary.
///
/// Field names follow the original wire shape (`sourceLocation`,
/// `stackTrace`); both location and stack trace are optional and survive a
/// round trip exactly, including when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    /// Human-readable failure description.
    pub message: String,

    /// Where the error originated, if the producer knew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,

    /// Producer-side stack trace, if one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl StructuredError {
    /// Creates an error with a message and no location or stack trace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_location: None,
            stack_trace: None,
        }
    }

    /// Attaches a source location.
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.source_location = Some(SourceLocation {
            file: file.into(),
            line,
        });
        self
    }

    /// Attaches a stack trace.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(loc) = &self.source_location {
            write!(f, " ({loc})")?;
        }
        Ok(())
    }
}

impl std::error::Error for StructuredError {}

/// Lets procedure bodies use `?` on crate results: a local failure becomes
/// the error outcome of the invocation. A `Remote` error unwraps to its
/// original fields, so forwarding a failure does not stack wrappers.
impl From<CrosscallError> for StructuredError {
    fn from(error: CrosscallError) -> Self {
        match error {
            CrosscallError::Remote(inner) => inner,
            other => StructuredError::new(other.to_string()),
        }
    }
}

/// File/line pair identifying where an error originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One argument (or return value) of a cross-boundary invocation.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Plain application data. Never mutated by the pipeline.
    Value(Value),
    /// A callable. Travels as a registry index, never by value.
    Callback(Callback),
    /// A structured error, copied field by field.
    Error(StructuredError),
}

impl Arg {
    /// The null value.
    pub fn null() -> Self {
        Arg::Value(Value::Null)
    }

    /// Converts any serializable data into a plain-value argument.
    pub fn value<T: Serialize>(data: T) -> Result<Self> {
        Ok(Arg::Value(serde_json::to_value(data)?))
    }

    /// Extracts a typed value.
    ///
    /// A callback argument cannot be viewed as data; an error argument
    /// surfaces as [`CrosscallError::Remote`] so that a failed outcome is not
    /// silently read as a value.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Arg::Value(v) => Ok(serde_json::from_value(v.clone())?),
            Arg::Callback(_) => Err(CrosscallError::Protocol(
                "cannot deserialize a callback argument as data".to_string(),
            )),
            Arg::Error(e) => Err(CrosscallError::Remote(e.clone())),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Arg::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&StructuredError> {
        match self {
            Arg::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_callback(self) -> Option<Callback> {
        match self {
            Arg::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<StructuredError> {
        match self {
            Arg::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl PartialEq for Arg {
    /// Values and errors compare structurally; callbacks compare by identity
    /// (two clones of one callback are equal, two separately created
    /// callbacks are not).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Value(a), Arg::Value(b)) => a == b,
            (Arg::Error(a), Arg::Error(b)) => a == b,
            (Arg::Callback(a), Arg::Callback(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Callback> for Arg {
    fn from(callback: Callback) -> Self {
        Arg::Callback(callback)
    }
}

impl From<StructuredError> for Arg {
    fn from(error: StructuredError) -> Self {
        Arg::Error(error)
    }
}

/// What the application-message handler receives for a USER envelope.
///
/// The payload arrives wrapped, mirroring how the original delivered
/// `{data: payload}` events.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub data: Value,
}
