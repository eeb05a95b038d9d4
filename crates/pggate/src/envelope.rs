//! The `{data, error}` response shape.

use crate::error::GateError;
use serde::Serialize;
use serde_json::Value;

/// Uniform response for every proxied request.
///
/// On success `data` holds the rows (or the first row, or `null`, for `single` requests) and
/// `error` is `null`. On failure `data` is `null`, `error` carries the message, and `code`
/// names the failure kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub data: Value,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlstate: Option<String>,
}

impl Envelope {
    pub fn ok(rows: Vec<Value>, single: bool) -> Self {
        let data = if single {
            rows.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(rows)
        };
        Self {
            data,
            error: None,
            code: None,
            sqlstate: None,
        }
    }

    pub fn from_error(err: &GateError) -> Self {
        Self {
            data: Value::Null,
            error: Some(err.to_string()),
            code: Some(err.code()),
            sqlstate: err.sqlstate().map(str::to_string),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<GateError> for Envelope {
    fn from(err: GateError) -> Self {
        Self::from_error(&err)
    }
}
