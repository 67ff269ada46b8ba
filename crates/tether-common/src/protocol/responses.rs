//! Tether Response Types
//!
//! This module defines the response frame and the invocation result it carries.

use serde::{Deserialize, Serialize};
use super::RequestId;

/// Declared type used for results of methods that return nothing.
pub const VOID_TYPE: &str = "void";

/// Outcome of one remote invocation.
///
/// A result either carries the method's return value or a captured failure.
/// Failures are ordinary results with `exceptional` set: the wire protocol has
/// no separate error frame.
///
/// # Fields
///
/// - `return_value`: The returned value, or the failure message when exceptional
/// - `return_type`: Declared type of the value, or the failure's type name
/// - `exceptional`: Whether this result represents a server-side failure
///
/// # Example
///
/// ```
/// use tether_common::RpcResult;
/// use serde_json::json;
///
/// let ok = RpcResult::value(json!(42), "int");
/// assert!(!ok.exceptional);
///
/// let failed = RpcResult::exception("NoSuchMethodException", "demo.Math.nope");
/// assert_eq!(failed.error_message().as_deref(), Some("NoSuchMethodException: demo.Math.nope"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcResult {
    #[serde(default)]
    pub return_value: serde_json::Value,
    pub return_type: String,
    #[serde(default)]
    pub exceptional: bool,
}

impl RpcResult {
    pub fn value(return_value: serde_json::Value, return_type: impl Into<String>) -> Self {
        Self {
            return_value,
            return_type: return_type.into(),
            exceptional: false,
        }
    }

    pub fn void() -> Self {
        Self::value(serde_json::Value::Null, VOID_TYPE)
    }

    /// Builds an exceptional result from a failure type name and message.
    pub fn exception(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            return_value: serde_json::Value::String(message.into()),
            return_type: error_type.into(),
            exceptional: true,
        }
    }

    /// `type: message` for exceptional results, `None` otherwise.
    pub fn error_message(&self) -> Option<String> {
        if !self.exceptional {
            return None;
        }

        let detail = match &self.return_value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(format!("{}: {}", self.return_type, detail))
    }
}

/// A response frame sent from a server back to the proxy that issued the
/// request with the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Invocation outcome, absent only on malformed replies
    pub result: Option<RpcResult>,
}

impl Response {
    pub fn new(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
        }
    }

    pub fn empty(id: RequestId) -> Self {
        Response { id, result: None }
    }

    pub fn is_exceptional(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.exceptional)
    }
}
