//! Tether Command Types
//!
//! A [`Command`] names a remote target, a method on it, and the ordered
//! arguments to invoke it with. It is carried inside a [`Request`](super::Request)
//! and resolved on the server by an invoker.

use serde::{Deserialize, Serialize};

/// One positional argument of a remote call.
///
/// `declared_type` is the type name the caller declared for the parameter.
/// Servers use it to tell overloads apart; it is never interpreted by the
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub value: serde_json::Value,
    pub declared_type: String,
}

impl Param {
    pub fn new(value: serde_json::Value, declared_type: impl Into<String>) -> Self {
        Self {
            value,
            declared_type: declared_type.into(),
        }
    }
}

/// A named remote invocation.
///
/// # Fields
///
/// - `target`: Name of the remote service the method lives on (e.g. `demo.Math`)
/// - `method`: Method name within the target
/// - `is_static`: Whether the method is dispatched without an instance
/// - `params`: Ordered `(value, declared type)` arguments
///
/// # Example
///
/// ```
/// use tether_common::{Command, Param};
/// use serde_json::json;
///
/// let command = Command::new("demo.Echo", "echo")
///     .with_param(Param::new(json!("hello"), "string"));
///
/// assert_eq!(command.params.len(), 1);
/// assert!(!command.is_static);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub params: Vec<Param>,
}

impl Command {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            is_static: false,
            params: Vec::new(),
        }
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params.extend(params);
        self
    }

    /// `target.method`, the key used for per-method metrics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.target, self.method)
    }
}
