//! Command dispatch.
//!
//! An [`Invoker`] turns a decoded [`Command`] into an [`RpcResult`]. Failures
//! never escape as errors or panics: they come back as exceptional results,
//! which is the only failure channel the wire protocol has.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, warn};

use tether_common::protocol::responses::VOID_TYPE;
use tether_common::{Command, Param, RpcResult};

/// Failure type reported for unknown methods, handler errors and panics.
pub const SERVER_SIDE_EXCEPTION: &str = "ServerSideException";

pub trait Invoker: Send + Sync {
    fn execute(&self, command: &Command) -> RpcResult;
}

type HandlerFn = dyn Fn(&[Param]) -> Result<Value, String> + Send + Sync;

struct Handler {
    return_type: String,
    call: Box<HandlerFn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerKey {
    target: String,
    method: String,
    is_static: bool,
}

/// Invoker backed by registered closures.
///
/// Handlers are keyed by `(target, method, is_static)`, so a static and an
/// instance method with the same name are distinct. A handler registered
/// with return type `"void"` always produces a void result.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tether_common::{Command, Param};
/// use tether_server::{HandlerRegistry, Invoker};
///
/// let mut registry = HandlerRegistry::new();
/// registry.register_static("demo.Math", "neg", "long", |params| {
///     let n = params.first().and_then(|p| p.value.as_i64()).ok_or("expected a long")?;
///     Ok(json!(-n))
/// });
///
/// let command = Command::new("demo.Math", "neg")
///     .with_static(true)
///     .with_param(Param::new(json!(5), "long"));
/// assert_eq!(registry.execute(&command).return_value, json!(-5));
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance method handler, replacing any previous one.
    pub fn register<F>(
        &mut self,
        target: impl Into<String>,
        method: impl Into<String>,
        return_type: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&[Param]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert(target.into(), method.into(), false, return_type.into(), Box::new(handler))
    }

    /// Registers a static method handler, replacing any previous one.
    pub fn register_static<F>(
        &mut self,
        target: impl Into<String>,
        method: impl Into<String>,
        return_type: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&[Param]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert(target.into(), method.into(), true, return_type.into(), Box::new(handler))
    }

    fn insert(
        &mut self,
        target: String,
        method: String,
        is_static: bool,
        return_type: String,
        call: Box<HandlerFn>,
    ) -> &mut Self {
        let key = HandlerKey {
            target,
            method,
            is_static,
        };
        self.handlers.insert(key, Handler { return_type, call });
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered methods as `target.method`, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .map(|k| format!("{}.{}", k.target, k.method))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Invoker for HandlerRegistry {
    fn execute(&self, command: &Command) -> RpcResult {
        let key = HandlerKey {
            target: command.target.clone(),
            method: command.method.clone(),
            is_static: command.is_static,
        };

        let Some(handler) = self.handlers.get(&key) else {
            debug!(method = %command.qualified_name(), is_static = command.is_static, "no such method");
            return RpcResult::exception(
                SERVER_SIDE_EXCEPTION,
                format!("no such method: {}", command.qualified_name()),
            );
        };

        match catch_unwind(AssertUnwindSafe(|| (handler.call)(&command.params))) {
            Ok(Ok(_)) if handler.return_type == VOID_TYPE => RpcResult::void(),
            Ok(Ok(value)) => RpcResult::value(value, handler.return_type.clone()),
            Ok(Err(message)) => RpcResult::exception(SERVER_SIDE_EXCEPTION, message),
            Err(_) => {
                warn!(method = %command.qualified_name(), "handler panicked");
                RpcResult::exception(
                    SERVER_SIDE_EXCEPTION,
                    format!("handler for {} panicked", command.qualified_name()),
                )
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
