use serde::{Deserialize, Serialize};

use super::Command;

/// Per-connection request identifier. Zero is reserved for heartbeats.
pub type RequestId = u64;

/// Id carried by every heartbeat probe.
pub const HEARTBEAT_ID: RequestId = 0;

/// A request frame sent from a client proxy to a server.
///
/// A request without a command is a heartbeat: the peer treats it as a
/// liveness probe and never answers it.
///
/// # Example
///
/// ```
/// use tether_common::{Command, Request};
///
/// let call = Request::new(1, Command::new("demo.Echo", "echo"));
/// assert!(!call.is_heartbeat());
///
/// let probe = Request::heartbeat();
/// assert!(probe.is_heartbeat());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub command: Option<Command>,
}

impl Request {
    pub fn new(id: RequestId, command: Command) -> Self {
        Request {
            id,
            command: Some(command),
        }
    }

    pub fn heartbeat() -> Self {
        Request {
            id: HEARTBEAT_ID,
            command: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.id == HEARTBEAT_ID || self.command.is_none()
    }
}
