pub mod command;
pub mod error;
pub mod requests;
pub mod responses;

#[cfg(test)]
mod tests;

pub use command::{Command, Param};
pub use error::{Result, TetherError};
pub use requests::{Request, RequestId, HEARTBEAT_ID};
pub use responses::{Response, RpcResult};
