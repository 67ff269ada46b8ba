use crate::protocol::error::Result;
use crate::protocol::{Request, Response};

/// JSON payload encoding for requests and responses.
///
/// The output never contains a raw NUL byte (JSON escapes it as `\u0000`),
/// so it can always be framed with [`FrameCodec`](super::FrameCodec).
/// A heartbeat encodes as exactly `{"id":0,"command":null}`.
///
/// # Example
///
/// ```
/// use tether_common::transport::JsonCodec;
/// use tether_common::{Command, Request};
///
/// let heartbeat = JsonCodec::encode_request(&Request::heartbeat()).unwrap();
/// assert_eq!(heartbeat, br#"{"id":0,"command":null}"#);
///
/// let request = Request::new(1, Command::new("demo.Echo", "echo"));
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// assert_eq!(JsonCodec::decode_request(&encoded).unwrap(), request);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encoded length of a heartbeat, the smallest frame limit a
    /// connection can run with.
    pub fn heartbeat_len() -> Result<usize> {
        Ok(Self::encode_request(&Request::heartbeat())?.len())
    }
}
