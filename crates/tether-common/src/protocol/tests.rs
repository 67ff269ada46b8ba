//! Tests for the protocol module
//!
//! These check the wire shape of requests and responses, heartbeat detection
//! and error classification.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    // ============================================================================
    // Requests
    // ============================================================================

    #[test]
    fn test_request_wire_shape() {
        let command = Command::new("demo.Math", "add")
            .with_static(true)
            .with_param(Param::new(json!(1), "int"))
            .with_param(Param::new(json!(2), "int"));
        let req = Request::new(7, command);

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "command": {
                    "target": "demo.Math",
                    "method": "add",
                    "isStatic": true,
                    "params": [
                        {"value": 1, "declaredType": "int"},
                        {"value": 2, "declaredType": "int"}
                    ]
                }
            })
        );
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let value = serde_json::to_value(Request::heartbeat()).unwrap();
        assert_eq!(value, json!({"id": 0, "command": null}));
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(Request::heartbeat().is_heartbeat());
        assert!(Request { id: 5, command: None }.is_heartbeat());
        assert!(!Request::new(5, Command::new("a", "b")).is_heartbeat());
    }

    #[test]
    fn test_command_defaults_when_fields_missing() {
        let cmd: Command = serde_json::from_value(json!({"target": "t", "method": "m"})).unwrap();
        assert!(!cmd.is_static);
        assert!(cmd.params.is_empty());
        assert_eq!(cmd.qualified_name(), "t.m");
    }

    // ============================================================================
    // Responses
    // ============================================================================

    #[test]
    fn test_response_wire_shape() {
        let resp = Response::new(9, RpcResult::value(json!("hi"), "string"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 9,
                "result": {"returnValue": "hi", "returnType": "string", "exceptional": false}
            })
        );
    }

    #[test]
    fn test_exceptional_result() {
        let result = RpcResult::exception("IllegalArgumentException", "bad input");
        assert!(result.exceptional);
        assert_eq!(
            result.error_message(),
            Some("IllegalArgumentException: bad input".to_string())
        );
        assert!(Response::new(1, result).is_exceptional());
    }

    #[test]
    fn test_void_result_has_no_error() {
        let result = RpcResult::void();
        assert_eq!(result.return_type, "void");
        assert!(result.error_message().is_none());
        assert!(!Response::empty(3).is_exceptional());
    }

    // ============================================================================
    // Errors
    // ============================================================================

    #[test]
    fn test_connection_error_classification() {
        assert!(TetherError::Connection("reset".into()).is_connection_error());
        assert!(TetherError::FrameTooLarge { size: 10, max: 5 }.is_connection_error());
        assert!(TetherError::InvalidFrame("x".into()).is_connection_error());
        assert!(!TetherError::NoAvailableConnection.is_connection_error());
        assert!(!TetherError::CorrelationNotFound(4).is_connection_error());
        assert!(!TetherError::ServerSide("boom".into()).is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = TetherError::FrameTooLarge { size: 9000, max: 8192 };
        assert_eq!(err.to_string(), "Frame size 9000 exceeds maximum 8192");
        assert_eq!(
            TetherError::PoolTimeout(250).to_string(),
            "Pool acquisition timeout after 250ms"
        );
    }
}
