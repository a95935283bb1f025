//! WebSocket message codec for the uanode protocol.
//!
//! Messages are JSON over WebSocket text frames. This module provides
//! encoding and decoding utilities for the protocol messages.

use crate::messages::{ClientMessage, ServerMessage};
use serde_json::Value;
use thiserror::Error;
use uanode_core::{NodeId, StatusCode};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Received binary frame instead of text.
    #[error("Expected text frame, received binary")]
    BinaryFrame,

    /// A `nodeId` field that does not parse as a node id.
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    /// Valid JSON, but not any known request.
    #[error("Unknown message type")]
    UnknownMessage,
}

impl CodecError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CodecError::InvalidNodeId(_) => StatusCode::BAD_NODE_ID_INVALID,
            _ => StatusCode::BAD_DECODING_ERROR,
        }
    }
}

/// Encode a server message to JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a client message from JSON string received over WebSocket.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    serde_json::from_value(value.clone()).map_err(|_| match invalid_node_id(&value) {
        Some(bad) => CodecError::InvalidNodeId(bad),
        None => CodecError::UnknownMessage,
    })
}

/// First `nodeId` / `nodeIds` entry anywhere in `value` that fails to parse.
fn invalid_node_id(value: &Value) -> Option<String> {
    let unparsable = |v: &Value| match v.as_str() {
        Some(s) if s.parse::<NodeId>().is_err() => Some(s.to_string()),
        _ => None,
    };
    match value {
        Value::Object(map) => map.iter().find_map(|(key, v)| match (key.as_str(), v) {
            ("nodeId", _) => unparsable(v),
            ("nodeIds", Value::Array(ids)) => ids.iter().find_map(unparsable),
            _ => invalid_node_id(v),
        }),
        Value::Array(items) => items.iter().find_map(invalid_node_id),
        _ => None,
    }
}

/// Best-effort extraction of `requestId` from a message that failed to decode,
/// so the error reply can still be correlated.
pub fn request_id_of(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value
        .get("requestId")
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DataChangeNotification, HelloMessage, ReadResponse};
    use uanode_core::{NodeId, StatusCode, Variant};

    #[test]
    fn test_encode_hello() {
        let hello = HelloMessage::new("test", "Sample Server", "session-1");
        let json = encode_server_message(&ServerMessage::Hello(hello)).unwrap();

        assert!(json.contains("\"name\":\"test\""));
        assert!(json.contains("\"sessionId\":\"session-1\""));
    }

    #[test]
    fn test_encode_data_change() {
        let msg = ServerMessage::DataChange(DataChangeNotification {
            subscription_id: 7,
            sequence_number: 1,
            node_id: NodeId::string(1, "Temperature"),
            value: Variant::Double(12.5),
            status_code: StatusCode::GOOD,
            source_timestamp: "2024-01-17T10:00:00.000Z".to_string(),
        });
        let json: serde_json::Value =
            serde_json::from_str(&encode_server_message(&msg).unwrap()).unwrap();

        assert_eq!(json["subscriptionId"], 7);
        assert_eq!(json["nodeId"], "ns=1;s=Temperature");
        assert_eq!(json["value"]["type"], "Double");
        assert_eq!(json["value"]["value"], 12.5);
        assert_eq!(json["statusCode"], 0);
    }

    #[test]
    fn test_encode_failed_read() {
        let msg = ServerMessage::Read(ReadResponse::failed(
            "r1".to_string(),
            NodeId::numeric(1, 5),
            StatusCode::BAD_NODE_ID_UNKNOWN,
        ));
        let json: serde_json::Value =
            serde_json::from_str(&encode_server_message(&msg).unwrap()).unwrap();
        assert_eq!(json["statusCode"], StatusCode::BAD_NODE_ID_UNKNOWN.0);
        assert!(json.get("sourceTimestamp").is_none());
    }

    #[test]
    fn test_decode_read() {
        let json = r#"{"requestId":"1","read":{"nodeId":"ns=1;s=Temperature"}}"#;
        match decode_client_message(json).unwrap() {
            ClientMessage::Read(req) => {
                assert_eq!(req.request_id, "1");
                assert_eq!(req.read.node_id, NodeId::string(1, "Temperature"));
            }
            other => panic!("Expected Read, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_write() {
        let json = r#"{"requestId":"2","write":{"nodeId":"ns=1;i=1000","value":{"type":"Boolean","value":true}}}"#;
        match decode_client_message(json).unwrap() {
            ClientMessage::Write(req) => assert_eq!(req.write.value, Variant::Boolean(true)),
            other => panic!("Expected Write, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_create_subscription() {
        let json = r#"{"requestId":"3","createSubscription":{"nodeIds":["ns=1;s=Temperature"],"samplingInterval":500,"items":[{"nodeId":"ns=1;i=1010","samplingInterval":1000}]}}"#;
        match decode_client_message(json).unwrap() {
            ClientMessage::CreateSubscription(req) => {
                let spec = req.create_subscription;
                assert_eq!(spec.node_ids.len(), 1);
                assert_eq!(spec.sampling_interval, Some(500));
                assert_eq!(spec.items[0].sampling_interval, Some(1000));
            }
            other => panic!("Expected CreateSubscription, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_cancel_and_publishing_mode() {
        let cancel = r#"{"requestId":"4","cancelSubscription":{"subscriptionId":3}}"#;
        assert!(matches!(
            decode_client_message(cancel).unwrap(),
            ClientMessage::CancelSubscription(r) if r.cancel_subscription.subscription_id == 3
        ));

        let pause = r#"{"requestId":"5","setPublishingMode":{"subscriptionId":3,"enabled":false}}"#;
        assert!(matches!(
            decode_client_message(pause).unwrap(),
            ClientMessage::SetPublishingMode(r) if !r.set_publishing_mode.enabled
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_client_message("not json"),
            Err(CodecError::SerializeError(_))
        ));
        assert!(matches!(
            decode_client_message(r#"{"requestId":"9","delete":{}}"#),
            Err(CodecError::UnknownMessage)
        ));
    }

    #[test]
    fn test_decode_invalid_node_id() {
        let err = decode_client_message(r#"{"requestId":"9","read":{"nodeId":"q=1"}}"#).unwrap_err();
        assert!(matches!(&err, CodecError::InvalidNodeId(id) if id == "q=1"));
        assert_eq!(err.status_code(), StatusCode::BAD_NODE_ID_INVALID);

        let err = decode_client_message(
            r#"{"requestId":"9","createSubscription":{"nodeIds":["ns=1;i=1","ns=x;i=2"]}}"#,
        )
        .unwrap_err();
        assert!(matches!(&err, CodecError::InvalidNodeId(id) if id == "ns=x;i=2"));

        assert_eq!(
            CodecError::UnknownMessage.status_code(),
            StatusCode::BAD_DECODING_ERROR
        );
    }

    #[test]
    fn test_request_id_of() {
        assert_eq!(
            request_id_of(r#"{"requestId":"abc","bogus":1}"#),
            Some("abc".to_string())
        );
        assert_eq!(request_id_of("garbage"), None);
    }
}
