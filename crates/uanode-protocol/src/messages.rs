//! Protocol message types for WebSocket communication.
//!
//! This module defines all message types exchanged over the uanode WebSocket protocol:
//! - Server → Client: Hello, responses, DataChange notifications, Error
//! - Client → Server: Read, Write, Browse, CreateSubscription,
//!   CancelSubscription, SetPublishingMode
//!
//! Messages are serialized as JSON over WebSocket text frames. Disconnecting
//! the socket ends the session and closes its subscriptions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uanode_core::{DataValue, Node, NodeClass, NodeId, StatusCode, Variant};

/// Format a timestamp the way every message carries it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Client → Server
// ============================================================================

/// Read the current value of a variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub read: ReadSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSpec {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
}

/// Write a new value to a writable variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub write: WriteSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSpec {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    pub value: Variant,
}

/// List the children of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub browse: BrowseSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseSpec {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
}

/// Start monitoring a set of variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "createSubscription")]
    pub create_subscription: CreateSubscriptionSpec,
}

/// Subscription parameters.
///
/// `nodeIds` monitors variables at the subscription's `samplingInterval`;
/// `items` may request a different interval per variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionSpec {
    #[serde(default)]
    pub node_ids: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<MonitoredItemSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredItemSpec {
    pub node_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<u64>,
}

/// Stop a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "cancelSubscription")]
    pub cancel_subscription: SubscriptionRef,
}

/// Pause (`enabled: false`) or resume a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPublishingModeRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "setPublishingMode")]
    pub set_publishing_mode: PublishingModeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRef {
    pub subscription_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishingModeSpec {
    pub subscription_id: u32,
    pub enabled: bool,
}

// ============================================================================
// Server → Client
// ============================================================================

/// Security endpoint description advertised in the Hello message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub security_mode: String,
    pub security_policy_uri: String,
}

/// Hello message sent by server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "name": "uanode-server",
///   "productName": "Sample uanode Server",
///   "buildNumber": "7658",
///   "buildDate": "2020-07-14",
///   "sessionId": "4f1c...",
///   "endpoints": [{"endpointUrl": "ws://host:26543/uanode/v1/stream", ...}],
///   "timestamp": "2024-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloMessage {
    pub name: String,
    pub product_name: String,
    pub build_number: String,
    pub build_date: String,
    pub session_id: String,
    pub endpoints: Vec<EndpointDescription>,
    pub timestamp: String,
}

impl HelloMessage {
    pub fn new(
        name: impl Into<String>,
        product_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            product_name: product_name.into(),
            build_number: String::new(),
            build_date: String::new(),
            session_id: session_id.into(),
            endpoints: Vec::new(),
            timestamp: format_timestamp(Utc::now()),
        }
    }
}

/// Result of a read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub request_id: String,
    pub node_id: NodeId,
    pub value: Variant,
    pub status_code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<String>,
}

impl ReadResponse {
    pub fn from_data_value(request_id: String, node_id: NodeId, dv: DataValue) -> Self {
        Self {
            request_id,
            node_id,
            value: dv.value,
            status_code: dv.status,
            source_timestamp: Some(format_timestamp(dv.source_timestamp)),
        }
    }

    /// A read that failed before any value was produced.
    pub fn failed(request_id: String, node_id: NodeId, status_code: StatusCode) -> Self {
        Self {
            request_id,
            node_id,
            value: Variant::Empty,
            status_code,
            source_timestamp: None,
        }
    }
}

/// Result of a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub request_id: String,
    pub node_id: NodeId,
    pub status_code: StatusCode,
}

/// One child returned by a browse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDescription {
    pub node_id: NodeId,
    pub browse_name: String,
    pub display_name: String,
    pub node_class: NodeClass,
}

impl From<&Node> for ReferenceDescription {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            browse_name: node.browse_name.clone(),
            display_name: node.display_name.clone(),
            node_class: node.node_class(),
        }
    }
}

/// Result of a browse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseResponse {
    pub request_id: String,
    pub node_id: NodeId,
    pub status_code: StatusCode,
    pub references: Vec<ReferenceDescription>,
}

/// Result of CreateSubscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCreatedResponse {
    pub request_id: String,
    pub subscription_id: u32,
    pub revised_sampling_interval: u64,
    pub status_code: StatusCode,
    /// Per-item results in request order (`nodeIds` first, then `items`).
    pub item_status_codes: Vec<StatusCode>,
}

/// Result of CancelSubscription or SetPublishingMode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub request_id: String,
    pub subscription_id: u32,
    pub status_code: StatusCode,
}

/// A value change detected on a monitored variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChangeNotification {
    pub subscription_id: u32,
    pub sequence_number: u32,
    pub node_id: NodeId,
    pub value: Variant,
    pub status_code: StatusCode,
    pub source_timestamp: String,
}

/// Error reply to a request that could not be handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub status_code: StatusCode,
    pub message: String,
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Hello(HelloMessage),
    DataChange(DataChangeNotification),
    SubscriptionCreated(SubscriptionCreatedResponse),
    Browse(BrowseResponse),
    Read(ReadResponse),
    SubscriptionStatus(SubscriptionStatusResponse),
    Write(WriteResponse),
    Error(ErrorResponse),
}

/// Messages that can be received from client.
///
/// Uses untagged deserialization - the message type is determined by
/// which operation key (`read`, `write`, ...) is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Read(ReadRequest),
    Write(WriteRequest),
    Browse(BrowseRequest),
    CreateSubscription(CreateSubscriptionRequest),
    CancelSubscription(CancelSubscriptionRequest),
    SetPublishingMode(SetPublishingModeRequest),
}

impl ClientMessage {
    pub fn request_id(&self) -> &str {
        match self {
            ClientMessage::Read(r) => &r.request_id,
            ClientMessage::Write(r) => &r.request_id,
            ClientMessage::Browse(r) => &r.request_id,
            ClientMessage::CreateSubscription(r) => &r.request_id,
            ClientMessage::CancelSubscription(r) => &r.request_id,
            ClientMessage::SetPublishingMode(r) => &r.request_id,
        }
    }
}
