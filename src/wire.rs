//! Wire DTOs for the broker's single WebSocket protocol.
//!
//! All client<->server traffic is one JSON object per frame. `Request` is
//! the only inbound shape; `Response` and `Delivery` are the two outbound
//! shapes, distinguished by the presence of `type` (`Delivery` omits it).

use serde::{Deserialize, Serialize};

/// Inbound frame from a connected client.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, rename = "requireAck")]
    pub require_ack: bool,
    /// Authoritative only when server-set; a client-supplied value is
    /// overwritten by `injectSenderId` before handlers see the request.
    #[serde(default, rename = "senderId")]
    pub sender_id: Option<String>,
    /// Open Question (spec.md §9) resolved: an explicit, default-false flag
    /// so a publisher can opt into receiving its own deliveries.
    #[serde(default, rename = "selfDeliver")]
    pub self_deliver: bool,
}

/// Outbound response frame, correlated to a `Request` by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: String,
    pub action: String,
    pub code: u16,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn ok(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            code: 200,
            kind: "response",
            message: None,
            data: None,
        }
    }

    pub fn ok_with_data(
        id: impl Into<String>,
        action: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let mut r = Self::ok(id, action);
        r.data = Some(data);
        r
    }

    pub fn error(
        id: impl Into<String>,
        action: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            code,
            kind: "response",
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn unknown(code: u16, message: impl Into<String>) -> Self {
        Self::error("UNKNOWN", "UNKNOWN", code, message)
    }
}

/// A persist-pipeline error, distinguished from a handler error by `type`.
#[derive(Debug, Clone, Serialize)]
pub struct PersistError {
    pub id: String,
    pub action: String,
    pub code: u16,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl PersistError {
    pub fn new(id: impl Into<String>, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            code: 500,
            kind: "persist",
            message: message.into(),
        }
    }
}

/// Fan-out frame delivered to every subscriber of a published topic.
///
/// Shares `Request`'s field layout but never carries a `type` tag, which is
/// how a receiving client distinguishes it from a `Response`.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: String,
    pub action: String,
    pub topic: String,
    pub data: serde_json::Value,
}

/// A single schema version, exposed to clients in `registerTopic`/`listTopics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub version: u64,
    pub schema: serde_json::Value,
}

/// Topic summary returned by `registerTopic` (when acked) and `listTopics`.
#[derive(Debug, Clone, Serialize)]
pub struct TopicDescriptor {
    pub name: String,
    pub schema: SchemaDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_missing_optional_fields() {
        let req: Request =
            serde_json::from_str(r#"{"id":"a","action":"get","topic":"T"}"#).unwrap();
        assert_eq!(req.id, "a");
        assert!(req.data.is_none());
        assert!(!req.require_ack);
        assert!(req.sender_id.is_none());
        assert!(!req.self_deliver);
    }

    #[test]
    fn response_error_serializes_with_message_and_no_data() {
        let r = Response::error("p2", "publish", 400, "schema doesn't match topics current schema");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["code"], 400);
        assert_eq!(v["type"], "response");
        assert_eq!(v["message"], "schema doesn't match topics current schema");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn delivery_has_no_type_tag() {
        let d = Delivery {
            id: "p1".to_owned(),
            action: "publish".to_owned(),
            topic: "T".to_owned(),
            data: serde_json::json!({"m": "hi"}),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("type").is_none());
    }

    #[test]
    fn unknown_response_echoes_unknown_id_and_action() {
        let r = Response::unknown(400, "malformed json");
        assert_eq!(r.id, "UNKNOWN");
        assert_eq!(r.action, "UNKNOWN");
    }
}
