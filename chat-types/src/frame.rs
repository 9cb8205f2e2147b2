//! Frame - the JSON text unit carried by the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AckId, ChatError};

/// One unit on the wire.
///
/// Events carry a name, a payload and an optional ack request; replies to
/// ack requests carry only the ack id and the reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// A named event.
    Event {
        /// Event name (e.g. `joinChat`).
        event: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
        /// Ack id the receiver must answer with, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<AckId>,
    },
    /// Reply to an event that requested an acknowledgement.
    Ack {
        /// The ack id being answered.
        ack: AckId,
        /// Reply payload.
        #[serde(default)]
        data: Value,
    },
}

impl Frame {
    /// Build an ack reply frame.
    pub fn ack(ack: AckId, data: Value) -> Self {
        Self::Ack { ack, data }
    }

    /// Event name, if this is an event frame.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => Some(event),
            Self::Ack { .. } => None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, ChatError> {
        serde_json::to_string(self).map_err(ChatError::from)
    }

    /// Parse a JSON text frame.
    pub fn from_text(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(ChatError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frame_text_shape() {
        let frame = Frame::Event {
            event: "typing".into(),
            data: json!({"conversationId": "c1"}),
            ack: None,
        };
        let text = frame.to_text().unwrap();
        assert_eq!(text, r#"{"event":"typing","data":{"conversationId":"c1"}}"#);
    }

    #[test]
    fn ack_reply_parses_as_ack() {
        let frame = Frame::from_text(r#"{"ack":3,"data":{"_id":"m1"}}"#).unwrap();
        assert_eq!(frame, Frame::ack(AckId::new(3), json!({"_id": "m1"})));
        assert!(frame.event_name().is_none());
    }

    #[test]
    fn event_with_ack_request_parses_as_event() {
        let frame = Frame::from_text(r#"{"event":"getUserStatus","data":{},"ack":9}"#).unwrap();
        assert_eq!(frame.event_name(), Some("getUserStatus"));
        assert!(matches!(frame, Frame::Event { ack: Some(a), .. } if a == AckId::new(9)));
    }

    #[test]
    fn event_without_data_defaults_to_null() {
        let frame = Frame::from_text(r#"{"event":"connected"}"#).unwrap();
        assert!(matches!(frame, Frame::Event { data: Value::Null, .. }));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            Frame::from_text("not json"),
            Err(ChatError::Json(_))
        ));
    }
}
