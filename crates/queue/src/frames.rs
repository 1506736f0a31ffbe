//! Broker wire protocol: JSON text frames over the WebSocket connection.
//!
//! Client -> broker: `declare` (bind the named durable queue), `consume`
//! (start deliveries), `publish`, `ack`. Broker -> client: `declared`
//! confirmation and `deliver` with a per-delivery tag the client echoes back
//! in `ack`. Unacknowledged deliveries are redelivered by the broker, which
//! is where the at-least-once contract comes from.

use serde::{Deserialize, Serialize};

/// Frames sent by this client to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Declare {
        queue: String,
        durable: bool,
    },
    Consume {
        queue: String,
    },
    Publish {
        queue: String,
        persistent: bool,
        body: serde_json::Value,
    },
    Ack {
        delivery_tag: u64,
    },
}

/// Frames sent by the broker to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerFrame {
    Declared {
        queue: String,
    },
    Deliver {
        delivery_tag: u64,
        body: serde_json::Value,
    },
}

/// Parse a frame arriving from the broker.
pub fn parse_broker_frame(text: &str) -> Result<BrokerFrame, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse a frame arriving from a client (loopback brokers, tests).
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn declare_frame_serializes_with_type_tag() {
        let frame = ClientFrame::Declare {
            queue: "document_generation_queue".to_string(),
            durable: true,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "declare");
        assert_eq!(json["durable"], true);
    }

    #[test]
    fn publish_frame_preserves_body() {
        let frame = ClientFrame::Publish {
            queue: "document_generation_queue".to_string(),
            persistent: true,
            body: serde_json::json!({"type": "document_generation", "payload": {"job_id": 5}}),
        };

        let text = serde_json::to_string(&frame).unwrap();
        let back = parse_client_frame(&text).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn parse_deliver_frame() {
        let text = r#"{"type": "deliver", "delivery_tag": 42, "body": {"type": "document_generation", "payload": {}}}"#;
        assert_matches!(
            parse_broker_frame(text).unwrap(),
            BrokerFrame::Deliver { delivery_tag: 42, .. }
        );
    }

    #[test]
    fn parse_declared_confirmation() {
        let text = r#"{"type": "declared", "queue": "document_generation_queue"}"#;
        assert_matches!(
            parse_broker_frame(text).unwrap(),
            BrokerFrame::Declared { queue } if queue == "document_generation_queue"
        );
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(parse_broker_frame(r#"{"type": "nack", "delivery_tag": 1}"#).is_err());
        assert!(parse_client_frame(r#"{"type": "declare_ok"}"#).is_err());
    }

    #[test]
    fn ack_round_trips() {
        let frame = ClientFrame::Ack { delivery_tag: 7 };
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(text, r#"{"type":"ack","delivery_tag":7}"#);
        assert_eq!(parse_client_frame(&text).unwrap(), frame);
    }
}
