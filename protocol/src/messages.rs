//! Connection frames exchanged with subscribed clients.
//!
//! Frames are JSON text. Clients send `{"action": ...}` objects; the server
//! answers with `{"type": ...}` objects.

use fxstream_common::{CurrencyPair, FxStreamError, RateChangeEvent, Result, SessionId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Greeting sent with the `connected` frame.
pub const CONNECTED_MESSAGE: &str = "Connected to FX Rates WebSocket";

const INVALID_FORMAT: &str = "Invalid message format";
const INVALID_PAIRS: &str = "Invalid currencyPairs format";

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "currencyPairs")]
        pairs: Vec<CurrencyPair>,
    },
    Unsubscribe {
        #[serde(rename = "currencyPairs")]
        pairs: Vec<CurrencyPair>,
    },
    Ping,
}

impl ClientMessage {
    /// Parse a client text frame.
    ///
    /// Errors are [`FxStreamError::MalformedClientMessage`] carrying the text
    /// to send back in the `error` frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|_| malformed(INVALID_FORMAT))?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(INVALID_FORMAT))?;

        match action {
            "subscribe" => Ok(ClientMessage::Subscribe {
                pairs: parse_pairs(value.get("currencyPairs"))?,
            }),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                pairs: parse_pairs(value.get("currencyPairs"))?,
            }),
            "ping" => Ok(ClientMessage::Ping),
            other => Err(malformed(format!("Unknown action: {}", other))),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn malformed(message: impl Into<String>) -> FxStreamError {
    FxStreamError::MalformedClientMessage(message.into())
}

fn parse_pairs(value: Option<&Value>) -> Result<Vec<CurrencyPair>> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(INVALID_PAIRS))?;

    items
        .iter()
        .map(|item| {
            let code = item.as_str().ok_or_else(|| malformed(INVALID_PAIRS))?;
            let pair = CurrencyPair::new(code);
            if pair.is_valid() {
                Ok(pair)
            } else {
                Err(malformed(format!("Invalid currency pair: {}", code)))
            }
        })
        .collect()
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected { session_id: SessionId, message: String },
    #[serde(rename_all = "camelCase")]
    Subscribed {
        currency_pairs: Vec<CurrencyPair>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { currency_pairs: Vec<CurrencyPair> },
    /// Epoch milliseconds.
    Pong { timestamp: i64 },
    RateUpdate { event: RateChangeEvent },
    Error { message: String },
}

impl ServerMessage {
    pub fn connected(session_id: SessionId) -> Self {
        ServerMessage::Connected {
            session_id,
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    pub fn subscribed(currency_pairs: Vec<CurrencyPair>) -> Self {
        let message = format!(
            "Successfully subscribed to {} currency pairs",
            currency_pairs.len()
        );
        ServerMessage::Subscribed {
            currency_pairs,
            message,
        }
    }

    pub fn unsubscribed(currency_pairs: Vec<CurrencyPair>) -> Self {
        ServerMessage::Unsubscribed { currency_pairs }
    }

    pub fn pong(timestamp: i64) -> Self {
        ServerMessage::Pong { timestamp }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct RateUpdateFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    event: &'a RateChangeEvent,
}

/// Encode a `rateUpdate` frame without cloning the event.
///
/// The result is shared by every session receiving the broadcast.
pub fn encode_rate_update(event: &RateChangeEvent) -> Result<Arc<str>> {
    let frame = RateUpdateFrame {
        kind: "rateUpdate",
        event,
    };
    Ok(Arc::from(serde_json::to_string(&frame)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxstream_common::Rate;
    use rust_decimal_macros::dec;

    fn error_text(text: &str) -> String {
        match ClientMessage::parse(text) {
            Err(FxStreamError::MalformedClientMessage(msg)) => msg,
            other => panic!("expected malformed message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscribe_uppercases_pairs() {
        let msg = ClientMessage::parse(r#"{"action":"subscribe","currencyPairs":["eurusd","GBPUSD"]}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                pairs: vec!["EURUSD".into(), "GBPUSD".into()]
            }
        );
    }

    #[test]
    fn test_parse_ping() {
        assert_eq!(
            ClientMessage::parse(r#"{"action":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(error_text("{not json"), "Invalid message format");
        assert_eq!(error_text(r#"{"currencyPairs":[]}"#), "Invalid message format");
        assert_eq!(error_text(r#"{"action":"dance"}"#), "Unknown action: dance");
        assert_eq!(
            error_text(r#"{"action":"subscribe"}"#),
            "Invalid currencyPairs format"
        );
        assert_eq!(
            error_text(r#"{"action":"subscribe","currencyPairs":[1,2]}"#),
            "Invalid currencyPairs format"
        );
        assert_eq!(
            error_text(r#"{"action":"unsubscribe","currencyPairs":["EUR"]}"#),
            "Invalid currency pair: EUR"
        );
    }

    #[test]
    fn test_client_frame_encoding() {
        let msg = ClientMessage::Subscribe {
            pairs: vec!["EURUSD".into()],
        };
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["currencyPairs"][0], "EURUSD");
        assert_eq!(ClientMessage::parse(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_server_frames() {
        let connected: Value = serde_json::from_str(
            &ServerMessage::connected(SessionId::new("s-1")).to_json().unwrap(),
        )
        .unwrap();
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["sessionId"], "s-1");
        assert_eq!(connected["message"], CONNECTED_MESSAGE);

        let subscribed: Value = serde_json::from_str(
            &ServerMessage::subscribed(vec!["EURUSD".into(), "GBPUSD".into()])
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(subscribed["type"], "subscribed");
        assert_eq!(subscribed["currencyPairs"][1], "GBPUSD");
        assert_eq!(
            subscribed["message"],
            "Successfully subscribed to 2 currency pairs"
        );

        let pong: Value =
            serde_json::from_str(&ServerMessage::pong(42).to_json().unwrap()).unwrap();
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["timestamp"], 42);
    }

    #[test]
    fn test_rate_update_matches_owned_frame() {
        let rate = Rate::new("EURUSD".into(), dec!(1.0850), "TEST");
        let event = RateChangeEvent::new(rate, None, None, "svc");

        let borrowed = encode_rate_update(&event).unwrap();
        let owned = ServerMessage::RateUpdate {
            event: event.clone(),
        }
        .to_json()
        .unwrap();

        assert_eq!(&*borrowed, owned.as_str());
        let json: Value = serde_json::from_str(&borrowed).unwrap();
        assert_eq!(json["type"], "rateUpdate");
        assert_eq!(json["event"]["eventId"], event.event_id.to_string());
    }
}
