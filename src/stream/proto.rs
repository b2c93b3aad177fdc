use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message type carried by a streaming session.
///
/// Heartbeat framing differs per feed, so each message type decides for
/// itself whether it is a keep-alive.
pub trait StreamMessage: DeserializeOwned + Send + 'static {
    /// Returns `true` for keep-alive messages that must not reach listeners.
    fn is_heartbeat(&self) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatMsg {
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickMsg {
    pub instrument: String,
    pub time: String,
    pub bid: f64,
    pub ask: f64,
}

impl TickMsg {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// One line of the rates stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RateStreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<TickMsg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatMsg>,
}

impl StreamMessage for RateStreamMessage {
    fn is_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }
}

/// Transaction record pushed on the events stream.
///
/// Only the envelope fields are typed; everything else the server sends
/// (units, price, side, ...) is kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMsg {
    pub id: u64,
    pub account_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One line of the events stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccountEventMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionMsg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatMsg>,
}

impl StreamMessage for AccountEventMessage {
    fn is_heartbeat(&self) -> bool {
        self.transaction.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AccountEventMessage, RateStreamMessage, StreamMessage};

    #[test]
    fn rate_tick_is_payload() {
        let message: RateStreamMessage = serde_json::from_str(
            r#"{"tick":{"instrument":"EUR_USD","time":"2014-03-07T20:58:07.461445Z","bid":1.38701,"ask":1.38712}}"#,
        )
        .expect("parse tick");
        assert!(!message.is_heartbeat());
        let tick = message.tick.expect("tick present");
        assert_eq!(tick.instrument, "EUR_USD");
        assert!((tick.spread() - 0.00011).abs() < 1e-9);
    }

    #[test]
    fn rate_heartbeat_uses_dedicated_sub_message() {
        let message: RateStreamMessage =
            serde_json::from_str(r#"{"heartbeat":{"time":"2014-03-07T20:58:09.000000Z"}}"#)
                .expect("parse heartbeat");
        assert!(message.is_heartbeat());
        assert!(message.tick.is_none());
    }

    #[test]
    fn event_without_transaction_is_heartbeat() {
        let heartbeat: AccountEventMessage =
            serde_json::from_str(r#"{"heartbeat":{"time":"t"}}"#).expect("parse heartbeat");
        assert!(heartbeat.is_heartbeat());

        let null_transaction: AccountEventMessage =
            serde_json::from_str(r#"{"transaction":null}"#).expect("parse null transaction");
        assert!(null_transaction.is_heartbeat());
    }

    #[test]
    fn event_transaction_keeps_untyped_fields() {
        let message: AccountEventMessage = serde_json::from_value(json!({
            "transaction": {
                "id": 176403879,
                "accountId": 6765103,
                "type": "MARKET_ORDER_CREATE",
                "time": "2014-04-07T18:31:05Z",
                "instrument": "EUR_USD",
                "units": 2,
                "side": "buy",
                "price": 1.25325
            }
        }))
        .expect("parse transaction");

        assert!(!message.is_heartbeat());
        let transaction = message.transaction.expect("transaction present");
        assert_eq!(transaction.account_id, 6765103);
        assert_eq!(transaction.kind, "MARKET_ORDER_CREATE");
        assert_eq!(transaction.extra.get("side"), Some(&json!("buy")));
        assert!(!transaction.extra.contains_key("accountId"));
    }
}
