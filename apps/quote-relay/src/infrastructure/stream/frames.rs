//! Frame Codec
//!
//! JSON text frames exchanged with the price-distribution server.
//!
//! # Outbound
//!
//! ```json
//! {"type":"subscribe","symbols":[{"symbol":"RELIANCE","exchange":"NSE"}]}
//! {"type":"unsubscribe","symbols":[{"symbol":"RELIANCE","exchange":"NSE"}]}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"type":"price_update","data":{"seriesKey":"NSE:RELIANCE","symbol":"RELIANCE","exchange":"NSE","lp":2501.5,"ts":1767052800000}}
//! ```
//!
//! Any other `type` becomes a named [`StreamEvent::Message`]. A frame may
//! also be a JSON array of such objects.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::series::{SeriesKey, normalize};
use crate::domain::streaming::{OutboundFrame, PriceTick, StreamEvent};

/// Message type of inbound price ticks.
pub const PRICE_UPDATE: &str = "price_update";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame object has no string `type` field.
    #[error("frame has no type field")]
    MissingType,

    /// Frame is not a JSON object or array.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceUpdateData {
    #[serde(default)]
    series_key: Option<String>,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    exchange: String,
    #[serde(with = "rust_decimal::serde::float")]
    lp: Decimal,
    #[serde(default)]
    ts: Option<i64>,
}

/// JSON codec for the streaming wire contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound frame.
    #[must_use]
    pub fn encode(&self, frame: &OutboundFrame) -> String {
        match frame {
            OutboundFrame::Subscribe(symbols) => {
                json!({ "type": "subscribe", "symbols": symbols }).to_string()
            }
            OutboundFrame::Unsubscribe(symbols) => {
                json!({ "type": "unsubscribe", "symbols": symbols }).to_string()
            }
            OutboundFrame::Raw(value) => value.to_string(),
        }
    }

    /// Decode one inbound text frame into events.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is not an object or array,
    /// or a single-object `price_update` payload is malformed. Malformed
    /// items inside an array are logged and skipped; the rest still decode.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamEvent>, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| match self.decode_object(item) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(index, error = %e, "Skipping malformed frame item");
                        None
                    }
                })
                .collect()),
            object @ Value::Object(_) => Ok(vec![self.decode_object(object)?]),
            other => Err(CodecError::InvalidFormat(truncate(&other.to_string()))),
        }
    }

    fn decode_object(&self, mut value: Value) -> Result<StreamEvent, CodecError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingType)?
            .to_string();
        let data = value
            .as_object_mut()
            .and_then(|object| object.remove("data"))
            .unwrap_or(Value::Null);

        if kind != PRICE_UPDATE {
            return Ok(StreamEvent::Message { kind, data });
        }

        let update: PriceUpdateData = serde_json::from_value(data)?;
        let series_key = update
            .series_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map_or_else(
                || normalize(&update.symbol, &update.exchange),
                SeriesKey::parse,
            );
        let ts = update
            .ts
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(StreamEvent::Price(PriceTick {
            series_key,
            symbol: update.symbol,
            exchange: update.exchange,
            price: update.lp,
            ts,
        }))
    }
}

fn truncate(raw: &str) -> String {
    raw.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::series::InstrumentRef;

    #[test]
    fn encodes_subscribe_frame() {
        let frame = OutboundFrame::Subscribe(vec![InstrumentRef::new("RELIANCE", "NSE")]);

        let encoded: Value = serde_json::from_str(&FrameCodec::new().encode(&frame)).unwrap();

        assert_eq!(
            encoded,
            json!({"type": "subscribe", "symbols": [{"symbol": "RELIANCE", "exchange": "NSE"}]})
        );
    }

    #[test]
    fn encodes_unsubscribe_frame() {
        let frame = OutboundFrame::Unsubscribe(vec![InstrumentRef::new("TCS", "BSE")]);

        let encoded: Value = serde_json::from_str(&FrameCodec::new().encode(&frame)).unwrap();

        assert_eq!(encoded["type"], "unsubscribe");
        assert_eq!(encoded["symbols"][0]["exchange"], "BSE");
    }

    #[test]
    fn decodes_price_update() {
        let text = r#"{"type":"price_update","data":{"seriesKey":"nse:reliance","symbol":"RELIANCE","exchange":"NSE","lp":2501.5,"ts":1767052800000}}"#;

        let events = FrameCodec::new().decode(text).unwrap();

        let [StreamEvent::Price(tick)] = events.as_slice() else {
            panic!("expected one price event, got {events:?}");
        };
        assert_eq!(tick.series_key.as_str(), "NSE:RELIANCE");
        assert_eq!(tick.price, dec!(2501.5));
        assert_eq!(tick.ts.timestamp_millis(), 1_767_052_800_000);
    }

    #[test]
    fn derives_key_when_missing() {
        let text = r#"{"type":"price_update","data":{"symbol":"tcs","exchange":"nse","lp":3900}}"#;

        let events = FrameCodec::new().decode(text).unwrap();

        let [StreamEvent::Price(tick)] = events.as_slice() else {
            panic!("expected one price event");
        };
        assert_eq!(tick.series_key.as_str(), "NSE:TCS");
    }

    #[test]
    fn other_types_become_named_messages() {
        let text = r#"{"type":"error","data":{"seriesKey":"NSE:TCS","code":"not_found"}}"#;

        let events = FrameCodec::new().decode(text).unwrap();

        assert_eq!(
            events,
            vec![StreamEvent::Message {
                kind: "error".to_string(),
                data: json!({"seriesKey": "NSE:TCS", "code": "not_found"}),
            }]
        );
    }

    #[test]
    fn decodes_arrays_in_order() {
        let text = r#"[{"type":"price_update","data":{"symbol":"A","exchange":"NSE","lp":1}},{"type":"heartbeat"}]"#;

        let events = FrameCodec::new().decode(text).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Price(_)));
        assert!(matches!(&events[1], StreamEvent::Message { kind, .. } if kind == "heartbeat"));
    }

    #[test]
    fn bad_array_items_do_not_drop_their_neighbours() {
        let text = r#"[
            {"type":"price_update","data":{"symbol":"A","exchange":"NSE","lp":1}},
            {"type":"price_update","data":{"symbol":"B"}},
            {"data":{}},
            {"type":"price_update","data":{"symbol":"C","exchange":"NSE","lp":3}}
        ]"#;

        let events = FrameCodec::new().decode(text).unwrap();

        let keys: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Price(tick) => Some(tick.series_key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["NSE:A", "NSE:C"]);
    }

    #[test]
    fn rejects_frames_without_type() {
        let result = FrameCodec::new().decode(r#"{"data":{}}"#);
        assert!(matches!(result, Err(CodecError::MissingType)));
    }

    #[test]
    fn rejects_scalars() {
        let result = FrameCodec::new().decode("42");
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_malformed_price() {
        let result = FrameCodec::new().decode(r#"{"type":"price_update","data":{"symbol":"A"}}"#);
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
