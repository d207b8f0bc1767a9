//! Shape-stream JSON wire format.
//!
//! Data messages:
//!
//! ```json
//! {"headers": {"operation": "update"}, "key": "\"public\".\"reports\"/\"r1\"",
//!  "value": {"id": "r1", "name": "A"}, "offset": "26800584_4"}
//! ```
//!
//! Control messages: `{"headers": {"control": "up-to-date"}}` and
//! `{"headers": {"control": "must-refetch"}}`.
//!
//! Offsets are either a plain integer or `"<tx>_<op>"`, packed as
//! `tx << 32 | op` so that sequence order follows log order.

use crate::error::FeedError;
use crate::types::{ChangeMessage, FeedEvent, Operation, Sequence};
use crate::value::Value;
use serde::Deserialize;

#[derive(Deserialize)]
struct WireMessage {
    headers: WireHeaders,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    offset: Option<WireOffset>,
}

#[derive(Deserialize)]
struct WireHeaders {
    #[serde(default)]
    operation: Option<Operation>,
    #[serde(default)]
    control: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireOffset {
    Number(u64),
    Text(String),
}

impl WireOffset {
    fn to_sequence(&self) -> Result<Sequence, FeedError> {
        match self {
            WireOffset::Number(n) => Ok(Sequence(*n)),
            WireOffset::Text(text) => parse_offset(text),
        }
    }
}

fn parse_offset(text: &str) -> Result<Sequence, FeedError> {
    let bad = || FeedError::Malformed(format!("invalid offset: {text:?}"));
    match text.split_once('_') {
        Some((tx, op)) => {
            let tx: u64 = tx.parse().map_err(|_| bad())?;
            let op: u64 = op.parse().map_err(|_| bad())?;
            if tx > u32::MAX as u64 || op > u32::MAX as u64 {
                return Err(bad());
            }
            Ok(Sequence(tx << 32 | op))
        }
        None => text.parse().map(Sequence).map_err(|_| bad()),
    }
}

/// Decode a single message.
pub fn decode_event(bytes: &[u8]) -> Result<FeedEvent, FeedError> {
    let message: WireMessage = serde_json::from_slice(bytes)?;
    from_wire(message)
}

/// Decode a JSON array of messages. Each element is decoded on its own so a
/// single malformed element does not discard the batch.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Result<FeedEvent, FeedError>>, FeedError> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
    Ok(items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<WireMessage>(item)
                .map_err(FeedError::from)
                .and_then(from_wire)
        })
        .collect())
}

fn from_wire(message: WireMessage) -> Result<FeedEvent, FeedError> {
    if let Some(control) = message.headers.control.as_deref() {
        return match control {
            "up-to-date" => Ok(FeedEvent::UpToDate),
            "must-refetch" => Ok(FeedEvent::MustRefetch),
            other => Err(FeedError::Malformed(format!("unknown control: {other}"))),
        };
    }

    let operation = message
        .headers
        .operation
        .ok_or_else(|| FeedError::Malformed("missing operation header".into()))?;
    let sequence = message
        .offset
        .as_ref()
        .ok_or_else(|| FeedError::Malformed("missing offset".into()))?
        .to_sequence()?;

    let value = match (operation, message.value) {
        (_, Some(value)) => Value::from(value),
        (Operation::Delete, None) => Value::Null,
        (_, None) => {
            return Err(FeedError::Malformed(format!(
                "{operation} message without value"
            )))
        }
    };

    Ok(FeedEvent::Change(ChangeMessage {
        operation,
        key: message.key,
        value,
        sequence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_update() {
        let bytes = br#"{"headers":{"operation":"update"},"key":"r1","value":{"id":"r1","name":"A"},"offset":7}"#;
        match decode_event(bytes).unwrap() {
            FeedEvent::Change(message) => {
                assert_eq!(message.operation, Operation::Update);
                assert_eq!(message.key.as_deref(), Some("r1"));
                assert_eq!(message.value["name"], "A");
                assert_eq!(message.sequence, Sequence(7));
            }
            other => panic!("Expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_controls() {
        assert_eq!(
            decode_event(br#"{"headers":{"control":"up-to-date"}}"#).unwrap(),
            FeedEvent::UpToDate
        );
        assert_eq!(
            decode_event(br#"{"headers":{"control":"must-refetch"}}"#).unwrap(),
            FeedEvent::MustRefetch
        );
    }

    #[test]
    fn test_log_offsets_keep_order() {
        let a = parse_offset("26800584_4").unwrap();
        let b = parse_offset("26800584_5").unwrap();
        let c = parse_offset("26800585_0").unwrap();
        assert!(a < b && b < c);
        assert!(parse_offset("x_1").is_err());
    }

    #[test]
    fn test_delete_without_value() {
        let event = decode_event(br#"{"headers":{"operation":"delete"},"key":"r1","offset":"3"}"#)
            .unwrap();
        assert!(matches!(event, FeedEvent::Change(ref m) if m.value.is_null()));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(decode_event(b"not json"), Err(FeedError::Malformed(_))));
        assert!(matches!(
            decode_event(br#"{"headers":{"operation":"insert"},"offset":1}"#),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            decode_event(br#"{"headers":{"operation":"upsert"},"value":{},"offset":1}"#),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            decode_event(br#"{"headers":{"control":"pause"}}"#),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn test_batch_isolates_bad_elements() {
        let bytes = br#"[
            {"headers":{"operation":"insert"},"value":{"id":1},"offset":1},
            {"headers":{}},
            {"headers":{"control":"up-to-date"}}
        ]"#;
        let events = decode_batch(bytes).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
        assert_eq!(events[2], Ok(FeedEvent::UpToDate));
    }
}
