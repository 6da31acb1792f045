//! The record codec: strict reader, additive writer.
//!
//! Every family goes through the same gate. A line must trim to something,
//! parse as a JSON object, carry no integer `v` above [`SCHEMA_VERSION`],
//! and satisfy the family's field types and closed enums. Anything else
//! decodes to `None` with a warning; read paths skip and continue. Encoding
//! stamps the current schema version and never emits a line its own decoder
//! would reject.

use serde_json::{Map, Value};
use tracing::warn;

use crate::action::{ActionRequest, ActionRow, ActionStatus, DecisionRow, StatusRow};
use crate::event::Event;
use crate::memory::MemoryEntry;
use crate::presence::PresenceSnapshot;

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = 1;

pub(crate) fn default_schema_version() -> i64 {
    SCHEMA_VERSION
}

/// Common gate: trim, parse, require an object, version check.
fn gated_object(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Skipping unparseable record line");
            return None;
        }
    };
    let Value::Object(map) = value else {
        warn!("Skipping non-object record line");
        return None;
    };
    match map.get("v") {
        None => {}
        Some(Value::Number(n)) if n.as_i64().is_some_and(|v| v <= SCHEMA_VERSION) => {}
        Some(other) => {
            warn!(version = %other, "Skipping record with unsupported schema version");
            return None;
        }
    }
    Some(map)
}

/// Decodes one room event line. Unknown kinds, wrong field types and future
/// versions all yield `None`.
pub fn decode_event(raw: &str) -> Option<Event> {
    let mut map = gated_object(raw)?;
    if let Some(Value::String(kind)) = map.get("type") {
        let normalized = kind.trim().to_ascii_lowercase();
        map.insert("type".to_string(), Value::String(normalized));
    }
    match serde_json::from_value::<Event>(Value::Object(map)) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "Skipping invalid event record");
            None
        }
    }
}

/// Decodes one presence document.
pub fn decode_presence(raw: &str) -> Option<PresenceSnapshot> {
    let map = gated_object(raw)?;
    match serde_json::from_value::<PresenceSnapshot>(Value::Object(map)) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(error = %err, "Skipping invalid presence record");
            None
        }
    }
}

/// Decodes one memory entry line. The id is the family's required field.
pub fn decode_memory(raw: &str) -> Option<MemoryEntry> {
    let map = gated_object(raw)?;
    match serde_json::from_value::<MemoryEntry>(Value::Object(map)) {
        Ok(entry) if entry.id.trim().is_empty() => {
            warn!("Skipping memory record with blank id");
            None
        }
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!(error = %err, "Skipping invalid memory record");
            None
        }
    }
}

/// Decodes and classifies one action ledger row.
pub fn decode_action(raw: &str) -> Option<ActionRow> {
    let map = gated_object(raw)?;
    let row = if map.contains_key("decision") {
        serde_json::from_value::<DecisionRow>(Value::Object(map))
            .map(ActionRow::Decision)
    } else if map.contains_key("tool") {
        serde_json::from_value::<ActionRequest>(Value::Object(map))
            .map(|row| ActionRow::Create(Box::new(row)))
    } else if map.contains_key("status") {
        serde_json::from_value::<StatusRow>(Value::Object(map)).map(ActionRow::Status)
    } else {
        warn!("Skipping action row without decision, tool or status");
        return None;
    };
    let row = match row {
        Ok(row) => row,
        Err(err) => {
            warn!(error = %err, "Skipping invalid action row");
            return None;
        }
    };
    if row.action_id().trim().is_empty() {
        warn!("Skipping action row with blank action id");
        return None;
    }
    if let ActionRow::Status(status_row) = &row {
        // Bare transition rows carry post-decision statuses only; pending
        // belongs to creation rows and denied to decision rows.
        if matches!(status_row.status, ActionStatus::Pending | ActionStatus::Denied) {
            warn!(
                status = status_row.status.as_str(),
                "Skipping status row with non-transition status"
            );
            return None;
        }
    }
    Some(row)
}

/// Encodes an event, stamping the current schema version.
pub fn encode_event(event: &Event) -> Result<String, serde_json::Error> {
    let mut event = event.clone();
    event.v = SCHEMA_VERSION;
    serde_json::to_string(&event)
}

/// Encodes a presence snapshot, stamping the current schema version.
pub fn encode_presence(snapshot: &PresenceSnapshot) -> Result<String, serde_json::Error> {
    let mut snapshot = snapshot.clone();
    snapshot.v = SCHEMA_VERSION;
    serde_json::to_string(&snapshot)
}

/// Encodes a memory entry, stamping the current schema version.
pub fn encode_memory(entry: &MemoryEntry) -> Result<String, serde_json::Error> {
    let mut entry = entry.clone();
    entry.v = SCHEMA_VERSION;
    serde_json::to_string(&entry)
}

/// Encodes a ledger row, stamping the current schema version.
pub fn encode_action(row: &ActionRow) -> Result<String, serde_json::Error> {
    match row {
        ActionRow::Create(create) => {
            let mut create = create.clone();
            create.v = SCHEMA_VERSION;
            serde_json::to_string(&create)
        }
        ActionRow::Decision(decision) => {
            let mut decision = decision.clone();
            decision.v = SCHEMA_VERSION;
            serde_json::to_string(&decision)
        }
        ActionRow::Status(status) => {
            let mut status = status.clone();
            status.v = SCHEMA_VERSION;
            serde_json::to_string(&status)
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::event::EventKind;
    use crate::memory::Confidence;

    #[test]
    fn event_round_trips_with_extras() {
        let line = r#"{"v":1,"ts":"2026-08-22T10:00:00","type":"chat","author":"ada","text":"hi","reactions":["+1"],"memory_ids_used":[],"memory_topics_used":[]}"#;
        let event = decode_event(line).unwrap();
        assert_eq!(event.kind, EventKind::Chat);
        assert_eq!(event.author, "ada");
        assert_eq!(
            event.extra.get("reactions"),
            Some(&serde_json::json!(["+1"]))
        );
        let encoded = encode_event(&event).unwrap();
        let again = decode_event(&encoded).unwrap();
        assert_eq!(event, again);
    }

    #[test]
    fn event_kind_is_lowercased_before_validation() {
        let event = decode_event(r#"{"type":"  CHAT ","text":"x"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Chat);
    }

    #[test]
    fn malformed_event_lines_decode_to_none() {
        for bad in [
            "",
            "   ",
            "not json",
            "[1,2,3]",
            "42",
            r#""just a string""#,
            r#"{"type":"teleport","text":"x"}"#,
            r#"{"type":"chat","author":123}"#,
            r#"{"type":"chat","memory_ids_used":"nope"}"#,
            r#"{"text":"no type"}"#,
        ] {
            assert!(decode_event(bad).is_none(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn future_schema_version_is_invalid() {
        assert!(decode_event(r#"{"v":2,"type":"chat","text":"x"}"#).is_none());
        assert!(decode_event(r#"{"v":1.5,"type":"chat","text":"x"}"#).is_none());
        assert!(decode_event(r#"{"v":"1","type":"chat","text":"x"}"#).is_none());
    }

    #[test]
    fn missing_version_reads_as_lowest() {
        let event = decode_event(r#"{"type":"chat","text":"x"}"#).unwrap();
        assert_eq!(event.v, 1);
        // Encoding a version-less row stamps the current version.
        let encoded = encode_event(&event).unwrap();
        assert!(encoded.contains(r#""v":1"#));
    }

    #[test]
    fn memory_requires_id() {
        assert!(decode_memory(r#"{"summary":"no id"}"#).is_none());
        assert!(decode_memory(r#"{"id":"  ","summary":"blank id"}"#).is_none());
        let entry = decode_memory(r#"{"id":"mem_1_abc"}"#).unwrap();
        assert_eq!(entry.topic, "general");
        assert_eq!(entry.confidence, Confidence::Med);
        assert_eq!(entry.author, "Unknown");
    }

    #[test]
    fn memory_rejects_unknown_confidence() {
        assert!(decode_memory(r#"{"id":"m1","confidence":"certain"}"#).is_none());
        assert!(decode_memory(r#"{"id":"m1","confidence":"high"}"#).is_some());
    }

    #[test]
    fn action_rows_classify_by_keys() {
        let create = decode_action(
            r#"{"action_id":"a1","tool":"shell","summary":"ls","status":"pending"}"#,
        )
        .unwrap();
        assert!(matches!(create, ActionRow::Create(_)));

        let decision = decode_action(r#"{"action_id":"a1","decision":"approved"}"#).unwrap();
        assert!(matches!(decision, ActionRow::Decision(_)));

        let status = decode_action(r#"{"action_id":"a1","status":"running"}"#).unwrap();
        assert!(matches!(status, ActionRow::Status(_)));
    }

    #[test]
    fn action_rows_reject_invalid_shapes() {
        for bad in [
            r#"{"action_id":"a1"}"#,
            r#"{"action_id":"","status":"running"}"#,
            r#"{"action_id":"a1","decision":"maybe"}"#,
            r#"{"action_id":"a1","status":"pending"}"#,
            r#"{"action_id":"a1","status":"denied"}"#,
            r#"{"action_id":"a1","status":"launched"}"#,
        ] {
            assert!(decode_action(bad).is_none(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn status_row_keeps_result_payload() {
        let row = decode_action(
            r#"{"action_id":"a1","status":"completed","result":{"exit_code":0,"output":"ok"}}"#,
        )
        .unwrap();
        let ActionRow::Status(status) = row else {
            panic!("expected status row");
        };
        assert_eq!(status.status, ActionStatus::Completed);
        assert_eq!(
            status.result,
            Some(serde_json::json!({"exit_code": 0, "output": "ok"}))
        );
    }

    #[test]
    fn presence_defaults_apply() {
        let snapshot = decode_presence(r#"{"last_seen":12.5}"#).unwrap();
        assert_eq!(snapshot.name, "Anonymous");
        assert_eq!(snapshot.color, "white");
        assert_eq!(snapshot.last_seen, Some(12.5));
        assert!(decode_presence(r#"{"name":77}"#).is_none());
    }

    fn kind_strategy() -> impl Strategy<Value = EventKind> {
        prop_oneof![
            Just(EventKind::Chat),
            Just(EventKind::Me),
            Just(EventKind::System),
            Just(EventKind::AiPrompt),
            Just(EventKind::AiResponse),
        ]
    }

    proptest! {
        #[test]
        fn property_event_round_trip(
            kind in kind_strategy(),
            author in "[a-zA-Z0-9 _.-]{0,24}",
            text in ".{0,120}",
            ids in proptest::collection::vec("[a-z0-9_]{1,12}", 0..4),
        ) {
            let mut event = Event::new(kind, author, text);
            event.memory_ids_used = ids;
            let encoded = encode_event(&event).unwrap();
            let decoded = decode_event(&encoded).unwrap();
            prop_assert_eq!(event, decoded);
        }
    }
}
