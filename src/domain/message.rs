use serde::Deserialize;
use serde_json::Value;

/// Message type carrying a raw progress payload.
pub const PROGRESS_UPDATE: &str = "PROGRESS_UPDATE";

/// Envelope sent by content adapters: `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    /// Interpret `value` as an envelope, falling back to treating it as a bare
    /// progress payload when it carries no `type` field.
    pub fn from_value(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str).is_some() {
            if let Ok(message) = serde_json::from_value::<InboundMessage>(value.clone()) {
                return message;
            }
        }
        Self {
            kind: PROGRESS_UPDATE.to_string(),
            payload: value,
        }
    }

    pub fn is_progress_update(&self) -> bool {
        self.kind == PROGRESS_UPDATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parsed() {
        let msg = InboundMessage::from_value(json!({
            "type": "PROGRESS_UPDATE",
            "payload": {"series_id": "S1"}
        }));
        assert!(msg.is_progress_update());
        assert_eq!(msg.payload["series_id"], "S1");
    }

    #[test]
    fn test_bare_payload_treated_as_progress() {
        let msg = InboundMessage::from_value(json!({"seriesId": "S1", "chapterNumber": 2}));
        assert!(msg.is_progress_update());
        assert_eq!(msg.payload["seriesId"], "S1");
    }

    #[test]
    fn test_unknown_type_preserved() {
        let msg = InboundMessage::from_value(json!({"type": "CHECK_UPDATES", "payload": {}}));
        assert!(!msg.is_progress_update());
        assert_eq!(msg.kind, "CHECK_UPDATES");
    }
}
