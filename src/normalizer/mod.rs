use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::ProgressEvent;

/// Accepted spellings per field, snake_case first.
const SERIES_ID: &[&str] = &["series_id", "seriesId"];
const CHAPTER: &[&str] = &["chapter", "chapterNumber", "chapter_number"];
const POSITION: &[&str] = &["position", "scrollPosition", "scroll_position"];
const TIMESTAMP: &[&str] = &["timestamp"];
const SOURCE_URL: &[&str] = &["source_url", "sourceUrl", "url"];
const SERIES_TITLE: &[&str] = &["series_title", "seriesTitle"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("payload is not an object")]
    NotAnObject,

    #[error("series id must be a non-empty string")]
    InvalidSeriesId,

    #[error("chapter must be a number greater than 0")]
    InvalidChapter,

    #[error("position must be a number greater than or equal to 0")]
    InvalidPosition,

    #[error("timestamp must be a number greater than 0")]
    InvalidTimestamp,

    #[error("source url must be a string")]
    InvalidSourceUrl,
}

/// Turns untyped adapter payloads into [`ProgressEvent`]s.
#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, payload: &Value) -> Result<ProgressEvent, ValidationError> {
        let result = Self::build(payload);
        if let Err(ref e) = result {
            tracing::warn!("Rejected progress payload: {}", e);
        }
        result
    }

    fn build(payload: &Value) -> Result<ProgressEvent, ValidationError> {
        let fields = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        let series_id = field(fields, SERIES_ID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::InvalidSeriesId)?;

        let chapter = field(fields, CHAPTER)
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite() && *c > 0.0)
            .ok_or(ValidationError::InvalidChapter)?;

        let position = field(fields, POSITION)
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite() && *p >= 0.0)
            .ok_or(ValidationError::InvalidPosition)?;

        let timestamp = field(fields, TIMESTAMP)
            .and_then(as_timestamp)
            .ok_or(ValidationError::InvalidTimestamp)?;

        let source_url = field(fields, SOURCE_URL)
            .and_then(Value::as_str)
            .ok_or(ValidationError::InvalidSourceUrl)?;

        let series_title = field(fields, SERIES_TITLE)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(String::from);

        Ok(ProgressEvent {
            series_id: series_id.to_string(),
            chapter,
            position,
            timestamp,
            source_url: source_url.to_string(),
            series_title,
        })
    }
}

/// First non-null value among the field's aliases.
fn field<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|v| !v.is_null())
}

fn as_timestamp(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return (ms > 0).then_some(ms);
    }
    value
        .as_f64()
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        // Sub-millisecond values would truncate to the rejected 0.
        .map(|ms| (ms.trunc() as u64).max(1))
}
