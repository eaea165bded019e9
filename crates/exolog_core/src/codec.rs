//! Record codec between flat `events` rows and the `Event` entity.
//!
//! # Responsibility
//! - Encode typed substructures (content data, tags, links, raw) as JSON text.
//! - Decode rows back into `Event`, defaulting absent substructures.
//!
//! # Invariants
//! - `content.text` is stored as plain text in `content_text`, never in JSON.
//! - Timestamps are stored as fixed-width UTC text, so text order equals time
//!   order.
//! - NULL substructure columns decode to defaults; unparseable ones are
//!   `CodecError::Corrupt`, never silently defaulted.

use crate::model::event::{Event, EventContent, EventId, EventLinks, JsonMap, NormalizedEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Column list shared by every `events` select.
pub const STORED_COLUMNS: &str = "id,
    timestamp,
    source_system,
    channel,
    actor,
    direction,
    summary,
    content_text,
    content_json,
    tags,
    links_json,
    raw_json,
    ingested_at";

/// Decode failure for one persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A column holds text that cannot be read back.
    Corrupt {
        /// `None` when the engine reported the fault without a row id.
        row_id: Option<String>,
        column: &'static str,
        message: String,
    },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corrupt {
                row_id: Some(row_id),
                column,
                message,
            } => write!(f, "corrupt events.{column} in row `{row_id}`: {message}"),
            Self::Corrupt {
                row_id: None,
                column,
                message,
            } => write!(f, "corrupt events.{column}: {message}"),
        }
    }
}

impl Error for CodecError {}

/// Flat persisted form of one event, one field per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    pub timestamp: String,
    pub source_system: String,
    pub channel: String,
    pub actor: Option<String>,
    pub direction: Option<String>,
    pub summary: Option<String>,
    pub content_text: Option<String>,
    pub content_json: Option<String>,
    pub tags: Option<String>,
    pub links_json: Option<String>,
    pub raw_json: Option<String>,
    pub ingested_at: String,
}

impl StoredRow {
    /// Reads a row selected with [`STORED_COLUMNS`].
    pub fn from_sql_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            source_system: row.get("source_system")?,
            channel: row.get("channel")?,
            actor: row.get("actor")?,
            direction: row.get("direction")?,
            summary: row.get("summary")?,
            content_text: row.get("content_text")?,
            content_json: row.get("content_json")?,
            tags: row.get("tags")?,
            links_json: row.get("links_json")?,
            raw_json: row.get("raw_json")?,
            ingested_at: row.get("ingested_at")?,
        })
    }
}

/// Formats an instant in the sortable form used by `timestamp` columns.
///
/// Example: `2024-01-01T10:00:00.000000Z`.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Encodes a normalized event into its persisted row.
pub fn encode(id: EventId, event: &NormalizedEvent, ingested_at: DateTime<Utc>) -> StoredRow {
    let tags = Value::Array(event.tags.iter().cloned().map(Value::String).collect());
    let links = serde_json::json!({
        "external_url": event.links.external_url,
        "app": event.links.app,
    });

    StoredRow {
        id: id.to_string(),
        timestamp: format_timestamp(&event.timestamp),
        source_system: event.source_system.clone(),
        channel: event.channel.clone(),
        actor: event.actor.clone(),
        direction: event.direction.clone(),
        summary: event.summary.clone(),
        content_text: event.content.text.clone(),
        content_json: Some(Value::Object(event.content.data.clone()).to_string()),
        tags: Some(tags.to_string()),
        links_json: Some(links.to_string()),
        raw_json: Some(Value::Object(event.raw.clone()).to_string()),
        ingested_at: format_timestamp(&ingested_at),
    }
}

/// Decodes a persisted row into an `Event`.
///
/// # Errors
/// - `CodecError::Corrupt` when the id, a timestamp, or a non-NULL JSON column
///   cannot be parsed into its expected shape.
pub fn decode(row: StoredRow) -> Result<Event, CodecError> {
    let id = Uuid::parse_str(&row.id).map_err(|err| corrupt(&row.id, "id", err))?;
    let timestamp = parse_stored_timestamp(&row.id, "timestamp", &row.timestamp)?;
    let ingested_at = parse_stored_timestamp(&row.id, "ingested_at", &row.ingested_at)?;

    let data: JsonMap = decode_json(&row.id, "content_json", row.content_json.as_deref())?
        .unwrap_or_default();
    let tags: Vec<String> = decode_json(&row.id, "tags", row.tags.as_deref())?.unwrap_or_default();
    let links: EventLinks =
        decode_json(&row.id, "links_json", row.links_json.as_deref())?.unwrap_or_default();
    let raw: JsonMap = decode_json(&row.id, "raw_json", row.raw_json.as_deref())?.unwrap_or_default();

    Ok(Event {
        id,
        timestamp,
        source_system: row.source_system,
        channel: row.channel,
        actor: row.actor,
        direction: row.direction,
        summary: row.summary,
        content: EventContent {
            text: row.content_text,
            data,
        },
        tags,
        links,
        raw,
        ingested_at,
    })
}

fn parse_stored_timestamp(
    row_id: &str,
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| corrupt(row_id, column, err))
}

// NULL and a JSON `null` literal both mean "never written".
fn decode_json<T: DeserializeOwned>(
    row_id: &str,
    column: &'static str,
    text: Option<&str>,
) -> Result<Option<T>, CodecError> {
    match text {
        None => Ok(None),
        Some(text) => {
            serde_json::from_str::<Option<T>>(text).map_err(|err| corrupt(row_id, column, err))
        }
    }
}

fn corrupt(row_id: &str, column: &'static str, err: impl Display) -> CodecError {
    CodecError::Corrupt {
        row_id: Some(row_id.to_string()),
        column,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, format_timestamp, CodecError, StoredRow};
    use crate::normalize::{normalize, EventPayload};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn encoded_row() -> StoredRow {
        let payload = EventPayload::new("2024-01-01T10:00:00Z", "manual", "note")
            .with_tags(["Idea", "idea", " Walk "])
            .with_text("walk idea: voice ui");
        let normalized = normalize(&payload).unwrap();
        encode(Uuid::new_v4(), &normalized, Utc::now())
    }

    #[test]
    fn content_text_is_plain_and_substructures_are_json() {
        let row = encoded_row();
        assert_eq!(row.content_text.as_deref(), Some("walk idea: voice ui"));
        assert_eq!(row.tags.as_deref(), Some(r#"["idea","walk"]"#));
        assert_eq!(row.content_json.as_deref(), Some("{}"));
        assert_eq!(row.raw_json.as_deref(), Some("{}"));
        assert_eq!(row.timestamp, "2024-01-01T10:00:00.000000Z");
    }

    #[test]
    fn round_trip_preserves_core_fields() {
        let row = encoded_row();
        let event = decode(row).unwrap();
        assert_eq!(event.source_system, "manual");
        assert_eq!(event.channel, "note");
        assert_eq!(event.tags, vec!["idea", "walk"]);
        assert_eq!(event.content.text.as_deref(), Some("walk idea: voice ui"));
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn null_substructures_decode_to_defaults() {
        let mut row = encoded_row();
        row.content_json = None;
        row.tags = None;
        row.links_json = Some("null".to_string());
        row.raw_json = None;

        let event = decode(row).unwrap();
        assert!(event.content.data.is_empty());
        assert!(event.tags.is_empty());
        assert!(event.links.external_url.is_none());
        assert!(event.links.app.is_none());
        assert!(event.raw.is_empty());
    }

    #[test]
    fn unparseable_substructure_is_corrupt_not_default() {
        let mut row = encoded_row();
        row.tags = Some("[\"idea\"".to_string());
        let err = decode(row).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { column: "tags", .. }));
    }

    #[test]
    fn wrong_json_shape_is_corrupt() {
        let mut row = encoded_row();
        row.raw_json = Some("[1, 2]".to_string());
        let err = decode(row).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { column: "raw_json", .. }));
    }

    #[test]
    fn bad_stored_timestamp_is_corrupt() {
        let mut row = encoded_row();
        row.timestamp = "not-a-time".to_string();
        let err = decode(row).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { column: "timestamp", .. }));
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }
}
