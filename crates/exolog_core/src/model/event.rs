//! Event domain model.
//!
//! # Responsibility
//! - Define the persisted `Event` entity and the `NormalizedEvent` produced by
//!   the normalizer.
//! - Give content/links their own typed shapes instead of opaque JSON blobs.
//!
//! # Invariants
//! - `id` is stable and never reused for another event.
//! - `ingested_at` comes from the store clock, never from the caller.
//! - `tags` are trimmed, lowercased, non-empty and unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable identifier of a persisted event.
pub type EventId = Uuid;

/// Free-form mapping used by `content.data` and `raw`.
pub type JsonMap = Map<String, Value>;

/// Direction values understood by the note tooling. Advisory only.
pub const KNOWN_DIRECTIONS: &[&str] = &["inbound", "outbound", "system"];

/// Free-form payload of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContent {
    /// Human-readable body. Stored in its own column.
    pub text: Option<String>,
    /// Structured payload. Never null.
    pub data: JsonMap,
}

/// Back-references to where the event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLinks {
    pub external_url: Option<String>,
    pub app: Option<String>,
}

/// Canonicalized event ready to be persisted.
///
/// Carries no id and no ingestion time; both are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub timestamp: DateTime<Utc>,
    pub source_system: String,
    pub channel: String,
    pub actor: Option<String>,
    pub direction: Option<String>,
    pub summary: Option<String>,
    pub content: EventContent,
    pub tags: Vec<String>,
    pub links: EventLinks,
    pub raw: JsonMap,
}

/// One immutable record in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Semantic event time, not insertion time.
    pub timestamp: DateTime<Utc>,
    pub source_system: String,
    pub channel: String,
    pub actor: Option<String>,
    pub direction: Option<String>,
    pub summary: Option<String>,
    pub content: EventContent,
    pub tags: Vec<String>,
    pub links: EventLinks,
    /// Original untouched payload for provenance.
    pub raw: JsonMap,
    /// Set by the store at persistence time.
    pub ingested_at: DateTime<Utc>,
}

impl Event {
    /// Returns whether `tag` is a member of this event's tag set.
    ///
    /// The probe is compared after trimming and lowercasing, matching the
    /// identity used by normalization.
    pub fn has_tag(&self, tag: &str) -> bool {
        let probe = tag.trim().to_lowercase();
        self.tags.iter().any(|value| *value == probe)
    }
}
