//! Payload validation and canonicalization.
//!
//! # Responsibility
//! - Accept the loosely-shaped boundary payload (`EventPayload`).
//! - Produce a `NormalizedEvent` with canonical tags and defaulted
//!   substructures, or a `ValidationError` naming the offending field.
//!
//! # Invariants
//! - Pure: no id generation, no clock, no I/O.
//! - Tag normalization is idempotent.

use crate::model::event::{EventContent, EventLinks, JsonMap, NormalizedEvent};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maximum length, in characters, of a summary derived from content text.
pub const SUMMARY_MAX_CHARS: usize = 80;

/// Fractional-second digits kept on event timestamps (microseconds).
pub const TIMESTAMP_PRECISION_DIGITS: u16 = 6;

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Validation failure for one payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field absent, or blank after trimming.
    MissingField(&'static str),
    /// `timestamp` present but not an ISO-8601 date-time.
    InvalidTimestamp { value: String, message: String },
}

impl ValidationError {
    /// Name of the payload field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingField(field) => *field,
            Self::InvalidTimestamp { .. } => "timestamp",
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::InvalidTimestamp { value, message } => {
                write!(f, "invalid timestamp `{value}`: {message}")
            }
        }
    }
}

impl Error for ValidationError {}

/// Tags as they arrive from callers: one string or a list of strings.
///
/// `null` list entries are accepted and dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    One(String),
    Many(Vec<Option<String>>),
}

impl TagsInput {
    fn values(&self) -> Vec<&str> {
        match self {
            Self::One(tag) => vec![tag.as_str()],
            Self::Many(tags) => tags.iter().flatten().map(String::as_str).collect(),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for TagsInput {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::Many(iter.into_iter().map(|tag| Some(tag.into())).collect())
    }
}

/// Event payload as received from a caller, before any validation.
///
/// Every field is optional so that missing required fields are reported by
/// [`normalize`] with the field name, instead of by a deserializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPayload {
    /// ISO-8601 date-time; naive values are read as UTC.
    pub timestamp: Option<String>,
    pub source_system: Option<String>,
    pub channel: Option<String>,
    pub actor: Option<String>,
    pub direction: Option<String>,
    pub summary: Option<String>,
    pub content: Option<EventContent>,
    pub tags: Option<TagsInput>,
    pub links: Option<EventLinks>,
    pub raw: Option<JsonMap>,
}

impl EventPayload {
    /// Creates a payload carrying only the required fields.
    pub fn new(
        timestamp: impl Into<String>,
        source_system: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            source_system: Some(source_system.into()),
            channel: Some(channel.into()),
            ..Self::default()
        }
    }

    /// Sets the tag list.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    /// Sets `content.text`, keeping any existing `content.data`.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let mut content = self.content.take().unwrap_or_default();
        content.text = Some(text.into());
        self.content = Some(content);
        self
    }
}

/// Validates and canonicalizes one payload.
///
/// # Errors
/// - `MissingField` for an absent `timestamp`, or an absent/blank
///   `source_system` or `channel`.
/// - `InvalidTimestamp` when `timestamp` cannot be parsed.
pub fn normalize(payload: &EventPayload) -> Result<NormalizedEvent, ValidationError> {
    let timestamp_text = payload
        .timestamp
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::MissingField("timestamp"))?;
    let timestamp = parse_timestamp(timestamp_text)?;
    let source_system = required_text(payload.source_system.as_deref(), "source_system")?;
    let channel = required_text(payload.channel.as_deref(), "channel")?;

    let content = payload.content.clone().unwrap_or_default();
    let summary = optional_text(payload.summary.as_deref())
        .or_else(|| content.text.as_deref().and_then(derive_summary));
    let tags = payload
        .tags
        .as_ref()
        .map(|input| normalize_tags(&input.values()))
        .unwrap_or_default();

    Ok(NormalizedEvent {
        timestamp,
        source_system,
        channel,
        actor: optional_text(payload.actor.as_deref()),
        direction: optional_text(payload.direction.as_deref()),
        summary,
        content,
        tags,
        links: payload.links.clone().unwrap_or_default(),
        raw: payload.raw.clone().unwrap_or_default(),
    })
}

/// Parses an ISO-8601 date-time into UTC at stored precision.
///
/// Values with an explicit offset are converted; values without one are read
/// as UTC. Sub-microsecond digits are dropped, so the returned instant is
/// exactly the one persisted.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    parse_instant(value).map(|instant| instant.trunc_subsecs(TIMESTAMP_PRECISION_DIGITS))
}

/// Parses like [`parse_timestamp`] but keeps full nanosecond precision.
pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();
    let rfc3339_err = match DateTime::parse_from_rfc3339(trimmed) {
        Ok(parsed) => return Ok(parsed.with_timezone(&Utc)),
        Err(err) => err,
    };

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp {
            value: trimmed.to_string(),
            message: rfc3339_err.to_string(),
        })
}

/// Normalizes one tag value: trimmed and lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates tags, keeping first-seen order.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if let Some(value) = normalize_tag(tag.as_ref()) {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
    }
    unique
}

/// Derives a short label from content text.
///
/// Whitespace runs collapse to one space, then the first
/// [`SUMMARY_MAX_CHARS`] characters are kept.
pub fn derive_summary(text: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(text, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(SUMMARY_MAX_CHARS).collect())
}

fn required_text(value: Option<&str>, field: &'static str) -> Result<String, ValidationError> {
    optional_text(value).ok_or(ValidationError::MissingField(field))
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
