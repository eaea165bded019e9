//! Filter predicates and SQL compilation for event retrieval.
//!
//! # Responsibility
//! - Model the optional, AND-combined predicates callers may filter by.
//! - Parse boundary parameters strictly: unknown keys are errors.
//! - Compile a filter into one bounded, ordered `SELECT` with bound params.
//!
//! # Invariants
//! - Results are ordered by `timestamp DESC`, ties by insertion order.
//! - Tag predicates test membership in the decoded tag array, never a
//!   substring of the encoded text.
//! - Every compiled query carries a `LIMIT`.

use crate::codec::{format_timestamp, STORED_COLUMNS};
use crate::normalize::{normalize_tag, parse_instant, TIMESTAMP_PRECISION_DIGITS};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Limit applied when a boundary caller does not provide one.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;
/// Largest accepted limit.
pub const MAX_QUERY_LIMIT: u32 = 500;

/// Keys accepted by [`EventFilter::from_params`].
pub const FILTER_KEYS: &[&str] = &[
    "start",
    "end",
    "source_system",
    "channel",
    "tag",
    "limit",
    "offset",
];

/// Rejected filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Parameter name is not a supported predicate.
    UnknownField(String),
    /// Parameter value cannot be parsed.
    InvalidValue {
        field: &'static str,
        value: String,
        message: String,
    },
    /// `limit` outside `1..=MAX_QUERY_LIMIT`.
    LimitOutOfRange(u32),
    /// `start` is later than `end`.
    InvertedRange,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField(field) => write!(
                f,
                "unsupported filter field `{field}`; expected one of {}",
                FILTER_KEYS.join("|")
            ),
            Self::InvalidValue {
                field,
                value,
                message,
            } => write!(f, "invalid value `{value}` for filter `{field}`: {message}"),
            Self::LimitOutOfRange(limit) => {
                write!(f, "limit {limit} must be between 1 and {MAX_QUERY_LIMIT}")
            }
            Self::InvertedRange => write!(f, "filter start is later than end"),
        }
    }
}

impl Error for FilterError {}

/// Predicates for selecting events. All are optional and combined with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Inclusive lower bound on `timestamp`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub end: Option<DateTime<Utc>>,
    pub source_system: Option<String>,
    pub channel: Option<String>,
    /// Every tag listed must be present on the event.
    pub tags: Vec<String>,
    pub limit: u32,
    pub offset: u32,
}

impl EventFilter {
    /// Creates a filter with no predicates and the given result cap.
    pub fn new(limit: u32) -> Self {
        Self {
            start: None,
            end: None,
            source_system: None,
            channel: None,
            tags: Vec::new(),
            limit,
            offset: 0,
        }
    }

    /// Restricts results to the inclusive range `[start, end]`.
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn source_system(mut self, value: impl Into<String>) -> Self {
        self.source_system = Some(value.into());
        self
    }

    pub fn channel(mut self, value: impl Into<String>) -> Self {
        self.channel = Some(value.into());
        self
    }

    /// Adds one required tag.
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tags.push(value.into());
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Parses filter parameters received from a request boundary.
    ///
    /// Blank scalar values are treated as absent. Only `tag` may repeat. A
    /// missing `limit` becomes [`DEFAULT_QUERY_LIMIT`].
    ///
    /// # Errors
    /// - `UnknownField` for any key outside [`FILTER_KEYS`].
    /// - `InvalidValue` for unparseable timestamps or integers, a blank
    ///   `tag`, or a repeated scalar key.
    /// - Any error reported by [`EventFilter::validate`].
    pub fn from_params<'a, I>(params: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Self::new(DEFAULT_QUERY_LIMIT);
        let mut seen: Vec<&'static str> = Vec::new();
        for (key, raw_value) in params {
            let value = raw_value.trim();
            let known = FILTER_KEYS
                .iter()
                .copied()
                .find(|candidate| *candidate == key)
                .ok_or_else(|| FilterError::UnknownField(key.to_string()))?;
            if known != "tag" {
                if seen.contains(&known) {
                    return Err(FilterError::InvalidValue {
                        field: known,
                        value: value.to_string(),
                        message: "parameter given more than once".to_string(),
                    });
                }
                seen.push(known);
                if value.is_empty() {
                    continue;
                }
            }

            match known {
                "start" => filter.start = Some(parse_bound("start", value)?),
                "end" => filter.end = Some(parse_bound("end", value)?),
                "source_system" => filter.source_system = Some(value.to_string()),
                "channel" => filter.channel = Some(value.to_string()),
                "tag" => filter.tags.push(value.to_string()),
                "limit" => filter.limit = parse_u32("limit", value)?,
                _ => filter.offset = parse_u32("offset", value)?,
            }
        }

        filter.validate()?;
        Ok(filter)
    }

    /// Checks invariants that the type alone cannot express.
    ///
    /// # Errors
    /// - `LimitOutOfRange` when `limit` is 0 or above [`MAX_QUERY_LIMIT`].
    /// - `InvertedRange` when both bounds are set and `start > end`.
    /// - `InvalidValue` for a tag that is blank after normalization.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.limit == 0 || self.limit > MAX_QUERY_LIMIT {
            return Err(FilterError::LimitOutOfRange(self.limit));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(FilterError::InvertedRange);
            }
        }
        for tag in &self.tags {
            if normalize_tag(tag).is_none() {
                return Err(FilterError::InvalidValue {
                    field: "tag",
                    value: tag.clone(),
                    message: "tag is blank".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// SQL text plus positional bind values for one filter.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Compiles a validated filter into a bounded, ordered select.
///
/// # Errors
/// - Any error reported by [`EventFilter::validate`].
pub fn compile(filter: &EventFilter) -> Result<CompiledQuery, FilterError> {
    filter.validate()?;

    let mut sql = format!("SELECT {STORED_COLUMNS} FROM events WHERE 1 = 1");
    let mut params: Vec<Value> = Vec::new();

    if let Some(start) = filter.start {
        sql.push_str(" AND timestamp >= ?");
        params.push(Value::Text(format_timestamp(&ceil_to_stored_precision(start))));
    }
    if let Some(end) = filter.end {
        sql.push_str(" AND timestamp <= ?");
        params.push(Value::Text(format_timestamp(
            &end.trunc_subsecs(TIMESTAMP_PRECISION_DIGITS),
        )));
    }
    if let Some(source_system) = filter.source_system.as_ref() {
        sql.push_str(" AND source_system = ?");
        params.push(Value::Text(source_system.clone()));
    }
    if let Some(channel) = filter.channel.as_ref() {
        sql.push_str(" AND channel = ?");
        params.push(Value::Text(channel.clone()));
    }

    let mut seen_tags: Vec<String> = Vec::new();
    for tag in filter.tags.iter().filter_map(|tag| normalize_tag(tag)) {
        if seen_tags.contains(&tag) {
            continue;
        }
        sql.push_str(
            " AND EXISTS (
                SELECT 1
                FROM json_each(events.tags) AS member
                WHERE member.value = ?
            )",
        );
        params.push(Value::Text(tag.clone()));
        seen_tags.push(tag);
    }

    sql.push_str(" ORDER BY timestamp DESC, rowid ASC LIMIT ?");
    params.push(Value::Integer(i64::from(filter.limit)));
    if filter.offset > 0 {
        sql.push_str(" OFFSET ?");
        params.push(Value::Integer(i64::from(filter.offset)));
    }

    Ok(CompiledQuery { sql, params })
}

// Stored instants are whole microseconds: `stored >= start` holds exactly when
// `stored >= ceil(start)`, and `stored <= end` when `stored <= trunc(end)`.
fn ceil_to_stored_precision(instant: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = instant.trunc_subsecs(TIMESTAMP_PRECISION_DIGITS);
    if truncated == instant {
        truncated
    } else {
        truncated + Duration::microseconds(1)
    }
}

fn parse_bound(field: &'static str, value: &str) -> Result<DateTime<Utc>, FilterError> {
    parse_instant(value).map_err(|err| FilterError::InvalidValue {
        field,
        value: value.to_string(),
        message: err.to_string(),
    })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, FilterError> {
    value.parse::<u32>().map_err(|err| FilterError::InvalidValue {
        field,
        value: value.to_string(),
        message: err.to_string(),
    })
}
