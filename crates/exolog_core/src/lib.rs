//! Core event-log engine for Exolog.
//! This crate is the single source of truth for ingestion and query invariants.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod query;
pub mod repo;
pub mod service;

pub use codec::{decode, encode, CodecError, StoredRow};
pub use config::{ConfigError, CoreConfig};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LogError,
};
pub use model::event::{Event, EventContent, EventId, EventLinks, NormalizedEvent};
pub use normalize::{normalize, normalize_tags, EventPayload, TagsInput, ValidationError};
pub use query::{EventFilter, FilterError};
pub use repo::event_repo::{
    DistinctColumn, EventRepository, SqliteEventRepository, StoreError, StoreResult,
};
pub use service::event_service::{EventService, EventServiceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
