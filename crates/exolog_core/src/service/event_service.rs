//! Event use-case service.
//!
//! # Responsibility
//! - Provide the ingestion path (normalize, insert, read back).
//! - Provide the listing path (filter, query, decode).
//!
//! # Invariants
//! - Service APIs never bypass normalization or repository contracts.
//! - Service layer remains storage-agnostic.

use crate::model::event::{Event, EventId};
use crate::normalize::{normalize, EventPayload, ValidationError};
use crate::query::{EventFilter, FilterError};
use crate::repo::event_repo::{DistinctColumn, EventRepository, StoreError, StoreResult};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for event use-cases.
#[derive(Debug)]
pub enum EventServiceError {
    /// Payload rejected by the normalizer.
    Validation(ValidationError),
    /// Persistence-layer failure.
    Store(StoreError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for EventServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent event state: {details}"),
        }
    }
}

impl Error for EventServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::InconsistentState(_) => None,
        }
    }
}

impl From<ValidationError> for EventServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for EventServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<FilterError> for EventServiceError {
    fn from(value: FilterError) -> Self {
        Self::Store(StoreError::BadFilter(value))
    }
}

/// Event service facade over repository implementations.
pub struct EventService<R: EventRepository> {
    repo: R,
}

impl<R: EventRepository> EventService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Normalizes and persists one payload, returning the stored event.
    ///
    /// # Errors
    /// - `Validation` when the payload misses or mangles a required field.
    /// - `Store` for conflicts and storage failures.
    pub fn ingest(&self, payload: &EventPayload) -> Result<Event, EventServiceError> {
        let normalized = match normalize(payload) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!(
                    "event=event_ingest module=service status=error error_code=validation field={}",
                    err.field()
                );
                return Err(err.into());
            }
        };

        let created = self.repo.insert(&normalized)?;
        self.repo
            .get_event(created.id)?
            .ok_or(EventServiceError::InconsistentState(
                "created event not found in read-back",
            ))
    }

    /// Lists events matching `filter`, newest first.
    pub fn list(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        self.repo.list_events(filter)
    }

    /// Parses boundary filter parameters and lists matching events.
    ///
    /// # Errors
    /// - `Store(StoreError::BadFilter)` for unknown keys or bad values.
    pub fn list_with_params<'a, I>(&self, params: I) -> Result<Vec<Event>, EventServiceError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let filter = EventFilter::from_params(params)?;
        Ok(self.repo.list_events(&filter)?)
    }

    /// Gets one event by stable ID.
    pub fn get_event(&self, id: EventId) -> StoreResult<Option<Event>> {
        self.repo.get_event(id)
    }

    /// Lists distinct values of one column, for filter pickers.
    pub fn distinct_values(&self, column: DistinctColumn) -> StoreResult<Vec<String>> {
        self.repo.distinct_values(column)
    }
}
