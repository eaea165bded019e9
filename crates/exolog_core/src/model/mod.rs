//! Event domain model.
//!
//! # Responsibility
//! - Define the canonical `Event` record and its typed sub-records.
//!
//! # Invariants
//! - Every event is identified by a stable `EventId`.
//! - Events are append-only: no update or delete exists in the core.

pub mod event;
