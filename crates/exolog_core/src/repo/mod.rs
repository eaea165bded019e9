//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories only accept events that went through `normalize`.
//! - Repository APIs return semantic errors (`Conflict`, `CorruptRecord`) in
//!   addition to DB transport errors.

pub mod event_repo;
