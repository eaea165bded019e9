//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate normalizer and repository calls into use-case level APIs.
//! - Keep route/CLI layers decoupled from storage details.

pub mod event_service;
