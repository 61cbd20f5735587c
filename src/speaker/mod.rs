//! Spoken notifications for lifecycle hooks.
//!
//! Components:
//! - `category`: message categories and cooldown table
//! - `dedup`: file-backed deduplicator / rate limiter
//! - `queue`: priority playback queue and its dispatch loop
//! - `speech`: speech-output command
//! - `api`: Axum HTTP server for the coordinator
//! - `client`: hook-side sender with direct-speech fallback
//! - `history`: decision audit trail and reporting

pub mod api;
pub mod category;
pub mod client;
pub mod dedup;
pub mod history;
pub mod queue;
pub mod speech;
