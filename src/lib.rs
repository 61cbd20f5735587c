//! tts-hooks: spoken status notifications for coding-assistant hooks.
//!
//! Hook processes ask the [`speaker::dedup::MessageDeduplicator`] whether a
//! message should be spoken, then hand it to the long-lived coordinator
//! ([`speaker::queue::QueueCoordinator`]) which plays one message at a time.

pub mod config;
pub mod speaker;
