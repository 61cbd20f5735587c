//! Message deduplication and per-category rate limiting.
//!
//! Every hook invocation is a separate process, so the record table lives in
//! a JSON file shared by all of them. Each decision reloads the table, applies
//! the cooldown policy and writes the table back via temp-file + rename, so a
//! concurrent reader never sees a half-written file. Two producers racing on
//! the same hash may lose an update; the file itself stays well-formed.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::category::Category;
use crate::config::DedupConfig;

const RECENT_DUPLICATES_LIMIT: usize = 10;

/// Source of wall-clock time for cooldown and retention checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One entry per distinct (category, normalized text) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub hash: String,
    pub text: String,
    pub category: String,
    pub first_seen: DateTime<Utc>,
    pub last_spoken: DateTime<Utc>,
    pub count: u64,
}

type RecordTable = BTreeMap<String, MessageRecord>;

/// What the caller knows about a message besides its text.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// Explicit category label. When absent or blank the category is inferred.
    pub category: Option<String>,
    /// Extra free text (summaries, tool output) consulted during inference.
    pub fields: Vec<String>,
}

impl MessageContext {
    pub fn with_category(label: impl Into<String>) -> Self {
        Self {
            category: Some(label.into()),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, text: impl Into<String>) -> Self {
        self.fields.push(text.into());
        self
    }

    pub fn resolve_category(&self, message: &str) -> Category {
        match self.category.as_deref() {
            Some(label) if !label.trim().is_empty() => Category::parse(label),
            _ => Category::infer(
                std::iter::once(message).chain(self.fields.iter().map(String::as_str)),
            ),
        }
    }
}

/// Outcome of `should_speak`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn suppress(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub records: usize,
    pub total_occurrences: u64,
    pub total_duplicates: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateSummary {
    pub text: String,
    pub category: String,
    pub count: u64,
    pub last_spoken: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub total_records: usize,
    pub by_category: BTreeMap<String, CategoryStats>,
    pub recent_duplicates: Vec<DuplicateSummary>,
}

/// Lowercase and trim; the identity of a message ignores case and padding.
pub fn normalize(message: &str) -> String {
    message.trim().to_lowercase()
}

pub fn message_hash(category: &Category, message: &str) -> String {
    let key = format!("{category}:{}", normalize(message));
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// File-backed deduplicator. Construct once per process and pass it by
/// reference; it holds no table in memory between calls.
pub struct MessageDeduplicator {
    cache_file: PathBuf,
    config: DedupConfig,
    clock: Arc<dyn Clock>,
}

impl MessageDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache_file: config.cache_path(),
            config,
            clock,
        }
    }

    /// Cooldown for a category: config override, then built-in table, then
    /// the configured default.
    pub fn cooldown_for(&self, category: &Category) -> u64 {
        self.config
            .cooldowns
            .get(category.as_str())
            .copied()
            .or_else(|| category.builtin_cooldown_secs())
            .unwrap_or(self.config.default_cooldown_secs)
    }

    /// Decide whether `message` may be spoken now. Never fails: state
    /// problems degrade to an empty table.
    pub fn should_speak(&self, message: &str, context: &MessageContext) -> Decision {
        let message = message.trim();
        if message.is_empty() {
            return Decision::suppress("empty message");
        }

        let now = self.clock.now();
        let mut records = self.load_or_reset();
        self.sweep(&mut records, now);

        let category = context.resolve_category(message);
        let hash = message_hash(&category, message);
        let cooldown = secs(self.cooldown_for(&category));

        let decision = match records.get_mut(&hash) {
            None => {
                records.insert(
                    hash.clone(),
                    MessageRecord {
                        hash,
                        text: message.to_string(),
                        category: category.to_string(),
                        first_seen: now,
                        last_spoken: now,
                        count: 1,
                    },
                );
                Decision::allow()
            }
            Some(record) => {
                record.count += 1;
                record.text = message.to_string();
                // Another process may have written a timestamp ahead of our clock.
                let elapsed = (now - record.last_spoken).max(Duration::zero());
                if elapsed >= cooldown {
                    record.last_spoken = now;
                    Decision::allow()
                } else {
                    let remaining = ceil_secs(cooldown - elapsed);
                    Decision::suppress(format!(
                        "Duplicate {category} message suppressed (cooldown: {remaining}s remaining, count: {})",
                        record.count
                    ))
                }
            }
        };

        if let Err(e) = save_records(&self.cache_file, &records) {
            warn!("Failed to persist deduplication state: {e}");
        }

        match &decision.reason {
            None => debug!("Allowed [{category}]: {message}"),
            Some(reason) => info!("{reason}: {message}"),
        }
        decision
    }

    pub fn get_stats(&self) -> DedupStats {
        let records = self.load_or_reset();

        let mut by_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for record in records.values() {
            let entry = by_category.entry(record.category.clone()).or_default();
            entry.records += 1;
            entry.total_occurrences += record.count;
            entry.total_duplicates += record.count.saturating_sub(1);
        }

        let mut duplicates: Vec<&MessageRecord> =
            records.values().filter(|r| r.count > 1).collect();
        duplicates.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_spoken.cmp(&a.last_spoken))
        });

        DedupStats {
            total_records: records.len(),
            by_category,
            recent_duplicates: duplicates
                .into_iter()
                .take(RECENT_DUPLICATES_LIMIT)
                .map(|r| DuplicateSummary {
                    text: r.text.clone(),
                    category: r.category.clone(),
                    count: r.count,
                    last_spoken: r.last_spoken,
                })
                .collect(),
        }
    }

    /// Drop every record.
    pub fn reset(&self) {
        match save_records(&self.cache_file, &RecordTable::new()) {
            Ok(()) => info!("Cleared deduplication state at {}", self.cache_file.display()),
            Err(e) => warn!("Failed to clear deduplication state: {e}"),
        }
    }

    fn load_or_reset(&self) -> RecordTable {
        match load_records(&self.cache_file) {
            Ok(records) => records,
            Err(e) => {
                warn!("{e}; starting from an empty table");
                RecordTable::new()
            }
        }
    }

    /// Evict records first seen longer ago than the retention window.
    fn sweep(&self, records: &mut RecordTable, now: DateTime<Utc>) -> usize {
        let retention = secs(self.config.retention_secs);
        let before = records.len();
        records.retain(|_, r| now - r.first_seen <= retention);
        let evicted = before - records.len();
        if evicted > 0 {
            debug!("Evicted {evicted} expired deduplication records");
        }
        evicted
    }
}

/// Configured seconds as a `Duration`, saturating at `Duration::MAX`.
fn secs(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn ceil_secs(duration: Duration) -> i64 {
    let ms = duration.num_milliseconds();
    (ms.saturating_add(999) / 1000).max(1)
}

fn load_records(path: &Path) -> Result<RecordTable, DedupError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RecordTable::new()),
        Err(source) => {
            return Err(DedupError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if contents.trim().is_empty() {
        return Ok(RecordTable::new());
    }

    serde_json::from_str(&contents).map_err(|source| DedupError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn save_records(path: &Path, records: &RecordTable) -> Result<(), DedupError> {
    let io_err = |source: io::Error| DedupError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut tmp, records).map_err(|source| DedupError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
