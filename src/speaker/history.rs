//! Audit trail of notification decisions.
//!
//! One JSONL line per hook invocation in `{dir}/{date}.jsonl`, recording
//! whether the message was spoken and why.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: String,
    pub message: String,
    pub category: String,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// queued, fallback, suppressed, failed or skipped
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub coordinator_up: bool,
}

pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

pub struct HistoryLog {
    dir: PathBuf,
}

impl HistoryLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// History file for a `YYYY-MM-DD` date or `today`. Anything else is
    /// rejected so the path stays inside the history dir.
    fn file_for(&self, date: &str) -> Option<PathBuf> {
        resolve_date(date).map(|date| self.dir.join(format!("{date}.jsonl")))
    }

    pub fn append(&self, record: &DecisionRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create history dir: {e}");
            return;
        }

        // Date from timestamp (first 10 chars: YYYY-MM-DD)
        let date = record.timestamp.get(..10).unwrap_or("today");
        let Some(path) = self.file_for(date) else {
            warn!("Unusable history timestamp: {}", record.timestamp);
            return;
        };

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open history file {}: {e}", path.display());
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write history record: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize history record: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<DecisionRecord> {
        let Some(path) = self.file_for(date) else {
            return Vec::new();
        };
        let Ok(contents) = fs::read_to_string(path) else {
            return Vec::new();
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed history line: {e}");
                    None
                }
            })
            .collect()
    }

    /// Dates with history, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".jsonl").map(str::to_string)
            })
            .filter(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
            .collect();
        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    /// Markdown summary of one day's decisions.
    pub fn report(&self, date: &str) -> String {
        let Some(display_date) = resolve_date(date) else {
            return format!("Invalid date '{date}': expected YYYY-MM-DD or today");
        };

        let records = self.load(date);
        if records.is_empty() {
            let mut report =
                format!("# TTS Notification Report - {display_date}\n\nNo notifications recorded.");
            let dates = self.list_dates();
            if !dates.is_empty() {
                report.push_str(&format!("\n\nDays with history: {}", dates.join(", ")));
            }
            return report;
        }

        let total = records.len();
        let mut by_action: BTreeMap<&str, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for r in &records {
            *by_action.entry(r.action.as_str()).or_insert(0) += 1;
            let entry = by_category.entry(r.category.as_str()).or_insert((0, 0));
            entry.0 += 1;
            if r.action == "suppressed" {
                entry.1 += 1;
            }
        }
        let suppressed = by_action.get("suppressed").copied().unwrap_or(0);
        let avg_ms = records.iter().map(|r| r.duration_ms as f64).sum::<f64>() / total as f64;

        let mut lines = vec![
            format!("# TTS Notification Report - {display_date}"),
            String::new(),
            "## Summary".to_string(),
            format!("- **Notifications**: {total}"),
            format!(
                "- **Suppressed**: {suppressed} ({:.0}%)",
                suppressed as f64 * 100.0 / total as f64
            ),
            format!("- **Average hook time**: {avg_ms:.0}ms"),
            String::new(),
            "## Actions".to_string(),
        ];
        for (action, count) in &by_action {
            lines.push(format!("- {action}: {count}"));
        }

        lines.extend([
            String::new(),
            "## Categories".to_string(),
            String::new(),
            "| Category | Total | Suppressed |".to_string(),
            "|----------|-------|------------|".to_string(),
        ]);
        for (category, (count, suppressed)) in &by_category {
            lines.push(format!("| {category} | {count} | {suppressed} |"));
        }

        lines.join("\n")
    }
}

fn resolve_date(date: &str) -> Option<String> {
    if date == "today" {
        return Some(Local::now().format("%Y-%m-%d").to_string());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}
