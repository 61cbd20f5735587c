//! Playback queue and coordinator.
//!
//! IDLE → DISPATCHING → IDLE per entry; STOPPED is terminal.
//!
//! Producers enqueue from any task; a single dispatch loop pops the most
//! urgent, oldest entry and plays it to completion (or timeout) before taking
//! the next, so two notifications never overlap. A critical entry that
//! arrives mid-playback waits for the current one and goes next.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::speech::{SpeechError, Speaker};

/// Playback urgency. Lower ordinal plays first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Priority {
    Critical,
    High,
    Medium,
    #[default]
    Normal,
}

impl Priority {
    /// Unrecognized labels map to `Normal`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Normal => "normal",
        }
    }
}

impl From<String> for Priority {
    fn from(label: String) -> Self {
        Self::parse(&label)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for the notification. Diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl fmt::Display for NotificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hook = self.hook_type.as_deref().unwrap_or("unknown");
        match &self.tool_name {
            Some(tool) => write!(f, "{hook}/{tool}"),
            None => f.write_str(hook),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub message: String,
    pub priority: Priority,
    pub source: NotificationSource,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Enqueue order, used to keep each priority tier FIFO.
    pub seq: u64,
}

/// Heap adapter: `BinaryHeap` is a max-heap, so invert (priority, seq).
struct Pending(QueueEntry);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.0.priority, other.0.seq).cmp(&(self.0.priority, self.0.seq))
    }
}

/// Priority-major, enqueue-order-minor queue.
#[derive(Default)]
pub struct PlaybackQueue {
    heap: BinaryHeap<Pending>,
    next_seq: u64,
}

impl PlaybackQueue {
    pub fn push(
        &mut self,
        message: String,
        priority: Priority,
        source: NotificationSource,
        metadata: serde_json::Value,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Pending(QueueEntry {
            message,
            priority,
            source,
            metadata,
            enqueued_at: Utc::now(),
            seq,
        }));
        seq
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop().map(|p| p.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop everything queued, returning how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Idle,
    Dispatching,
    Stopped,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Dispatching => write!(f, "DISPATCHING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub queued: usize,
    pub dispatched: u64,
    pub failed: u64,
    pub timed_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<QueueEntry>,
}

struct Shared {
    queue: PlaybackQueue,
    state: CoordinatorState,
    current: Option<QueueEntry>,
}

struct Inner {
    shared: Mutex<Shared>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    max_playback: Duration,
    /// Set while a dispatch loop owns the queue.
    running: AtomicBool,
    dispatched: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Handle to the playback coordinator. Cheap to clone; all clones share one
/// queue and one dispatch loop.
#[derive(Clone)]
pub struct QueueCoordinator {
    inner: Arc<Inner>,
}

impl QueueCoordinator {
    pub fn new(max_playback: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: PlaybackQueue::default(),
                    state: CoordinatorState::Idle,
                    current: None,
                }),
                wake: Notify::new(),
                shutdown,
                max_playback,
                running: AtomicBool::new(false),
                dispatched: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a notification. Returns false for blank messages or once the
    /// coordinator has stopped.
    pub fn enqueue(
        &self,
        message: &str,
        priority: Priority,
        source: NotificationSource,
        metadata: serde_json::Value,
    ) -> bool {
        let message = message.trim();
        if message.is_empty() {
            return false;
        }

        {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.state == CoordinatorState::Stopped {
                debug!("Rejected notification from {source}: coordinator stopped");
                return false;
            }
            let seq = shared
                .queue
                .push(message.to_string(), priority, source.clone(), metadata);
            info!(
                "Queued #{seq} [{priority}] from {source} ({} waiting)",
                shared.queue.len()
            );
        }

        self.inner.wake.notify_one();
        true
    }

    pub fn status(&self) -> CoordinatorStatus {
        let shared = self.inner.shared.lock().unwrap();
        CoordinatorStatus {
            state: shared.state,
            queued: shared.queue.len(),
            dispatched: self.inner.dispatched.load(AtomicOrdering::Relaxed),
            failed: self.inner.failed.load(AtomicOrdering::Relaxed),
            timed_out: self.inner.timed_out.load(AtomicOrdering::Relaxed),
            current: shared.current.clone(),
        }
    }

    /// Enter STOPPED: discard queued entries and end the dispatch loop,
    /// abandoning any in-flight playback.
    pub fn shutdown(&self) {
        let discarded = {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.state == CoordinatorState::Stopped {
                return;
            }
            shared.state = CoordinatorState::Stopped;
            shared.current = None;
            shared.queue.clear()
        };
        info!("State: → STOPPED ({discarded} queued notifications discarded)");
        self.inner.shutdown.send_replace(true);
        self.inner.wake.notify_one();
    }

    /// Resolves once the coordinator has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Dispatch loop. Returns when the coordinator is shut down, or at once
    /// if another clone is already running the loop.
    pub async fn run<S: Speaker>(&self, speaker: S) {
        if self.inner.running.swap(true, AtomicOrdering::AcqRel) {
            warn!("Dispatch loop already running, not starting another");
            return;
        }

        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            let next = {
                let mut shared = self.inner.shared.lock().unwrap();
                if shared.state == CoordinatorState::Stopped {
                    break;
                }
                let entry = shared.queue.pop();
                if let Some(entry) = &entry {
                    shared.state = CoordinatorState::Dispatching;
                    shared.current = Some(entry.clone());
                }
                entry
            };

            let Some(entry) = next else {
                tokio::select! {
                    _ = self.inner.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            debug!("State: IDLE → DISPATCHING (#{} [{}])", entry.seq, entry.priority);
            let playback = tokio::time::timeout(self.inner.max_playback, speaker.speak(&entry.message));
            let outcome = tokio::select! {
                result = playback => Some(result),
                _ = shutdown.wait_for(|stopped| *stopped) => None,
            };

            match outcome {
                None => {
                    info!("Shutdown during playback of #{}, abandoning it", entry.seq);
                    break;
                }
                Some(Ok(Ok(()))) => {
                    self.inner.dispatched.fetch_add(1, AtomicOrdering::Relaxed);
                    debug!("Played #{} from {}", entry.seq, entry.source);
                }
                Some(Ok(Err(e))) => {
                    self.inner.failed.fetch_add(1, AtomicOrdering::Relaxed);
                    warn!("Dropping #{} from {}: {e}", entry.seq, entry.source);
                }
                Some(Err(_)) => {
                    self.inner.timed_out.fetch_add(1, AtomicOrdering::Relaxed);
                    let e = SpeechError::Timeout(self.inner.max_playback);
                    warn!("Abandoning #{} from {}: {e}", entry.seq, entry.source);
                }
            }

            let mut shared = self.inner.shared.lock().unwrap();
            shared.current = None;
            if shared.state != CoordinatorState::Stopped {
                shared.state = CoordinatorState::Idle;
            }
        }

        self.inner.running.store(false, AtomicOrdering::Release);
        info!("Dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct FakeSpeaker {
        spoken: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        hang_on: Option<String>,
        gate: Option<(String, Arc<Notify>)>,
    }

    impl FakeSpeaker {
        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    impl Speaker for FakeSpeaker {
        async fn speak(&self, text: &str) -> Result<(), SpeechError> {
            self.spoken.lock().unwrap().push(text.to_string());
            if self.hang_on.as_deref() == Some(text) {
                std::future::pending::<()>().await;
            }
            if let Some((gated, release)) = &self.gate {
                if gated == text {
                    release.notified().await;
                }
            }
            if self.fail_on.as_deref() == Some(text) {
                return Err(SpeechError::Other("device busy".into()));
            }
            Ok(())
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn enqueue(coordinator: &QueueCoordinator, message: &str, priority: Priority) -> bool {
        coordinator.enqueue(message, priority, NotificationSource::default(), Value::Null)
    }

    #[test]
    fn priority_parse_and_serde() {
        assert_eq!(Priority::parse("CRITICAL"), Priority::Critical);
        assert_eq!(Priority::parse(" high "), Priority::High);
        assert_eq!(Priority::parse("medium"), Priority::Medium);
        assert_eq!(Priority::parse("urgent!!"), Priority::Normal);
        assert!(Priority::Critical < Priority::High && Priority::Medium < Priority::Normal);

        let p: Priority = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(p, Priority::Normal);
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    }

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut queue = PlaybackQueue::default();
        for (msg, p) in [
            ("n1", Priority::Normal),
            ("c1", Priority::Critical),
            ("h1", Priority::High),
            ("n2", Priority::Normal),
            ("c2", Priority::Critical),
            ("m1", Priority::Medium),
        ] {
            queue.push(msg.into(), p, NotificationSource::default(), Value::Null);
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|e| e.message).collect();
        assert_eq!(order, ["c1", "c2", "h1", "m1", "n1", "n2"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dispatches_in_priority_order() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(5));
        assert!(enqueue(&coordinator, "normal", Priority::Normal));
        assert!(enqueue(&coordinator, "critical", Priority::Critical));
        assert!(enqueue(&coordinator, "high", Priority::High));

        let speaker = FakeSpeaker::default();
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        wait_until(|| coordinator.status().dispatched == 3).await;
        assert_eq!(speaker.spoken(), ["critical", "high", "normal"]);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failing_entry_does_not_stall_queue() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(5));
        enqueue(&coordinator, "broken", Priority::High);
        enqueue(&coordinator, "after", Priority::Normal);

        let speaker = FakeSpeaker {
            fail_on: Some("broken".into()),
            ..FakeSpeaker::default()
        };
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        wait_until(|| coordinator.status().dispatched == 1).await;
        let status = coordinator.status();
        assert_eq!(status.failed, 1);
        assert_eq!(speaker.spoken(), ["broken", "after"]);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn hung_playback_is_abandoned_after_timeout() {
        let coordinator = QueueCoordinator::new(Duration::from_millis(50));
        enqueue(&coordinator, "hang", Priority::Normal);
        enqueue(&coordinator, "next", Priority::Normal);

        let speaker = FakeSpeaker {
            hang_on: Some("hang".into()),
            ..FakeSpeaker::default()
        };
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        wait_until(|| coordinator.status().dispatched == 1).await;
        assert_eq!(coordinator.status().timed_out, 1);
        assert_eq!(speaker.spoken(), ["hang", "next"]);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn critical_waits_for_current_playback_then_goes_next() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(5));
        let release = Arc::new(Notify::new());
        let speaker = FakeSpeaker {
            gate: Some(("first".into(), release.clone())),
            ..FakeSpeaker::default()
        };

        enqueue(&coordinator, "first", Priority::Normal);
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        wait_until(|| coordinator.status().state == CoordinatorState::Dispatching).await;
        enqueue(&coordinator, "second", Priority::Normal);
        enqueue(&coordinator, "urgent", Priority::Critical);

        let status = coordinator.status();
        assert_eq!(status.queued, 2);
        assert_eq!(status.current.map(|e| e.message).as_deref(), Some("first"));
        assert_eq!(speaker.spoken(), ["first"]);

        release.notify_one();
        wait_until(|| coordinator.status().dispatched == 3).await;
        assert_eq!(speaker.spoken(), ["first", "urgent", "second"]);
        assert_eq!(coordinator.status().state, CoordinatorState::Idle);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_discards_queue_and_rejects_new_entries() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(30));
        let speaker = FakeSpeaker {
            gate: Some(("playing".into(), Arc::new(Notify::new()))),
            ..FakeSpeaker::default()
        };

        enqueue(&coordinator, "playing", Priority::Normal);
        enqueue(&coordinator, "waiting", Priority::Normal);
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        wait_until(|| coordinator.status().state == CoordinatorState::Dispatching).await;
        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatch loop exits")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), coordinator.stopped())
            .await
            .expect("stopped resolves");

        let status = coordinator.status();
        assert_eq!(status.state, CoordinatorState::Stopped);
        assert_eq!(status.queued, 0);
        assert!(status.current.is_none());
        assert!(!enqueue(&coordinator, "too late", Priority::Critical));
        assert_eq!(speaker.spoken(), ["playing"]);
    }

    #[tokio::test]
    async fn entries_enqueued_while_idle_wake_the_loop() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(5));
        let speaker = FakeSpeaker::default();
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = speaker.clone();
            async move { coordinator.run(speaker).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(enqueue(&coordinator, "late arrival", Priority::Medium));
        wait_until(|| coordinator.status().dispatched == 1).await;
        assert_eq!(speaker.spoken(), ["late arrival"]);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn second_dispatch_loop_refuses_to_start() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(5));
        let release = Arc::new(Notify::new());
        let first = FakeSpeaker {
            gate: Some(("one".into(), release.clone())),
            ..FakeSpeaker::default()
        };
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let speaker = first.clone();
            async move { coordinator.run(speaker).await }
        });

        enqueue(&coordinator, "one", Priority::Normal);
        wait_until(|| coordinator.status().state == CoordinatorState::Dispatching).await;

        let second = FakeSpeaker::default();
        enqueue(&coordinator, "two", Priority::Normal);
        tokio::time::timeout(Duration::from_secs(1), coordinator.clone().run(second.clone()))
            .await
            .expect("duplicate loop returns immediately");

        release.notify_one();
        wait_until(|| coordinator.status().dispatched == 2).await;
        assert_eq!(first.spoken(), ["one", "two"]);
        assert!(second.spoken().is_empty());

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn blank_messages_are_rejected() {
        let coordinator = QueueCoordinator::new(Duration::from_secs(1));
        assert!(!enqueue(&coordinator, "  ", Priority::Critical));
        assert_eq!(coordinator.status().queued, 0);
    }
}
