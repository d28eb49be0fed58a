/*!
 * Progress reporting for running transfers
 *
 * Chunk units feed completed byte counts into a per-task [`ProgressTracker`]. The
 * tracker aggregates them under a lock and hands a [`ProgressSnapshot`] to the
 * task's [`ProgressSink`] at most once per reporting interval, never per chunk.
 *
 * The stock sink is [`ProgressPublisher`], which turns snapshots into
 * [`ProgressEvent`]s on a crossbeam channel. Publishing never blocks: a full
 * channel drops the event.
 */

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::trace;

/// Point-in-time view of one task's progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub bytes_done: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Average throughput since the task started, in bytes per second
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_done as f64 / secs
        } else {
            0.0
        }
    }

    /// Time left at the average speed so far
    pub fn eta(&self) -> Option<Duration> {
        let speed = self.speed();
        if speed > 0.0 {
            let remaining = self.total.saturating_sub(self.bytes_done);
            Some(Duration::from_secs_f64(remaining as f64 / speed))
        } else {
            None
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total > 0 {
            (self.bytes_done as f64 / self.total as f64) * 100.0
        } else {
            100.0
        }
    }
}

/// Receiver of progress reports; implementations must return quickly
pub trait ProgressSink: Send + Sync {
    fn started(&self, _task_id: &str, _label: &str, _total: u64) {}

    fn report(&self, snapshot: &ProgressSnapshot);

    fn finished(&self, _snapshot: &ProgressSnapshot, _success: bool) {}
}

/// Shared sink handle
pub type SharedSink = Arc<dyn ProgressSink>;

#[derive(Debug)]
struct TrackerState {
    done: u64,
    last_report: Instant,
}

/// Aggregated byte counter for one task with rate-limited reporting
pub struct ProgressTracker {
    task_id: String,
    total: u64,
    started: Instant,
    interval: Duration,
    state: Mutex<TrackerState>,
    sink: SharedSink,
}

impl ProgressTracker {
    pub fn new(
        task_id: impl Into<String>,
        label: &str,
        total: u64,
        interval: Duration,
        sink: SharedSink,
    ) -> Self {
        let task_id = task_id.into();
        sink.started(&task_id, label, total);
        let started = Instant::now();
        Self {
            task_id,
            total,
            started,
            interval,
            state: Mutex::new(TrackerState {
                done: 0,
                last_report: started,
            }),
            sink,
        }
    }

    /// Add completed bytes; reports if the interval has elapsed since the last report
    pub fn record(&self, bytes: u64) {
        let due = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.done = state.done.saturating_add(bytes).min(self.total);

            let now = Instant::now();
            if now.duration_since(state.last_report) >= self.interval {
                state.last_report = now;
                Some(self.snapshot_at(state.done, now))
            } else {
                None
            }
        };

        if let Some(snapshot) = due {
            trace!(task = %self.task_id, bytes_done = snapshot.bytes_done, "Progress report");
            self.sink.report(&snapshot);
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .done
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.bytes_done(), Instant::now())
    }

    /// Emit the final report regardless of the interval
    pub fn finish(&self, success: bool) -> ProgressSnapshot {
        let snapshot = self.snapshot();
        self.sink.finished(&snapshot, success);
        snapshot
    }

    fn snapshot_at(&self, done: u64, now: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            task_id: self.task_id.clone(),
            bytes_done: done,
            total: self.total,
            elapsed: now.duration_since(self.started),
        }
    }
}

/// Progress event types
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A download started
    TaskStarted {
        task_id: String,
        label: String,
        total_bytes: u64,
        timestamp: u64,
    },

    /// Periodic progress update
    Progress {
        task_id: String,
        bytes_done: u64,
        total_bytes: u64,
        speed_bps: f64,
        eta_secs: Option<u64>,
        timestamp: u64,
    },

    /// A download ended
    TaskFinished {
        task_id: String,
        bytes_done: u64,
        duration_ms: u64,
        success: bool,
        timestamp: u64,
    },
}

impl ProgressEvent {
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn task_id(&self) -> &str {
        match self {
            ProgressEvent::TaskStarted { task_id, .. }
            | ProgressEvent::Progress { task_id, .. }
            | ProgressEvent::TaskFinished { task_id, .. } => task_id,
        }
    }
}

/// Progress publisher - sends events to subscribers
#[derive(Clone)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressPublisher {
    /// Create a new publisher with bounded channel
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a new publisher with unbounded channel
    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a no-op publisher (for when progress tracking is disabled)
    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }

    /// Publish an event without blocking
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.sender {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    trace!(task = %event.task_id(), "Progress channel full, event dropped");
                }
                // Subscriber went away
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

impl ProgressSink for ProgressPublisher {
    fn started(&self, task_id: &str, label: &str, total: u64) {
        self.publish(ProgressEvent::TaskStarted {
            task_id: task_id.to_string(),
            label: label.to_string(),
            total_bytes: total,
            timestamp: ProgressEvent::current_timestamp(),
        });
    }

    fn report(&self, snapshot: &ProgressSnapshot) {
        self.publish(ProgressEvent::Progress {
            task_id: snapshot.task_id.clone(),
            bytes_done: snapshot.bytes_done,
            total_bytes: snapshot.total,
            speed_bps: snapshot.speed(),
            eta_secs: snapshot.eta().map(|d| d.as_secs()),
            timestamp: ProgressEvent::current_timestamp(),
        });
    }

    fn finished(&self, snapshot: &ProgressSnapshot, success: bool) {
        self.publish(ProgressEvent::TaskFinished {
            task_id: snapshot.task_id.clone(),
            bytes_done: snapshot.bytes_done,
            duration_ms: snapshot.elapsed.as_millis() as u64,
            success,
            timestamp: ProgressEvent::current_timestamp(),
        });
    }
}

/// Progress subscriber - receives events
pub struct ProgressSubscriber {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressSubscriber {
    /// Get the receiver for consuming events
    pub fn receiver(&self) -> &Receiver<ProgressEvent> {
        &self.receiver
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv(&self) -> Option<ProgressEvent> {
        self.receiver.recv().ok()
    }

    /// Drain every event currently queued
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        reports: Mutex<Vec<ProgressSnapshot>>,
        finished: Mutex<Option<bool>>,
    }

    impl ProgressSink for Recording {
        fn report(&self, snapshot: &ProgressSnapshot) {
            self.reports.lock().unwrap().push(snapshot.clone());
        }

        fn finished(&self, _snapshot: &ProgressSnapshot, success: bool) {
            *self.finished.lock().unwrap() = Some(success);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_at_most_once_per_interval() {
        let sink = Arc::new(Recording::default());
        let tracker = ProgressTracker::new(
            "t",
            "object",
            1000,
            Duration::from_secs(1),
            sink.clone(),
        );

        // Many records inside the first second: nothing reported
        for _ in 0..5 {
            tracker.record(10);
        }
        assert!(sink.reports.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1100)).await;
        tracker.record(10);
        tracker.record(10);
        tokio::time::advance(Duration::from_millis(300)).await;
        tracker.record(10);

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].bytes_done, 60);
        assert_eq!(tracker.bytes_done(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_never_exceeds_total() {
        let sink = Arc::new(Recording::default());
        let tracker = ProgressTracker::new("t", "o", 100, Duration::from_secs(1), sink.clone());
        tracker.record(60);
        tracker.record(60);
        assert_eq!(tracker.bytes_done(), 100);

        let last = tracker.finish(true);
        assert_eq!(last.bytes_done, 100);
        assert_eq!(*sink.finished.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_snapshot_speed_and_eta() {
        let snapshot = ProgressSnapshot {
            task_id: "t".into(),
            bytes_done: 500,
            total: 1500,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(snapshot.speed(), 100.0);
        assert_eq!(snapshot.eta(), Some(Duration::from_secs(10)));
        assert!((snapshot.percent() - 33.333).abs() < 0.01);

        let idle = ProgressSnapshot {
            elapsed: Duration::ZERO,
            ..snapshot
        };
        assert_eq!(idle.eta(), None);
    }

    #[test]
    fn test_publisher_event_sequence() {
        let (publisher, subscriber) = ProgressPublisher::unbounded();
        let snapshot = ProgressSnapshot {
            task_id: "t".into(),
            bytes_done: 10,
            total: 20,
            elapsed: Duration::from_secs(1),
        };

        publisher.started("t", "album/1.jpg", 20);
        publisher.report(&snapshot);
        publisher.finished(&snapshot, false);

        let events = subscriber.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ProgressEvent::TaskStarted { total_bytes: 20, .. }));
        assert!(matches!(events[1], ProgressEvent::Progress { bytes_done: 10, .. }));
        assert!(matches!(
            events[2],
            ProgressEvent::TaskFinished { success: false, .. }
        ));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (publisher, subscriber) = ProgressPublisher::new(1);
        publisher.started("a", "a", 1);
        publisher.started("b", "b", 1);
        assert_eq!(subscriber.drain().len(), 1);
    }

    #[test]
    fn test_noop_publisher() {
        let publisher = ProgressPublisher::noop();
        publisher.started("t", "t", 1);
    }
}
