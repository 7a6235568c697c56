//! Per-file results and the push channel that carries them.
//!
//! The polled log is the source of truth; the broadcast channel is bounded and
//! a lagging subscriber simply misses frames it can recover by polling.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::{Dimensions, ResizeOutcome};
use crate::error::ResizeError;

pub const STATUS_PROCESSED: &str = "Processed successfully";
pub const STATUS_ALREADY_PROCESSED: &str = "Already processed";

/// Outcome of processing one file. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub filename: String,
    pub success: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resized: Option<Dimensions>,
    pub completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    pub fn from_outcome(filename: impl Into<String>, outcome: ResizeOutcome) -> Self {
        let filename = filename.into();
        match outcome {
            ResizeOutcome::Written {
                output_path,
                original,
                resized,
            } => Self {
                filename,
                success: true,
                status: STATUS_PROCESSED.to_string(),
                output_path: Some(output_path),
                original: Some(original),
                resized: Some(resized),
                completed_at: Utc::now(),
            },
            ResizeOutcome::UpToDate { output_path } => Self {
                filename,
                success: true,
                status: STATUS_ALREADY_PROCESSED.to_string(),
                output_path: Some(output_path),
                original: None,
                resized: None,
                completed_at: Utc::now(),
            },
        }
    }

    pub fn failure(filename: impl Into<String>, error: &ResizeError) -> Self {
        Self {
            filename: filename.into(),
            success: false,
            status: error.to_string(),
            output_path: None,
            original: None,
            resized: None,
            completed_at: Utc::now(),
        }
    }
}

/// File name used in results; falls back to the full path for odd inputs.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A recorded result stamped with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub sequence: u64,
    pub result: ProcessingResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Default)]
struct ReporterState {
    frames: Vec<ResultFrame>,
    next_sequence: u64,
    counts: ResultCounts,
}

/// Ordered result log plus a bounded push channel.
pub struct StatusReporter {
    state: Mutex<ReporterState>,
    tx: broadcast::Sender<ResultFrame>,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StatusReporter")
            .field("results", &state.frames.len())
            .field("next_sequence", &state.next_sequence)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl StatusReporter {
    pub fn new(push_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(push_capacity.max(1));
        Self {
            state: Mutex::new(ReporterState {
                next_sequence: 1,
                ..ReporterState::default()
            }),
            tx,
        }
    }

    /// Append a result and push it to every subscriber.
    ///
    /// The push happens under the log lock so subscribers see frames in
    /// sequence order.
    pub fn record(&self, result: ProcessingResult) -> ResultFrame {
        let mut state = self.state.lock();
        let frame = ResultFrame {
            sequence: state.next_sequence,
            result,
        };
        state.next_sequence += 1;
        if frame.result.success {
            state.counts.succeeded += 1;
        } else {
            state.counts.failed += 1;
        }
        state.frames.push(frame.clone());
        // No subscribers is fine: the log still has it.
        let _ = self.tx.send(frame.clone());
        frame
    }

    pub fn results(&self) -> Vec<ProcessingResult> {
        self.state
            .lock()
            .frames
            .iter()
            .map(|frame| frame.result.clone())
            .collect()
    }

    /// Frames recorded after `sequence`, oldest first.
    pub fn frames_since(&self, sequence: u64) -> Vec<ResultFrame> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|frame| frame.sequence > sequence)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> ResultCounts {
        self.state.lock().counts
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the log. Sequence numbers keep increasing so push consumers never
    /// see a number twice.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.counts = ResultCounts::default();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultFrame> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ok(name: &str) -> ProcessingResult {
        ProcessingResult::from_outcome(
            name,
            ResizeOutcome::UpToDate {
                output_path: PathBuf::from("/out").join(name),
            },
        )
    }

    #[tokio::test]
    async fn record_appends_in_order_and_pushes() {
        let reporter = StatusReporter::new(8);
        let mut rx = reporter.subscribe();

        reporter.record(ok("a.png"));
        reporter.record(ProcessingResult::failure(
            "b.jpg",
            &ResizeError::decode("b.jpg", "truncated"),
        ));

        let names: Vec<_> = reporter.results().into_iter().map(|r| r.filename).collect();
        assert_eq!(names, ["a.png", "b.jpg"]);
        assert_eq!(
            reporter.counts(),
            ResultCounts {
                succeeded: 1,
                failed: 1
            }
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(!second.result.success);
    }

    #[test]
    fn clear_keeps_sequence_monotonic() {
        let reporter = StatusReporter::new(8);
        reporter.record(ok("a.png"));
        reporter.clear();
        assert!(reporter.is_empty());
        assert_eq!(reporter.counts(), ResultCounts::default());
        let frame = reporter.record(ok("b.png"));
        assert_eq!(frame.sequence, 2);
        assert_eq!(reporter.frames_since(1).len(), 1);
        assert!(reporter.frames_since(2).is_empty());
    }

    #[test]
    fn concurrent_records_are_pushed_in_sequence_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        for _ in 0..20 {
            let reporter = Arc::new(StatusReporter::new(THREADS * PER_THREAD));
            let mut rx = reporter.subscribe();

            let handles: Vec<_> = (0..THREADS)
                .map(|thread| {
                    let reporter = Arc::clone(&reporter);
                    std::thread::spawn(move || {
                        for idx in 0..PER_THREAD {
                            reporter.record(ok(&format!("{thread}-{idx}.png")));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let mut last = 0;
            let mut received = 0;
            while let Ok(frame) = rx.try_recv() {
                assert!(
                    frame.sequence > last,
                    "frame {} pushed after {}",
                    frame.sequence,
                    last
                );
                last = frame.sequence;
                received += 1;
            }
            assert_eq!(received, THREADS * PER_THREAD);
        }
    }

    #[test]
    fn lagging_subscriber_does_not_block_recording() {
        let reporter = StatusReporter::new(2);
        let _rx = reporter.subscribe();
        for idx in 0..10 {
            reporter.record(ok(&format!("{idx}.png")));
        }
        assert_eq!(reporter.len(), 10);
    }

    #[test]
    fn failure_status_is_the_error_message() {
        let result = ProcessingResult::failure("x.png", &ResizeError::write("/out/x.png", "denied"));
        assert_eq!(result.status, "Failed to write /out/x.png: denied");
        assert!(result.output_path.is_none());
    }
}
