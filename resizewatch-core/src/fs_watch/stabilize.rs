use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::classifier::FileFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stabilization {
    Stable(FileFingerprint),
    /// Deleted or renamed away while we were waiting.
    Vanished,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StabilizeParams {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

/// Wait until two samples `interval` apart agree, backing off between
/// attempts. Holds no locks; cancellation is dropping the future.
pub(crate) async fn await_stable(path: &Path, params: StabilizeParams) -> Stabilization {
    let started = Instant::now();
    let mut backoff = params.interval;

    loop {
        let Some(before) = FileFingerprint::sample(path) else {
            return Stabilization::Vanished;
        };
        sleep(params.interval).await;
        let Some(after) = FileFingerprint::sample(path) else {
            return Stabilization::Vanished;
        };
        if before == after {
            return Stabilization::Stable(after);
        }
        if started.elapsed() >= params.timeout {
            return Stabilization::TimedOut;
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(params.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn params(timeout_ms: u64) -> StabilizeParams {
        StabilizeParams {
            interval: Duration::from_millis(40),
            max_backoff: Duration::from_millis(80),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn settles_after_writer_finishes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("c.bmp");
        fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let mut file = fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
                file.write_all(b"chunk").unwrap();
            }
        });

        let outcome = await_stable(&path, params(5_000)).await;
        writer.await.unwrap();
        let Stabilization::Stable(fp) = outcome else {
            panic!("expected stable, got {outcome:?}");
        };
        assert_eq!(fp.size, 1 + 10 * 5);
    }

    #[tokio::test]
    async fn gives_up_on_endless_writer() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("endless.png");
        fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let Ok(mut file) = fs::OpenOptions::new().append(true).open(&writer_path) else {
                    break;
                };
                let _ = file.write_all(b"more");
            }
        });

        let outcome = await_stable(&path, params(200)).await;
        writer.abort();
        assert_eq!(outcome, Stabilization::TimedOut);
    }

    #[tokio::test]
    async fn missing_file_vanishes() {
        let tmp = tempdir().unwrap();
        let outcome = await_stable(&tmp.path().join("nope.png"), params(200)).await;
        assert_eq!(outcome, Stabilization::Vanished);
    }
}
