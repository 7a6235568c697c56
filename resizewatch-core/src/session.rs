//! Single-session state machine tying the scanner, watcher and engine
//! together.
//!
//! Control calls (`set_*`, `start`, `stop`, `get_status`) never wait on a
//! resize. Start and stop are serialized by an async control lock; the state
//! itself lives behind a short-held `parking_lot` mutex that the processing
//! worker also touches when the subscription dies.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::FileClassifier;
use crate::config::EngineConfig;
use crate::engine::ResizeEngine;
use crate::error::{ResizeError, Result};
use crate::fs_watch::{FolderWatcher, WatchHandle, WatcherEvent};
use crate::policy::{FolderPair, ResizePolicy};
use crate::scanner::{InitialScanner, ScanReport};
use crate::status::{ProcessingResult, StatusReporter, display_name};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Watching,
    /// Stop requested; in-flight resizes are finishing.
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Scanning | SessionState::Watching | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Watching => "watching",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Snapshot returned by [`SessionController::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub running: bool,
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub source_folder: Option<PathBuf>,
    pub destination_folder: Option<PathBuf>,
    pub policy: Option<ResizePolicy>,
    /// Successfully processed files.
    pub processed_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub results: Vec<ProcessingResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Uuid),
    /// A watch session was already active; nothing was started.
    AlreadyWatching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// There was no watch session to stop. Carries the state found.
    NotWatching(SessionState),
}

#[derive(Debug, Default)]
struct SessionShared {
    state: SessionState,
    folders: Option<FolderPair>,
    policy: Option<ResizePolicy>,
    last_error: Option<String>,
    session_id: Option<Uuid>,
    /// Set when a run ends; the next initial pass starts from an empty log.
    needs_reset: bool,
}

#[derive(Debug)]
struct ActiveSession {
    watch: WatchHandle,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ActiveSession {
    async fn shutdown(mut self) {
        // Stop taking events first, then drop the subscription.
        self.cancel.cancel();
        self.watch.stop().await;
        if let Err(err) = self.worker.await {
            warn!("processing worker ended abnormally: {err}");
        }
    }
}

#[derive(Debug)]
struct ControllerInner {
    config: EngineConfig,
    engine: Arc<ResizeEngine>,
    reporter: Arc<StatusReporter>,
    shared: Mutex<SessionShared>,
    control: AsyncMutex<Option<ActiveSession>>,
}

impl ControllerInner {
    fn finish_scan(&self, error: Option<String>) {
        let mut shared = self.shared.lock();
        if shared.state == SessionState::Scanning {
            shared.state = SessionState::Idle;
        }
        if let Some(error) = error {
            warn!("initial processing failed: {error}");
            shared.last_error = Some(error);
        }
    }

    /// Record a fatal watch failure unless a stop already claimed the session.
    fn fail(&self, reason: String) {
        let mut shared = self.shared.lock();
        if shared.state != SessionState::Watching {
            debug!(state = %shared.state, "ignoring watch failure after stop: {reason}");
            return;
        }
        error!("watch session failed: {reason}");
        shared.state = SessionState::Failed;
        shared.last_error = Some(reason);
        shared.needs_reset = true;
    }
}

/// Owner of the one active session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(config: EngineConfig) -> Self {
        let engine = Arc::new(ResizeEngine::new(&config.processing));
        let reporter = Arc::new(StatusReporter::new(config.status.push_capacity));
        Self {
            inner: Arc::new(ControllerInner {
                config,
                engine,
                reporter,
                shared: Mutex::new(SessionShared::default()),
                control: AsyncMutex::new(None),
            }),
        }
    }

    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.inner.reporter
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    /// Validate and store the folder pair. Rejected while a session is active.
    pub fn set_folders(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
    ) -> Result<FolderPair> {
        self.ensure_idle("change folders")?;
        let folders = FolderPair::resolve(
            source,
            destination,
            self.inner.config.processing.create_missing_destination,
        )?;

        let mut shared = self.inner.shared.lock();
        if shared.state.is_running() {
            return Err(busy("change folders", shared.state));
        }
        info!(
            source = %folders.source().display(),
            destination = %folders.destination().display(),
            "folders set"
        );
        shared.folders = Some(folders.clone());
        Ok(folders)
    }

    pub fn set_resize_options(&self, policy: ResizePolicy) -> Result<()> {
        policy.validate()?;
        let mut shared = self.inner.shared.lock();
        if shared.state.is_running() {
            return Err(busy("change resize options", shared.state));
        }
        info!(%policy, "resize options set");
        shared.policy = Some(policy);
        Ok(())
    }

    /// Resize everything already in the source folder, once.
    pub async fn initial_processing(&self) -> Result<ScanReport> {
        let (folders, policy) = {
            let mut shared = self.inner.shared.lock();
            if shared.state.is_running() {
                return Err(busy("start initial processing", shared.state));
            }
            let (folders, policy) = configured(&shared)?;
            if shared.needs_reset {
                self.inner.reporter.clear();
                shared.needs_reset = false;
                shared.last_error = None;
            }
            shared.state = SessionState::Scanning;
            (folders, policy)
        };

        // Runs to completion and leaves Scanning even if this future is dropped.
        let classifier = self.classifier_for(&folders);
        let inner = self.inner.clone();
        let scan = tokio::spawn(async move {
            let scanner = InitialScanner::new(inner.engine.clone(), classifier);
            let reporter = inner.reporter.clone();
            let outcome = scanner
                .scan_with(&folders, &policy, |result| {
                    reporter.record(result.clone());
                })
                .await;
            inner.finish_scan(outcome.as_ref().err().map(ToString::to_string));
            outcome
        });

        match scan.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let reason = format!("initial scan task failed: {err}");
                self.inner.finish_scan(Some(reason.clone()));
                Err(ResizeError::Internal(reason))
            }
        }
    }

    /// Begin watching the source folder. A second call while watching is a
    /// no-op.
    pub async fn start_processing(&self) -> Result<StartOutcome> {
        let mut control = self.inner.control.lock().await;

        let (folders, policy, session_id) = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                SessionState::Watching => {
                    debug!("start requested while already watching");
                    return Ok(StartOutcome::AlreadyWatching);
                }
                state if state.is_running() => return Err(busy("start processing", state)),
                _ => {}
            }
            let (folders, policy) = configured(&shared)?;
            let session_id = Uuid::new_v4();
            shared.state = SessionState::Watching;
            shared.session_id = Some(session_id);
            shared.last_error = None;
            (folders, policy, session_id)
        };

        // Leftovers of a session that failed on its own.
        if let Some(stale) = control.take() {
            stale.shutdown().await;
        }

        let watcher = FolderWatcher::new(
            self.inner.config.watch.clone(),
            self.classifier_for(&folders),
        );
        let (watch, events) = match watcher.start(folders.source()).await {
            Ok(started) => started,
            Err(err) => {
                let mut shared = self.inner.shared.lock();
                shared.state = SessionState::Failed;
                shared.last_error = Some(err.to_string());
                shared.needs_reset = true;
                error!(source = %folders.source().display(), "failed to start watching: {err}");
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            self.inner.clone(),
            WorkerPlan {
                destination: folders.destination().to_path_buf(),
                policy,
            },
            events,
            cancel.clone(),
        ));

        *control = Some(ActiveSession {
            watch,
            worker,
            cancel,
        });
        info!(%session_id, source = %folders.source().display(), %policy, "processing started");
        Ok(StartOutcome::Started(session_id))
    }

    /// Stop watching and wait for in-flight resizes to land.
    pub async fn stop_processing(&self) -> StopOutcome {
        let mut control = self.inner.control.lock().await;

        let found = {
            let mut shared = self.inner.shared.lock();
            let found = shared.state;
            if found == SessionState::Watching {
                shared.state = SessionState::Stopping;
            }
            found
        };

        let active = control.take();
        if found != SessionState::Watching {
            if let Some(stale) = active {
                debug!(state = %found, "releasing watcher left by an ended session");
                stale.shutdown().await;
            }
            return StopOutcome::NotWatching(found);
        }

        if let Some(active) = active {
            active.shutdown().await;
        }

        let mut shared = self.inner.shared.lock();
        shared.state = SessionState::Stopped;
        shared.needs_reset = true;
        info!(session_id = ?shared.session_id, "processing stopped");
        StopOutcome::Stopped
    }

    /// Stop any active session before the process exits.
    pub async fn shutdown(&self) {
        if let StopOutcome::Stopped = self.stop_processing().await {
            info!("active session stopped for shutdown");
        }
    }

    /// Never waits on scanning or resizing.
    pub fn get_status(&self) -> SessionStatus {
        let shared = self.inner.shared.lock();
        let counts = self.inner.reporter.counts();
        SessionStatus {
            running: shared.state.is_running(),
            state: shared.state,
            session_id: shared.session_id,
            source_folder: shared.folders.as_ref().map(|f| f.source().to_path_buf()),
            destination_folder: shared
                .folders
                .as_ref()
                .map(|f| f.destination().to_path_buf()),
            policy: shared.policy,
            processed_count: counts.succeeded,
            succeeded: counts.succeeded,
            failed: counts.failed,
            last_error: shared.last_error.clone(),
            results: self.inner.reporter.results(),
        }
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        let state = self.state();
        if state.is_running() {
            return Err(busy(action, state));
        }
        Ok(())
    }

    fn classifier_for(&self, folders: &FolderPair) -> FileClassifier {
        FileClassifier::new(
            folders.destination(),
            self.inner.config.watch.stabilization_interval(),
        )
    }
}

fn busy(action: &str, state: SessionState) -> ResizeError {
    ResizeError::Busy(format!("cannot {action} while {state}"))
}

fn configured(shared: &SessionShared) -> Result<(FolderPair, ResizePolicy)> {
    let folders = shared.folders.clone().ok_or_else(|| {
        ResizeError::NotConfigured("source and destination folders are not set".into())
    })?;
    let policy = shared
        .policy
        .ok_or_else(|| ResizeError::NotConfigured("resize options are not set".into()))?;
    Ok((folders, policy))
}

struct WorkerPlan {
    destination: PathBuf,
    policy: ResizePolicy,
}

/// Consume ready-file notifications until cancelled or the subscription dies,
/// then let running resizes finish.
async fn run_worker(
    inner: Arc<ControllerInner>,
    plan: WorkerPlan,
    mut events: mpsc::Receiver<WatcherEvent>,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(
        inner.config.processing.max_parallel_resizes.max(1),
    ));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(err) = joined {
                warn!("resize task failed: {err}");
            }
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(WatcherEvent::Ready(path)) => {
                let engine = inner.engine.clone();
                let reporter = inner.reporter.clone();
                let destination = plan.destination.clone();
                let policy = plan.policy;
                in_flight.spawn(async move {
                    let result = engine.process(path, destination, policy).await;
                    reporter.record(result);
                    drop(permit);
                });
            }
            Some(WatcherEvent::Unstable { path, error }) => {
                inner
                    .reporter
                    .record(ProcessingResult::failure(display_name(&path), &error));
            }
            Some(WatcherEvent::SubscriptionLost(reason)) => {
                inner.fail(reason);
                break;
            }
            None => {
                inner.fail("watch event stream ended unexpectedly".to_string());
                break;
            }
        }
    }

    let draining = in_flight.len();
    if draining > 0 {
        debug!(draining, "waiting for in-flight resizes");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(err) = joined {
            warn!("resize task failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    fn controller() -> SessionController {
        let mut config = EngineConfig::default();
        config.watch.stabilization_interval_ms = 30;
        config.watch.health_check_interval_ms = 50;
        SessionController::new(config)
    }

    fn save(path: PathBuf) {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([1, 2, 3])))
            .save(path)
            .unwrap();
    }

    #[tokio::test]
    async fn initial_processing_requires_configuration() {
        let controller = controller();
        let err = controller.initial_processing().await.unwrap_err();
        assert!(matches!(err, ResizeError::NotConfigured(_)));

        let tmp = tempdir().unwrap();
        controller
            .set_folders(tmp.path(), tmp.path().join("out"))
            .unwrap();
        let err = controller.initial_processing().await.unwrap_err();
        assert!(matches!(err, ResizeError::NotConfigured(_)));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn start_requires_configuration() {
        let controller = controller();
        let err = controller.start_processing().await.unwrap_err();
        assert!(matches!(err, ResizeError::NotConfigured(_)));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn scan_results_land_in_status() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("in");
        fs::create_dir(&src).unwrap();
        save(src.join("a.png"));

        let controller = controller();
        controller.set_folders(&src, tmp.path().join("out")).unwrap();
        controller
            .set_resize_options(ResizePolicy::scale_factor(0.5).unwrap())
            .unwrap();

        let mut rx = controller.reporter().subscribe();
        let report = controller.initial_processing().await.unwrap();
        assert_eq!(report.results.len(), 1);

        let status = controller.get_status();
        assert!(!status.running);
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.processed_count, 1);
        assert_eq!(status.results, report.results);
        assert_eq!(rx.recv().await.unwrap().result.filename, "a.png");
    }

    #[tokio::test]
    async fn configuration_is_locked_while_watching() {
        let tmp = tempdir().unwrap();
        let controller = controller();
        controller
            .set_folders(tmp.path(), tmp.path().join("out"))
            .unwrap();
        controller
            .set_resize_options(ResizePolicy::target_resolution(64).unwrap())
            .unwrap();

        assert!(matches!(
            controller.start_processing().await.unwrap(),
            StartOutcome::Started(_)
        ));
        assert!(controller.get_status().running);

        let err = controller
            .set_resize_options(ResizePolicy::scale_factor(2.0).unwrap())
            .unwrap_err();
        assert!(matches!(err, ResizeError::Busy(_)));
        let err = controller
            .set_folders(tmp.path(), tmp.path().join("other"))
            .unwrap_err();
        assert!(matches!(err, ResizeError::Busy(_)));
        let err = controller.initial_processing().await.unwrap_err();
        assert!(matches!(err, ResizeError::Busy(_)));

        assert_eq!(
            controller.start_processing().await.unwrap(),
            StartOutcome::AlreadyWatching
        );
        assert_eq!(controller.stop_processing().await, StopOutcome::Stopped);
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(!controller.get_status().running);
    }

    #[tokio::test]
    async fn stop_without_session_reports_state() {
        let controller = controller();
        assert_eq!(
            controller.stop_processing().await,
            StopOutcome::NotWatching(SessionState::Idle)
        );
    }

    #[test]
    fn running_states() {
        assert!(SessionState::Scanning.is_running());
        assert!(SessionState::Watching.is_running());
        assert!(SessionState::Stopping.is_running());
        assert!(!SessionState::Idle.is_running());
        assert!(!SessionState::Stopped.is_running());
        assert!(!SessionState::Failed.is_running());
        assert_eq!(
            serde_json::to_string(&SessionState::Watching).unwrap(),
            "\"watching\""
        );
    }
}
