//! Filesystem watch pipeline for the source folder.
//!
//! A thin wrapper around `notify` that turns raw notifications into a single
//! "ready" notification per stabilized file. Bursts of events for one path
//! (create, a run of writes, close) collapse onto one in-flight stabilization;
//! a file whose fingerprint has already been emitted is not emitted again
//! until its content changes. Losing the subscription is surfaced explicitly
//! so the session can fail loudly instead of going quiet.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, EventKind, MetadataKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet, spawn_blocking};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

mod stabilize;

use self::stabilize::{StabilizeParams, Stabilization, await_stable};
use crate::classifier::{FileClassifier, FileFingerprint};
use crate::config::WatchConfig;
use crate::error::{ResizeError, Result};

/// How long the loop waits for room to report a lost subscription.
const LOSS_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the watch loop hands to its consumer.
#[derive(Debug)]
pub enum WatcherEvent {
    /// The file has stopped changing and can be resized.
    Ready(PathBuf),
    /// The file never settled; report it and move on.
    Unstable { path: PathBuf, error: ResizeError },
    /// The OS subscription is gone. No further events follow.
    SubscriptionLost(String),
}

/// Subscribes to one source folder at a time.
#[derive(Debug, Clone)]
pub struct FolderWatcher {
    config: WatchConfig,
    classifier: FileClassifier,
}

impl FolderWatcher {
    pub fn new(config: WatchConfig, classifier: FileClassifier) -> Self {
        Self { config, classifier }
    }

    /// Subscribe to `source` (non-recursive) and spawn the debounce loop.
    ///
    /// Fails with [`ResizeError::WatchSubscription`] when the OS refuses the
    /// subscription.
    pub async fn start(
        &self,
        source: &Path,
    ) -> Result<(WatchHandle, mpsc::Receiver<WatcherEvent>)> {
        let capacity = self.config.channel_capacity();
        let (raw_tx, raw_rx) = mpsc::channel::<WatchMessage>(capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<WatcherEvent>(capacity);

        let root = source.to_path_buf();
        let watch_root = root.clone();
        let watcher = spawn_blocking(move || init_watcher(&watch_root, raw_tx))
            .await
            .map_err(|err| {
                ResizeError::WatchSubscription(format!("watcher initialization panicked: {err}"))
            })??;

        let cancel = CancellationToken::new();
        let task = spawn_watch_loop(
            WatchLoop {
                root: root.clone(),
                classifier: self.classifier.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
            },
            raw_rx,
            ready_tx,
        );

        info!(source = %root.display(), "folder watcher started");

        Ok((
            WatchHandle {
                root,
                watcher: Some(watcher),
                task: Some(task),
                cancel,
            },
            ready_rx,
        ))
    }
}

/// Owns the OS subscription and the debounce task for one folder.
pub struct WatchHandle {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WatchHandle {
    /// Release the subscription, cancel pending stabilizations and wait for
    /// the loop to exit. Idempotent.
    pub async fn stop(&mut self) {
        // Dropping the watcher ends the notify stream.
        self.watcher.take();
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(source = %self.root.display(), "watch loop ended abnormally: {err}");
        }
        debug!(source = %self.root.display(), "folder watcher stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("root", &self.root)
            .field("subscribed", &self.watcher.is_some())
            .field(
                "loop_finished",
                &self.task.as_ref().is_none_or(|task| task.is_finished()),
            )
            .finish()
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

fn init_watcher(root: &Path, tx: mpsc::Sender<WatchMessage>) -> Result<RecommendedWatcher> {
    let path_for_log = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let msg = match res {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error(err.to_string()),
            };
            if let Err(err) = tx.blocking_send(msg) {
                trace!(
                    "fs_watch channel closed for {}: {:?}",
                    path_for_log.display(),
                    err.0
                );
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        ResizeError::WatchSubscription(format!(
            "failed to create watcher for {}: {err}",
            root.display()
        ))
    })?;

    watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(|err| {
            ResizeError::WatchSubscription(format!("failed to watch {}: {err}", root.display()))
        })?;

    Ok(watcher)
}

struct WatchLoop {
    root: PathBuf,
    classifier: FileClassifier,
    config: WatchConfig,
    cancel: CancellationToken,
}

impl WatchLoop {
    fn params(&self) -> StabilizeParams {
        StabilizeParams {
            interval: self.classifier.sample_interval(),
            max_backoff: self.config.max_backoff(),
            timeout: self.config.stabilization_timeout(),
        }
    }

    /// Forward to the consumer without ignoring cancellation. `false` once the
    /// loop should exit.
    async fn forward(&self, tx: &mpsc::Sender<WatcherEvent>, event: WatcherEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = tx.send(event) => sent.is_ok(),
        }
    }
}

fn spawn_watch_loop(
    ctx: WatchLoop,
    mut raw_rx: mpsc::Receiver<WatchMessage>,
    ready_tx: mpsc::Sender<WatcherEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let params = ctx.params();
        let mut pending: HashSet<PathBuf> = HashSet::new();
        let mut emitted: HashMap<PathBuf, FileFingerprint> = HashMap::new();
        let mut stabilizers: JoinSet<(PathBuf, Stabilization)> = JoinSet::new();

        let mut health = interval(ctx.config.health_check_interval());
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let lost_reason = loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break None,

                msg = raw_rx.recv() => {
                    let event = match msg {
                        Some(WatchMessage::Event(event)) => event,
                        Some(WatchMessage::Error(error)) => break Some(error),
                        None => break Some("notification stream closed".to_string()),
                    };

                    if touches_root(&event, &ctx.root) && !ctx.root.is_dir() {
                        break Some(format!(
                            "source folder removed: {}",
                            ctx.root.display()
                        ));
                    }

                    for path in removed_paths(&event) {
                        emitted.remove(&path);
                    }

                    for path in candidate_paths(&event) {
                        if !ctx.classifier.is_processable(&path) {
                            continue;
                        }
                        // Already stabilizing: this event is part of the same burst.
                        if pending.insert(path.clone()) {
                            trace!(path = %path.display(), "stabilizing");
                            stabilizers.spawn(async move {
                                let outcome = await_stable(&path, params).await;
                                (path, outcome)
                            });
                        }
                    }
                }

                Some(joined) = stabilizers.join_next(), if !stabilizers.is_empty() => {
                    let (path, outcome) = match joined {
                        Ok(done) => done,
                        Err(err) => {
                            warn!("stabilization task failed: {err}");
                            continue;
                        }
                    };

                    match outcome {
                        Stabilization::Stable(fingerprint) => {
                            pending.remove(&path);
                            match FileFingerprint::sample(&path) {
                                // Changed between the last sample and now; go again.
                                Some(current) if current != fingerprint => {
                                    pending.insert(path.clone());
                                    stabilizers.spawn(async move {
                                        let outcome = await_stable(&path, params).await;
                                        (path, outcome)
                                    });
                                }
                                Some(_) => {
                                    if emitted.get(&path) == Some(&fingerprint) {
                                        debug!(path = %path.display(), "unchanged since last emission");
                                        continue;
                                    }
                                    emitted.insert(path.clone(), fingerprint);
                                    debug!(path = %path.display(), "file ready");
                                    if !ctx.forward(&ready_tx, WatcherEvent::Ready(path)).await {
                                        break None;
                                    }
                                }
                                None => {
                                    emitted.remove(&path);
                                }
                            }
                        }
                        Stabilization::Vanished => {
                            pending.remove(&path);
                            emitted.remove(&path);
                            debug!(path = %path.display(), "file disappeared before settling");
                        }
                        Stabilization::TimedOut => {
                            pending.remove(&path);
                            let error = ResizeError::StabilizationTimeout {
                                path: path.clone(),
                                timeout: params.timeout,
                            };
                            warn!(path = %path.display(), "{error}");
                            if !ctx
                                .forward(&ready_tx, WatcherEvent::Unstable { path, error })
                                .await
                            {
                                break None;
                            }
                        }
                    }
                }

                _ = health.tick() => {
                    if !ctx.root.is_dir() {
                        break Some(format!(
                            "source folder is no longer accessible: {}",
                            ctx.root.display()
                        ));
                    }
                }
            }
        };

        // In-flight stabilizations are canceled with the set.
        stabilizers.abort_all();

        if let Some(reason) = lost_reason {
            error!(source = %ctx.root.display(), "watch subscription lost: {reason}");
            let lost = WatcherEvent::SubscriptionLost(reason);
            match tokio::time::timeout(LOSS_DELIVERY_TIMEOUT, ready_tx.send(lost)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => trace!("consumer gone before subscription loss was delivered"),
                Err(_) => error!("ready channel stayed full; subscription loss not delivered"),
            }
        }
    })
}

fn touches_root(event: &Event, root: &Path) -> bool {
    event.paths.iter().any(|path| path == root)
}

/// Paths that may now hold new content.
fn candidate_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).cloned().into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => Vec::new(),
        EventKind::Modify(_) => event.paths.clone(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event.paths.clone(),
        EventKind::Any | EventKind::Other => event.paths.clone(),
        EventKind::Access(_) | EventKind::Remove(_) => Vec::new(),
    }
}

fn removed_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Remove(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Both)) => {
            event.paths.first().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn create_and_write_events_are_candidates() {
        let created = event(EventKind::Create(CreateKind::File), &["/in/a.png"]);
        assert_eq!(candidate_paths(&created), vec![PathBuf::from("/in/a.png")]);

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/in/a.png"],
        );
        assert_eq!(candidate_paths(&written), vec![PathBuf::from("/in/a.png")]);

        let closed = event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            &["/in/a.png"],
        );
        assert_eq!(candidate_paths(&closed), vec![PathBuf::from("/in/a.png")]);
    }

    #[test]
    fn reads_and_removals_are_ignored() {
        let read = event(
            EventKind::Access(AccessKind::Close(AccessMode::Read)),
            &["/in/a.png"],
        );
        assert!(candidate_paths(&read).is_empty());

        let removed = event(EventKind::Remove(RemoveKind::File), &["/in/a.png"]);
        assert!(candidate_paths(&removed).is_empty());
        assert_eq!(removed_paths(&removed), vec![PathBuf::from("/in/a.png")]);
    }

    #[test]
    fn rename_targets_the_new_name() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/in/a.tmp", "/in/a.png"],
        );
        assert_eq!(candidate_paths(&renamed), vec![PathBuf::from("/in/a.png")]);
        assert_eq!(removed_paths(&renamed), vec![PathBuf::from("/in/a.tmp")]);

        let moved_in = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/in/b.png"],
        );
        assert_eq!(candidate_paths(&moved_in), vec![PathBuf::from("/in/b.png")]);
    }

    #[test]
    fn root_events_are_detected() {
        let root = Path::new("/in");
        let gone = event(EventKind::Remove(RemoveKind::Folder), &["/in"]);
        assert!(touches_root(&gone, root));
        let child = event(EventKind::Remove(RemoveKind::File), &["/in/a.png"]);
        assert!(!touches_root(&child, root));
    }
}
