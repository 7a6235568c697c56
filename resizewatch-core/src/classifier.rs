//! Decides which paths are images worth resizing and whether they are done
//! being written.
//!
//! Stability is a portable polling comparator: two size/mtime samples taken a
//! short interval apart must match. Platform notification semantics (one event
//! per write vs. one per close) never leak past this module.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::sleep;

use crate::engine::is_temp_artifact;

/// Extensions (lowercase) the engine will decode and re-encode.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// Size and modification time of a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileFingerprint {
    /// `None` when the path is missing or not a regular file.
    pub fn sample(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileClassifier {
    destination: PathBuf,
    sample_interval: Duration,
}

impl FileClassifier {
    pub fn new(destination: impl Into<PathBuf>, sample_interval: Duration) -> Self {
        Self {
            destination: destination.into(),
            sample_interval,
        }
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Supported image extension and not inside the destination folder.
    pub fn is_processable(&self, path: &Path) -> bool {
        if is_temp_artifact(path) || !has_supported_extension(path) {
            return false;
        }
        !self.is_beneath_destination(path)
    }

    fn is_beneath_destination(&self, path: &Path) -> bool {
        if path.starts_with(&self.destination) {
            return true;
        }
        // Resolve symlinked parents; the file itself may not exist yet.
        let resolved = path
            .parent()
            .and_then(|parent| parent.canonicalize().ok())
            .zip(path.file_name())
            .map(|(parent, name)| parent.join(name));
        resolved.is_some_and(|resolved| resolved.starts_with(&self.destination))
    }

    /// Size and mtime unchanged across two samples one interval apart.
    pub async fn is_stable(&self, path: &Path) -> bool {
        let Some(before) = FileFingerprint::sample(path) else {
            return false;
        };
        sleep(self.sample_interval).await;
        FileFingerprint::sample(path) == Some(before)
    }

    /// Batch form of [`FileClassifier::is_stable`]: one shared sampling delay
    /// for every path. Returns `(stable, unstable)` preserving input order.
    pub async fn partition_stable(&self, paths: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<PathBuf>) {
        if paths.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let before: Vec<_> = paths.iter().map(|p| FileFingerprint::sample(p)).collect();
        sleep(self.sample_interval).await;

        let mut stable = Vec::with_capacity(paths.len());
        let mut unstable = Vec::new();
        for (path, before) in paths.into_iter().zip(before) {
            let after = FileFingerprint::sample(&path);
            if before.is_some() && before == after {
                stable.push(path);
            } else {
                unstable.push(path);
            }
        }
        (stable, unstable)
    }
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}
