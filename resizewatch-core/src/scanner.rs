//! One-shot pass over the files already sitting in the source folder.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::classifier::FileClassifier;
use crate::engine::ResizeEngine;
use crate::error::{ResizeError, Result};
use crate::policy::{FolderPair, ResizePolicy};
use crate::status::{ProcessingResult, display_name};

/// Results of one scan, in lexicographic filename order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub results: Vec<ProcessingResult>,
    /// Files still being written when sampled. Left for the watcher.
    pub deferred: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InitialScanner {
    engine: Arc<ResizeEngine>,
    classifier: FileClassifier,
}

impl InitialScanner {
    pub fn new(engine: Arc<ResizeEngine>, classifier: FileClassifier) -> Self {
        Self { engine, classifier }
    }

    /// Resize every qualifying file directly inside `folders.source()`.
    ///
    /// Only an unreadable source folder fails the scan; per-file problems come
    /// back as failed results.
    pub async fn scan(&self, folders: &FolderPair, policy: &ResizePolicy) -> Result<ScanReport> {
        self.scan_with(folders, policy, |_| {}).await
    }

    /// [`InitialScanner::scan`], calling `on_result` as each file finishes.
    pub async fn scan_with(
        &self,
        folders: &FolderPair,
        policy: &ResizePolicy,
        mut on_result: impl FnMut(&ProcessingResult),
    ) -> Result<ScanReport> {
        let candidates = self.list_candidates(folders).await?;
        info!(
            source = %folders.source().display(),
            candidates = candidates.len(),
            %policy,
            "starting initial processing"
        );

        let (stable, unstable) = self.classifier.partition_stable(candidates).await;
        let deferred: Vec<String> = unstable.iter().map(|path| display_name(path)).collect();
        for name in &deferred {
            debug!(file = %name, "file still being written; leaving it for the watcher");
        }

        let mut results = Vec::with_capacity(stable.len());
        for path in stable {
            let result = self
                .engine
                .process(path, folders.destination().to_path_buf(), *policy)
                .await;
            on_result(&result);
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            processed = results.len(),
            failed,
            deferred = deferred.len(),
            "initial processing complete"
        );

        Ok(ScanReport { results, deferred })
    }

    async fn list_candidates(&self, folders: &FolderPair) -> Result<Vec<PathBuf>> {
        let source = folders.source();
        let mut entries = tokio::fs::read_dir(source).await.map_err(|err| {
            ResizeError::InvalidPath(format!(
                "Source folder is not readable: {}: {err}",
                source.display()
            ))
        })?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            let path = entry.path();
            // Symlinks to files count; directories never do.
            let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
            if is_file && self.classifier.is_processable(&path) {
                candidates.push(path);
            }
        }

        candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn scanner_for(folders: &FolderPair) -> InitialScanner {
        InitialScanner::new(
            Arc::new(ResizeEngine::new(&ProcessingConfig::default())),
            FileClassifier::new(folders.destination(), Duration::from_millis(30)),
        )
    }

    fn save(path: PathBuf, width: u32, height: u32) {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])))
            .save(path)
            .unwrap();
    }

    #[tokio::test]
    async fn scan_processes_in_lexicographic_order() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir(&src).unwrap();
        save(src.join("b.jpg"), 50, 100);
        save(src.join("a.png"), 100, 50);
        fs::write(src.join("readme.txt"), "skip me").unwrap();
        fs::create_dir(src.join("nested.png")).unwrap();

        let folders = FolderPair::resolve(&src, root.path().join("dst"), true).unwrap();
        let report = scanner_for(&folders)
            .scan(&folders, &ResizePolicy::target_resolution(200).unwrap())
            .await
            .unwrap();

        let names: Vec<_> = report.results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["a.png", "b.jpg"]);
        assert!(report.results.iter().all(|r| r.success));
        assert!(report.deferred.is_empty());

        let dst = folders.destination();
        assert_eq!(image::image_dimensions(dst.join("a.png")).unwrap(), (200, 100));
        assert_eq!(image::image_dimensions(dst.join("b.jpg")).unwrap(), (100, 200));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_failed_result_not_an_error() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.png"), b"garbage").unwrap();
        save(src.join("b.png"), 40, 40);

        let folders = FolderPair::resolve(&src, root.path().join("dst"), true).unwrap();
        let report = scanner_for(&folders)
            .scan(&folders, &ResizePolicy::scale_factor(0.5).unwrap())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(!report.results[0].success);
        assert!(report.results[1].success);
        assert_eq!(
            image::image_dimensions(folders.destination().join("b.png")).unwrap(),
            (20, 20)
        );
    }

    #[tokio::test]
    async fn destination_inside_source_is_not_rescanned() {
        let root = tempdir().unwrap();
        save(root.path().join("a.png"), 10, 10);
        let folders = FolderPair::resolve(root.path(), root.path().join("out"), true).unwrap();
        save(folders.destination().join("old.png"), 10, 10);

        let report = scanner_for(&folders)
            .scan(&folders, &ResizePolicy::scale_factor(2.0).unwrap())
            .await
            .unwrap();
        let names: Vec<_> = report.results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["a.png"]);
    }

    #[tokio::test]
    async fn scan_with_reports_each_file_as_it_finishes() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir(&src).unwrap();
        save(src.join("b.png"), 8, 8);
        save(src.join("a.png"), 8, 8);

        let folders = FolderPair::resolve(&src, root.path().join("dst"), true).unwrap();
        let mut seen = Vec::new();
        let report = scanner_for(&folders)
            .scan_with(&folders, &ResizePolicy::scale_factor(0.5).unwrap(), |result| {
                seen.push(result.filename.clone())
            })
            .await
            .unwrap();
        assert_eq!(seen, ["a.png", "b.png"]);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn vanished_source_folder_fails_the_scan() {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir(&src).unwrap();
        let folders = FolderPair::resolve(&src, root.path().join("dst"), true).unwrap();
        fs::remove_dir(&src).unwrap();

        let err = scanner_for(&folders)
            .scan(&folders, &ResizePolicy::scale_factor(2.0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResizeError::InvalidPath(_)));
    }
}
