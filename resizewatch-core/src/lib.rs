//! # Resizewatch Core
//!
//! Folder-watching image resize engine. A caller picks a source and a
//! destination folder plus a resize policy, runs a one-shot pass over the
//! images already present, then watches the source folder and resizes every
//! new image until told to stop.
//!
//! ## Architecture
//!
//! - [`policy`]: [`ResizePolicy`] and the validated [`FolderPair`]
//! - [`engine`]: decode, resize and atomic re-encode of one file
//! - [`classifier`]: which paths qualify and whether they stopped changing
//! - [`scanner`]: the initial pass over existing files
//! - [`fs_watch`]: OS notifications debounced into one "ready" event per file
//! - [`status`]: the result log and its push channel
//! - [`session`]: the state machine that owns the single active session
//!
//! ## Example
//!
//! ```no_run
//! use resizewatch_core::{EngineConfig, ResizePolicy, SessionController};
//!
//! async fn run() -> resizewatch_core::Result<()> {
//!     let controller = SessionController::new(EngineConfig::default());
//!     controller.set_folders("/photos/incoming", "/photos/small")?;
//!     controller.set_resize_options(ResizePolicy::target_resolution(1024)?)?;
//!
//!     let report = controller.initial_processing().await?;
//!     println!("resized {} existing files", report.results.len());
//!
//!     controller.start_processing().await?;
//!     // ... new files are resized as they appear ...
//!     controller.stop_processing().await;
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_watch;
pub mod policy;
pub mod scanner;
pub mod session;
pub mod status;

pub use classifier::{FileClassifier, FileFingerprint, SUPPORTED_EXTENSIONS};
pub use config::{EngineConfig, ProcessingConfig, ResampleFilter, StatusConfig, WatchConfig};
pub use engine::{Dimensions, ResizeEngine, ResizeOutcome};
pub use error::{ResizeError, Result};
pub use fs_watch::{FolderWatcher, WatchHandle, WatcherEvent};
pub use policy::{FolderPair, ResizePolicy};
pub use scanner::{InitialScanner, ScanReport};
pub use session::{SessionController, SessionState, SessionStatus, StartOutcome, StopOutcome};
pub use status::{ProcessingResult, ResultCounts, ResultFrame, StatusReporter};
