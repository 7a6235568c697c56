//! Resize policy and folder pair values.
//!
//! Both are immutable once built; the session controller replaces them
//! wholesale on every configuration call.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ResizeError, Result};

/// How one image is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Multiply both sides by `factor`.
    ScaleFactor { factor: f64 },
    /// Scale the longer side to exactly `resolution` pixels, preserving aspect ratio.
    TargetResolution { resolution: u32 },
}

impl ResizePolicy {
    pub fn scale_factor(factor: f64) -> Result<Self> {
        let policy = ResizePolicy::ScaleFactor { factor };
        policy.validate()?;
        Ok(policy)
    }

    pub fn target_resolution(resolution: u32) -> Result<Self> {
        let policy = ResizePolicy::TargetResolution { resolution };
        policy.validate()?;
        Ok(policy)
    }

    /// Build a policy from the two optional remote-call arguments.
    ///
    /// A target resolution wins over a scale factor when both are present.
    pub fn from_options(scale_factor: Option<f64>, target_resolution: Option<u32>) -> Result<Self> {
        match (target_resolution, scale_factor) {
            (Some(resolution), _) => Self::target_resolution(resolution),
            (None, Some(factor)) => Self::scale_factor(factor),
            (None, None) => Err(ResizeError::InvalidPolicy(
                "either a scale factor or a target resolution is required".into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            ResizePolicy::ScaleFactor { factor } if !factor.is_finite() || factor <= 0.0 => Err(
                ResizeError::InvalidPolicy(format!("scale factor must be > 0, got {factor}")),
            ),
            ResizePolicy::TargetResolution { resolution: 0 } => Err(ResizeError::InvalidPolicy(
                "target resolution must be at least 1 pixel".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Output dimensions for a `width` x `height` source. Never returns a zero side.
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            ResizePolicy::ScaleFactor { factor } => {
                (scale_side(width, factor), scale_side(height, factor))
            }
            ResizePolicy::TargetResolution { resolution } => {
                let long = width.max(height).max(1);
                let ratio = f64::from(resolution) / f64::from(long);
                if width >= height {
                    (resolution, scale_side(height, ratio))
                } else {
                    (scale_side(width, ratio), resolution)
                }
            }
        }
    }
}

impl fmt::Display for ResizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResizePolicy::ScaleFactor { factor } => write!(f, "scale x{factor}"),
            ResizePolicy::TargetResolution { resolution } => {
                write!(f, "longest side {resolution}px")
            }
        }
    }
}

fn scale_side(side: u32, factor: f64) -> u32 {
    let scaled = (f64::from(side) * factor).round();
    if scaled < 1.0 {
        1
    } else if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Validated source/destination directories, both canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderPair {
    source: PathBuf,
    destination: PathBuf,
}

impl FolderPair {
    /// Validate and canonicalize a folder pair.
    ///
    /// A missing destination is created when `create_missing_destination` is set.
    pub fn resolve(
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        create_missing_destination: bool,
    ) -> Result<Self> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        if source.as_os_str().is_empty() || destination.as_os_str().is_empty() {
            return Err(ResizeError::InvalidPath(
                "Both a source and a destination folder are required".into(),
            ));
        }

        if !source.is_dir() {
            return Err(ResizeError::InvalidPath(format!(
                "Source folder does not exist: {}",
                source.display()
            )));
        }

        if !destination.exists() {
            if !create_missing_destination {
                return Err(ResizeError::InvalidPath(format!(
                    "Destination folder does not exist: {}",
                    destination.display()
                )));
            }
            fs::create_dir_all(destination).map_err(|err| {
                ResizeError::InvalidPath(format!("Failed to create destination folder: {err}"))
            })?;
            info!(path = %destination.display(), "created destination folder");
        } else if !destination.is_dir() {
            return Err(ResizeError::InvalidPath(format!(
                "Destination is not a folder: {}",
                destination.display()
            )));
        }

        let source = canonical(source)?;
        let destination = canonical(destination)?;
        if source == destination {
            return Err(ResizeError::InvalidPath(
                "Source and destination folders must be different".into(),
            ));
        }

        Ok(Self {
            source,
            destination,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|err| {
        ResizeError::InvalidPath(format!("Folder is not accessible: {}: {err}", path.display()))
    })
}
