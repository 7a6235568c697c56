//! Decode, resize and atomically re-encode one image.
//!
//! Output lands in the destination folder under the source's file name. The
//! encoder writes to a hidden temp file in that folder which is renamed over
//! the final path only once fully flushed, so a reader (or a stop request)
//! never observes a truncated output.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{ColorType, DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::error::{ResizeError, Result};
use crate::policy::ResizePolicy;
use crate::status::{ProcessingResult, display_name};

const TEMP_PREFIX: &str = ".resizewatch-";
const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn of(image: &DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResizeOutcome {
    Written {
        output_path: PathBuf,
        original: Dimensions,
        resized: Dimensions,
    },
    /// Destination already newer than the source (only with `skip_up_to_date`).
    UpToDate { output_path: PathBuf },
}

/// Pure transform. Images already at the policy's size are returned untouched.
pub fn resize(image: &DynamicImage, policy: &ResizePolicy, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_w, target_h) = policy.target_dimensions(width, height);
    if (target_w, target_h) == (width, height) {
        return image.clone();
    }
    image.resize_exact(target_w, target_h, filter)
}

#[derive(Debug, Clone)]
pub struct ResizeEngine {
    filter: FilterType,
    skip_up_to_date: bool,
    max_output_bytes: u64,
}

impl Default for ResizeEngine {
    fn default() -> Self {
        Self::new(&ProcessingConfig::default())
    }
}

impl ResizeEngine {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            filter: config.filter.into(),
            skip_up_to_date: config.skip_up_to_date,
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Resize `source` into `destination_dir`. Blocking; callers on the runtime
    /// should go through [`ResizeEngine::process`].
    pub fn resize_file(
        &self,
        source: &Path,
        destination_dir: &Path,
        policy: &ResizePolicy,
    ) -> Result<ResizeOutcome> {
        let file_name = source
            .file_name()
            .ok_or_else(|| ResizeError::decode(source, "path has no file name"))?;
        let output_path = destination_dir.join(file_name);

        if self.skip_up_to_date && is_up_to_date(source, &output_path) {
            debug!(path = %source.display(), "destination is up to date");
            return Ok(ResizeOutcome::UpToDate { output_path });
        }

        let format = ImageFormat::from_path(source).map_err(|err| ResizeError::decode(source, err))?;
        let image = decode_upright(source)?;

        let original = Dimensions::of(&image);
        let (width, height) = policy.target_dimensions(original.width, original.height);
        self.check_output_size(source, &image, width, height)?;
        let resized_image = encodable(resize(&image, policy, self.filter), format);
        let resized = Dimensions::of(&resized_image);

        write_atomically(&resized_image, format, &output_path)?;

        debug!(
            source = %source.display(),
            output = %output_path.display(),
            from = ?(original.width, original.height),
            to = ?(resized.width, resized.height),
            "image resized"
        );

        Ok(ResizeOutcome::Written {
            output_path,
            original,
            resized,
        })
    }

    fn check_output_size(
        &self,
        source: &Path,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let bytes = u64::from(width)
            .saturating_mul(u64::from(height))
            .saturating_mul(u64::from(image.color().bytes_per_pixel()));
        if bytes > self.max_output_bytes {
            return Err(ResizeError::OutputTooLarge {
                path: source.to_path_buf(),
                width,
                height,
                bytes,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }

    /// Run [`ResizeEngine::resize_file`] on the blocking pool and fold any
    /// error into a failed result.
    pub async fn process(
        &self,
        source: PathBuf,
        destination_dir: PathBuf,
        policy: ResizePolicy,
    ) -> ProcessingResult {
        let filename = display_name(&source);
        let engine = self.clone();
        let task_source = source.clone();

        let joined =
            spawn_blocking(move || engine.resize_file(&task_source, &destination_dir, &policy))
                .await;

        match joined {
            Ok(Ok(outcome)) => ProcessingResult::from_outcome(filename, outcome),
            Ok(Err(err)) => {
                warn!(path = %source.display(), error = %err, "failed to resize image");
                ProcessingResult::failure(filename, &err)
            }
            Err(join_err) => {
                let err = ResizeError::Internal(format!("resize task panicked: {join_err}"));
                warn!(path = %source.display(), error = %err, "failed to resize image");
                ProcessingResult::failure(filename, &err)
            }
        }
    }
}

/// Decode `source` and rotate/flip it as its EXIF orientation says, so the
/// policy sees the dimensions a viewer would display.
fn decode_upright(source: &Path) -> Result<DynamicImage> {
    let mut decoder = ImageReader::open(source)
        .map_err(|err| ResizeError::decode(source, err))?
        .with_guessed_format()
        .map_err(|err| ResizeError::decode(source, err))?
        .into_decoder()
        .map_err(|err| ResizeError::decode(source, err))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|err| ResizeError::decode(source, err))?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// JPEG cannot carry alpha or 16-bit samples.
fn encodable(image: DynamicImage, format: ImageFormat) -> DynamicImage {
    match (format, image.color()) {
        (ImageFormat::Jpeg, ColorType::L8 | ColorType::Rgb8) => image,
        (ImageFormat::Jpeg, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    }
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => src <= dst,
        _ => false,
    }
}

fn write_atomically(image: &DynamicImage, format: ImageFormat, output_path: &Path) -> Result<()> {
    let dir = output_path
        .parent()
        .ok_or_else(|| ResizeError::write(output_path, "output path has no parent folder"))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|err| ResizeError::write(output_path, err))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        image
            .write_to(&mut writer, format)
            .map_err(|err| ResizeError::write(output_path, err))?;
        writer
            .flush()
            .map_err(|err| ResizeError::write(output_path, err))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(|err| ResizeError::write(output_path, err))?;
    }

    tmp.persist(output_path)
        .map_err(|err| ResizeError::write(output_path, err.error))?;
    Ok(())
}

/// True for the engine's in-progress temp files.
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
}
