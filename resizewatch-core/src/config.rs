use std::time::Duration;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Engine-wide knobs.
///
/// Every section carries defaults so a configuration file only needs to name
/// the values it wants to change.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Folder watch debounce and stabilization settings.
    pub watch: WatchConfig,
    /// Resize worker settings.
    pub processing: ProcessingConfig,
    /// Result log and push channel settings.
    pub status: StatusConfig,
}

/// Matches `image::Limits::default().max_alloc`.
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between the two size/mtime samples of a stability check.
    pub stabilization_interval_ms: u64,
    /// Give up on a file that keeps changing after this long.
    pub stabilization_timeout_ms: u64,
    /// Upper bound for the backoff between failed stability checks.
    pub max_backoff_ms: u64,
    /// How often the watch loop confirms the source folder still exists.
    pub health_check_interval_ms: u64,
    /// Capacity of the raw notification and ready-file channels.
    pub event_channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stabilization_interval_ms: 500,
            stabilization_timeout_ms: 30_000,
            max_backoff_ms: 4_000,
            health_check_interval_ms: 2_000,
            event_channel_capacity: 256,
        }
    }
}

impl WatchConfig {
    pub fn stabilization_interval(&self) -> Duration {
        Duration::from_millis(self.stabilization_interval_ms.max(1))
    }

    pub fn stabilization_timeout(&self) -> Duration {
        Duration::from_millis(self.stabilization_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.stabilization_interval_ms).max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(10))
    }

    pub fn channel_capacity(&self) -> usize {
        self.event_channel_capacity.max(16)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Ready files resized concurrently while watching.
    pub max_parallel_resizes: usize,
    /// Resampling filter used for every resize.
    pub filter: ResampleFilter,
    /// Leave a destination file alone when it is at least as new as its source.
    pub skip_up_to_date: bool,
    /// Create the destination folder in `set_folders` when it does not exist.
    pub create_missing_destination: bool,
    /// Largest pixel buffer a single resize may allocate. Bigger targets fail
    /// that file instead of exhausting memory.
    pub max_output_bytes: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_parallel_resizes: 2,
            filter: ResampleFilter::default(),
            skip_up_to_date: false,
            create_missing_destination: true,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Bound of the push channel. Slow subscribers lag and fall back to polling.
    pub push_capacity: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { push_capacity: 256 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    #[default]
    Lanczos3,
}

impl From<ResampleFilter> for FilterType {
    fn from(filter: ResampleFilter) -> Self {
        match filter {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Triangle => FilterType::Triangle,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}
