use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use resizewatch_core::EngineConfig;
use tokio::time::{Instant, sleep};

/// Fast timings so watch tests finish in well under a second per file.
// Used by some test binaries only
#[allow(unused)]
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.watch.stabilization_interval_ms = 150;
    config.watch.stabilization_timeout_ms = 5_000;
    config.watch.max_backoff_ms = 300;
    config.watch.health_check_interval_ms = 100;
    config
}

#[allow(unused)]
pub fn solid(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

#[allow(unused)]
pub fn save_image(path: &Path, width: u32, height: u32) {
    solid(width, height).save(path).expect("save fixture image");
}

#[allow(unused)]
pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).expect("encode fixture");
    bytes.into_inner()
}

/// Write `bytes` in `chunks` appends spaced `gap` apart, like a slow copy.
#[allow(unused)]
pub async fn write_slowly(path: &Path, bytes: &[u8], chunks: usize, gap: Duration) {
    let chunk_len = bytes.len().div_ceil(chunks).max(1);
    let mut file = fs::File::create(path).expect("create slow file");
    for chunk in bytes.chunks(chunk_len) {
        file.write_all(chunk).expect("append chunk");
        file.flush().expect("flush chunk");
        sleep(gap).await;
    }
}

/// Poll `check` until it holds or `timeout` passes.
#[allow(unused)]
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    check()
}
