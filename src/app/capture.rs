use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::browser::BrowserDriver;
use super::error::CaptureFault;
use super::links::{add_http_to_link, onion_host};
use super::results::{CrawlResults, utc_clock};
use super::types::{CaptureRecord, WorkItem};
use super::ui_utils::open_in_viewer;

pub const SCREENSHOT_EXTENSION: &str = "png";
pub const ALREADY_EXISTS: &str = "already exists";

/// Per-crawl settings every capture shares.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub open_after_capture: bool,
    pub log_skipped: bool,
}

impl CaptureSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            open_after_capture: false,
            log_skipped: false,
        }
    }

    /// `<output_dir>/<host>.png` for the http-normalized url, or `None` when it has no host.
    pub fn screenshot_path(&self, url: &str) -> Option<(String, PathBuf)> {
        let filename = format!("{}.{SCREENSHOT_EXTENSION}", onion_host(url)?);
        let path = self.output_dir.join(&filename);
        Some((filename, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Captures one link with a borrowed browser and appends exactly one record to `results`.
///
/// An existing screenshot for the same host short-circuits before the browser
/// is touched. Navigation and screenshot failures end up in the skipped
/// collection and never escape.
pub async fn capture_onion<D: BrowserDriver>(
    settings: &CaptureSettings,
    item: &WorkItem,
    driver: &mut D,
    results: &CrawlResults,
) {
    let url = add_http_to_link(item.url.trim());
    info!("{} Capturing... {url}", item.index);

    let skip = |reason: String| {
        if settings.log_skipped {
            info!("{} Skipped {url}: {reason}", item.index);
        } else {
            debug!("{} Skipped {url}: {reason}", item.index);
        }
        results.record_skip(item.index, item.url.clone(), reason);
    };

    let Some((filename, path)) = settings.screenshot_path(&url) else {
        skip("url has no host".to_string());
        return;
    };
    // Duplicate links are kept, so two workers may reach the same host at once.
    if path.exists() || !results.claim(&filename) {
        debug!("{} {} {ALREADY_EXISTS}", item.index, path.display());
        skip(ALREADY_EXISTS.to_string());
        return;
    }

    let info = match take_screenshot(driver, &url, &path).await {
        Ok(info) => info,
        Err(fault) => {
            skip(fault.to_string());
            return;
        }
    };

    info!(
        "{} {filename} {}x{} {} bytes",
        item.index, info.width, info.height, info.size
    );
    results.record_capture(CaptureRecord {
        index: item.index,
        url: item.url.clone(),
        filename,
        width: info.width,
        height: info.height,
        size: info.size,
        captured_at: utc_clock(info.modified),
    });

    if settings.open_after_capture {
        if let Err(err) = open_in_viewer(&path) {
            warn!("could not open {}: {err}", path.display());
        }
    }
}

async fn take_screenshot<D: BrowserDriver>(
    driver: &mut D,
    url: &str,
    path: &Path,
) -> Result<FileInfo, CaptureFault> {
    driver.navigate(url).await?;
    driver.save_full_page_screenshot(path).await?;
    let info = file_info(path).await;
    if info.is_err() {
        // An unreadable file would read as "already exists" on the next run.
        let _ = tokio::fs::remove_file(path).await;
    }
    info
}

/// Pixel dimensions from the PNG header, byte size and mtime of a saved screenshot.
pub async fn file_info(path: &Path) -> Result<FileInfo, CaptureFault> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CaptureFault::Metadata(e.to_string()))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| CaptureFault::Metadata(e.to_string()))?;
    let mut header = [0u8; 24];
    file.read_exact(&mut header)
        .await
        .map_err(|e| CaptureFault::Metadata(format!("truncated image: {e}")))?;
    let (width, height) = png_dimensions(&header)
        .ok_or_else(|| CaptureFault::Metadata("not a PNG image".to_string()))?;
    let modified = metadata
        .modified()
        .map_err(|e| CaptureFault::Metadata(e.to_string()))?;

    Ok(FileInfo {
        width,
        height,
        size: metadata.len(),
        modified: DateTime::<Utc>::from(modified),
    })
}

/// Width and height from the IHDR chunk, which the format requires to come first.
pub fn png_dimensions(header: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if header.len() < 24 || !header.starts_with(SIGNATURE) || &header[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
    Some((width, height))
}
