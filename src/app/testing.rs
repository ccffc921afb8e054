//! In-process stand-ins for Firefox used by the unit tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::browser::{BrowserDriver, BrowserLauncher};
use super::error::DriverError;

/// Smallest byte sequence the PNG header reader accepts: signature plus IHDR.
pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes
}

#[derive(Debug, Default)]
pub struct FakeStats {
    pub launched: AtomicUsize,
    pub navigations: AtomicUsize,
    pub screenshots: AtomicUsize,
    pub quits: AtomicUsize,
    /// Drivers currently inside a navigate/screenshot call.
    pub busy: Mutex<HashSet<usize>>,
    pub max_concurrent: AtomicUsize,
    pub double_checkouts: AtomicUsize,
}

impl FakeStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    pub stats: Arc<FakeStats>,
    pub fail_launch_id: Option<usize>,
    /// Navigation to a url containing this marker fails.
    pub fail_marker: Option<String>,
    /// Screenshots are written as something other than a PNG.
    pub corrupt_screenshots: bool,
    pub delay: Duration,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Driver = FakeDriver;

    async fn launch(&self, id: usize) -> Result<FakeDriver, DriverError> {
        if self.fail_launch_id == Some(id) {
            return Err(DriverError::Startup(format!("fake launch {id} refused")));
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDriver {
            id,
            stats: self.stats.clone(),
            fail_marker: self.fail_marker.clone(),
            corrupt_screenshots: self.corrupt_screenshots,
            delay: self.delay,
            quit: false,
        })
    }
}

#[derive(Debug)]
pub struct FakeDriver {
    pub id: usize,
    stats: Arc<FakeStats>,
    fail_marker: Option<String>,
    corrupt_screenshots: bool,
    delay: Duration,
    quit: bool,
}

impl FakeDriver {
    fn enter(&self) {
        let mut busy = self.stats.busy.lock();
        if !busy.insert(self.id) {
            self.stats.double_checkouts.fetch_add(1, Ordering::SeqCst);
        }
        self.stats
            .max_concurrent
            .fetch_max(busy.len(), Ordering::SeqCst);
    }

    fn leave(&self) {
        self.stats.busy.lock().remove(&self.id);
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.enter();
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.leave();
        match &self.fail_marker {
            Some(marker) if url.contains(marker.as_str()) => Err(DriverError::Protocol {
                error: "unknown error".to_string(),
                message: "Reached error page".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn save_full_page_screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        self.enter();
        self.stats.screenshots.fetch_add(1, Ordering::SeqCst);
        let bytes = if self.corrupt_screenshots {
            b"GIF89a".to_vec()
        } else {
            png_header(1366, 768 + self.id as u32)
        };
        let written = tokio::fs::write(path, bytes).await;
        self.leave();
        written?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        if !self.quit {
            self.quit = true;
            self.stats.quits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
