use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::types::{CaptureRecord, SkipRecord};

/// Outcome collections shared by all workers of one crawl. Append-only.
#[derive(Debug, Default)]
pub struct CrawlResults {
    captured: Mutex<Vec<CaptureRecord>>,
    skipped: Mutex<Vec<SkipRecord>>,
    claimed: Mutex<HashSet<String>>,
}

/// Copy of both collections, taken once the workers are done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub captured: Vec<CaptureRecord>,
    pub skipped: Vec<SkipRecord>,
}

impl CrawlResults {
    pub fn record_capture(&self, record: CaptureRecord) {
        self.captured.lock().push(record);
    }

    pub fn record_skip(&self, index: usize, url: impl Into<String>, reason: impl Into<String>) {
        self.skipped.lock().push(SkipRecord {
            index,
            url: url.into(),
            reason: reason.into(),
            timestamp: utc_clock(Utc::now()),
        });
    }

    /// Reserves `filename` for the caller. False if another capture in this crawl got it first.
    pub fn claim(&self, filename: &str) -> bool {
        self.claimed.lock().insert(filename.to_string())
    }

    pub fn captured_count(&self) -> usize {
        self.captured.lock().len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.lock().len()
    }

    pub fn snapshot(&self) -> CrawlSummary {
        CrawlSummary {
            captured: self.captured.lock().clone(),
            skipped: self.skipped.lock().clone(),
        }
    }
}

impl CrawlSummary {
    pub fn total(&self) -> usize {
        self.captured.len() + self.skipped.len()
    }
}

/// `hh:mm:ss AM/PM` in UTC.
pub fn utc_clock(at: DateTime<Utc>) -> String {
    at.format("%I:%M:%S %p").to_string()
}
