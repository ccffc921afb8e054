use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::Tor2TorError;
use super::results::CrawlSummary;
use super::types::{CaptureRecord, DataFormat, SkipRecord};

const CSV_HEADERS: [&str; 9] = [
    "status",
    "index",
    "url",
    "file",
    "width",
    "height",
    "size",
    "reason",
    "timestamp",
];

/// One line of the summary file; captured and skipped onions share the layout.
#[derive(Debug, Clone, Serialize)]
struct ExportRecord {
    status: &'static str,
    index: usize,
    url: String,
    file: String,
    width: Option<u32>,
    height: Option<u32>,
    size: Option<u64>,
    reason: String,
    timestamp: String,
}

impl From<&CaptureRecord> for ExportRecord {
    fn from(record: &CaptureRecord) -> Self {
        Self {
            status: "captured",
            index: record.index,
            url: record.url.clone(),
            file: record.filename.clone(),
            width: Some(record.width),
            height: Some(record.height),
            size: Some(record.size),
            reason: String::new(),
            timestamp: record.captured_at.clone(),
        }
    }
}

impl From<&SkipRecord> for ExportRecord {
    fn from(record: &SkipRecord) -> Self {
        Self {
            status: "skipped",
            index: record.index,
            url: record.url.clone(),
            file: String::new(),
            width: None,
            height: None,
            size: None,
            reason: record.reason.clone(),
            timestamp: record.timestamp.clone(),
        }
    }
}

fn export_records(summary: &CrawlSummary) -> Vec<ExportRecord> {
    let mut records = summary
        .captured
        .iter()
        .map(ExportRecord::from)
        .chain(summary.skipped.iter().map(ExportRecord::from))
        .collect::<Vec<_>>();
    records.sort_by_key(|r| r.index);
    records
}

fn opt_to_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_csv(path: &Path, records: &[ExportRecord]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(CSV_HEADERS)?;
    for rec in records {
        writer.write_record([
            rec.status.to_string(),
            rec.index.to_string(),
            rec.url.clone(),
            rec.file.clone(),
            opt_to_string(rec.width),
            opt_to_string(rec.height),
            opt_to_string(rec.size),
            rec.reason.clone(),
            rec.timestamp.clone(),
        ])?;
    }
    writer.flush()
}

fn write_json(path: &Path, records: &[ExportRecord]) -> io::Result<()> {
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, records).map_err(io::Error::other)?;
    file.write_all(b"\n")?;
    file.flush()
}

/// Writes `summary.csv` or `summary.json` into `output_dir`, ordered by link index.
pub fn write_summary(
    output_dir: &Path,
    format: DataFormat,
    summary: &CrawlSummary,
) -> Result<PathBuf, Tor2TorError> {
    let path = output_dir.join(match format {
        DataFormat::Csv => "summary.csv",
        DataFormat::Json => "summary.json",
    });
    let records = export_records(summary);
    let written = match format {
        DataFormat::Csv => write_csv(&path, &records),
        DataFormat::Json => write_json(&path, &records),
    };
    written.map_err(|e| Tor2TorError::Summary(format!("{}: {e}", path.display())))?;
    Ok(path)
}

/// `~/tor2tor` unless the caller picked another root.
pub fn resolve_output_root(custom: Option<&Path>) -> Result<PathBuf, Tor2TorError> {
    match custom {
        Some(path) => Ok(path.to_path_buf()),
        None => dirs::home_dir()
            .map(|home| home.join("tor2tor"))
            .ok_or(Tor2TorError::NoHomeDirectory),
    }
}

/// Creates `<root>/<target_host>` if needed and returns it.
pub fn prepare_output_dir(root: &Path, target_host: &str) -> Result<PathBuf, Tor2TorError> {
    let dir = root.join(sanitize_dir_name(target_host));
    fs::create_dir_all(&dir).map_err(|source| Tor2TorError::Io {
        context: "failed to create output directory",
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

fn sanitize_dir_name(host: &str) -> String {
    host.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
