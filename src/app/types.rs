use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "tor2tor",
    version,
    about = "Capture screenshots of onion services on an onion service",
    after_help = "Examples:\n  tor2tor http://example.onion\n  tor2tor http://example.onion --open --headless"
)]
pub struct Cli {
    /// Onion url to scrape
    #[arg(value_name = "ONION")]
    pub onion: String,

    /// Run the Firefox WebDriver instances in headless mode
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Number of links to capture
    #[arg(short, long, value_name = "N", default_value_t = 10)]
    pub limit: usize,

    /// Open each screenshot after capture
    #[arg(short, long, default_value_t = false)]
    pub open: bool,

    /// Size of the Firefox WebDriver instance pool
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub pool_size: u16,

    /// Number of workers draining the capture queue
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub workers: u16,

    /// Log every skipped onion as it happens
    #[arg(long, default_value_t = false)]
    pub log_skipped: bool,

    /// Run in debug mode
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,

    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub socks_host: String,

    #[arg(long, value_name = "PORT", default_value_t = 9050)]
    pub socks_port: u16,

    /// geckodriver binary used to launch each browser instance
    #[arg(long, value_name = "PATH", default_value = "geckodriver")]
    pub geckodriver: String,

    /// Firefox binary; geckodriver picks one from PATH when omitted
    #[arg(long, value_name = "PATH")]
    pub firefox: Option<PathBuf>,

    /// Directory holding per-target output folders [default: ~/tor2tor]
    #[arg(long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
    pub format: FileFormatArg,

    #[arg(long, default_value_t = false)]
    pub no_summary_file: bool,

    #[arg(long, value_name = "MS", default_value_t = 120_000)]
    pub page_timeout_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 12_000)]
    pub driver_start_timeout_ms: u64,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Csv => DataFormat::Csv,
            FileFormatArg::Json => DataFormat::Json,
        }
    }
}

/// Local SOCKS proxy every request and browser instance is routed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksProxy {
    pub host: String,
    pub port: u16,
}

impl SocksProxy {
    /// `socks5h` so that `.onion` names are resolved by the proxy, not locally.
    pub fn url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }
}

impl Default for SocksProxy {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9050,
        }
    }
}

/// Everything a single crawl needs, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub target: String,
    pub limit: usize,
    pub pool_size: usize,
    pub workers: usize,
    pub headless: bool,
    pub open_after_capture: bool,
    pub log_skipped: bool,
    pub debug: bool,
    pub proxy: SocksProxy,
    pub geckodriver: String,
    pub firefox: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub summary_format: Option<DataFormat>,
    pub page_timeout: Duration,
    pub driver_start_timeout: Duration,
}

impl CrawlConfig {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            target: cli.onion,
            limit: cli.limit,
            pool_size: usize::from(cli.pool_size),
            workers: usize::from(cli.workers),
            headless: cli.headless,
            open_after_capture: cli.open,
            log_skipped: cli.log_skipped,
            debug: cli.debug,
            proxy: SocksProxy {
                host: cli.socks_host,
                port: cli.socks_port,
            },
            geckodriver: cli.geckodriver,
            firefox: cli.firefox,
            output_root: cli.output_root,
            summary_format: (!cli.no_summary_file).then(|| cli.format.into()),
            page_timeout: Duration::from_millis(cli.page_timeout_ms),
            driver_start_timeout: Duration::from_millis(cli.driver_start_timeout_ms),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            limit: 10,
            pool_size: 3,
            workers: 3,
            headless: false,
            open_after_capture: false,
            log_skipped: false,
            debug: false,
            proxy: SocksProxy::default(),
            geckodriver: "geckodriver".to_string(),
            firefox: None,
            output_root: None,
            summary_format: Some(DataFormat::Csv),
            page_timeout: Duration::from_secs(120),
            driver_start_timeout: Duration::from_secs(12),
        }
    }
}

/// One discovered link waiting to be captured. Indices start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureRecord {
    pub index: usize,
    pub url: String,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub captured_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub index: usize,
    pub url: String,
    pub reason: String,
    pub timestamp: String,
}
