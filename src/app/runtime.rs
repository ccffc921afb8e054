use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use super::capture::CaptureSettings;
use super::crawl::Scraper;
use super::data_io::{prepare_output_dir, resolve_output_root, write_summary};
use super::error::Tor2TorError;
use super::links::{LinkExtractor, add_http_to_link, onion_host};
use super::results::CrawlResults;
use super::tui::render_summary;
use super::types::{Cli, CrawlConfig};
use super::webdriver::{FirefoxSettings, GeckoLauncher};

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(fmt::layer().without_time().with_target(false))
        .init();
}

pub async fn run() -> ExitCode {
    let config = CrawlConfig::from_cli(Cli::parse());
    init_logging(config.debug);

    match crawl(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn crawl(config: &CrawlConfig) -> Result<(), Tor2TorError> {
    let target = add_http_to_link(config.target.trim());
    let host = onion_host(&target).ok_or_else(|| Tor2TorError::InvalidTarget(target.clone()))?;

    let root = resolve_output_root(config.output_root.as_deref())?;
    let output_dir = prepare_output_dir(&root, &host)?;
    info!("Saving screenshots to {}", output_dir.display());

    let links = LinkExtractor::new(&config.proxy, config.page_timeout)?;
    let launcher = GeckoLauncher::new(FirefoxSettings::from_config(
        config,
        root.join(".webdriver"),
    ))?;

    let mut settings = CaptureSettings::new(&output_dir);
    settings.open_after_capture = config.open_after_capture;
    settings.log_skipped = config.log_skipped;

    let scraper = Scraper::new(links, launcher, settings, config.workers, config.pool_size);
    let summary = scraper
        .execute_scraper(&target, Arc::new(CrawlResults::default()), config.limit)
        .await?;

    if let Err(err) = render_summary(&summary) {
        warn!("could not render summary tables: {err}");
    }

    if let Some(format) = config.summary_format {
        let path = write_summary(&output_dir, format, &summary)?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}
