use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a crawl before or around the capture phase.
#[derive(Debug, Error)]
pub enum Tor2TorError {
    #[error("failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid target url '{0}'")]
    InvalidTarget(String),

    #[error("browser instance {id} failed to launch: {source}")]
    BrowserLaunch {
        id: usize,
        #[source]
        source: DriverError,
    },

    #[error("browser pool is closed")]
    PoolClosed,

    #[error("could not determine the home directory; pass --output-root")]
    NoHomeDirectory,

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write summary: {0}")]
    Summary(String),
}

/// Errors raised by a single WebDriver call or by the driver process around it.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{action} request failed: {source}")]
    Request {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{action} HTTP {status}: {body}")]
    Http {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("{error}: {message}")]
    Protocol { error: String, message: String },

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Startup(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A per-link failure. Rendered as the skip reason and never propagated past the worker.
#[derive(Debug, Error)]
pub enum CaptureFault {
    #[error("{0}")]
    Driver(#[from] DriverError),

    #[error("failed to read screenshot metadata: {0}")]
    Metadata(String),
}
