//! Firefox instances driven over the W3C WebDriver protocol.
//!
//! geckodriver serves a single session per process, so every browser instance
//! gets its own geckodriver on a free local port. The HTTP client used here
//! never goes through the SOCKS proxy; only Firefox itself does.

use std::fs::{self, File};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use url::Url;

use super::browser::{BrowserDriver, BrowserLauncher};
use super::error::{DriverError, Tor2TorError};
use super::types::{CrawlConfig, SocksProxy};

#[derive(Debug, Clone)]
pub struct FirefoxSettings {
    pub headless: bool,
    pub proxy: SocksProxy,
    pub geckodriver: String,
    pub firefox: Option<PathBuf>,
    pub page_timeout: Duration,
    pub start_timeout: Duration,
    pub log_dir: PathBuf,
}

impl FirefoxSettings {
    pub fn from_config(config: &CrawlConfig, log_dir: PathBuf) -> Self {
        Self {
            headless: config.headless,
            proxy: config.proxy.clone(),
            geckodriver: config.geckodriver.clone(),
            firefox: config.firefox.clone(),
            page_timeout: config.page_timeout,
            start_timeout: config.driver_start_timeout,
            log_dir,
        }
    }
}

/// Spawns one geckodriver + Firefox pair per launch.
#[derive(Debug, Clone)]
pub struct GeckoLauncher {
    client: reqwest::Client,
    settings: FirefoxSettings,
}

impl GeckoLauncher {
    pub fn new(settings: FirefoxSettings) -> Result<Self, Tor2TorError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(Tor2TorError::Client)?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl BrowserLauncher for GeckoLauncher {
    type Driver = FirefoxSession;

    async fn launch(&self, id: usize) -> Result<FirefoxSession, DriverError> {
        let port = find_free_local_port()?;
        let endpoint = format!("http://127.0.0.1:{port}");
        let log_path = webdriver_log_path(&self.settings.log_dir, port)?;
        let child = start_geckodriver(&self.settings, port, &endpoint, &log_path).await?;

        let mut session = FirefoxSession {
            id,
            client: self.client.clone(),
            endpoint,
            session_id: None,
            child: Some(child),
        };

        let caps = firefox_capabilities(&self.settings);
        let created = webdriver_create_session(&session.client, &session.endpoint, &caps).await;
        let session_id = match created {
            Ok(session_id) => session_id,
            Err(err) => {
                session.stop_driver().await;
                return Err(match read_log_tail(&log_path, 10) {
                    Some(tail) => DriverError::Startup(format!("{err}; geckodriver log: {tail}")),
                    None => err,
                });
            }
        };
        session.session_id = Some(session_id);

        if let Err(err) = session.set_page_load_timeout(self.settings.page_timeout).await {
            warn!("browser {id}: could not set page load timeout: {err}");
        }

        info!(
            "browser {id} ready at {} (headless: {})",
            session.endpoint, self.settings.headless
        );
        Ok(session)
    }
}

/// A live WebDriver session plus the geckodriver process serving it.
#[derive(Debug)]
pub struct FirefoxSession {
    id: usize,
    client: reqwest::Client,
    endpoint: String,
    session_id: Option<String>,
    child: Option<Child>,
}

impl FirefoxSession {
    #[cfg(test)]
    fn attached(client: reqwest::Client, endpoint: &str, session_id: &str) -> Self {
        Self {
            id: 0,
            client,
            endpoint: endpoint.to_string(),
            session_id: Some(session_id.to_string()),
            child: None,
        }
    }

    fn session_url(&self, suffix: &str) -> Result<String, DriverError> {
        let session_id = self
            .session_id
            .as_deref()
            .ok_or_else(|| DriverError::Decode("webdriver session already closed".to_string()))?;
        Ok(format!(
            "{}/session/{session_id}{suffix}",
            self.endpoint.trim_end_matches('/')
        ))
    }

    async fn set_page_load_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        let url = self.session_url("/timeouts")?;
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        webdriver_call(
            &self.client,
            Method::POST,
            &url,
            Some(json!({ "pageLoad": ms })),
            "set timeouts",
        )
        .await
        .map(|_| ())
    }

    async fn stop_driver(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl BrowserDriver for FirefoxSession {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let nav_url = self.session_url("/url")?;
        let started = Instant::now();
        webdriver_call(
            &self.client,
            Method::POST,
            &nav_url,
            Some(json!({ "url": url })),
            "navigate",
        )
        .await?;
        debug!(
            "browser {} loaded {url} in {}ms",
            self.id,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn save_full_page_screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        let shot_url = self.session_url("/moz/screenshot/full")?;
        let value = webdriver_call(&self.client, Method::GET, &shot_url, None, "screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Decode("screenshot response is not a string".to_string()))?;
        let png = BASE64
            .decode(encoded)
            .map_err(|e| DriverError::Decode(format!("screenshot base64 decode failed: {e}")))?;
        if let Err(err) = tokio::fs::write(path, png).await {
            // A partial file would read as "already exists" on the next run.
            let _ = tokio::fs::remove_file(path).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        let result = match self.session_url("") {
            Ok(url) => webdriver_call(&self.client, Method::DELETE, &url, None, "delete session")
                .await
                .map(|_| ()),
            Err(_) => Ok(()),
        };
        self.session_id = None;
        self.stop_driver().await;
        debug!("browser {} terminated", self.id);
        result
    }
}

impl Drop for FirefoxSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn firefox_capabilities(settings: &FirefoxSettings) -> Value {
    let mut args = Vec::<String>::new();
    if settings.headless {
        args.push("-headless".to_string());
    }
    let mut firefox_options = json!({
        "args": args,
        "prefs": {
            "network.proxy.type": 1,
            "network.proxy.socks": settings.proxy.host,
            "network.proxy.socks_port": settings.proxy.port,
            "network.proxy.socks_version": 5,
            "network.proxy.socks_remote_dns": true,
            "browser.cache.disk.enable": false,
            "browser.cache.memory.enable": false,
            "browser.cache.offline.enable": false,
            "network.http.use-cache": false
        }
    });
    if let Some(binary) = &settings.firefox {
        firefox_options["binary"] = json!(binary.to_string_lossy().to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "firefox",
                "acceptInsecureCerts": true,
                "moz:firefoxOptions": firefox_options
            }
        }
    })
}

/// Sends one WebDriver command and returns its `value`, turning HTTP and protocol errors into `DriverError`.
async fn webdriver_call(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    action: &'static str,
) -> Result<Value, DriverError> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let res = req
        .send()
        .await
        .map_err(|source| DriverError::Request { action, source })?;
    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|source| DriverError::Request { action, source })?;

    let value: Value = serde_json::from_str(&text).unwrap_or_default();
    if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
        let message = value
            .pointer("/value/message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown webdriver error");
        return Err(DriverError::Protocol {
            error: err.to_string(),
            message: truncate_for_log(message, 240),
        });
    }
    if !status.is_success() {
        return Err(DriverError::Http {
            action,
            status: status.as_u16(),
            body: truncate_for_log(&text, 240),
        });
    }

    Ok(value.get("value").cloned().unwrap_or(Value::Null))
}

async fn webdriver_create_session(
    client: &reqwest::Client,
    endpoint: &str,
    caps: &Value,
) -> Result<String, DriverError> {
    let session_endpoint = format!("{}/session", endpoint.trim_end_matches('/'));
    let value = webdriver_call(
        client,
        Method::POST,
        &session_endpoint,
        Some(caps.clone()),
        "session create",
    )
    .await?;
    value
        .pointer("/sessionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            DriverError::Decode(format!(
                "session id missing in response: {}",
                truncate_for_log(&value.to_string(), 220)
            ))
        })
}

async fn start_geckodriver(
    settings: &FirefoxSettings,
    port: u16,
    endpoint: &str,
    log_path: &Path,
) -> Result<Child, DriverError> {
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;
    let log_file_err = log_file.try_clone()?;

    let mut child = Command::new(&settings.geckodriver)
        .arg("--port")
        .arg(port.to_string())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DriverError::Startup(format!("failed to spawn {}: {e}", settings.geckodriver)))?;

    let steps = (settings.start_timeout.as_millis() / 200).max(1);
    for _ in 0..steps {
        if webdriver_reachable(endpoint).await {
            return Ok(child);
        }
        if let Ok(Some(status)) = child.try_wait() {
            let mut msg = format!(
                "{} exited early with status {status} (log: {})",
                settings.geckodriver,
                log_path.display()
            );
            if let Some(tail) = read_log_tail(log_path, 30) {
                msg = format!("{msg}; tail: {tail}");
            }
            return Err(DriverError::Startup(msg));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let _ = child.kill().await;
    Err(DriverError::Startup(format!(
        "{} did not become ready in time (log: {})",
        settings.geckodriver,
        log_path.display()
    )))
}

async fn webdriver_reachable(endpoint: &str) -> bool {
    let Ok(parsed) = Url::parse(endpoint) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let connect = TcpStream::connect((host, port));
    matches!(
        tokio::time::timeout(Duration::from_millis(500), connect).await,
        Ok(Ok(_))
    )
}

fn webdriver_log_path(log_dir: &Path, port: u16) -> Result<PathBuf, DriverError> {
    fs::create_dir_all(log_dir)?;
    Ok(log_dir.join(format!("geckodriver-{port}.log")))
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let mut tail = text.lines().rev().take(lines.max(1)).collect::<Vec<_>>();
    tail.reverse();
    let tail = tail.join(" | ");
    if tail.is_empty() { None } else { Some(tail) }
}

fn find_free_local_port() -> Result<u16, DriverError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}
