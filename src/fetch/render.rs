//! Headless-browser rendering for sites that build their listings with JavaScript.
//!
//! Each render opens a fresh browser session and closes it before returning,
//! on success, error, or timeout alike.

use super::FetchError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const BODY_POLL: Duration = Duration::from_millis(200);

/// Something that can start a browser session.
pub trait RenderEngine {
    fn open(&self) -> Result<Box<dyn RenderSession>, FetchError>;
}

/// One live browser session. `close` must be safe to call more than once.
pub trait RenderSession {
    /// Navigate to `url`, wait for the body to exist, and return the rendered DOM.
    fn render(&mut self, url: &str, timeout: Duration) -> Result<String, FetchError>;
    fn close(&mut self);
}

/// Closes the wrapped session when dropped.
struct ScopedSession(Box<dyn RenderSession>);

impl Drop for ScopedSession {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Render one page in a session of its own.
pub fn render_page(
    engine: &dyn RenderEngine,
    url: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    let mut session = ScopedSession(engine.open()?);
    session.0.render(url, timeout)
}

/// Chromium via the DevTools protocol, driven from a private single-thread runtime.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    user_agent: String,
    executable: Option<PathBuf>,
}

impl ChromiumEngine {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            executable: None,
        }
    }

    /// Use this Chrome/Chromium binary instead of searching PATH.
    pub fn with_executable(mut self, path: Option<PathBuf>) -> Self {
        self.executable = path;
        self
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--ignore-certificate-errors")
            .arg("--ignore-ssl-errors=yes")
            .arg("--allow-running-insecure-content")
            .arg(format!("--user-agent={}", self.user_agent));
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|reason| FetchError::BrowserLaunch { reason })
    }
}

impl RenderEngine for ChromiumEngine {
    fn open(&self) -> Result<Box<dyn RenderSession>, FetchError> {
        let config = self.browser_config()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FetchError::BrowserLaunch {
                reason: format!("runtime: {}", e),
            })?;
        let (browser, mut handler) = runtime
            .block_on(Browser::launch(config))
            .map_err(|e| FetchError::BrowserLaunch {
                reason: e.to_string(),
            })?;
        let handler = runtime.spawn(async move { while handler.next().await.is_some() {} });
        debug!("browser session opened");
        Ok(Box::new(ChromiumSession {
            runtime,
            browser: Some(browser),
            handler: Some(handler),
        }))
    }
}

struct ChromiumSession {
    runtime: Runtime,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
}

impl RenderSession for ChromiumSession {
    fn render(&mut self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let browser = self.browser.as_ref().ok_or_else(|| FetchError::Render {
            url: url.to_string(),
            reason: "browser session already closed".to_string(),
        })?;
        let render_failed = |e: chromiumoxide::error::CdpError| FetchError::Render {
            url: url.to_string(),
            reason: e.to_string(),
        };
        self.runtime.block_on(async {
            let rendered = tokio::time::timeout(timeout, async {
                let page = browser.new_page(url).await.map_err(render_failed)?;
                let _ = page.wait_for_navigation().await;
                while page.find_element("body").await.is_err() {
                    tokio::time::sleep(BODY_POLL).await;
                }
                let html = page.content().await.map_err(render_failed)?;
                if let Err(e) = page.close().await {
                    debug!(url, error = %e, "page close error");
                }
                Ok::<String, FetchError>(html)
            })
            .await;
            rendered.map_err(|_| FetchError::RenderTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            })?
        })
    }

    fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            self.runtime.block_on(async {
                if let Err(e) = browser.close().await {
                    warn!(error = %e, "browser close error, killing process");
                    let _ = browser.kill().await;
                }
                let _ = browser.wait().await;
            });
            debug!("browser session closed");
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.close();
    }
}
