//! Page fetching: plain HTTP for static sites, a headless browser for
//! JavaScript-built ones, and a one-shot static fallback when the browser
//! trips over a certificate problem.

mod client;
mod error;
pub mod render;

pub use client::{HttpClient, HttpClientBuilder, DEFAULT_USER_AGENT};
pub use error::FetchError;
pub use render::{render_page, ChromiumEngine, RenderEngine, RenderSession};

use scraper::Html;
use std::time::Duration;
use tracing::{debug, warn};

/// How a page must be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Server HTML is complete.
    Static,
    /// Listings are built client-side; needs a browser.
    Rendered,
}

/// Anything that can hand back a page's HTML. Scrapers only see this.
pub trait PageSource {
    fn fetch_html(&mut self, url: &str, mode: FetchMode) -> Result<String, FetchError>;
}

/// Plain GET returning the body text.
pub trait StaticFetch {
    fn get_text(&mut self, url: &str) -> Result<String, FetchError>;
}

impl StaticFetch for HttpClient {
    fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        HttpClient::get_text(self, url)
    }
}

/// Fetch and parse. Failures are logged here so callers can just drop them.
pub fn fetch_document(
    pages: &mut dyn PageSource,
    url: &str,
    mode: FetchMode,
) -> Result<Html, FetchError> {
    match pages.fetch_html(url, mode) {
        Ok(body) => Ok(Html::parse_document(&body)),
        Err(e) => {
            warn!(url, ?mode, error = %e, "fetch failed");
            Err(e)
        }
    }
}

/// The production page source: one HTTP client plus a browser engine.
pub struct Fetcher {
    http: Box<dyn StaticFetch>,
    renderer: Box<dyn RenderEngine>,
    render_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        http: Box<dyn StaticFetch>,
        renderer: Box<dyn RenderEngine>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            http,
            renderer,
            render_timeout,
        }
    }
}

impl PageSource for Fetcher {
    fn fetch_html(&mut self, url: &str, mode: FetchMode) -> Result<String, FetchError> {
        match mode {
            FetchMode::Static => self.http.get_text(url),
            FetchMode::Rendered => {
                match render_page(self.renderer.as_ref(), url, self.render_timeout) {
                    Ok(html) => {
                        debug!(url, bytes = html.len(), "rendered page");
                        Ok(html)
                    }
                    Err(e) if e.is_certificate_error() => {
                        warn!(url, error = %e, "certificate error in browser, retrying as static fetch");
                        self.http.get_text(url)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::render::tests::FakeEngine;
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::Ordering;

    struct FakeHttp {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl StaticFetch for FakeHttp {
        fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
            self.calls.borrow_mut().push(url.to_string());
            Ok("<html><body><h2>static</h2></body></html>".to_string())
        }
    }

    fn fetcher(engine: FakeEngine) -> (Fetcher, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let http = FakeHttp {
            calls: Rc::clone(&calls),
        };
        (
            Fetcher::new(Box::new(http), Box::new(engine), Duration::from_secs(10)),
            calls,
        )
    }

    #[test]
    fn static_mode_never_opens_browser() -> Result<(), FetchError> {
        let engine = FakeEngine::returning(Ok("<p>rendered</p>"));
        let opened = std::sync::Arc::clone(&engine.opened);
        let (mut fetcher, calls) = fetcher(engine);
        let html = fetcher.fetch_html("https://www.ks-cinema.com", FetchMode::Static)?;
        assert!(html.contains("static"));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(calls.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn certificate_error_falls_back_to_static_once() -> Result<(), FetchError> {
        let engine = FakeEngine::returning(Err("net::ERR_CERT_AUTHORITY_INVALID"));
        let released = std::sync::Arc::clone(&engine.released);
        let (mut fetcher, calls) = fetcher(engine);
        let html = fetcher.fetch_html("https://pole2.co.jp", FetchMode::Rendered)?;
        assert!(html.contains("static"));
        assert_eq!(calls.borrow().as_slice(), ["https://pole2.co.jp"]);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn other_render_errors_do_not_fall_back() {
        let engine = FakeEngine::returning(Err("timeout"));
        let (mut fetcher, calls) = fetcher(engine);
        let result = fetcher.fetch_html("https://pole2.co.jp", FetchMode::Rendered);
        assert!(matches!(result, Err(FetchError::RenderTimeout { .. })));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn fetch_document_parses_html() -> Result<(), FetchError> {
        let engine = FakeEngine::returning(Ok("<html><body><h1>rendered</h1></body></html>"));
        let (mut fetcher, _) = fetcher(engine);
        let doc = fetch_document(&mut fetcher, "https://pole2.co.jp", FetchMode::Rendered)?;
        let h1 = scraper::Selector::parse("h1").map_err(|e| FetchError::Render {
            url: String::new(),
            reason: e.to_string(),
        })?;
        assert_eq!(doc.select(&h1).count(), 1);
        Ok(())
    }
}
