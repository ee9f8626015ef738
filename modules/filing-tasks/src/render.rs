// Rendering Engine adapter: document URL in, PDF bytes out.
//
// The production renderer downloads the filing HTML itself (with the
// contact-bearing client identifier the filing host requires), caches it,
// then hands the markup to Browserless for printing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, PdfRequest};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::checksum::sha256_hex;
use crate::error::{PipelineError, Result};

/// Text the filing host serves in place of a document when it refuses a client.
pub const BLOCK_SNIPPET: &str = "Your Request Originates from an Undeclared Automated Tool";

/// Anything smaller than this is an error page, not a filing.
pub const MIN_HTML_BYTES: usize = 1024;

/// Why one render attempt failed. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("render timed out: {0}")]
    RenderTimeout(String),

    #[error("render failed: {cause}")]
    RenderError { cause: String },

    /// The upstream host refused or rate limited the request.
    #[error("fetch blocked: {reason}")]
    FetchBlocked { reason: String },
}

impl RenderFailure {
    /// Stable reason code written to the failure ledger.
    pub fn reason(&self) -> &'static str {
        match self {
            RenderFailure::RenderTimeout(_) => "render_timeout",
            RenderFailure::RenderError { .. } => "render_error",
            RenderFailure::FetchBlocked { .. } => "fetch_blocked",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RenderFailure::FetchBlocked { .. })
    }
}

// ---------------------------------------------------------------------------
// DocumentRenderer
// ---------------------------------------------------------------------------

/// Capability the finalizer depends on. Implementations must be safe to call
/// concurrently; the finalizer bounds concurrency itself.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, url: &str) -> std::result::Result<Vec<u8>, RenderFailure>;
}

// ---------------------------------------------------------------------------
// BrowserlessRenderer
// ---------------------------------------------------------------------------

pub struct BrowserlessRenderer {
    http: reqwest::Client,
    browserless: BrowserlessClient,
    html_cache: Option<PathBuf>,
    refresh_cache: bool,
    /// Caps in-flight Browserless sessions.
    sessions: Semaphore,
}

impl BrowserlessRenderer {
    /// `client_identifier` is sent as the User-Agent on every filing-host request.
    pub fn new(
        browserless_url: &str,
        token: Option<&str>,
        client_identifier: &str,
        timeout: Duration,
        max_sessions: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(client_identifier)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::RendererSetup(e.to_string()))?;
        let browserless = BrowserlessClient::new(browserless_url, token, timeout)
            .map_err(|e| PipelineError::RendererSetup(e.to_string()))?;

        info!(browserless_url, max_sessions, "BrowserlessRenderer initialized");
        Ok(Self {
            http,
            browserless,
            html_cache: None,
            refresh_cache: false,
            sessions: Semaphore::new(max_sessions.max(1)),
        })
    }

    /// Keep downloaded HTML in `dir`. With `refresh`, cached copies are re-fetched.
    pub fn with_html_cache(mut self, dir: impl Into<PathBuf>, refresh: bool) -> Self {
        self.html_cache = Some(dir.into());
        self.refresh_cache = refresh;
        self
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.html_cache
            .as_ref()
            .map(|dir| dir.join(format!("{}.html", sha256_hex(url.as_bytes()))))
    }

    async fn html(&self, url: &str) -> std::result::Result<String, RenderFailure> {
        let cached = self.cache_path(url);
        if let Some(path) = cached.as_deref().filter(|_| !self.refresh_cache) {
            if let Ok(html) = tokio::fs::read_to_string(path).await {
                if html.len() >= MIN_HTML_BYTES {
                    debug!(url, path = %path.display(), "Using cached HTML");
                    return Ok(html);
                }
            }
        }

        let html = self.download(url).await?;
        if let Some(path) = cached.as_deref() {
            if let Err(e) = write_cache(path, &html).await {
                warn!(url, error = %e, "Failed to cache HTML");
            }
        }
        Ok(html)
    }

    async fn download(&self, url: &str) -> std::result::Result<String, RenderFailure> {
        let resp = self.http.get(url).send().await.map_err(request_failure)?;

        let status = resp.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(RenderFailure::FetchBlocked {
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(RenderFailure::RenderError {
                cause: format!("HTTP {status} fetching document"),
            });
        }

        let html = resp.text().await.map_err(request_failure)?;
        check_html(&html)?;
        debug!(url, bytes = html.len(), "Downloaded document HTML");
        Ok(html)
    }
}

#[async_trait]
impl DocumentRenderer for BrowserlessRenderer {
    async fn render(&self, url: &str) -> std::result::Result<Vec<u8>, RenderFailure> {
        let html = self.html(url).await?;

        let _permit = self.sessions.acquire().await.map_err(|_| RenderFailure::RenderError {
            cause: "renderer shut down".to_string(),
        })?;

        let request = PdfRequest::from_html(with_base_href(&html, url));
        let pdf = self.browserless.pdf(&request).await.map_err(|e| match e {
            BrowserlessError::Timeout(msg) => RenderFailure::RenderTimeout(msg),
            BrowserlessError::Api { status: 429, message } => RenderFailure::FetchBlocked {
                reason: format!("renderer rate limited: {message}"),
            },
            other => RenderFailure::RenderError {
                cause: other.to_string(),
            },
        })?;

        if pdf.is_empty() {
            return Err(RenderFailure::RenderError {
                cause: "renderer returned an empty document".to_string(),
            });
        }
        Ok(pdf)
    }
}

fn request_failure(err: reqwest::Error) -> RenderFailure {
    if err.is_timeout() {
        RenderFailure::RenderTimeout(err.to_string())
    } else {
        RenderFailure::RenderError {
            cause: err.to_string(),
        }
    }
}

/// Reject block pages and truncated bodies.
fn check_html(html: &str) -> std::result::Result<(), RenderFailure> {
    if html.to_lowercase().contains(&BLOCK_SNIPPET.to_lowercase()) {
        return Err(RenderFailure::FetchBlocked {
            reason: "undeclared automated tool notice".to_string(),
        });
    }
    if html.len() < MIN_HTML_BYTES {
        return Err(RenderFailure::RenderError {
            cause: format!("html_too_small({})", html.len()),
        });
    }
    Ok(())
}

/// Inline HTML loses its origin, so relative images and stylesheets need a `<base>`.
fn with_base_href(html: &str, url: &str) -> String {
    let lower = html.to_ascii_lowercase();
    if lower.contains("<base ") {
        return html.to_string();
    }
    let tag = format!("<base href=\"{url}\">");
    match lower.find("<head>") {
        Some(pos) => {
            let at = pos + "<head>".len();
            format!("{}{}{}", &html[..at], tag, &html[at..])
        }
        None => format!("{tag}{html}"),
    }
}

async fn write_cache(path: &Path, html: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, html).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(RenderFailure::RenderTimeout("t".into()).reason(), "render_timeout");
        assert_eq!(RenderFailure::RenderError { cause: "c".into() }.reason(), "render_error");
        assert_eq!(RenderFailure::FetchBlocked { reason: "r".into() }.reason(), "fetch_blocked");
    }

    #[test]
    fn block_page_is_fetch_blocked() {
        let page = format!("<html><body>{}</body></html>{}", BLOCK_SNIPPET.to_uppercase(), "x".repeat(2000));
        assert!(check_html(&page).unwrap_err().is_blocked());
    }

    #[test]
    fn tiny_body_is_render_error() {
        let err = check_html("<html></html>").unwrap_err();
        assert_eq!(err.reason(), "render_error");
        assert!(err.to_string().contains("html_too_small(13)"));
    }

    #[test]
    fn base_href_goes_inside_head() {
        let html = "<html><head><title>10-K</title></head></html>";
        let out = with_base_href(html, "https://www.sec.gov/Archives/edgar/data/1/a.htm");
        assert!(out.starts_with("<html><head><base href=\"https://www.sec.gov/Archives/edgar/data/1/a.htm\"><title>"));

        let existing = "<html><head><base href=\"/x/\"></head></html>";
        assert_eq!(with_base_href(existing, "https://y"), existing);
    }
}
