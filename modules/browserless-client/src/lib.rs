pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;

/// Body of a Browserless `/pdf` request. Exactly one of `url` or `html` is sent.
#[derive(Debug, Clone, Serialize)]
pub struct PdfRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub options: PdfOptions,
}

impl PdfRequest {
    pub fn from_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            html: None,
            options: PdfOptions::default(),
        }
    }

    pub fn from_html(html: String) -> Self {
        Self {
            url: None,
            html: Some(html),
            options: PdfOptions::default(),
        }
    }
}

/// Puppeteer `page.pdf()` options forwarded by Browserless.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOptions {
    pub format: String,
    pub margin: PdfMargin,
    pub print_background: bool,
    pub display_header_footer: bool,
    pub landscape: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfMargin {
    pub top: String,
    pub bottom: String,
    pub left: String,
    pub right: String,
}

impl Default for PdfOptions {
    /// A4 portrait with one-inch margins and no background graphics.
    fn default() -> Self {
        let inch = "1in".to_string();
        Self {
            format: "A4".to_string(),
            margin: PdfMargin {
                top: inch.clone(),
                bottom: inch.clone(),
                left: inch.clone(),
                right: inch,
            },
            print_background: false,
            display_header_footer: false,
            landscape: false,
        }
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Render a page or an HTML document to PDF via the Browserless /pdf endpoint.
    pub async fn pdf(&self, request: &PdfRequest) -> Result<Vec<u8>> {
        let mut endpoint = format!("{}/pdf", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = resp.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "Browserless rendered PDF");
        Ok(bytes.to_vec())
    }
}
