pub mod error;
pub mod tickers;
pub mod types;

pub use error::{EdgarError, Result};
pub use tickers::{load_ticker_map, normalize_cik, parse_ticker_map, TickerMap};
pub use types::{Filing, FilingIter, Submissions};

use std::time::Duration;

const BASE_URL: &str = "https://data.sec.gov";
const ARCHIVES_URL: &str = "https://www.sec.gov/Archives/edgar/data";

/// Attempts per submissions request before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base backoff between attempts. Actual delay is base * 2^attempt.
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

pub struct EdgarClient {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    retry_base: Duration,
}

impl EdgarClient {
    /// EDGAR rejects anonymous automated traffic; `user_agent` must carry a contact address.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_base = retry_base;
        self
    }

    /// Fetch the submissions document for a CIK, retrying transient failures.
    /// Returns `EdgarError::Unavailable` once the retry budget is spent.
    pub async fn submissions(&self, cik: &str) -> Result<Submissions> {
        let cik = normalize_cik(cik)?;
        let url = format!("{}/submissions/CIK{}.json", self.base_url, cik);

        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            match self.get_submissions(&url).await {
                Ok(subs) => return Ok(subs),
                Err(e) if e.is_transient() => {
                    tracing::warn!(cik = %cik, attempt = attempt + 1, error = %e, "EDGAR request failed");
                    last_error = e.to_string();
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(EdgarError::Unavailable {
            cik,
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn get_submissions(&self, url: &str) -> Result<Submissions> {
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EdgarError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// EDGAR filing index page for an accession.
pub fn index_url(cik: &str, accession: &str) -> String {
    let acc = accession.replace('-', "");
    format!("{ARCHIVES_URL}/{}/{acc}/{acc}-index.html", cik_path(cik))
}

/// Direct URL of a filing's primary HTML document.
pub fn document_url(cik: &str, accession: &str, primary_document: &str) -> String {
    let acc = accession.replace('-', "");
    format!("{ARCHIVES_URL}/{}/{acc}/{primary_document}", cik_path(cik))
}

/// Archive paths use the CIK without leading zeros.
fn cik_path(cik: &str) -> String {
    cik.trim()
        .parse::<u64>()
        .map(|v| v.to_string())
        .unwrap_or_else(|_| cik.trim().to_string())
}
