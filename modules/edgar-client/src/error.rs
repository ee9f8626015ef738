use thiserror::Error;

pub type Result<T> = std::result::Result<T, EdgarError>;

#[derive(Debug, Error)]
pub enum EdgarError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("EDGAR unavailable for CIK {cik} after {attempts} attempts: {last_error}")]
    Unavailable {
        cik: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid CIK: {0}")]
    InvalidCik(String),

    #[error("Ticker map error: {0}")]
    TickerMap(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EdgarError {
    /// Throttling, server-side failures, and transport errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            EdgarError::Network(_) => true,
            EdgarError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EdgarError {
    fn from(err: reqwest::Error) -> Self {
        EdgarError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EdgarError {
    fn from(err: serde_json::Error) -> Self {
        EdgarError::Parse(err.to_string())
    }
}
