// Filing Index Client and the build-index stage.
//
// `FilingSource` is the seam: the EDGAR adapter is the production source,
// tests plug in fixed lists. A source failing for one company never stops the
// stage; the company simply contributes no filings this run.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use edgar_client::{EdgarClient, TickerMap};
use serde::Deserialize;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::error::{PipelineError, Result};
use crate::model::{Company, FilingRecord};

/// Lazy, newest-first sequence of a company's filings.
pub type FilingStream = Box<dyn Iterator<Item = FilingRecord> + Send>;

// ---------------------------------------------------------------------------
// FilingSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FilingSource: Send + Sync {
    /// Filings of `company` with a form in `form_types` filed on or after
    /// `min_date`, ordered by filed date then accession id, both descending.
    async fn fetch(
        &self,
        company: &Company,
        form_types: &[String],
        min_date: NaiveDate,
    ) -> Result<FilingStream>;
}

pub struct EdgarFilingSource {
    client: EdgarClient,
}

impl EdgarFilingSource {
    pub fn new(client: EdgarClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FilingSource for EdgarFilingSource {
    async fn fetch(
        &self,
        company: &Company,
        form_types: &[String],
        min_date: NaiveDate,
    ) -> Result<FilingStream> {
        let submissions = self
            .client
            .submissions(&company.company_id)
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                company_id: company.company_id.clone(),
                reason: e.to_string(),
            })?;

        let company = company.clone();
        let filings = submissions
            .into_filings(form_types.to_vec(), min_date)
            .filter(|f| !f.primary_document.is_empty())
            .map(move |f| FilingRecord {
                company_id: company.company_id.clone(),
                ticker: company.ticker.clone(),
                display_name: company.display_name.clone(),
                sector: company.sector.clone(),
                form_type: f.form.clone(),
                filed_date: f.filing_date,
                fiscal_period: f.fiscal_period(),
                document_url: edgar_client::document_url(
                    &company.company_id,
                    &f.accession_number,
                    &f.primary_document,
                ),
                index_url: edgar_client::index_url(&company.company_id, &f.accession_number),
                accession_id: f.accession_number,
            });
        Ok(Box::new(filings))
    }
}

// ---------------------------------------------------------------------------
// Company source
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompanySourceRow {
    #[serde(alias = "Ticker")]
    ticker: String,
    #[serde(default, alias = "company", alias = "Company")]
    display_name: String,
    #[serde(default, alias = "Sector")]
    sector: String,
}

#[derive(Debug, Default)]
pub struct ResolvedCompanies {
    pub companies: Vec<Company>,
    /// One message per ticker with no filing identifier.
    pub unresolved: Vec<String>,
}

/// Read the company source CSV and resolve each ticker through `tickers`.
pub fn load_companies(path: &Path, tickers: &TickerMap) -> Result<ResolvedCompanies> {
    let invalid = |reason: String| PipelineError::InvalidCompanies {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|e| invalid(e.to_string()))?;
    let mut resolved = ResolvedCompanies::default();
    for (row_no, row) in reader.deserialize::<CompanySourceRow>().enumerate() {
        let row = row.map_err(|e| invalid(format!("row {}: {e}", row_no + 1)))?;
        let ticker = row.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            continue;
        }
        match tickers.get(&ticker) {
            Some(cik) => resolved.companies.push(Company {
                company_id: cik.clone(),
                ticker,
                display_name: row.display_name.trim().to_string(),
                sector: row.sector.trim().to_string(),
            }),
            None => resolved.unresolved.push(format!("No CIK mapping for {ticker}")),
        }
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// build_index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, TypedBuilder)]
pub struct IndexRequest {
    pub forms: Vec<String>,
    pub min_date: NaiveDate,
    #[builder(default = 2)]
    pub max_per_company: usize,
    /// Pause between consecutive company requests.
    #[builder(default = Duration::from_millis(200))]
    pub request_delay: Duration,
}

#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub filings: Vec<FilingRecord>,
    pub warnings: Vec<String>,
}

/// Query `source` once per company, keeping at most `max_per_company` filings each.
pub async fn build_index(
    source: &dyn FilingSource,
    companies: &[Company],
    request: &IndexRequest,
) -> IndexOutcome {
    let mut outcome = IndexOutcome::default();

    for (i, company) in companies.iter().enumerate() {
        if i > 0 && !request.request_delay.is_zero() {
            tokio::time::sleep(request.request_delay).await;
        }

        match source.fetch(company, &request.forms, request.min_date).await {
            Ok(stream) => {
                let before = outcome.filings.len();
                outcome.filings.extend(stream.take(request.max_per_company));
                info!(
                    ticker = company.ticker.as_str(),
                    company_id = company.company_id.as_str(),
                    filings = outcome.filings.len() - before,
                    "Indexed company"
                );
            }
            Err(e) => {
                warn!(ticker = company.ticker.as_str(), error = %e, "Skipping company");
                outcome
                    .warnings
                    .push(format!("{} ({}): {e}", company.ticker, company.company_id));
            }
        }
    }

    info!(
        companies = companies.len(),
        filings = outcome.filings.len(),
        warnings = outcome.warnings.len(),
        "Filing index built"
    );
    outcome
}

/// Write one warning per line. Nothing is written when there are none.
pub fn write_warnings(path: &Path, warnings: &[String]) -> Result<()> {
    if warnings.is_empty() {
        return Ok(());
    }
    let mut text = warnings.join("\n");
    text.push('\n');
    std::fs::write(path, text)?;
    info!(path = %path.display(), warnings = warnings.len(), "Completed with warnings");
    Ok(())
}
