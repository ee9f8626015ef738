// Filing listings: the intermediate CSV between build-index and assemble.
// One row per (company, filing).

use std::path::Path;

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::model::FilingRecord;

pub fn write_listing(path: &Path, filings: &[FilingRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for filing in filings {
        writer.serialize(filing)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = filings.len(), "Wrote filing listing");
    Ok(())
}

/// Read one listing. Any malformed row rejects the whole file.
pub fn read_listing(path: &Path) -> Result<Vec<FilingRecord>> {
    let invalid = |reason: String| PipelineError::InvalidListing {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|e| invalid(e.to_string()))?;
    let mut filings = Vec::new();
    for (row_no, row) in reader.deserialize::<FilingRecord>().enumerate() {
        let filing = row.map_err(|e| invalid(format!("row {}: {e}", row_no + 1)))?;
        if filing.accession_id.trim().is_empty() || filing.company_id.trim().is_empty() {
            return Err(invalid(format!(
                "row {}: company_id and accession_id are required",
                row_no + 1
            )));
        }
        filings.push(filing);
    }
    Ok(filings)
}

/// Read and concatenate several listings. De-duplication happens in the pairer.
pub fn read_listings(paths: &[impl AsRef<Path>]) -> Result<Vec<FilingRecord>> {
    let mut all = Vec::new();
    for path in paths {
        let rows = read_listing(path.as_ref())?;
        info!(path = %path.as_ref().display(), rows = rows.len(), "Read filing listing");
        all.extend(rows);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn filing(accession: &str) -> FilingRecord {
        FilingRecord {
            company_id: "0000320193".into(),
            ticker: "AAPL".into(),
            display_name: "Apple, Inc.".into(),
            sector: "Technology".into(),
            form_type: "10-K".into(),
            filed_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            fiscal_period: "2024".into(),
            document_url: "https://www.sec.gov/Archives/edgar/data/320193/1/aapl.htm".into(),
            index_url: String::new(),
            accession_id: accession.into(),
        }
    }

    #[test]
    fn listing_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filings.csv");
        let rows = vec![filing("0000320193-24-000123"), filing("0000320193-23-000106")];

        write_listing(&path, &rows).unwrap();
        assert_eq!(read_listing(&path).unwrap(), rows);
    }

    #[test]
    fn listing_header_uses_stable_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filings.csv");
        write_listing(&path, &[filing("0000320193-24-000123")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "company_id,ticker,display_name,sector,form_type,filed_date,fiscal_period,document_url,index_url,accession_id"
        );
    }

    #[test]
    fn bad_date_rejects_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filings.csv");
        std::fs::write(
            &path,
            "company_id,ticker,form_type,filed_date,fiscal_period,document_url,accession_id\n\
             0000320193,AAPL,10-K,not-a-date,2024,https://x,0000320193-24-000123\n",
        )
        .unwrap();

        assert!(matches!(
            read_listing(&path),
            Err(PipelineError::InvalidListing { .. })
        ));
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filings.csv");
        std::fs::write(
            &path,
            "company_id,ticker,form_type,filed_date,fiscal_period,document_url,accession_id\n\
             0000320193,AAPL,10-K,2024-11-01,2024,https://x,0000320193-24-000123\n",
        )
        .unwrap();

        let rows = read_listing(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_name, "");
    }
}
