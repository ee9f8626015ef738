use chrono::NaiveDate;
use serde::Deserialize;

// --- Submissions API types ---

/// Body of `https://data.sec.gov/submissions/CIK##########.json`.
/// Only the fields the filing index needs are decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submissions {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub filings: FilingsBlock,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilingsBlock {
    #[serde(default)]
    pub recent: RecentFilings,
}

/// Column-oriented listing of recent filings. All vectors are parallel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub report_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

impl RecentFilings {
    fn len(&self) -> usize {
        self.accession_number
            .len()
            .min(self.filing_date.len())
            .min(self.form.len())
    }

    fn row(&self, idx: usize) -> Option<Filing> {
        let filing_date = NaiveDate::parse_from_str(self.filing_date.get(idx)?, "%Y-%m-%d").ok()?;
        let report_date = self
            .report_date
            .get(idx)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        Some(Filing {
            accession_number: self.accession_number.get(idx)?.trim().to_string(),
            form: self.form.get(idx)?.trim().to_string(),
            filing_date,
            report_date,
            primary_document: self
                .primary_document
                .get(idx)
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
        })
    }
}

// --- Filing ---

/// One filing row from the submissions listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filing {
    pub accession_number: String,
    pub form: String,
    pub filing_date: NaiveDate,
    pub report_date: Option<NaiveDate>,
    pub primary_document: String,
}

impl Filing {
    /// Fiscal period label: the year of the report date, or of the filing date
    /// when the report date is blank.
    pub fn fiscal_period(&self) -> String {
        self.report_date
            .unwrap_or(self.filing_date)
            .format("%Y")
            .to_string()
    }
}

impl Submissions {
    /// Lazily iterate filings of the given forms filed on or after `min_date`,
    /// newest first. Ties on date are broken by accession number, descending.
    pub fn into_filings(self, forms: Vec<String>, min_date: NaiveDate) -> FilingIter {
        let recent = self.filings.recent;
        let mut order: Vec<usize> = (0..recent.len()).collect();
        order.sort_by(|&a, &b| {
            recent.filing_date[b]
                .cmp(&recent.filing_date[a])
                .then_with(|| recent.accession_number[b].cmp(&recent.accession_number[a]))
        });

        FilingIter {
            recent,
            order,
            pos: 0,
            forms: forms.into_iter().map(|f| f.trim().to_uppercase()).collect(),
            min_date,
        }
    }
}

/// Owned, restartable-by-refetch iterator over a company's filings.
pub struct FilingIter {
    recent: RecentFilings,
    order: Vec<usize>,
    pos: usize,
    forms: Vec<String>,
    min_date: NaiveDate,
}

impl Iterator for FilingIter {
    type Item = Filing;

    fn next(&mut self) -> Option<Filing> {
        while self.pos < self.order.len() {
            let idx = self.order[self.pos];
            self.pos += 1;

            let Some(filing) = self.recent.row(idx) else {
                continue;
            };
            if filing.filing_date < self.min_date {
                continue;
            }
            if !self.forms.is_empty() && !self.forms.contains(&filing.form.to_uppercase()) {
                continue;
            }
            return Some(filing);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submissions() -> Submissions {
        serde_json::from_value(serde_json::json!({
            "name": "Example Corp",
            "tickers": ["EXM"],
            "filings": {
                "recent": {
                    "accessionNumber": ["0000000001-23-000001", "0000000001-24-000002", "0000000001-24-000003", "0000000001-22-000004"],
                    "filingDate": ["2023-11-01", "2024-11-02", "2024-05-01", "2022-11-01"],
                    "reportDate": ["2023-09-30", "", "2024-03-31", "2022-09-30"],
                    "form": ["10-K", "10-K", "10-Q", "10-K"],
                    "primaryDocument": ["exm-2023.htm", "exm-2024.htm", "exm-q1.htm", "exm-2022.htm"]
                }
            }
        }))
        .unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn filters_by_form_and_min_date_newest_first() {
        let filings: Vec<Filing> = submissions()
            .into_filings(vec!["10-k".into()], date("2023-10-01"))
            .collect();

        let accessions: Vec<&str> = filings.iter().map(|f| f.accession_number.as_str()).collect();
        assert_eq!(accessions, vec!["0000000001-24-000002", "0000000001-23-000001"]);
    }

    #[test]
    fn fiscal_period_falls_back_to_filing_year() {
        let filings: Vec<Filing> = submissions()
            .into_filings(vec!["10-K".into()], date("2023-10-01"))
            .collect();

        assert_eq!(filings[0].fiscal_period(), "2024");
        assert_eq!(filings[1].fiscal_period(), "2023");
    }

    #[test]
    fn empty_form_filter_keeps_everything_after_cutoff() {
        let count = submissions()
            .into_filings(Vec::new(), date("2023-01-01"))
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn missing_filings_block_yields_nothing() {
        let subs: Submissions = serde_json::from_str(r#"{"name": "Shell Co"}"#).unwrap();
        assert_eq!(subs.into_filings(Vec::new(), date("2000-01-01")).count(), 0);
    }
}
