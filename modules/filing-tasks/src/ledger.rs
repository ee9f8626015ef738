// Failure ledger: an append-only CSV with one row per slot that exhausted
// its render attempts. Rows from earlier runs are never rewritten.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::model::{Slot, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task_id: TaskId,
    pub slot: u8,
    pub reason: String,
    pub attempt_count: u32,
    pub last_error: String,
    pub timestamp: String,
}

impl FailureRecord {
    pub fn new(
        task_id: TaskId,
        slot: Slot,
        reason: &str,
        attempt_count: u32,
        last_error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            slot: slot.number(),
            reason: reason.to_string(),
            attempt_count,
            last_error: last_error.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureLedger {
    path: PathBuf,
}

impl FailureLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, writing the header only when the file is new or empty.
    pub fn append(&self, records: &[FailureRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!(path = %self.path.display(), rows = records.len(), "Appended to failure ledger");
        Ok(())
    }

    /// All rows recorded so far; empty when the ledger does not exist yet.
    pub fn read_all(&self) -> Result<Vec<FailureRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, reason: &str) -> FailureRecord {
        FailureRecord::new(
            TaskId::from(task),
            Slot::Two,
            reason,
            3,
            "HTTP 429, \"slow down\"",
            Utc::now(),
        )
    }

    #[test]
    fn appends_across_runs_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path().join("failed.csv"));

        ledger.append(&[record("C_PEER_07", "fetch_blocked")]).unwrap();
        ledger.append(&[record("A_03", "render_timeout")]).unwrap();

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text.matches("task_id,slot,reason").count(), 1);

        let rows = ledger.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task_id.as_str(), "C_PEER_07");
        assert_eq!(rows[0].last_error, "HTTP 429, \"slow down\"");
        assert_eq!(rows[1].reason, "render_timeout");
    }

    #[test]
    fn empty_append_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path().join("failed.csv"));
        ledger.append(&[]).unwrap();
        assert!(!ledger.path().exists());
        assert!(ledger.read_all().unwrap().is_empty());
    }
}
