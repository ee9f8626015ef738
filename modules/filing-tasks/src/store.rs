// Task Store: the task sheet as one owned, in-memory table.
//
// Stages load it, apply updates through `update`, and save it back with an
// atomic replace. The file is never edited in place, so a crash mid-save
// leaves the previous version intact.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::{Category, FilingRecord, Slot, TaskId};
use crate::task::{Task, TaskSlot, TaskStatus};

const SLOT_FIELDS: [&str; 13] = [
    "company_id",
    "ticker",
    "display_name",
    "sector",
    "form_type",
    "fiscal_period",
    "filed_date",
    "accession_id",
    "document_url",
    "index_url",
    "artifact_filename",
    "checksum",
    "link",
];

/// Every column the store owns, in write order.
pub fn store_columns() -> Vec<String> {
    let mut cols = vec!["task_id".to_string(), "category".to_string()];
    for slot in [Slot::One, Slot::Two] {
        cols.extend(SLOT_FIELDS.iter().map(|f| format!("{f}_{}", slot.number())));
    }
    cols
}

/// A mutable per-slot field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    ArtifactFilename(Slot),
    Checksum(Slot),
    Link(Slot),
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    extra_columns: Vec<String>,
    revision: u64,
}

impl TaskStore {
    /// Build a store from freshly assembled tasks. Task ids must be unique.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();
        Self {
            tasks,
            index,
            extra_columns: Vec::new(),
            revision: 0,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Number of updates applied since load or construction.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Set (`Some`) or clear (`None`) one field of one task.
    pub fn update(&mut self, task_id: &TaskId, field: TaskField, value: Option<String>) -> Result<()> {
        let idx = *self
            .index
            .get(task_id)
            .ok_or_else(|| PipelineError::UnknownTask(task_id.clone()))?;
        let task = &mut self.tasks[idx];

        let value = value.filter(|v| !v.is_empty());
        let target = match field {
            TaskField::ArtifactFilename(slot) => &mut task.slot_mut(slot).artifact_filename,
            TaskField::Checksum(slot) => &mut task.slot_mut(slot).checksum,
            TaskField::Link(slot) => &mut task.slot_mut(slot).link,
        };
        if *target != value {
            *target = value;
            self.revision += 1;
        }
        Ok(())
    }

    pub fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        counts
    }

    /// True when every task is COMPLETE or LINKED.
    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status().is_done())
    }

    // --- Persistence ---

    pub fn load(path: &Path) -> Result<Self> {
        let corrupt = |reason: String| PipelineError::CorruptTaskStore {
            path: path.display().to_string(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| corrupt(e.to_string()))?;
        let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?.clone();

        let positions: HashMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let owned = store_columns();
        let missing: Vec<&String> = owned
            .iter()
            .filter(|c| !positions.contains_key(c.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(corrupt(format!("missing columns: {missing:?}")));
        }
        let owned_set: HashSet<&str> = owned.iter().map(String::as_str).collect();
        let extra_idx: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !owned_set.contains(h))
            .map(|(i, _)| i)
            .collect();
        let extra_columns: Vec<String> = extra_idx.iter().map(|&i| headers[i].to_string()).collect();

        let mut tasks = Vec::new();
        let mut index = HashMap::new();
        for (row_no, record) in reader.records().enumerate() {
            let record = record.map_err(|e| corrupt(e.to_string()))?;
            let cell = |name: &str| -> String {
                positions
                    .get(name)
                    .and_then(|&i| record.get(i))
                    .unwrap_or_default()
                    .to_string()
            };

            let task_id = TaskId(cell("task_id"));
            if task_id.as_str().is_empty() {
                return Err(corrupt(format!("row {} has an empty task_id", row_no + 1)));
            }
            let category: Category = cell("category")
                .parse()
                .map_err(|e: String| corrupt(format!("task {task_id}: {e}")))?;

            let slot_1 = read_slot(&cell, Slot::One).map_err(|e| corrupt(format!("task {task_id}: {e}")))?;
            let slot_2 = read_slot(&cell, Slot::Two).map_err(|e| corrupt(format!("task {task_id}: {e}")))?;
            let extras = extra_idx
                .iter()
                .map(|&i| record.get(i).unwrap_or_default().to_string())
                .collect();

            if index.insert(task_id.clone(), tasks.len()).is_some() {
                return Err(corrupt(format!("duplicate task_id {task_id}")));
            }
            tasks.push(Task {
                task_id,
                category,
                slot_1,
                slot_2,
                extras,
            });
        }

        debug!(path = %path.display(), tasks = tasks.len(), extra_columns = extra_columns.len(), "Loaded task store");
        Ok(Self {
            tasks,
            index,
            extra_columns,
            revision: 0,
        })
    }

    /// Serialize the whole store as CSV.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header = store_columns();
        header.extend(self.extra_columns.iter().cloned());
        writer.write_record(&header)?;

        for task in &self.tasks {
            let mut row = vec![task.task_id.to_string(), task.category.label().to_string()];
            row.extend(write_slot(&task.slot_1));
            row.extend(write_slot(&task.slot_2));
            for i in 0..self.extra_columns.len() {
                row.push(task.extras.get(i).cloned().unwrap_or_default());
            }
            writer.write_record(&row)?;
        }

        writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))
    }

    /// Write to a temp file beside `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_csv()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;

        debug!(path = %path.display(), tasks = self.tasks.len(), revision = self.revision, "Saved task store");
        Ok(())
    }
}

fn opt(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn read_slot(cell: &dyn Fn(&str) -> String, slot: Slot) -> std::result::Result<TaskSlot, String> {
    let n = slot.number();
    let get = |field: &str| cell(&format!("{field}_{n}"));

    let accession_id = get("accession_id");
    let filing = if accession_id.is_empty() {
        None
    } else {
        let filed_date = NaiveDate::parse_from_str(&get("filed_date"), "%Y-%m-%d")
            .map_err(|e| format!("filed_date_{n}: {e}"))?;
        Some(FilingRecord {
            company_id: get("company_id"),
            ticker: get("ticker"),
            display_name: get("display_name"),
            sector: get("sector"),
            form_type: get("form_type"),
            filed_date,
            fiscal_period: get("fiscal_period"),
            document_url: get("document_url"),
            index_url: get("index_url"),
            accession_id,
        })
    };

    Ok(TaskSlot {
        filing,
        artifact_filename: opt(get("artifact_filename")),
        checksum: opt(get("checksum")),
        link: opt(get("link")),
    })
}

fn write_slot(slot: &TaskSlot) -> Vec<String> {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    let mut cells = match &slot.filing {
        Some(f) => vec![
            f.company_id.clone(),
            f.ticker.clone(),
            f.display_name.clone(),
            f.sector.clone(),
            f.form_type.clone(),
            f.fiscal_period.clone(),
            f.filed_date.format("%Y-%m-%d").to_string(),
            f.accession_id.clone(),
            f.document_url.clone(),
            f.index_url.clone(),
        ],
        None => vec![String::new(); 10],
    };
    cells.push(text(&slot.artifact_filename));
    cells.push(text(&slot.checksum));
    cells.push(text(&slot.link));
    cells
}
