use std::fmt;

use crate::model::{Category, FilingRecord, Slot, TaskId};

/// One filing slot of a task plus the fields later stages fill in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSlot {
    pub filing: Option<FilingRecord>,
    pub artifact_filename: Option<String>,
    pub checksum: Option<String>,
    pub link: Option<String>,
}

impl TaskSlot {
    pub fn with_filing(filing: FilingRecord) -> Self {
        Self {
            filing: Some(filing),
            ..Self::default()
        }
    }

    /// Filename and checksum are both recorded.
    pub fn has_artifact(&self) -> bool {
        self.artifact_filename.is_some() && self.checksum.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: TaskId,
    pub category: Category,
    pub slot_1: TaskSlot,
    pub slot_2: TaskSlot,
    /// Values of columns this system does not own, aligned with the store's extra columns.
    pub extras: Vec<String>,
}

impl Task {
    pub fn single(task_id: TaskId, category: Category, filing: FilingRecord) -> Self {
        Self {
            task_id,
            category,
            slot_1: TaskSlot::with_filing(filing),
            slot_2: TaskSlot::default(),
            extras: Vec::new(),
        }
    }

    pub fn pair(task_id: TaskId, category: Category, first: FilingRecord, second: FilingRecord) -> Self {
        Self {
            task_id,
            category,
            slot_1: TaskSlot::with_filing(first),
            slot_2: TaskSlot::with_filing(second),
            extras: Vec::new(),
        }
    }

    pub fn slot(&self, slot: Slot) -> &TaskSlot {
        match slot {
            Slot::One => &self.slot_1,
            Slot::Two => &self.slot_2,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut TaskSlot {
        match slot {
            Slot::One => &mut self.slot_1,
            Slot::Two => &mut self.slot_2,
        }
    }

    pub fn required_slots(&self) -> &'static [Slot] {
        self.category.required_slots()
    }

    /// Artifact filename for a slot, or `None` when the slot holds no filing.
    pub fn artifact_filename(&self, slot: Slot) -> Option<String> {
        self.slot(slot)
            .filing
            .as_ref()
            .map(|f| artifact_filename(&self.task_id, &f.accession_id, slot))
    }

    pub fn status(&self) -> TaskStatus {
        let required = self.required_slots();
        let complete = required
            .iter()
            .filter(|s| self.slot(**s).has_artifact())
            .count();
        let started = required
            .iter()
            .any(|s| self.slot(*s).artifact_filename.is_some());

        if complete == required.len() {
            let linked = required.iter().all(|s| self.slot(*s).link.is_some());
            if linked {
                TaskStatus::Linked
            } else {
                TaskStatus::Complete
            }
        } else if started {
            TaskStatus::Partial
        } else {
            TaskStatus::Pending
        }
    }
}

/// Filename identity rule. Built only from fields that never change after
/// assembly, so every run regenerates the same name for the same filing.
/// Task ids are unique, which makes the name unique across the store.
pub fn artifact_filename(task_id: &TaskId, accession_id: &str, slot: Slot) -> String {
    let accession: String = accession_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    format!("{}_{}_doc{}.pdf", task_id, accession, slot.number())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStatus {
    Pending,
    Partial,
    Complete,
    Linked,
}

impl TaskStatus {
    /// COMPLETE or LINKED.
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Linked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Partial => "PARTIAL",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Linked => "LINKED",
        })
    }
}
