use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Company / FilingRecord
// ---------------------------------------------------------------------------

/// A company resolved to its filing identifier (10-digit CIK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub company_id: String,
    pub ticker: String,
    pub display_name: String,
    pub sector: String,
}

/// One filing of one company, as listed by the filing index.
/// `accession_id` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRecord {
    pub company_id: String,
    pub ticker: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub sector: String,
    pub form_type: String,
    pub filed_date: NaiveDate,
    pub fiscal_period: String,
    pub document_url: String,
    #[serde(default)]
    pub index_url: String,
    pub accession_id: String,
}

impl FilingRecord {
    /// Total order used everywhere a company's filings are ranked:
    /// newest first, accession id as the final tie-break.
    pub fn recency_cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .filed_date
            .cmp(&self.filed_date)
            .then_with(|| other.accession_id.cmp(&self.accession_id))
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    A,
    B,
    CYoY,
    CPeer,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::A, Category::B, Category::CYoY, Category::CPeer];

    pub fn label(self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::CYoY => "C-YoY",
            Category::CPeer => "C-Peer",
        }
    }

    /// Prefix of task ids in this category.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::CYoY => "C_YOY",
            Category::CPeer => "C_PEER",
        }
    }

    pub fn required_slots(self) -> &'static [Slot] {
        match self {
            Category::A | Category::B => &[Slot::One],
            Category::CYoY | Category::CPeer => &[Slot::One, Slot::Two],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the canonical labels plus the "C (YoY)" spelling of older sheets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "A" => Ok(Category::A),
            "B" => Ok(Category::B),
            "CYOY" => Ok(Category::CYoY),
            "CPEER" => Ok(Category::CPeer),
            _ => Err(format!("unknown category: {s:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub fn number(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Slot> {
        match n {
            1 => Some(Slot::One),
            2 => Some(Slot::Two),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

// ---------------------------------------------------------------------------
// Task ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Deterministic task id generator: the id is a pure function of
/// (category, 1-based index), so no counter is shared between stages.
#[derive(Debug, Clone, Copy)]
pub struct TaskIdSequence {
    category: Category,
    next: usize,
    width: usize,
}

impl TaskIdSequence {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            next: 1,
            width: 2,
        }
    }

    pub fn id_at(category: Category, index: usize) -> TaskId {
        Self::new(category).nth_id(index)
    }

    fn nth_id(&self, index: usize) -> TaskId {
        TaskId(format!(
            "{}_{:0width$}",
            self.category.id_prefix(),
            index,
            width = self.width
        ))
    }
}

impl Iterator for TaskIdSequence {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.nth_id(self.next);
        self.next += 1;
        Some(id)
    }
}
