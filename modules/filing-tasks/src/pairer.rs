//! Task Pairer: turns filing listings into exactly-sized task categories.
//!
//! Selection is deterministic: filings are bucketed per company in a
//! `BTreeMap` (company id order) and ranked with [`FilingRecord::recency_cmp`],
//! so identical input always yields identical task assignments, whatever the
//! order of the input rows.
//!
//! Every filing is used by at most one task slot. The paired categories are
//! chosen first because they carry the structural constraints; single-filing
//! categories draw from whatever is left.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{Category, FilingRecord, TaskIdSequence};
use crate::store::TaskStore;
use crate::task::Task;

/// Number of tasks to assemble per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCounts {
    pub a: usize,
    pub b: usize,
    pub c_yoy: usize,
    pub c_peer: usize,
}

impl Default for TargetCounts {
    fn default() -> Self {
        Self {
            a: 40,
            b: 40,
            c_yoy: 10,
            c_peer: 10,
        }
    }
}

impl TargetCounts {
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::A => self.a,
            Category::B => self.b,
            Category::CYoY => self.c_yoy,
            Category::CPeer => self.c_peer,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c_yoy + self.c_peer
    }
}

/// Filings bucketed per company, newest first, plus the set already claimed.
struct FilingPool {
    by_company: BTreeMap<String, Vec<FilingRecord>>,
    used: BTreeSet<String>,
}

impl FilingPool {
    fn new(filings: &[FilingRecord]) -> Self {
        let mut sorted: Vec<&FilingRecord> = filings.iter().collect();
        sorted.sort_by(|a, b| {
            a.company_id
                .cmp(&b.company_id)
                .then_with(|| a.recency_cmp(b))
                .then_with(|| a.fiscal_period.cmp(&b.fiscal_period))
                .then_with(|| a.document_url.cmp(&b.document_url))
        });

        let mut seen = BTreeSet::new();
        let mut duplicates = 0usize;
        let mut by_company: BTreeMap<String, Vec<FilingRecord>> = BTreeMap::new();
        for filing in sorted {
            if !seen.insert(filing.accession_id.clone()) {
                duplicates += 1;
                continue;
            }
            by_company
                .entry(filing.company_id.clone())
                .or_default()
                .push(filing.clone());
        }

        if duplicates > 0 {
            info!(duplicates, "Dropped duplicate accession ids");
        }

        Self {
            by_company,
            used: BTreeSet::new(),
        }
    }

    fn unused<'a>(&'a self, filings: &'a [FilingRecord]) -> impl Iterator<Item = &'a FilingRecord> + 'a {
        filings.iter().filter(|f| !self.used.contains(&f.accession_id))
    }

    fn claim(&mut self, filing: &FilingRecord) {
        self.used.insert(filing.accession_id.clone());
    }
}

/// Assemble a Task Store with exactly `targets` tasks per category.
///
/// Fails with [`PipelineError::InsufficientFilings`] on the first category that
/// cannot be filled; no partial store is produced.
pub fn assemble(filings: &[FilingRecord], targets: &TargetCounts) -> Result<TaskStore> {
    let mut pool = FilingPool::new(filings);
    info!(
        companies = pool.by_company.len(),
        filings = pool.by_company.values().map(Vec::len).sum::<usize>(),
        "Pairing filings into tasks"
    );

    let (yoy, yoy_companies) = pick_yoy(&mut pool, targets.c_yoy);
    ensure_filled(Category::CYoY, targets.c_yoy, yoy.len())?;

    let peers = pick_peers(&mut pool, targets.c_peer, &yoy_companies);
    ensure_filled(Category::CPeer, targets.c_peer, peers.len())?;

    let a = pick_singles(&mut pool, targets.a);
    ensure_filled(Category::A, targets.a, a.len())?;

    let b = pick_singles(&mut pool, targets.b);
    ensure_filled(Category::B, targets.b, b.len())?;

    let mut tasks = Vec::with_capacity(targets.total());
    tasks.extend(
        TaskIdSequence::new(Category::A)
            .zip(a)
            .map(|(id, f)| Task::single(id, Category::A, f)),
    );
    tasks.extend(
        TaskIdSequence::new(Category::B)
            .zip(b)
            .map(|(id, f)| Task::single(id, Category::B, f)),
    );
    tasks.extend(
        TaskIdSequence::new(Category::CYoY)
            .zip(yoy)
            .map(|(id, (newer, older))| Task::pair(id, Category::CYoY, newer, older)),
    );
    tasks.extend(
        TaskIdSequence::new(Category::CPeer)
            .zip(peers)
            .map(|(id, (first, second))| Task::pair(id, Category::CPeer, first, second)),
    );

    info!(tasks = tasks.len(), "Assembled task store");
    Ok(TaskStore::from_tasks(tasks))
}

fn ensure_filled(category: Category, needed: usize, available: usize) -> Result<()> {
    if available < needed {
        warn!(%category, needed, available, "Not enough eligible filings");
        return Err(PipelineError::InsufficientFilings {
            category,
            needed,
            available,
        });
    }
    Ok(())
}

/// Same company, two most recent distinct fiscal periods. Slot 1 is the newer period.
fn pick_yoy(
    pool: &mut FilingPool,
    target: usize,
) -> (Vec<(FilingRecord, FilingRecord)>, BTreeSet<String>) {
    let mut picks = Vec::new();
    let mut companies = BTreeSet::new();

    let mut chosen = Vec::new();
    for (company_id, filings) in &pool.by_company {
        if chosen.len() >= target {
            break;
        }
        let unused: Vec<&FilingRecord> = pool
            .unused(filings)
            .filter(|f| !f.fiscal_period.is_empty())
            .collect();

        let mut periods: Vec<&str> = unused.iter().map(|f| f.fiscal_period.as_str()).collect();
        periods.sort_unstable_by(|a, b| b.cmp(a));
        periods.dedup();
        if periods.len() < 2 {
            continue;
        }

        // `unused` is newest first, so `find` picks the latest filing of each period.
        let newer = unused.iter().find(|f| f.fiscal_period == periods[0]);
        let older = unused.iter().find(|f| f.fiscal_period == periods[1]);
        if let (Some(newer), Some(older)) = (newer, older) {
            chosen.push((company_id.clone(), (*newer).clone(), (*older).clone()));
        }
    }

    for (company_id, newer, older) in chosen {
        pool.claim(&newer);
        pool.claim(&older);
        companies.insert(company_id);
        picks.push((newer, older));
    }
    (picks, companies)
}

/// Different companies, same fiscal period. Periods are visited newest first.
/// Within a period companies of the same sector are paired first, then the
/// rest, always in company id order. Each company joins at most one pair.
fn pick_peers(
    pool: &mut FilingPool,
    target: usize,
    excluded: &BTreeSet<String>,
) -> Vec<(FilingRecord, FilingRecord)> {
    // period -> one candidate filing per company, in company id order
    let mut by_period: BTreeMap<String, Vec<FilingRecord>> = BTreeMap::new();
    for (company_id, filings) in &pool.by_company {
        if excluded.contains(company_id) {
            continue;
        }
        let mut seen_periods = BTreeSet::new();
        for filing in pool.unused(filings) {
            if filing.fiscal_period.is_empty() {
                continue;
            }
            if seen_periods.insert(filing.fiscal_period.clone()) {
                by_period
                    .entry(filing.fiscal_period.clone())
                    .or_default()
                    .push(filing.clone());
            }
        }
    }

    let mut picks = Vec::new();
    let mut paired = BTreeSet::new();
    for candidates in by_period.values().rev() {
        // Same-sector pairs first, then whatever is left across sectors.
        let mut by_sector: BTreeMap<&str, Vec<&FilingRecord>> = BTreeMap::new();
        for filing in candidates {
            by_sector.entry(filing.sector.as_str()).or_default().push(filing);
        }
        for group in by_sector.values() {
            pair_consecutive(group, target, &mut paired, &mut picks);
        }
        let rest: Vec<&FilingRecord> = candidates.iter().collect();
        pair_consecutive(&rest, target, &mut paired, &mut picks);
        if picks.len() >= target {
            break;
        }
    }

    for (first, second) in &picks {
        pool.claim(first);
        pool.claim(second);
    }
    picks
}

/// One filing per company, its most recent unused one, companies in id order.
fn pick_singles(pool: &mut FilingPool, target: usize) -> Vec<FilingRecord> {
    let mut picks = Vec::new();
    for filings in pool.by_company.values() {
        if picks.len() >= target {
            break;
        }
        if let Some(filing) = pool.unused(filings).next() {
            picks.push(filing.clone());
        }
    }
    for filing in &picks {
        pool.claim(filing);
    }
    picks
}

/// Pair not-yet-paired companies in the given order until `target` is reached.
fn pair_consecutive(
    candidates: &[&FilingRecord],
    target: usize,
    paired: &mut BTreeSet<String>,
    picks: &mut Vec<(FilingRecord, FilingRecord)>,
) {
    let mut waiting: Option<&FilingRecord> = None;
    for &filing in candidates {
        if picks.len() >= target {
            return;
        }
        if paired.contains(&filing.company_id) {
            continue;
        }
        match waiting.take() {
            None => waiting = Some(filing),
            Some(first) => {
                paired.insert(first.company_id.clone());
                paired.insert(filing.company_id.clone());
                picks.push((first.clone(), filing.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Slot;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn filing(company: u32, year: i32) -> FilingRecord {
        FilingRecord {
            company_id: format!("{company:010}"),
            ticker: format!("T{company}"),
            display_name: format!("Company {company}"),
            sector: String::new(),
            form_type: "10-K".into(),
            filed_date: NaiveDate::from_ymd_opt(year, 11, 1).unwrap(),
            fiscal_period: (year - 1).to_string(),
            document_url: format!("https://www.sec.gov/Archives/{company}/{year}.htm"),
            index_url: String::new(),
            accession_id: format!("{company:010}-{}-000001", year % 100),
        }
    }

    fn universe(companies: u32) -> Vec<FilingRecord> {
        (1..=companies)
            .flat_map(|c| [filing(c, 2024), filing(c, 2023)])
            .collect()
    }

    fn counts(a: usize, b: usize, c_yoy: usize, c_peer: usize) -> TargetCounts {
        TargetCounts { a, b, c_yoy, c_peer }
    }

    #[test]
    fn three_company_scenario() {
        let store = assemble(&universe(3), &counts(1, 1, 1, 1)).unwrap();
        assert_eq!(store.len(), 4);

        let by_cat = |c: Category| store.tasks().iter().find(|t| t.category == c).unwrap();

        let yoy = by_cat(Category::CYoY);
        let (y1, y2) = (yoy.slot_1.filing.as_ref().unwrap(), yoy.slot_2.filing.as_ref().unwrap());
        assert_eq!(y1.company_id, y2.company_id);
        assert_ne!(y1.fiscal_period, y2.fiscal_period);
        assert!(y1.fiscal_period > y2.fiscal_period);

        let peer = by_cat(Category::CPeer);
        let (p1, p2) = (peer.slot_1.filing.as_ref().unwrap(), peer.slot_2.filing.as_ref().unwrap());
        assert_ne!(p1.company_id, p2.company_id);
        assert_eq!(p1.fiscal_period, p2.fiscal_period);

        let mut accessions = HashSet::new();
        for task in store.tasks() {
            for slot in task.required_slots() {
                let f = task.slot(*slot).filing.as_ref().unwrap();
                assert!(accessions.insert(f.accession_id.clone()), "filing reused: {}", f.accession_id);
            }
        }
        assert_eq!(accessions.len(), 6);
    }

    #[test]
    fn assignment_ignores_input_order() {
        let forward = universe(30);
        let mut reversed = forward.clone();
        reversed.reverse();

        let targets = counts(10, 10, 5, 5);
        let a = assemble(&forward, &targets).unwrap();
        let b = assemble(&reversed, &targets).unwrap();
        assert_eq!(a.to_csv().unwrap(), b.to_csv().unwrap());
    }

    #[test]
    fn exact_counts_per_category() {
        let targets = counts(40, 40, 10, 10);
        let store = assemble(&universe(80), &targets).unwrap();
        assert_eq!(store.len(), targets.total());
        for category in Category::ALL {
            let n = store.tasks().iter().filter(|t| t.category == category).count();
            assert_eq!(n, targets.get(category), "{category}");
        }
    }

    #[test]
    fn insufficient_filings_is_a_hard_stop() {
        let err = assemble(&universe(3), &counts(1, 1, 1, 5)).unwrap_err();
        match err {
            PipelineError::InsufficientFilings {
                category,
                needed,
                available,
            } => {
                assert_eq!(category, Category::CPeer);
                assert_eq!(needed, 5);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn yoy_requires_two_distinct_periods() {
        let mut filings = vec![filing(1, 2024)];
        let mut same_period = filing(1, 2024);
        same_period.accession_id = "0000000001-24-000002".into();
        same_period.filed_date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        filings.push(same_period);

        let err = assemble(&filings, &counts(0, 0, 1, 0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientFilings { category: Category::CYoY, available: 0, .. }
        ));
    }

    #[test]
    fn duplicate_accessions_count_once() {
        let mut filings = universe(1);
        filings.extend(universe(1));
        let err = assemble(&filings, &counts(3, 0, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientFilings { category: Category::A, available: 1, .. }
        ));
    }

    #[test]
    fn filenames_are_unique_and_reproducible() {
        let targets = counts(10, 10, 5, 5);
        let first = assemble(&universe(30), &targets).unwrap();
        let second = assemble(&universe(30), &targets).unwrap();

        let names = |store: &TaskStore| -> Vec<String> {
            store
                .tasks()
                .iter()
                .flat_map(|t| [Slot::One, Slot::Two].into_iter().filter_map(|s| t.artifact_filename(s)))
                .collect()
        };

        let a = names(&first);
        let unique: HashSet<&String> = a.iter().collect();
        assert_eq!(unique.len(), a.len());
        assert_eq!(a, names(&second));
    }

    #[test]
    fn task_ids_follow_category_order() {
        let store = assemble(&universe(3), &counts(1, 1, 1, 1)).unwrap();
        let ids: Vec<&str> = store.tasks().iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["A_01", "B_01", "C_YOY_01", "C_PEER_01"]);
    }

    #[test]
    fn peers_prefer_same_sector() {
        let mut filings = universe(4);
        for f in &mut filings {
            let n: u32 = f.company_id.parse().unwrap();
            f.sector = if n % 2 == 1 { "Energy" } else { "Utilities" }.into();
        }

        let store = assemble(&filings, &counts(0, 0, 0, 2)).unwrap();
        for task in store.tasks() {
            let (p1, p2) = (task.slot_1.filing.as_ref().unwrap(), task.slot_2.filing.as_ref().unwrap());
            assert_eq!(p1.sector, p2.sector, "{}", task.task_id);
            assert_ne!(p1.company_id, p2.company_id);
        }
    }

    #[test]
    fn leftover_peers_pair_across_sectors() {
        let mut filings = universe(2);
        filings[0].sector = "Energy".into();
        filings[1].sector = "Energy".into();
        filings[2].sector = "Utilities".into();
        filings[3].sector = "Utilities".into();

        let store = assemble(&filings, &counts(0, 0, 0, 1)).unwrap();
        let task = &store.tasks()[0];
        let (p1, p2) = (task.slot_1.filing.as_ref().unwrap(), task.slot_2.filing.as_ref().unwrap());
        assert_ne!(p1.sector, p2.sector);
        assert_eq!(p1.fiscal_period, "2023");
    }
}
