use std::collections::HashSet;

use chrono::NaiveDate;
use filing_tasks::listing::{read_listings, write_listing};
use filing_tasks::{assemble, Category, FilingRecord, PipelineError, Slot, TaskStatus, TaskStore, TargetCounts};

fn filing(company: u32, year: i32, period: &str) -> FilingRecord {
    FilingRecord {
        company_id: format!("{company:010}"),
        ticker: format!("T{company}"),
        display_name: format!("Company {company}, Inc."),
        sector: "Energy".into(),
        form_type: "10-K".into(),
        filed_date: NaiveDate::from_ymd_opt(year, 2, 15).unwrap(),
        fiscal_period: period.into(),
        document_url: format!("https://www.sec.gov/Archives/edgar/data/{company}/{year}/form10k.htm"),
        index_url: format!("https://www.sec.gov/Archives/edgar/data/{company}/{year}/index.html"),
        accession_id: format!("{company:010}-{}-000042", year % 100),
    }
}

#[test]
fn listings_to_store_on_disk() {
    let dir = tempfile::tempdir().unwrap();

    // Two listings overlapping on company 3.
    let first: Vec<FilingRecord> = (1..=3)
        .flat_map(|c| [filing(c, 2025, "2024"), filing(c, 2024, "2023")])
        .collect();
    let second: Vec<FilingRecord> = (3..=5)
        .flat_map(|c| [filing(c, 2025, "2024"), filing(c, 2024, "2023")])
        .collect();
    let a = dir.path().join("listing_a.csv");
    let b = dir.path().join("listing_b.csv");
    write_listing(&a, &first).unwrap();
    write_listing(&b, &second).unwrap();

    let filings = read_listings(vec![a, b].as_slice()).unwrap();
    let targets = TargetCounts {
        a: 3,
        b: 2,
        c_yoy: 1,
        c_peer: 1,
    };
    let store = assemble(&filings, &targets).unwrap();
    let path = dir.path().join("tasks.csv");
    store.save(&path).unwrap();

    let loaded = TaskStore::load(&path).unwrap();
    assert_eq!(loaded.len(), 7);
    assert!(loaded.tasks().iter().all(|t| t.status() == TaskStatus::Pending));

    let mut used = HashSet::new();
    let mut names = HashSet::new();
    for task in loaded.tasks() {
        for &slot in task.required_slots() {
            let f = task.slot(slot).filing.as_ref().unwrap();
            assert!(used.insert(f.accession_id.clone()));
            assert!(names.insert(task.artifact_filename(slot).unwrap()));
        }
        if task.category == Category::CPeer {
            let (x, y) = (
                task.slot(Slot::One).filing.as_ref().unwrap(),
                task.slot(Slot::Two).filing.as_ref().unwrap(),
            );
            assert_ne!(x.company_id, y.company_id);
            assert_eq!(x.fiscal_period, y.fiscal_period);
        }
    }
    assert_eq!(used.len(), 3 + 2 + 2 + 2);
}

#[test]
fn same_input_same_bytes() {
    let filings: Vec<FilingRecord> = (1..=12)
        .flat_map(|c| [filing(c, 2025, "2024"), filing(c, 2024, "2023")])
        .collect();
    let mut shuffled = filings.clone();
    shuffled.rotate_left(7);

    let targets = TargetCounts {
        a: 4,
        b: 4,
        c_yoy: 2,
        c_peer: 3,
    };
    let first = assemble(&filings, &targets).unwrap().to_csv().unwrap();
    let second = assemble(&shuffled, &targets).unwrap().to_csv().unwrap();
    assert_eq!(first, second);
}

#[test]
fn short_category_writes_nothing() {
    let filings = vec![filing(1, 2025, "2024"), filing(2, 2025, "2024")];
    let targets = TargetCounts {
        a: 1,
        b: 0,
        c_yoy: 1,
        c_peer: 0,
    };
    match assemble(&filings, &targets) {
        Err(PipelineError::InsufficientFilings {
            category,
            needed,
            available,
        }) => {
            assert_eq!(category, Category::CYoY);
            assert_eq!((needed, available), (1, 0));
        }
        other => panic!("expected InsufficientFilings, got {other:?}"),
    }
}
