//! Finalizer: guarantees every required task slot has a local, checksummed artifact.
//!
//! Jobs (one per required slot, in store order) run through an ordered
//! buffered stream so at most `concurrency` renders are in flight, while
//! results are applied to the Task Store by this function alone, in store
//! order. The store is saved after every change, so an interrupted run loses
//! at most the slots that were in flight.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::checksum::{file_sha256, sha256_hex};
use crate::error::{PipelineError, Result};
use crate::ledger::{FailureLedger, FailureRecord};
use crate::model::{Slot, TaskId};
use crate::render::{DocumentRenderer, RenderFailure};
use crate::store::{TaskField, TaskStore};

/// Ledger reason for a required slot with no document URL.
pub const MISSING_URL: &str = "missing_url";
/// Ledger reason for a rendered artifact that could not be written.
pub const WRITE_ERROR: &str = "write_error";

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Base delay after `FetchBlocked`; upstream rate limits need a longer pause.
    pub blocked_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            blocked_delay: Duration::from_secs(10),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            blocked_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Pause before the attempt after `attempt` (1-based) failed:
    /// base * 2^(attempt-1) plus jitter.
    pub fn delay_for(&self, attempt: u32, failure: &RenderFailure) -> Duration {
        let base = if failure.is_blocked() {
            self.blocked_delay
        } else {
            self.base_delay
        };
        let backoff = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Per-slot render state. Terminal states are `Succeeded` and `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    NotStarted,
    Attempting(u32),
    Succeeded { bytes: Vec<u8>, attempts: u32 },
    Failed { attempts: u32, last: RenderFailure },
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Succeeded { .. } | SlotState::Failed { .. })
    }
}

/// Drive one slot from `NotStarted` to a terminal state.
pub async fn render_with_retry(
    renderer: &dyn DocumentRenderer,
    url: &str,
    policy: &RetryPolicy,
) -> SlotState {
    let max_attempts = policy.max_attempts.max(1);
    let mut state = SlotState::NotStarted;
    loop {
        state = match state {
            SlotState::NotStarted => SlotState::Attempting(1),
            SlotState::Attempting(n) => match renderer.render(url).await {
                Ok(bytes) => SlotState::Succeeded { bytes, attempts: n },
                Err(failure) if n < max_attempts => {
                    let delay = policy.delay_for(n, &failure);
                    warn!(
                        url,
                        attempt = n,
                        reason = failure.reason(),
                        error = %failure,
                        delay_ms = delay.as_millis() as u64,
                        "Render attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    SlotState::Attempting(n + 1)
                }
                Err(failure) => SlotState::Failed {
                    attempts: n,
                    last: failure,
                },
            },
            terminal => return terminal,
        };
    }
}

// ---------------------------------------------------------------------------
// Options & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, TypedBuilder)]
pub struct FinalizeOptions {
    /// Where the Task Store is saved after each change.
    #[builder(setter(into))]
    pub store_path: PathBuf,
    #[builder(setter(into))]
    pub out_dir: PathBuf,
    #[builder(setter(into))]
    pub ledger_path: PathBuf,
    /// Trust artifacts already on disk once their checksum is verified.
    #[builder(default)]
    pub only_missing: bool,
    /// Re-render even when an artifact already exists.
    #[builder(default)]
    pub overwrite: bool,
    #[builder(default = 2)]
    pub concurrency: usize,
    #[builder(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub slots: usize,
    pub rendered: usize,
    pub verified: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub mismatches: usize,
    pub render_attempts: u32,
    pub incomplete_tasks: usize,
}

impl FinalizeReport {
    /// Every task is COMPLETE or LINKED and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.incomplete_tasks == 0
    }

    /// Persist the run summary as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Finalize report saved");
        Ok(())
    }
}

impl fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Finalize Complete ===")?;
        writeln!(f, "Slots checked:      {}", self.slots)?;
        writeln!(f, "Rendered:           {}", self.rendered)?;
        writeln!(f, "Verified on disk:   {}", self.verified)?;
        writeln!(f, "Unchanged:          {}", self.unchanged)?;
        writeln!(f, "Failed:             {}", self.failed)?;
        writeln!(f, "Checksum mismatches:{}", self.mismatches)?;
        writeln!(f, "Render attempts:    {}", self.render_attempts)?;
        writeln!(f, "Incomplete tasks:   {}", self.incomplete_tasks)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

struct SlotJob {
    task_id: TaskId,
    slot: Slot,
    url: Option<String>,
    filename: Option<String>,
    recorded_filename: Option<String>,
    recorded_checksum: Option<String>,
}

enum Outcome {
    Unchanged,
    Verified { filename: String, checksum: String },
    Rendered { filename: String, checksum: String },
    Failed { reason: String, last_error: String },
}

struct SlotResult {
    task_id: TaskId,
    slot: Slot,
    outcome: Outcome,
    attempts: u32,
    /// The recorded artifact no longer matched the file on disk.
    mismatch: bool,
    /// No readable file backs the slot's artifact fields.
    artifact_missing: bool,
}

fn plan_jobs(store: &TaskStore) -> Vec<SlotJob> {
    let mut jobs = Vec::new();
    for task in store.tasks() {
        for &slot in task.required_slots() {
            let fields = task.slot(slot);
            jobs.push(SlotJob {
                task_id: task.task_id.clone(),
                slot,
                url: fields
                    .filing
                    .as_ref()
                    .map(|f| f.document_url.trim().to_string())
                    .filter(|u| !u.is_empty()),
                filename: task.artifact_filename(slot),
                recorded_filename: fields.artifact_filename.clone(),
                recorded_checksum: fields.checksum.clone(),
            });
        }
    }
    jobs
}

async fn process(
    job: SlotJob,
    renderer: &dyn DocumentRenderer,
    options: &FinalizeOptions,
) -> SlotResult {
    let mut result = SlotResult {
        task_id: job.task_id.clone(),
        slot: job.slot,
        outcome: Outcome::Unchanged,
        attempts: 0,
        mismatch: false,
        artifact_missing: false,
    };

    let (Some(url), Some(filename)) = (job.url, job.filename) else {
        result.outcome = Outcome::Failed {
            reason: MISSING_URL.to_string(),
            last_error: "slot has no document URL".to_string(),
        };
        return result;
    };
    let path = options.out_dir.join(&filename);
    result.artifact_missing = !path.exists();

    if options.only_missing && !options.overwrite && path.exists() {
        match file_sha256(&path).await {
            Ok(actual) => match job.recorded_checksum {
                None => {
                    debug!(task_id = %job.task_id, slot = %job.slot, "Recording checksum of existing artifact");
                    result.outcome = Outcome::Verified { filename, checksum: actual };
                    return result;
                }
                Some(recorded) if recorded == actual => {
                    result.outcome = if job.recorded_filename.as_deref() == Some(filename.as_str()) {
                        Outcome::Unchanged
                    } else {
                        Outcome::Verified { filename, checksum: actual }
                    };
                    return result;
                }
                Some(recorded) => {
                    let mismatch = PipelineError::ChecksumMismatch {
                        filename: filename.clone(),
                        recorded,
                        actual,
                    };
                    warn!(task_id = %job.task_id, slot = %job.slot, error = %mismatch, "Artifact changed on disk, re-rendering");
                    result.mismatch = true;
                }
            },
            Err(e) => {
                result.artifact_missing = true;
                warn!(task_id = %job.task_id, path = %path.display(), error = %e, "Could not read existing artifact, re-rendering");
            }
        }
    }

    info!(task_id = %job.task_id, slot = %job.slot, url = %url, "Rendering artifact");
    match render_with_retry(renderer, &url, &options.retry).await {
        SlotState::Succeeded { bytes, attempts } => {
            result.attempts = attempts;
            let checksum = sha256_hex(&bytes);
            result.outcome = match write_artifact(&path, &bytes).await {
                Ok(()) => {
                    info!(task_id = %job.task_id, slot = %job.slot, bytes = bytes.len(), attempts, "Artifact written");
                    Outcome::Rendered { filename, checksum }
                }
                Err(e) => Outcome::Failed {
                    reason: WRITE_ERROR.to_string(),
                    last_error: e.to_string(),
                },
            };
        }
        SlotState::Failed { attempts, last } => {
            result.attempts = attempts;
            result.outcome = Outcome::Failed {
                reason: last.reason().to_string(),
                last_error: last.to_string(),
            };
        }
        // render_with_retry only returns terminal states
        SlotState::NotStarted | SlotState::Attempting(_) => {}
    }
    result
}

/// Write to a sibling temp file, then rename into place.
async fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.part"));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

// ---------------------------------------------------------------------------
// finalize
// ---------------------------------------------------------------------------

/// Bring every required slot of `store` to filename+checksum, or record why not.
pub async fn finalize(
    store: &mut TaskStore,
    renderer: &dyn DocumentRenderer,
    options: &FinalizeOptions,
) -> Result<FinalizeReport> {
    tokio::fs::create_dir_all(&options.out_dir).await?;
    let ledger = FailureLedger::new(&options.ledger_path);

    let jobs = plan_jobs(store);
    let mut report = FinalizeReport {
        slots: jobs.len(),
        ..Default::default()
    };
    info!(
        tasks = store.len(),
        slots = jobs.len(),
        only_missing = options.only_missing,
        overwrite = options.overwrite,
        concurrency = options.concurrency,
        "Starting finalize"
    );

    let mut results = stream::iter(jobs)
        .map(|job| process(job, renderer, options))
        .buffered(options.concurrency.max(1));

    let mut saved_revision = store.revision();
    while let Some(result) = results.next().await {
        apply(store, &ledger, &mut report, result)?;
        if store.revision() != saved_revision {
            store.save(&options.store_path)?;
            saved_revision = store.revision();
        }
    }

    store.save(&options.store_path)?;
    report.incomplete_tasks = store.tasks().iter().filter(|t| !t.status().is_done()).count();

    info!(
        rendered = report.rendered,
        verified = report.verified,
        unchanged = report.unchanged,
        failed = report.failed,
        mismatches = report.mismatches,
        incomplete_tasks = report.incomplete_tasks,
        "Finalize finished"
    );
    Ok(report)
}

fn apply(
    store: &mut TaskStore,
    ledger: &FailureLedger,
    report: &mut FinalizeReport,
    result: SlotResult,
) -> Result<()> {
    let SlotResult {
        task_id,
        slot,
        outcome,
        attempts,
        mismatch,
        artifact_missing,
    } = result;
    report.render_attempts += attempts;
    if mismatch {
        report.mismatches += 1;
    }

    match outcome {
        Outcome::Unchanged => report.unchanged += 1,
        Outcome::Verified { filename, checksum } => {
            store.update(&task_id, TaskField::ArtifactFilename(slot), Some(filename))?;
            store.update(&task_id, TaskField::Checksum(slot), Some(checksum))?;
            report.verified += 1;
        }
        Outcome::Rendered { filename, checksum } => {
            store.update(&task_id, TaskField::ArtifactFilename(slot), Some(filename))?;
            store.update(&task_id, TaskField::Checksum(slot), Some(checksum))?;
            report.rendered += 1;
        }
        Outcome::Failed { reason, last_error } => {
            if mismatch || artifact_missing {
                store.update(&task_id, TaskField::ArtifactFilename(slot), None)?;
                store.update(&task_id, TaskField::Checksum(slot), None)?;
            }
            warn!(task_id = %task_id, slot = %slot, reason = %reason, attempts, error = %last_error, "Slot failed");
            ledger.append(&[FailureRecord::new(
                task_id,
                slot,
                &reason,
                attempts,
                last_error,
                Utc::now(),
            )])?;
            report.failed += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DocumentRenderer for Flaky {
        async fn render(&self, _url: &str) -> std::result::Result<Vec<u8>, RenderFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(RenderFailure::RenderTimeout("slow".into()))
            } else {
                Ok(b"%PDF".to_vec())
            }
        }
    }

    #[tokio::test]
    async fn retry_succeeds_within_budget() {
        let renderer = Flaky {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let state = render_with_retry(&renderer, "https://x", &RetryPolicy::immediate(3)).await;
        assert_eq!(
            state,
            SlotState::Succeeded {
                bytes: b"%PDF".to_vec(),
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn retry_stops_at_max_attempts() {
        let renderer = Flaky {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        };
        let state = render_with_retry(&renderer, "https://x", &RetryPolicy::immediate(3)).await;
        assert!(state.is_terminal());
        match state {
            SlotState::Failed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.reason(), "render_timeout");
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn blocked_failures_back_off_longer() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            blocked_delay: Duration::from_millis(1000),
            max_jitter: Duration::ZERO,
        };
        let timeout = RenderFailure::RenderTimeout("t".into());
        let blocked = RenderFailure::FetchBlocked { reason: "429".into() };

        assert_eq!(policy.delay_for(1, &timeout), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &timeout), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2, &blocked), Duration::from_millis(2000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(50),
            ..RetryPolicy::immediate(3)
        };
        let failure = RenderFailure::RenderError { cause: "x".into() };
        for _ in 0..20 {
            assert!(policy.delay_for(1, &failure) <= Duration::from_millis(50));
        }
    }
}
