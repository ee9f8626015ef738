pub mod checksum;
pub mod config;
pub mod error;
pub mod finalize;
pub mod index;
pub mod ledger;
pub mod listing;
pub mod model;
pub mod pairer;
pub mod render;
pub mod store;
pub mod task;

pub use error::{PipelineError, Result};
pub use finalize::{finalize, FinalizeOptions, FinalizeReport, RetryPolicy, SlotState};
pub use index::{build_index, EdgarFilingSource, FilingSource, FilingStream, IndexOutcome, IndexRequest};
pub use ledger::{FailureLedger, FailureRecord};
pub use model::{Category, Company, FilingRecord, Slot, TaskId, TaskIdSequence};
pub use pairer::{assemble, TargetCounts};
pub use render::{BrowserlessRenderer, DocumentRenderer, RenderFailure};
pub use store::{TaskField, TaskStore};
pub use task::{Task, TaskSlot, TaskStatus};
