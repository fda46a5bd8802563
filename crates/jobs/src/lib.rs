//! `genflow-jobs`: the generation job record, its state machine, and usage accounting.
//!
//! Pure domain code: callers pass timestamps in, nothing here reads a clock
//! or touches storage.

pub mod job;
pub mod usage;

pub use job::{Job, JobKind, JobOutcome, JobStatus, TransitionError};
pub use usage::{summarize, TenantUsage, Usage, UsageSummary, UsageTotals};
