//! swarmgrid-scheduler: the job queue and its assignment protocol.
//!
//! Jobs enter as `Pending`, are handed to devices as `Assigned` (by pull,
//! push, or steal), and end as `Completed`. Every assignment carries a
//! hard expiry; overdue assignments are reclaimed by the reaper and the
//! job goes back to the queue.
//!
//! # Architecture
//!
//! ```text
//! WorkStealingScheduler
//!   ├── jobs: submission-ordered queue (first match per kind wins)
//!   ├── assignments: job_id → Assignment (device, expiry, retries)
//!   ├── failures: job_id → attempts (bounded retry)
//!   ├── steal_work() / steal_from() → move old assignments to idle devices
//!   ├── reap_expired() → expired assignments back to Pending
//!   └── events: Submitted / Assigned / Completed / Stolen / ... (drained)
//! ```
//!
//! # Delivery guarantee
//!
//! At-least-once. A late result for a job that was already reclaimed is
//! reported as `CompletionOutcome::Unknown` and changes nothing.

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{CompletionOutcome, SchedulerEvent, StolenJob, WorkStealingScheduler};
