//! plr - Power loss recovery for long-running print jobs.
//!
//! ## Architecture
//!
//! plr keeps a rolling history of machine snapshots while a job runs and
//! persists one that the machine has provably executed:
//! - **Collector**: Reads every provider against one instant
//! - **Validator**: Shape, type and range checks, on capture and before persist
//! - **History Buffer**: Bounded FIFO of valid snapshots
//! - **Delay Selector**: Picks how far back to reach from the measured lag
//! - **Scheduler**: Adaptive-interval and event-driven saves on one task
//!
//! ## Resume
//!
//! - **Rewriter**: Splices a new job file from the saved byte offset behind a
//!   restoration preamble, with a rollback guard around the backup/swap
//! - **Recovery**: Starts the resume job, calibrates Z, restores fans,
//!   offsets, tool and chamber heat
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Provider and storage uncertainties (absorb, back off, retry)

pub mod checkpoint;
pub mod models;
pub mod providers;
pub mod recovery;
pub mod scheduler;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, FileStore, HistoryBuffer, KeyValueStore, SnapshotValidator};
pub use models::{Config, PersistedCheckpoint, PlrError, Result, Snapshot, ValidationError};
pub use providers::{CommandExecutor, Providers, SnapshotCollector, StdoutExecutor};
pub use recovery::{Recovery, ResumeRewriter, ZHomeMode};
pub use scheduler::{CheckpointScheduler, SchedulerEvent, SchedulerHandle, StatusReport};
