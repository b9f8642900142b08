//! Checkpoint module: the capture-side building blocks.
//!
//! Provides:
//! - `SnapshotValidator`: Shape, type and range checks for snapshots
//! - `HistoryBuffer`: Bounded FIFO of validated snapshots
//! - `DelaySelector`: Picks the history index that is safe to persist
//! - `adaptive_interval`: Next checkpoint wait from recent activity
//! - `CheckpointStore`: Durable slot for the persisted checkpoint

mod delay;
mod history;
mod interval;
mod store;
mod validator;

pub use delay::*;
pub use history::*;
pub use interval::*;
pub use store::*;
pub use validator::*;
