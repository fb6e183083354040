//! Undo/redo history.
//!
//! Rapid multi-item adds (a drop or paste of several images) are grouped into
//! one undoable entry through batches. A batch commits as soon as its expected
//! number of items has been recorded, or when its timeout fires, whichever
//! comes first. Removals and transforms are pushed whole.

mod action;
mod manager;
mod transform;

pub use action::{Action, ActionKind};
pub use manager::{
    capture_removal, BatchStatus, HistoryConfig, HistoryManager, HistoryOutcome, RecordOutcome,
    ReplayReport, DEFAULT_BATCH_TIMEOUT, DEFAULT_HISTORY_LIMIT,
};
pub use transform::TransformTracker;
