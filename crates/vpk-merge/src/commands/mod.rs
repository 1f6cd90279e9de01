mod merge;
mod undo;

pub use merge::{run_merge, RunMergeArgs};
pub use undo::{run_undo, RunUndoArgs};
