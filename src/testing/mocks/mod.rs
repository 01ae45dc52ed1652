//! Mock implementations of the remote capabilities

pub mod blob;
pub mod grid;

pub use blob::{MockBlobTransfer, RecordedUpload};
pub use grid::MockComputeGrid;
