//! Testing utilities and fixtures
//!
//! Scripted collaborators and a manual clock so orchestrator runs can be
//! driven deterministically, without a grid account or real delays.

pub mod clock;
pub mod fixtures;
pub mod mocks;

pub use clock::ManualClock;
pub use fixtures::*;
pub use mocks::{MockBlobTransfer, MockComputeGrid};
