//! Rill Test Harness - Fixtures for end-to-end runtime tests
//!
//! This crate provides:
//! - A runtime driven by a manual frame clock (harness)
//! - Recording views and thread-safe recorders (harness)
//! - Sample states, logics and connectors (fixtures)

pub mod harness;
pub mod fixtures;

pub use harness::*;
pub use fixtures::*;
