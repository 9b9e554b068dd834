//! Shared test utilities for docvault integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution with temp directories
//! - Builders for records that reference files in the harness data dir

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
