//! Shared utilities for catapult integration tests.
//!
//! `TestHarness` owns a temporary watch location backed by an on-disk
//! catalog, so several handles can share it the way separate processes do.

pub mod harness;

pub use harness::TestHarness;
