//! Shared storage integration tests.
//!
//! Tests the OutboxStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod outbox_store_tests;
