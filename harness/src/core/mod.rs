//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod actions;
pub mod budget;
pub mod codec;
pub mod generation;
pub mod messages;
pub mod observation;
pub mod plan;
pub mod scoring;
pub mod task;
pub mod tracker;
