//! Deterministic, pure logic for the workflow engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod protocol;
pub mod rules;
pub mod state;
pub mod template;
pub mod types;
