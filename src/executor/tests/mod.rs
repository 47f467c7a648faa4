//! Tests for the executor
//!
//! Organized by feature area

mod guard_tests;
mod helpers;
