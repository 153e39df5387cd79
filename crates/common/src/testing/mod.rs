//! Helpers for exercising policies in tests.
//!
//! - [`TestError`]: classifiable error with a configurable retry flag
//! - [`FlakyOperation`]: fails a set number of times, then succeeds
//! - [`MockClock`]: manually advanced clock

pub mod operations;

pub use operations::{FlakyOperation, TestError};

pub use crate::clock::{Clock, MockClock, SystemClock};
