//! Small helpers shared across crates.
//!
//! - **[`serde`]**: duration (de)serializers used by configuration types

pub mod serde;

pub use self::serde::duration_millis;
