//! Bounded collections.
//!
//! - **[`ring_buffer`]**: fixed-capacity FIFO that evicts the oldest item

pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
