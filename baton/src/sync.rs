//! Blocking primitives for in-process hand-off between threads.
//!
//! - [`RingBuffer`] - bounded FIFO over caller-supplied storage, with
//!   cooperative cancellation of blocked consumers

mod ring_buffer;

pub use ring_buffer::{CapacityError, DequeueError, RingBuffer, Timeout};
