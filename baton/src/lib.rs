//! Bounded blocking hand-off of values between threads.
//!
//! The crate is built around [`sync::RingBuffer`], a fixed-capacity FIFO
//! that lives in storage the caller provides. Producers block while it is
//! full, consumers block while it is empty, and a one-shot interrupt lets a
//! shutdown path release a blocked consumer without tearing anything down.

mod ring;
pub mod sync;
pub mod trace;

pub use trace::init_tracing;
