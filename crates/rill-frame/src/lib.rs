//! Rill Frame - Paint-tick sources and update scheduling
//!
//! - Frame sources driven by the host (clock)
//! - The frame-aligned, coalescing update scheduler (scheduler)

pub mod clock;
pub mod scheduler;

pub use clock::*;
pub use scheduler::*;
