//! Rill Bus - Effect message routing
//!
//! - The bus tree: one root, one node per page (bus)
//! - Per-page action interception (interceptor)

pub mod bus;
pub mod interceptor;

pub use bus::*;
pub use interceptor::*;
