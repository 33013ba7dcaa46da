//! Rill Runtime - Component composition and page lifecycle
//!
//! This crate ties the lower layers together:
//! - The runtime context handle and its global-store registry (runtime)
//! - Configuration and logging setup (config, logging)
//! - Background state discovery (discovery)
//! - The component contract and its live context (logic, context, view)
//! - Parent/child and global wiring (connector, dependant)
//! - Pages and host lifecycle translation (page)

pub mod config;
pub mod logging;
pub mod discovery;
pub mod runtime;
pub mod view;
pub mod logic;
pub mod context;
pub mod connector;
pub mod dependant;
pub mod page;

pub use config::*;
pub use logging::*;
pub use discovery::*;
pub use runtime::*;
pub use view::*;
pub use logic::*;
pub use context::*;
pub use connector::*;
pub use dependant::*;
pub use page::*;
