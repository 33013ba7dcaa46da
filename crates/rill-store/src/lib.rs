//! Rill Store - Stores and the dispatch pipeline
//!
//! - Writer-thread affinity and the dispatch gate (writer)
//! - Observer bookkeeping shared by every store (store)
//! - Reducer registration and combination (reducer)
//! - Middleware around page dispatch (middleware)
//! - Per-page stores (page_store)
//! - Process-wide global stores (global_store)

pub mod writer;
pub mod store;
pub mod reducer;
pub mod middleware;
pub mod page_store;
pub mod global_store;

pub use writer::*;
pub use store::*;
pub use reducer::*;
pub use middleware::*;
pub use page_store::*;
pub use global_store::*;
