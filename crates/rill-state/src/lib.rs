//! Rill State - Reactive property graph
//!
//! This crate holds the data side of the runtime:
//! - The property arena with parent/child edges (graph)
//! - Typed handles and explicit key registration (prop, builder)
//! - Write sessions and change collection (writer, proxy)
//! - Read-only copies (snapshot)
//! - Merge-window scoped dependency declaration (merge)

pub mod graph;
pub mod prop;
pub mod builder;
pub mod proxy;
pub mod writer;
pub mod snapshot;
pub mod merge;

pub use graph::*;
pub use prop::*;
pub use builder::*;
pub use proxy::*;
pub use writer::*;
pub use snapshot::*;
pub use merge::*;
