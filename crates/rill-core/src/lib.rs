//! Rill Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every rill crate:
//! - Identifiers (PropId, ContainerToken, StoreId, BusId)
//! - Type-erased values and actions
//! - Lifecycle and inner action types
//! - Disposers and effect collection
//! - The error taxonomy

pub mod id;
pub mod value;
pub mod action;
pub mod lifecycle;
pub mod dispose;
pub mod effect;
pub mod error;

pub use id::*;
pub use value::*;
pub use action::*;
pub use lifecycle::{LifecycleEvent, is_lifecycle};
pub use dispose::*;
pub use effect::*;
pub use error::*;
