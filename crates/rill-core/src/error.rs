//! Error types for the rill runtime

use thiserror::Error;

use crate::{ContainerToken, PropId, StoreId};

/// Core rill errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RillError {
    // Protocol violations
    #[error("Write to `{key}` outside an active state proxy")]
    WriteWithoutProxy { key: &'static str },

    #[error("Property `{key}` is sourced from a global store and cannot be written by its component")]
    MutateGlobalDependency { key: &'static str },

    #[error("Container {0} is outside its merge window")]
    MergeWindowClosed(ContainerToken),

    #[error("Action `{action}` must be private to cross component scope")]
    CrossScopeViolation { action: &'static str },

    #[error("A state proxy is already open for container {0}")]
    ProxyBusy(ContainerToken),

    // Graph errors
    #[error("Property not found: {0:?}")]
    PropNotFound(PropId),

    #[error("Container not found: {0:?}")]
    ContainerNotFound(ContainerToken),

    #[error("Duplicate property key `{key}` in container {container}")]
    DuplicateKey {
        key: &'static str,
        container: ContainerToken,
    },

    #[error("Unknown property key `{key}` in container {container}")]
    UnknownKey {
        key: String,
        container: ContainerToken,
    },

    #[error("Type mismatch on `{key}`: expected {expected}, found {found}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Container {container} already binds a property to `{key}`")]
    DuplicateBinding {
        key: &'static str,
        container: ContainerToken,
    },

    #[error("Invalid link from `{key}`: {reason}")]
    InvalidLink {
        key: &'static str,
        reason: &'static str,
    },

    // Lifecycle errors
    #[error("Store {0} has been destroyed")]
    StoreDestroyed(StoreId),

    #[error("Component is not installed: {0}")]
    NotInstalled(&'static str),

    #[error("View render failed: {0}")]
    RenderFailed(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error taxonomy used to decide how a failure is handled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Programmer error, raised immediately and never recovered locally
    Protocol,
    /// Fault in external code, contained at the call site
    Runtime,
    /// Teardown timing, absorbed and logged
    Scheduling,
    Configuration,
}

impl RillError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RillError::WriteWithoutProxy { .. }
            | RillError::MutateGlobalDependency { .. }
            | RillError::MergeWindowClosed(_)
            | RillError::CrossScopeViolation { .. }
            | RillError::ProxyBusy(_)
            | RillError::DuplicateKey { .. }
            | RillError::TypeMismatch { .. }
            | RillError::DuplicateBinding { .. }
            | RillError::InvalidLink { .. } => ErrorCategory::Protocol,
            RillError::RenderFailed(_) => ErrorCategory::Runtime,
            RillError::PropNotFound(_)
            | RillError::ContainerNotFound(_)
            | RillError::UnknownKey { .. }
            | RillError::StoreDestroyed(_)
            | RillError::NotInstalled(_) => ErrorCategory::Scheduling,
            RillError::Config(_) => ErrorCategory::Configuration,
        }
    }

    #[inline]
    pub fn is_protocol_violation(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }
}

/// Result type for rill operations
pub type RillResult<T> = Result<T, RillError>;
