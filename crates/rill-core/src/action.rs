//! Actions - messages describing intent plus an optional payload
//!
//! An action travels either through the reducer channel (state
//! mutation) or the effect channel (side effects, bus routing). Its
//! visibility decides whether it may cross component scope directly.

use std::any::Any;
use std::fmt;

use crate::Value;

/// Action type - a static name used as the routing key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionType(&'static str);

impl ActionType {
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        ActionType(name)
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Private actions may be sent directly to a declared parent or child.
/// Public actions only travel through the store, the interceptor
/// manager, or a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

#[derive(Clone)]
pub struct Action {
    kind: ActionType,
    payload: Option<Value>,
    visibility: Visibility,
}

impl Action {
    /// Public action without payload
    pub fn new(kind: ActionType) -> Self {
        Action {
            kind,
            payload: None,
            visibility: Visibility::Public,
        }
    }

    /// Private action without payload
    pub fn private(kind: ActionType) -> Self {
        Action {
            kind,
            payload: None,
            visibility: Visibility::Private,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Value::new(payload));
        self
    }

    pub fn with_value(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn into_private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    #[inline]
    pub fn kind(&self) -> ActionType {
        self.kind
    }

    #[inline]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        self.visibility == Visibility::Private
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn raw_payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind.name())
            .field("visibility", &self.visibility)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Action types reserved by the runtime itself
pub mod inner {
    use super::ActionType;

    /// Wraps an effect action routed through a page's interceptor manager
    pub const INTERCEPT: ActionType = ActionType::new("rill.inner.intercept");
    /// Installs extra dependants into a live page
    pub const INSTALL_EXTRA: ActionType = ActionType::new("rill.inner.install_extra");

    pub fn is_inner(kind: ActionType) -> bool {
        kind.name().starts_with("rill.inner.")
    }
}
