//! View-module contract
//!
//! The UI binding layer is external. It supplies a [`ViewModule`] per
//! component, which the runtime calls only from a scheduler tick:
//! `render` once, then the update functions of every binding whose
//! probed properties changed.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rill_core::{PropId, RillResult, Value};
use rill_state::{State, StateSnapshot};

use crate::ComponentContext;

/// Opaque result of a render
#[derive(Clone)]
pub struct ViewHandle(Value);

impl ViewHandle {
    pub fn new<T: Any + Send + Sync>(view: T) -> Self {
        ViewHandle(Value::new(view))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewHandle({})", self.0.type_name())
    }
}

pub type ViewUpdate = Arc<dyn Fn(&StateSnapshot) + Send + Sync>;

/// One (probe, update) pair
#[derive(Clone)]
pub struct ViewBinding {
    pub probe: Vec<PropId>,
    pub update: ViewUpdate,
}

impl ViewBinding {
    pub fn new<F>(probe: Vec<PropId>, update: F) -> Self
    where
        F: Fn(&StateSnapshot) + Send + Sync + 'static,
    {
        ViewBinding {
            probe,
            update: Arc::new(update),
        }
    }

    pub fn touches(&self, changed: &[PropId]) -> bool {
        self.probe.iter().any(|p| changed.contains(p))
    }
}

impl fmt::Debug for ViewBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewBinding").field("probe", &self.probe).finish()
    }
}

pub trait ViewModule<S: State>: Send + Sync {
    fn render(&self, ctx: &ComponentContext<S>) -> RillResult<ViewHandle>;

    fn declare_dependencies(&self, state: &S) -> Vec<ViewBinding>;
}
