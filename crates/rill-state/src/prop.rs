//! Typed property handles

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use rill_core::{PropId, RillResult};

use crate::PropGraph;

/// Handle to one reactive property of type `T`.
///
/// Handles are plain ids: copying one never copies the value, and the
/// arena checks the stored type on every access.
pub struct Prop<T> {
    id: PropId,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Prop<T> {
    pub(crate) fn new(id: PropId, key: &'static str) -> Self {
        Prop {
            id,
            key,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> PropId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &'static str {
        self.key
    }
}

impl<T: Any + Clone> Prop<T> {
    pub fn get(&self, graph: &PropGraph) -> RillResult<T> {
        graph.get::<T>(self.id)
    }
}

impl<T> Clone for Prop<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Prop<T> {}

impl<T> PartialEq for Prop<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Prop<T> {}

impl<T> fmt::Debug for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prop({}, {:?})", self.key, self.id)
    }
}
