//! Write sessions
//!
//! A [`StateWriter`] is the live proxy handed to reducers and pure
//! update functions. Opening one claims the system-wide write session
//! for its container; [`finish`](StateWriter::finish) releases it and
//! partitions what was written.

use std::any::Any;

use rill_core::{ContainerToken, RillError, RillResult, Value};

use crate::{ChangeSet, Prop, SharedGraph, StateProxy};

pub struct StateWriter {
    graph: SharedGraph,
    container: ContainerToken,
    proxy: StateProxy,
    open: bool,
}

impl StateWriter {
    pub fn open(graph: &SharedGraph, container: ContainerToken) -> RillResult<Self> {
        graph.lock().open_session(container)?;
        Ok(StateWriter {
            graph: graph.clone(),
            container,
            proxy: StateProxy::new(),
            open: true,
        })
    }

    pub fn container(&self) -> ContainerToken {
        self.container
    }

    pub fn get<T: Any + Clone>(&self, prop: &Prop<T>) -> RillResult<T> {
        self.graph.lock().get::<T>(prop.id())
    }

    pub fn set<T: Any + Send + Sync>(&mut self, prop: &Prop<T>, value: T) -> RillResult<()> {
        self.graph.lock().write(prop.id(), Value::new(value))?;
        self.proxy.record(prop.id());
        Ok(())
    }

    /// Read-modify-write of one property
    pub fn modify<T, F>(&mut self, prop: &Prop<T>, f: F) -> RillResult<()>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(&mut T),
    {
        let mut value = self.get(prop)?;
        f(&mut value);
        self.set(prop, value)
    }

    /// Keyed write for callers without a typed handle
    pub fn set_key(&mut self, key: &str, value: Value) -> RillResult<()> {
        let mut graph = self.graph.lock();
        let id = graph.find(self.container, key).ok_or_else(|| RillError::UnknownKey {
            key: key.to_string(),
            container: self.container,
        })?;
        graph.write(id, value)?;
        drop(graph);
        self.proxy.record(id);
        Ok(())
    }

    /// Number of writes recorded so far
    pub fn pending(&self) -> usize {
        self.proxy.len()
    }

    /// Closes the session and partitions the recorded writes.
    pub fn finish(mut self) -> ChangeSet {
        let mut graph = self.graph.lock();
        let private = self.proxy.take_private(&graph);
        let public = self.proxy.public_changes(&graph);
        self.proxy.clear();
        graph.close_session(self.container);
        self.open = false;
        ChangeSet { private, public }
    }
}

impl Drop for StateWriter {
    fn drop(&mut self) {
        if self.open {
            self.graph.lock().close_session(self.container);
        }
    }
}
