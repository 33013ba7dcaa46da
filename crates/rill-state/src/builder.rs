//! Explicit key registration and two-phase construction
//!
//! A state type lists its properties in [`State::declare`]. Declaring
//! runs without the arena (`prepare`), so it can happen on the
//! discovery worker; [`PreparedState::commit`] then installs the
//! container on the writer thread.

use std::any::Any;
use std::sync::Arc;

use rill_core::{ContainerToken, IdAllocator, PropId, RillError, RillResult, Value};

use crate::{ContainerKind, Prop, PropGraph};

/// A component, page or global state: a struct of [`Prop`] handles.
pub trait State: Send + Sync + 'static {
    fn declare(builder: &mut ContainerBuilder) -> Self
    where
        Self: Sized;
}

#[derive(Debug)]
pub struct PreparedProp {
    pub id: PropId,
    pub key: &'static str,
    pub value: Value,
    pub notify_initial: bool,
}

/// Key table of a container that has not been installed yet
#[derive(Debug)]
pub struct PreparedContainer {
    pub token: ContainerToken,
    pub kind: ContainerKind,
    pub name: &'static str,
    pub props: Vec<PreparedProp>,
    pub error: Option<RillError>,
}

pub struct ContainerBuilder {
    ids: Arc<IdAllocator>,
    token: ContainerToken,
    kind: ContainerKind,
    name: &'static str,
    props: Vec<PreparedProp>,
    error: Option<RillError>,
}

impl ContainerBuilder {
    pub fn new(ids: Arc<IdAllocator>, kind: ContainerKind, name: &'static str) -> Self {
        let token = ids.next_container();
        ContainerBuilder {
            ids,
            token,
            kind,
            name,
            props: Vec::new(),
            error: None,
        }
    }

    pub fn token(&self) -> ContainerToken {
        self.token
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Logic property: not pushed to the view on first render
    pub fn prop<T: Any + Send + Sync>(&mut self, key: &'static str, initial: T) -> Prop<T> {
        self.push(key, initial, false)
    }

    /// UI property: its initial value is pushed on first render
    pub fn ui_prop<T: Any + Send + Sync>(&mut self, key: &'static str, initial: T) -> Prop<T> {
        self.push(key, initial, true)
    }

    fn push<T: Any + Send + Sync>(&mut self, key: &'static str, initial: T, notify_initial: bool) -> Prop<T> {
        let id = self.ids.next_prop();
        if self.props.iter().any(|p| p.key == key) {
            // first error wins; surfaced by commit
            if self.error.is_none() {
                self.error = Some(RillError::DuplicateKey {
                    key,
                    container: self.token,
                });
            }
        } else {
            self.props.push(PreparedProp {
                id,
                key,
                value: Value::new(initial),
                notify_initial,
            });
        }
        Prop::new(id, key)
    }

    pub fn finish(self) -> PreparedContainer {
        PreparedContainer {
            token: self.token,
            kind: self.kind,
            name: self.name,
            props: self.props,
            error: self.error,
        }
    }
}

/// Output of the prepare phase
pub struct PreparedState<S> {
    pub state: S,
    pub container: PreparedContainer,
}

impl<S: State> PreparedState<S> {
    /// Declares `S` without touching the arena.
    pub fn prepare(ids: Arc<IdAllocator>, kind: ContainerKind) -> Self {
        let mut builder = ContainerBuilder::new(ids, kind, std::any::type_name::<S>());
        let state = S::declare(&mut builder);
        PreparedState {
            state,
            container: builder.finish(),
        }
    }

    pub fn token(&self) -> ContainerToken {
        self.container.token
    }

    /// Installs the container into the arena.
    pub fn commit(self, graph: &mut PropGraph) -> RillResult<(ContainerToken, S)> {
        let token = graph.install(self.container)?;
        Ok((token, self.state))
    }
}
