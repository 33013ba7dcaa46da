//! Global store - process-wide state shared by any number of pages
//!
//! A global store owns one container of kind `Global`. Components bind
//! to its props through links tagged as global edges; those props are
//! read-only for everything but the store's own `update_state`. Global
//! stores have no reducers, only effects.

use std::fmt;
use std::sync::{Arc, Weak};

use rill_core::{Action, ContainerToken, Disposer, EffectCollector, RillError, RillResult, StoreId};
use rill_state::{
    ChangedProp, ContainerKind, PreparedState, Prop, SharedGraph, State, StateSnapshot,
    StateWriter,
};

use crate::{StoreCore, StoreStats, WriterThread};

pub struct GlobalStore<S: State> {
    core: StoreCore,
    state: Arc<S>,
    writer: WriterThread,
    effects: EffectCollector<GlobalStore<S>>,
    self_ref: Weak<GlobalStore<S>>,
}

impl<S: State> GlobalStore<S> {
    /// Declare `S` as a global container and commit it to `graph`.
    pub fn create(
        graph: SharedGraph,
        writer: WriterThread,
        effects: EffectCollector<GlobalStore<S>>,
    ) -> RillResult<Arc<Self>> {
        let (token, state) =
            PreparedState::<S>::prepare(graph.ids(), ContainerKind::Global).commit(&mut graph.lock())?;
        let id = graph.ids().next_store();
        tracing::debug!("global store {} created for {}", id, std::any::type_name::<S>());
        Ok(Arc::new_cyclic(|weak| GlobalStore {
            core: StoreCore::new(id, graph, token),
            state: Arc::new(state),
            writer,
            effects,
            self_ref: weak.clone(),
        }))
    }

    pub fn id(&self) -> StoreId {
        self.core.id()
    }

    pub fn token(&self) -> ContainerToken {
        self.core.root()
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    pub fn stats(&self) -> StoreStats {
        self.core.stats()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    pub fn get<T: std::any::Any + Clone>(&self, prop: &Prop<T>) -> RillResult<T> {
        prop.get(&self.core.graph().lock())
    }

    pub fn snapshot(&self) -> RillResult<StateSnapshot> {
        self.core.graph().lock().snapshot(self.token())
    }

    /// Observe changes to this store's props.
    pub fn observe<F>(&self, callback: F) -> Disposer
    where
        F: Fn(&[ChangedProp]) + Send + Sync + 'static,
    {
        self.core.observe(self.token(), callback)
    }

    /// Observe on behalf of a dependant container; it is notified when a
    /// prop it binds to changes.
    pub fn observe_for<F>(&self, dependant: ContainerToken, callback: F) -> Disposer
    where
        F: Fn(&[ChangedProp]) + Send + Sync + 'static,
    {
        self.core.observe(dependant, callback)
    }

    /// The only way to write global props. Every change is public and
    /// reaches all dependants across pages.
    pub fn update_state<F>(&self, f: F) -> RillResult<()>
    where
        F: FnOnce(&S, &mut StateWriter) -> RillResult<()> + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(RillError::StoreDestroyed(self.id()));
        }
        let store = self.self_ref.upgrade().ok_or(RillError::StoreDestroyed(self.id()))?;
        self.writer.execute(
            "global.update_state",
            Box::new(move || {
                if store.is_destroyed() {
                    return Ok(());
                }
                let mut writer = StateWriter::open(store.core.graph(), store.token())?;
                f(&store.state, &mut writer)?;
                let changes = writer.finish();
                // unbound props still reach the store's own observers
                let mut changed = changes.public;
                changed.extend(changes.private);
                store.core.fire(&changed);
                Ok(())
            }),
        )
    }

    /// Run the effect registered for `action`, on the writer thread.
    /// Returns whether an effect (or lifecycle) consumed it.
    pub fn dispatch_effect(&self, action: Action) -> RillResult<bool> {
        if self.is_destroyed() {
            return Err(RillError::StoreDestroyed(self.id()));
        }
        if !self.writer.is_current() {
            let handled = self.effects.handles(action.kind());
            let store = self.self_ref.clone();
            self.writer.forward(
                action.kind().name(),
                Box::new(move || {
                    if let Some(store) = store.upgrade() {
                        store.run_effect(&action);
                    }
                    Ok(())
                }),
            );
            return Ok(handled);
        }
        Ok(self.run_effect(&action))
    }

    fn run_effect(&self, action: &Action) -> bool {
        tracing::debug!(target: "rill::action", "global effect {}", action.kind());
        self.core.note_dispatch();
        self.effects.handle(action, self)
    }

    pub fn destroy(&self) {
        let removed = self.core.graph().lock().remove_container(self.token());
        tracing::debug!("global store {} destroyed, {} props removed", self.id(), removed);
        self.core.destroy();
    }
}

impl<S: State> fmt::Debug for GlobalStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStore")
            .field("id", &self.id())
            .field("token", &self.token())
            .field("effects", &self.effects)
            .finish()
    }
}
