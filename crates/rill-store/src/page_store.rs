//! Page store - per-screen dispatch pipeline
//!
//! `dispatch` runs through the middleware chain, then the writer gate
//! (IDLE -> DISPATCHING -> IDLE): every reducer entry that handles the
//! action runs under a fresh write session, private changes go straight
//! back to the owning component, public changes are collected and
//! handed to [`PageStore::update`], which re-resolves roots, notifies
//! observers and marks the scheduler dirty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rill_core::{Action, ContainerToken, Disposer, PropId, RillError, RillResult, StoreId};
use rill_frame::UpdateScheduler;
use rill_state::{ChangedProp, SharedGraph, StateSnapshot, StateWriter};

use crate::{
    apply_middleware, ChangeCallback, CombinedReducer, DispatchFn, Middleware, ReducerEntry,
    StateProvider, StoreCore, StoreStats, WriterThread,
};

pub struct PageStore {
    core: StoreCore,
    writer: WriterThread,
    reducer: CombinedReducer,
    scheduler: UpdateScheduler,
    chain: Mutex<Option<DispatchFn>>,
    getters: Arc<Mutex<Vec<(u64, ContainerToken)>>>,
    next_getter: AtomicU64,
    self_ref: Weak<PageStore>,
}

impl PageStore {
    pub fn new(
        id: StoreId,
        graph: SharedGraph,
        root: ContainerToken,
        writer: WriterThread,
        scheduler: UpdateScheduler,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| PageStore {
            core: StoreCore::new(id, graph, root),
            writer,
            reducer: CombinedReducer::new(),
            scheduler,
            chain: Mutex::new(None),
            getters: Arc::new(Mutex::new(vec![(0, root)])),
            next_getter: AtomicU64::new(1),
            self_ref: weak.clone(),
        })
    }

    pub fn id(&self) -> StoreId {
        self.core.id()
    }

    pub fn root(&self) -> ContainerToken {
        self.core.root()
    }

    pub fn graph(&self) -> &SharedGraph {
        self.core.graph()
    }

    pub fn core(&self) -> &StoreCore {
        &self.core
    }

    pub fn writer(&self) -> &WriterThread {
        &self.writer
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn reducer(&self) -> &CombinedReducer {
        &self.reducer
    }

    pub fn stats(&self) -> StoreStats {
        self.core.stats()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn add_reducer(&self, entry: ReducerEntry) -> Disposer {
        if self.is_destroyed() {
            return Disposer::noop();
        }
        self.reducer.add(entry)
    }

    pub fn observe<F>(&self, token: ContainerToken, callback: F) -> Disposer
    where
        F: Fn(&[ChangedProp]) + Send + Sync + 'static,
    {
        self.core.observe(token, callback)
    }

    /// Expose a container through [`all_state`](Self::all_state).
    pub fn add_state_getter(&self, token: ContainerToken) -> Disposer {
        let id = self.next_getter.fetch_add(1, Ordering::Relaxed);
        self.getters.lock().push((id, token));
        let getters = Arc::downgrade(&self.getters);
        Disposer::new(move || {
            if let Some(getters) = getters.upgrade() {
                getters.lock().retain(|(gid, _)| *gid != id);
            }
        })
    }

    /// Read-only copies of the root and every registered container
    pub fn all_state(&self) -> Vec<StateSnapshot> {
        let tokens: Vec<ContainerToken> = self.getters.lock().iter().map(|(_, t)| *t).collect();
        let graph = self.core.graph().lock();
        tokens
            .into_iter()
            .filter_map(|t| graph.snapshot(t).ok())
            .collect()
    }

    /// Install the middleware chain; replaces any earlier chain.
    pub fn apply_middleware(&self, middleware: &[Arc<dyn Middleware>]) {
        if middleware.is_empty() {
            *self.chain.lock() = None;
            return;
        }
        let weak = self.self_ref.clone();
        let states: StateProvider = Arc::new(move || {
            weak.upgrade().map(|s| s.all_state()).unwrap_or_default()
        });
        let weak = self.self_ref.clone();
        let base: DispatchFn = Arc::new(move |action: Action| match weak.upgrade() {
            Some(store) => store.dispatch_raw(action),
            None => Ok(()),
        });
        *self.chain.lock() = Some(apply_middleware(middleware, states, base));
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run `action` through middleware and the combined reducer.
    ///
    /// Off the writer thread the action is forwarded and `Ok(())` is
    /// returned at once.
    pub fn dispatch(&self, action: Action) -> RillResult<()> {
        if self.is_destroyed() {
            return Err(RillError::StoreDestroyed(self.id()));
        }
        let chain = self.chain.lock().clone();
        match chain {
            Some(chain) => chain(action),
            None => self.dispatch_raw(action),
        }
    }

    fn dispatch_raw(&self, action: Action) -> RillResult<()> {
        let store = self.self_ref.upgrade().ok_or(RillError::StoreDestroyed(self.id()))?;
        let label = action.kind().name();
        self.writer
            .execute(label, Box::new(move || store.run_action(&action)))
    }

    fn run_action(&self, action: &Action) -> RillResult<()> {
        if self.is_destroyed() {
            tracing::debug!("dispatch of {} after teardown dropped", action.kind());
            return Ok(());
        }
        tracing::debug!(
            target: "rill::action",
            "reduce {} ({:?})",
            action.kind(),
            action.visibility()
        );
        self.core.note_dispatch();

        let mut public = Vec::new();
        let mut failure = None;
        for entry in self.reducer.entries_for(action) {
            if let Err(e) = self.reduce_entry(&entry, action, &mut public) {
                failure = Some(e);
                break;
            }
        }
        self.update(&public);
        failure.map_or(Ok(()), Err)
    }

    fn reduce_entry(
        &self,
        entry: &ReducerEntry,
        action: &Action,
        public: &mut Vec<PropId>,
    ) -> RillResult<()> {
        let owner = entry.reducer.owner();
        let mut writer = match StateWriter::open(self.core.graph(), owner) {
            Ok(w) => w,
            Err(RillError::ContainerNotFound(_)) => {
                tracing::debug!("reducer owner {} already torn down", owner);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        entry.reducer.reduce(&mut writer, action)?;
        let changes = writer.finish();
        self.deliver_private(&entry.on_private, &changes.private);
        public.extend(changes.public);
        Ok(())
    }

    fn deliver_private(&self, sink: &ChangeCallback, private: &[PropId]) {
        if private.is_empty() {
            return;
        }
        let described: Vec<ChangedProp> = {
            let graph = self.core.graph().lock();
            private.iter().filter_map(|id| graph.describe(*id)).collect()
        };
        sink(&described);
    }

    /// Apply a pure update function to `owner` outside any action.
    pub fn update_state<F>(&self, owner: ContainerToken, on_private: ChangeCallback, f: F) -> RillResult<()>
    where
        F: FnOnce(&mut StateWriter) -> RillResult<()> + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(RillError::StoreDestroyed(self.id()));
        }
        let store = self.self_ref.upgrade().ok_or(RillError::StoreDestroyed(self.id()))?;
        self.writer.execute(
            "update_state",
            Box::new(move || store.run_update(owner, on_private, f)),
        )
    }

    fn run_update<F>(&self, owner: ContainerToken, on_private: ChangeCallback, f: F) -> RillResult<()>
    where
        F: FnOnce(&mut StateWriter) -> RillResult<()>,
    {
        if self.is_destroyed() {
            return Ok(());
        }
        let mut writer = StateWriter::open(self.core.graph(), owner)?;
        f(&mut writer)?;
        let changes = writer.finish();
        self.deliver_private(&on_private, &changes.private);
        self.update(&changes.public);
        Ok(())
    }

    /// Notify observers of public changes and mark the page dirty.
    pub fn update(&self, changed: &[PropId]) -> usize {
        if changed.is_empty() {
            return 0;
        }
        let roots: Vec<PropId> = {
            let mut graph = self.core.graph().lock();
            let mut roots: Vec<PropId> = Vec::with_capacity(changed.len());
            for id in changed {
                let root = graph.resolve_root(*id);
                if root != *id {
                    // a child wrote through its link: the root takes the value
                    let synced = graph
                        .read(*id)
                        .cloned()
                        .and_then(|v| graph.inner_set(root, v));
                    if let Err(e) = synced {
                        tracing::debug!("root sync of {:?} skipped: {}", id, e);
                    }
                }
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
            roots
        };
        let notified = self.core.fire(&roots);
        self.scheduler.mark_dirty();
        notified
    }

    /// Tear down: no more dispatches, observers or frames.
    pub fn destroy(&self) {
        self.core.destroy();
        self.scheduler.teardown();
        self.reducer.clear();
        self.getters.lock().clear();
        *self.chain.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundReducer, LoggingMiddleware, ReducerCollector};
    use rill_core::ActionType;
    use rill_frame::ManualFrameSource;
    use rill_state::{ContainerBuilder, ContainerKind, PreparedState, Prop, State};
    use std::sync::atomic::AtomicUsize;

    const SET_NUM: ActionType = ActionType::new("test.set_num");
    const SET_LOCAL: ActionType = ActionType::new("test.set_local");

    struct PageState {
        num: Prop<i32>,
        local: Prop<i32>,
    }

    impl State for PageState {
        fn declare(b: &mut ContainerBuilder) -> Self {
            PageState {
                num: b.prop("num", 0),
                local: b.prop("local", 0),
            }
        }
    }

    struct ChildState {
        num: Prop<i32>,
    }

    impl State for ChildState {
        fn declare(b: &mut ContainerBuilder) -> Self {
            ChildState { num: b.prop("num", 0) }
        }
    }

    struct Harness {
        frames: Arc<ManualFrameSource>,
        store: Arc<PageStore>,
        page: Arc<PageState>,
        child_token: ContainerToken,
        child: Arc<ChildState>,
    }

    fn harness() -> Harness {
        let graph = SharedGraph::new();
        let (page_token, page) = PreparedState::<PageState>::prepare(graph.ids(), ContainerKind::Page)
            .commit(&mut graph.lock())
            .unwrap();
        let (child_token, child) = PreparedState::<ChildState>::prepare(graph.ids(), ContainerKind::Component)
            .commit(&mut graph.lock())
            .unwrap();
        graph.lock().link_to_parent(child.num.id(), page.num.id()).unwrap();

        let frames = Arc::new(ManualFrameSource::new());
        let scheduler = UpdateScheduler::new(frames.clone());
        scheduler.set_visible(true);
        let store = PageStore::new(
            graph.ids().next_store(),
            graph,
            page_token,
            WriterThread::bind_current(),
            scheduler,
        );

        let page = Arc::new(page);
        let mut reducers = ReducerCollector::<PageState>::new();
        reducers.add(SET_NUM, |s, w, a| w.set(&s.num, *a.payload::<i32>().unwrap_or(&0)));
        reducers.add(SET_LOCAL, |s, w, a| w.set(&s.local, *a.payload::<i32>().unwrap_or(&0)));
        let _ = store.add_reducer(ReducerEntry {
            reducer: Arc::new(BoundReducer::new(page_token, page.clone(), reducers)),
            on_private: Arc::new(|_: &[ChangedProp]| {}),
        });

        Harness {
            frames,
            store,
            page,
            child_token,
            child: Arc::new(child),
        }
    }

    fn count_observer(store: &PageStore, token: ContainerToken) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _ = store.observe(token, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn test_public_write_reaches_child() {
        let h = harness();
        let child_hits = count_observer(&h.store, h.child_token);

        h.store.dispatch(Action::new(SET_NUM).with_payload(5i32)).unwrap();

        assert_eq!(child_hits.load(Ordering::SeqCst), 1);
        let graph = h.store.graph().lock();
        assert_eq!(graph.get::<i32>(h.child.num.id()).unwrap(), 5);
    }

    #[test]
    fn test_private_write_notifies_nobody() {
        let h = harness();
        let page_hits = count_observer(&h.store, h.store.root());
        let child_hits = count_observer(&h.store, h.child_token);

        h.store.dispatch(Action::new(SET_LOCAL).with_payload(1i32)).unwrap();

        assert_eq!(page_hits.load(Ordering::SeqCst), 0);
        assert_eq!(child_hits.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.stats().notifications, 0);
        assert_eq!(h.store.graph().lock().get::<i32>(h.page.local.id()).unwrap(), 1);
    }

    #[test]
    fn test_child_write_syncs_root_and_siblings() {
        let h = harness();
        let page_hits = count_observer(&h.store, h.store.root());
        let child = h.child.clone();

        h.store
            .update_state(h.child_token, Arc::new(|_: &[ChangedProp]| {}), move |w| w.set(&child.num, 9))
            .unwrap();

        assert_eq!(page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.graph().lock().get::<i32>(h.page.num.id()).unwrap(), 9);
    }

    #[test]
    fn test_updates_coalesce_into_one_frame() {
        let h = harness();
        let frames_seen = Arc::new(AtomicUsize::new(0));
        let f = frames_seen.clone();
        let _d = h.store.scheduler().add_updater(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..5 {
            h.store.dispatch(Action::new(SET_NUM).with_payload(i)).unwrap();
        }
        h.frames.advance();
        assert_eq!(frames_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_dispatch_runs_after_current() {
        let h = harness();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o, store) = (order.clone(), Arc::downgrade(&h.store));
        let mut reducers = ReducerCollector::<ChildState>::new();
        reducers.add(SET_NUM, move |_, _, _| {
            o.lock().push("child-reducer");
            if let Some(store) = store.upgrade() {
                store.dispatch(Action::new(SET_LOCAL).with_payload(3i32))?;
            }
            o.lock().push("child-reducer-end");
            Ok(())
        });
        let _ = h.store.add_reducer(ReducerEntry {
            reducer: Arc::new(BoundReducer::new(h.child_token, h.child.clone(), reducers)),
            on_private: Arc::new(|_: &[ChangedProp]| {}),
        });

        h.store.dispatch(Action::new(SET_NUM).with_payload(1i32)).unwrap();
        assert_eq!(*order.lock(), vec!["child-reducer", "child-reducer-end"]);
        assert_eq!(h.store.graph().lock().get::<i32>(h.page.local.id()).unwrap(), 3);
        assert_eq!(h.store.stats().dispatched, 2);
    }

    #[test]
    fn test_write_error_closes_session() {
        let h = harness();
        let err = h
            .store
            .update_state(h.store.root(), Arc::new(|_: &[ChangedProp]| {}), |w| {
                w.set_key("missing", rill_core::Value::new(1i32))
            })
            .unwrap_err();
        assert!(matches!(err, RillError::UnknownKey { .. }));
        assert_eq!(h.store.graph().lock().session(), None);
    }

    #[test]
    fn test_all_state_includes_getters() {
        let h = harness();
        assert_eq!(h.store.all_state().len(), 1);
        let d = h.store.add_state_getter(h.child_token);
        let states = h.store.all_state();
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].token(), h.child_token);
        d.dispose();
        assert_eq!(h.store.all_state().len(), 1);
    }

    #[test]
    fn test_middleware_wraps_dispatch() {
        let h = harness();
        h.store.apply_middleware(&[Arc::new(LoggingMiddleware)]);
        h.store.dispatch(Action::new(SET_NUM).with_payload(4i32)).unwrap();
        assert_eq!(h.store.graph().lock().get::<i32>(h.page.num.id()).unwrap(), 4);
    }

    #[test]
    fn test_destroyed_store_rejects_dispatch() {
        let h = harness();
        h.store.destroy();
        assert_eq!(
            h.store.dispatch(Action::new(SET_NUM)),
            Err(RillError::StoreDestroyed(h.store.id()))
        );
        assert!(h.store.scheduler().is_torn_down());
    }
}
