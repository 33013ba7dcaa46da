//! Component context
//!
//! A [`ComponentContext`] is the live half of a mounted component: it
//! owns the registrations made on the page store, routes effects, keeps
//! the pending-change set for its view and fires props watchers.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rill_bus::{ensure_private, Dispatch, DispatchBus, InterceptorManager};
use rill_core::{
    inner, Action, ContainerToken, DisposeBag, Disposer, EffectCollector, PropId, RillError,
    RillResult,
};
use rill_state::{ChangedProp, Prop, State, StateSnapshot, StateWriter};
use rill_store::{ActionFilter, BoundReducer, PageStore, ReducerCollector, ReducerEntry};

use crate::{DependantHandle, DependencyCollector, InstallEnv, Logic, Runtime, ViewBinding, ViewHandle, ViewModule};

/// Type-erased effect endpoint, used for parent/child routing.
pub trait EffectSink: Send + Sync {
    fn token(&self) -> ContainerToken;

    /// Run this component's own effect for `action`.
    fn deliver_effect(&self, action: &Action) -> bool;

    fn child_sinks(&self) -> Vec<Arc<dyn EffectSink>>;
}

/// What every component of one page shares
#[derive(Clone)]
pub struct PageEnv {
    pub(crate) runtime: Runtime,
    pub(crate) store: Arc<PageStore>,
    pub(crate) bus: DispatchBus,
    pub(crate) interceptors: InterceptorManager,
}

type WatchFn = Arc<dyn Fn(&[ChangedProp]) + Send + Sync>;

struct Watcher {
    id: u64,
    props: Vec<PropId>,
    callback: WatchFn,
}

#[derive(Default)]
struct ViewSlot {
    rendered: bool,
    failed: bool,
    full: bool,
    pending: HashSet<PropId>,
    handle: Option<ViewHandle>,
    bindings: Vec<ViewBinding>,
    renders: u64,
}

pub struct ComponentContext<S: State> {
    token: ContainerToken,
    name: &'static str,
    state: Arc<S>,
    env: PageEnv,
    effects: EffectCollector<ComponentContext<S>>,
    view: Option<Arc<dyn ViewModule<S>>>,
    slot: Mutex<ViewSlot>,
    watchers: Arc<Mutex<Vec<Watcher>>>,
    next_watch: AtomicU64,
    parent: Option<Weak<dyn EffectSink>>,
    children: Mutex<Vec<Arc<dyn DependantHandle<S>>>>,
    bag: Mutex<DisposeBag>,
    visible: AtomicBool,
    torn_down: AtomicBool,
    self_ref: Weak<ComponentContext<S>>,
}

impl<S: State> ComponentContext<S> {
    /// Register `logic` on the page store and install its children.
    pub(crate) fn mount<L>(
        logic: &L,
        env: &PageEnv,
        token: ContainerToken,
        state: Arc<S>,
        parent: Option<Weak<dyn EffectSink>>,
        filter: Option<ActionFilter>,
    ) -> RillResult<Arc<Self>>
    where
        L: Logic<State = S>,
    {
        let started = Instant::now();
        let mut effects = EffectCollector::new();
        logic.effects(&mut effects);

        let ctx = Arc::new_cyclic(|weak| ComponentContext {
            token,
            name: logic.name(),
            state: state.clone(),
            env: env.clone(),
            effects,
            view: logic.view(),
            slot: Mutex::new(ViewSlot::default()),
            watchers: Arc::new(Mutex::new(Vec::new())),
            next_watch: AtomicU64::new(1),
            parent,
            children: Mutex::new(Vec::new()),
            bag: Mutex::new(DisposeBag::new()),
            visible: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
            self_ref: weak.clone(),
        });

        let mut bag = DisposeBag::new();
        let mut reducers = ReducerCollector::new();
        logic.reducers(&mut reducers);
        if !reducers.is_empty() {
            let mut bound = BoundReducer::new(token, state, reducers);
            if let Some(filter) = filter {
                bound = bound.with_filter(filter);
            }
            let weak = Arc::downgrade(&ctx);
            bag.push(env.store.add_reducer(ReducerEntry {
                reducer: Arc::new(bound),
                on_private: Arc::new(move |changed: &[ChangedProp]| {
                    if let Some(ctx) = weak.upgrade() {
                        ctx.on_changes(changed);
                    }
                }),
            }));
        }

        let weak = Arc::downgrade(&ctx);
        bag.push(env.store.observe(token, move |changed| {
            if let Some(ctx) = weak.upgrade() {
                ctx.on_changes(changed);
            }
        }));
        if token != env.store.root() {
            bag.push(env.store.add_state_getter(token));
        }
        if ctx.view.is_some() {
            let weak = Arc::downgrade(&ctx);
            bag.push(env.store.scheduler().add_updater(move || {
                if let Some(ctx) = weak.upgrade() {
                    ctx.flush_view();
                }
            }));
            env.store.scheduler().mark_dirty();
        }
        ctx.adopt(bag);

        let mut deps = DependencyCollector::new();
        logic.dependencies(&mut deps);
        if let Err(e) = ctx.install_children(deps) {
            ctx.teardown();
            return Err(e);
        }
        tracing::trace!(
            target: "rill::perf",
            "mounted {} ({}) in {}us",
            ctx.name,
            token,
            started.elapsed().as_micros()
        );
        Ok(ctx)
    }

    pub fn token(&self) -> ContainerToken {
        self.token
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.env.store
    }

    pub fn bus(&self) -> &DispatchBus {
        &self.env.bus
    }

    pub fn runtime(&self) -> &Runtime {
        &self.env.runtime
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    /// Render failed or panicked; the component has no view.
    pub fn view_failed(&self) -> bool {
        self.slot.lock().failed
    }

    pub fn view_handle(&self) -> Option<ViewHandle> {
        self.slot.lock().handle.clone()
    }

    pub fn render_count(&self) -> u64 {
        self.slot.lock().renders
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub fn child(&self, key: &str) -> Option<Arc<dyn DependantHandle<S>>> {
        self.children.lock().iter().find(|c| c.key() == key).cloned()
    }

    /// Typed context of the direct child installed under `key`
    pub fn child_context<C: State>(&self, key: &str) -> Option<Arc<ComponentContext<C>>> {
        self.child(key)?.context_any()?.downcast().ok()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get<T: Any + Clone>(&self, prop: &Prop<T>) -> RillResult<T> {
        prop.get(&self.env.store.graph().lock())
    }

    /// Read-only copy of this component's state
    pub fn snapshot(&self) -> RillResult<StateSnapshot> {
        self.env.store.graph().lock().snapshot(self.token)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub fn dispatch_reducer(&self, action: Action) -> RillResult<()> {
        self.env.store.dispatch(action)
    }

    /// Run the own effect for `action`; non-private actions are then
    /// offered to the page's interceptors. Off the writer thread the
    /// call is forwarded and reports `false`.
    pub fn dispatch_effect(&self, action: Action) -> RillResult<bool> {
        let forwarded = action.clone();
        if self.forward_to_writer(action.kind().name(), move |ctx| ctx.dispatch_effect(forwarded).map(|_| ())) {
            return Ok(false);
        }
        if self.is_torn_down() {
            tracing::debug!("effect {} on torn down {}", action.kind(), self.name);
            return Ok(false);
        }
        tracing::debug!(target: "rill::action", "effect {} in {}", action.kind(), self.name);
        let consumed = self.deliver_effect(&action);
        if !action.is_private() && !inner::is_inner(action.kind()) {
            let wrapped = InterceptorManager::wrap_for_interception(action, Some(self.token));
            self.env.bus.dispatch(&wrapped)?;
        }
        Ok(consumed)
    }

    /// Offer `action` to the page's interceptors directly. Returns the
    /// number of handlers that ran.
    pub fn dispatch_to_interceptor(&self, action: &Action) -> usize {
        self.env.interceptors.handle(action, Some(self.token))
    }

    /// Deliver a private action to the declaring parent's effects.
    /// Forwarded off the writer thread, reporting `false`.
    pub fn dispatch_to_parent(&self, action: Action) -> RillResult<bool> {
        ensure_private(&action)?;
        let forwarded = action.clone();
        if self.forward_to_writer(action.kind().name(), move |ctx| ctx.dispatch_to_parent(forwarded).map(|_| ())) {
            return Ok(false);
        }
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => Ok(parent.deliver_effect(&action)),
            None => {
                tracing::debug!("{} has no parent for {}", self.name, action.kind());
                Ok(false)
            }
        }
    }

    /// Deliver a private action to every descendant, breadth first.
    /// Returns the number of components reached, or 0 when forwarded.
    pub fn dispatch_to_children(&self, action: Action) -> RillResult<usize> {
        ensure_private(&action)?;
        let forwarded = action.clone();
        if self.forward_to_writer(action.kind().name(), move |ctx| ctx.dispatch_to_children(forwarded).map(|_| ())) {
            return Ok(0);
        }
        let mut queue: VecDeque<Arc<dyn EffectSink>> = self.child_sinks().into();
        let mut reached = 0;
        while let Some(sink) = queue.pop_front() {
            sink.deliver_effect(&action);
            reached += 1;
            queue.extend(sink.child_sinks());
        }
        Ok(reached)
    }

    /// Fan out to every page of the runtime. Returns the number of pages
    /// reached, or 0 when forwarded.
    pub fn broadcast(&self, action: Action) -> usize {
        let forwarded = action.clone();
        if self.forward_to_writer(action.kind().name(), move |ctx| {
            ctx.broadcast(forwarded);
            Ok(())
        }) {
            return 0;
        }
        self.env.bus.broadcast(&action)
    }

    /// Queue `job` on the writer thread when called from any other
    /// thread. Returns true when the call was forwarded.
    fn forward_to_writer<F>(&self, label: &'static str, job: F) -> bool
    where
        F: FnOnce(&ComponentContext<S>) -> RillResult<()> + Send + 'static,
    {
        let writer = self.env.runtime.writer();
        if writer.is_current() {
            return false;
        }
        let weak = self.self_ref.clone();
        writer.forward(
            label,
            Box::new(move || match weak.upgrade() {
                Some(ctx) => job(&ctx),
                None => Ok(()),
            }),
        );
        true
    }

    /// Apply a pure update function to this component's state.
    pub fn update_state<F>(&self, f: F) -> RillResult<()>
    where
        F: FnOnce(&S, &mut StateWriter) -> RillResult<()> + Send + 'static,
    {
        let state = self.state.clone();
        let weak = self.self_ref.clone();
        self.env.store.update_state(
            self.token,
            Arc::new(move |changed: &[ChangedProp]| {
                if let Some(ctx) = weak.upgrade() {
                    ctx.on_changes(changed);
                }
            }),
            move |writer| f(&state, writer),
        )
    }

    /// Call `callback` synchronously whenever one of `props` changes.
    pub fn watch<F>(&self, props: &[PropId], callback: F) -> Disposer
    where
        F: Fn(&[ChangedProp]) + Send + Sync + 'static,
    {
        let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().push(Watcher {
            id,
            props: props.to_vec(),
            callback: Arc::new(callback),
        });
        let watchers = Arc::downgrade(&self.watchers);
        Disposer::new(move || {
            if let Some(watchers) = watchers.upgrade() {
                watchers.lock().retain(|w| w.id != id);
            }
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn sink_ref(&self) -> Weak<dyn EffectSink> {
        let weak: Weak<dyn EffectSink> = self.self_ref.clone();
        weak
    }

    pub(crate) fn adopt(&self, bag: DisposeBag) {
        self.bag.lock().extend(bag);
    }

    pub(crate) fn install_children(&self, deps: DependencyCollector<S>) -> RillResult<usize> {
        let env = InstallEnv {
            page: self.env.clone(),
            parent_token: self.token,
            parent_state: self.state.clone(),
            parent_sink: self.sink_ref(),
        };
        let mut installed = 0;
        for dep in deps.into_entries() {
            if self.child(dep.key()).is_some() {
                tracing::debug!("{} already has a child `{}`, skipping", self.name, dep.key());
                continue;
            }
            dep.install(&env)?;
            dep.attach()?;
            dep.show();
            self.children.lock().push(dep);
            installed += 1;
        }
        Ok(installed)
    }

    pub(crate) fn on_changes(&self, changed: &[ChangedProp]) {
        if changed.is_empty() || self.is_torn_down() {
            return;
        }
        if !self.is_visible() {
            // hidden: nothing observes; re-show pushes a full update
            if self.view.is_some() {
                let mut slot = self.slot.lock();
                let rendered = slot.rendered;
                slot.full |= rendered;
            }
            tracing::trace!("{} hidden, {} changes deferred", self.name, changed.len());
            return;
        }
        if self.view.is_some() {
            self.slot.lock().pending.extend(changed.iter().map(|c| c.id));
        }
        let hits: Vec<(WatchFn, Vec<ChangedProp>)> = self
            .watchers
            .lock()
            .iter()
            .filter_map(|w| {
                let seen: Vec<ChangedProp> = changed
                    .iter()
                    .filter(|c| w.props.contains(&c.id))
                    .cloned()
                    .collect();
                (!seen.is_empty()).then(|| (w.callback.clone(), seen))
            })
            .collect();
        for (callback, seen) in hits {
            callback(&seen);
        }
        if self.view.is_some() {
            self.env.store.scheduler().mark_dirty();
        }
    }

    /// While hidden, changes reach neither the view nor props watchers.
    pub(crate) fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Push every binding on the next tick.
    pub(crate) fn request_full_update(&self) {
        if self.view.is_none() {
            return;
        }
        self.slot.lock().full = true;
        self.env.store.scheduler().mark_dirty();
    }

    fn initial_props(&self) -> Vec<PropId> {
        let graph = self.env.store.graph().lock();
        graph
            .props_of(self.token)
            .into_iter()
            .filter(|id| graph.node(*id).map_or(false, |n| n.notify_initial()))
            .collect()
    }

    fn fail_view(&self, err: RillError) {
        tracing::error!(target: "rill::error", "{}: {}", self.name, err);
        let mut slot = self.slot.lock();
        slot.rendered = true;
        slot.failed = true;
        slot.handle = None;
        slot.bindings.clear();
    }

    /// Scheduler tick for this component.
    fn flush_view(&self) {
        let Some(module) = self.view.clone() else {
            return;
        };
        if self.is_torn_down() || !self.is_visible() {
            return;
        }
        let (first, full, mut changed) = {
            let mut slot = self.slot.lock();
            if slot.failed {
                return;
            }
            let pending: Vec<PropId> = slot.pending.drain().collect();
            (!slot.rendered, std::mem::take(&mut slot.full), pending)
        };
        let started = Instant::now();

        if first {
            let rendered = catch_unwind(AssertUnwindSafe(
                || -> RillResult<(ViewHandle, Vec<ViewBinding>)> {
                    let handle = module.render(self)?;
                    Ok((handle, module.declare_dependencies(&self.state)))
                },
            ));
            match rendered {
                Ok(Ok((handle, bindings))) => {
                    let mut slot = self.slot.lock();
                    slot.rendered = true;
                    slot.renders += 1;
                    slot.handle = Some(handle);
                    slot.bindings = bindings;
                }
                Ok(Err(e)) => return self.fail_view(RillError::RenderFailed(e.to_string())),
                Err(panic) => return self.fail_view(RillError::RenderFailed(panic_message(&*panic))),
            }
            for id in self.initial_props() {
                if !changed.contains(&id) {
                    changed.push(id);
                }
            }
        }

        let bindings: Vec<ViewBinding> = self
            .slot
            .lock()
            .bindings
            .iter()
            .filter(|b| full || b.touches(&changed))
            .cloned()
            .collect();
        if bindings.is_empty() {
            return;
        }
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!("{} skipped view update: {}", self.name, e);
                return;
            }
        };
        for binding in &bindings {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (binding.update)(&snapshot))) {
                tracing::error!(
                    target: "rill::error",
                    "view update of {} panicked: {}",
                    self.name,
                    panic_message(&*panic)
                );
            }
        }
        tracing::trace!(
            target: "rill::perf",
            "{} updated {} bindings in {}us",
            self.name,
            bindings.len(),
            started.elapsed().as_micros()
        );
    }

    /// Dispose every registration and destroy the children.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let children: Vec<_> = std::mem::take(&mut *self.children.lock());
        for child in children.iter().rev() {
            child.destroy();
        }
        let mut bag = std::mem::take(&mut *self.bag.lock());
        bag.dispose_all();
        self.watchers.lock().clear();
        let removed = self.env.interceptors.remove_owner(self.token);
        tracing::debug!("{} torn down, {} interceptors removed", self.name, removed);
    }
}

impl<S: State> EffectSink for ComponentContext<S> {
    fn token(&self) -> ContainerToken {
        self.token
    }

    fn deliver_effect(&self, action: &Action) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.effects.handle(action, self)
    }

    fn child_sinks(&self) -> Vec<Arc<dyn EffectSink>> {
        self.children.lock().iter().filter_map(|c| c.sink()).collect()
    }
}

impl<S: State> fmt::Debug for ComponentContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.name)
            .field("token", &self.token)
            .field("children", &self.child_count())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic".to_string()
    }
}
