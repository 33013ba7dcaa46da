//! Pages
//!
//! A [`Page`] is the root of one component tree: it owns the page
//! store, the page's bus node and interceptor manager, and translates
//! host lifecycle calls into private lifecycle actions.
//!
//! With background discovery the page state is declared on the
//! discovery worker and committed on the writer thread. Lifecycle calls
//! that arrive before the commit are buffered and replayed in order;
//! `on_destroy` before the commit cancels the discovery instead.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rill_bus::{DispatchBus, InterceptorManager};
use rill_core::{inner, Action, LifecycleEvent, RillError, RillResult};
use rill_frame::UpdateScheduler;
use rill_state::{ContainerKind, PreparedState, State};
use rill_store::{LoggingMiddleware, Middleware, PageStore};

use crate::{
    ComponentContext, DependencyCollector, DiscoveryMode, DiscoveryTask, EffectSink, Logic,
    PageEnv, Runtime,
};

/// Payload of an `inner::INSTALL_EXTRA` action sent to a page's bus
pub struct ExtraDependants<S: State>(Mutex<Option<DependencyCollector<S>>>);

impl<S: State> ExtraDependants<S> {
    pub fn action(deps: DependencyCollector<S>) -> Action {
        Action::private(inner::INSTALL_EXTRA).with_payload(ExtraDependants(Mutex::new(Some(deps))))
    }

    fn take(&self) -> Option<DependencyCollector<S>> {
        self.0.lock().take()
    }
}

enum Phase<S: State> {
    Discovering,
    Ready(Arc<ComponentContext<S>>),
    Destroyed,
}

pub struct Page<L: Logic> {
    name: &'static str,
    runtime: Runtime,
    logic: Arc<L>,
    bus: DispatchBus,
    interceptors: InterceptorManager,
    scheduler: UpdateScheduler,
    phase: Mutex<Phase<L::State>>,
    replay: Mutex<Vec<LifecycleEvent>>,
    task: Mutex<Option<DiscoveryTask>>,
    self_ref: Weak<Page<L>>,
}

impl<L: Logic> Page<L> {
    pub fn create(runtime: Runtime, logic: L) -> RillResult<Arc<Self>> {
        let ids = runtime.ids();
        let name = logic.name();
        let page = Arc::new_cyclic(|weak| Page {
            name,
            bus: DispatchBus::page(&ids, name),
            interceptors: InterceptorManager::new(),
            scheduler: UpdateScheduler::new(runtime.frames()),
            phase: Mutex::new(Phase::Discovering),
            replay: Mutex::new(Vec::new()),
            task: Mutex::new(None),
            logic: Arc::new(logic),
            runtime,
            self_ref: weak.clone(),
        });
        page.runtime.root_bus().attach(&page.bus);
        let weak = Arc::downgrade(&page);
        page.bus.set_page_receiver(move |action| {
            if let Some(page) = weak.upgrade() {
                page.receive(action);
            }
        });

        match page.runtime.config().discovery {
            DiscoveryMode::Inline => {
                let prepared = PreparedState::<L::State>::prepare(ids, ContainerKind::Page);
                if let Err(e) = page.commit(prepared) {
                    page.teardown();
                    return Err(e);
                }
            }
            DiscoveryMode::Background => {
                let writer = page.runtime.writer().clone();
                let weak: Weak<Page<L>> = Arc::downgrade(&page);
                let task = page.runtime.discovery().spawn(
                    move || PreparedState::<L::State>::prepare(ids, ContainerKind::Page),
                    move |prepared| {
                        writer.forward(
                            "rill.page.commit",
                            Box::new(move || match weak.upgrade() {
                                Some(page) => page.commit(prepared),
                                None => Ok(()),
                            }),
                        );
                    },
                );
                *page.task.lock() = Some(task);
            }
        }
        Ok(page)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn bus(&self) -> &DispatchBus {
        &self.bus
    }

    pub fn interceptors(&self) -> &InterceptorManager {
        &self.interceptors
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn context(&self) -> Option<Arc<ComponentContext<L::State>>> {
        match &*self.phase.lock() {
            Phase::Ready(ctx) => Some(ctx.clone()),
            _ => None,
        }
    }

    pub fn store(&self) -> Option<Arc<PageStore>> {
        self.context().map(|ctx| ctx.store().clone())
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Ready(_))
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Destroyed)
    }

    pub fn dispatch(&self, action: Action) -> RillResult<()> {
        let ctx = self.context().ok_or(RillError::NotInstalled(self.name))?;
        ctx.dispatch_reducer(action)
    }

    pub fn dispatch_effect(&self, action: Action) -> RillResult<bool> {
        let ctx = self.context().ok_or(RillError::NotInstalled(self.name))?;
        ctx.dispatch_effect(action)
    }

    /// Install late dependants into the root component. Keys already
    /// installed are skipped. Returns the number installed.
    pub fn install_extra(&self, deps: DependencyCollector<L::State>) -> RillResult<usize> {
        let ctx = self.context().ok_or(RillError::NotInstalled(self.name))?;
        let installed = ctx.install_children(deps)?;
        tracing::debug!("{} installed {} extra dependants", self.name, installed);
        Ok(installed)
    }

    // ------------------------------------------------------------------
    // Host lifecycle
    // ------------------------------------------------------------------

    pub fn on_create(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Create)
    }

    pub fn on_start(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Start)
    }

    pub fn on_resume(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Resume)
    }

    pub fn on_pause(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Pause)
    }

    pub fn on_stop(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Stop)
    }

    pub fn on_destroy(&self) -> RillResult<()> {
        self.lifecycle(LifecycleEvent::Destroy)
    }

    /// Off the writer thread the event is forwarded, keeping host order.
    pub fn lifecycle(&self, event: LifecycleEvent) -> RillResult<()> {
        if !self.runtime.is_writer_thread() {
            let weak = self.self_ref.clone();
            self.runtime.writer().forward(
                "rill.page.lifecycle",
                Box::new(move || match weak.upgrade() {
                    Some(page) => page.lifecycle(event),
                    None => Ok(()),
                }),
            );
            return Ok(());
        }
        let ctx = match &*self.phase.lock() {
            Phase::Ready(ctx) => Some(ctx.clone()),
            Phase::Destroyed => return Ok(()),
            Phase::Discovering => None,
        };
        match ctx {
            Some(ctx) => self.apply(event, &ctx),
            None if event == LifecycleEvent::Destroy => {
                tracing::debug!("{} destroyed before discovery finished", self.name);
                self.teardown();
                Ok(())
            }
            None => {
                self.replay.lock().push(event);
                Ok(())
            }
        }
    }

    fn apply(&self, event: LifecycleEvent, ctx: &Arc<ComponentContext<L::State>>) -> RillResult<()> {
        tracing::debug!(target: "rill::action", "{} {:?}", self.name, event);
        match event {
            LifecycleEvent::Start => self.scheduler.set_visible(true),
            LifecycleEvent::Stop => self.scheduler.set_visible(false),
            _ => {}
        }
        let action = event.to_action();
        ctx.dispatch_effect(action.clone())?;
        ctx.dispatch_to_children(action)?;
        if event == LifecycleEvent::Destroy {
            self.teardown();
        }
        Ok(())
    }

    /// Install the prepared page state and mount the root logic.
    fn commit(&self, prepared: PreparedState<L::State>) -> RillResult<()> {
        if !matches!(*self.phase.lock(), Phase::Discovering) {
            tracing::debug!("{} commit after teardown ignored", self.name);
            return Ok(());
        }
        let started = Instant::now();
        let graph = self.runtime.graph().clone();
        let (token, state) = prepared.commit(&mut graph.lock())?;
        {
            // a page has no parent: close its merge window right away
            let mut g = graph.lock();
            if g.begin_merge(token)? {
                g.end_merge(token);
            }
        }

        let store = PageStore::new(
            graph.ids().next_store(),
            graph.clone(),
            token,
            self.runtime.writer().clone(),
            self.scheduler.clone(),
        );
        let mut middleware: Vec<Arc<dyn Middleware>> = self.logic.middleware();
        if self.runtime.config().enable_action_log {
            middleware.insert(0, Arc::new(LoggingMiddleware));
        }
        store.apply_middleware(&middleware);

        let env = PageEnv {
            runtime: self.runtime.clone(),
            store: store.clone(),
            bus: self.bus.clone(),
            interceptors: self.interceptors.clone(),
        };
        let ctx = match ComponentContext::mount(&*self.logic, &env, token, Arc::new(state), None, None) {
            Ok(ctx) => ctx,
            Err(e) => {
                store.destroy();
                graph.lock().remove_container(token);
                return Err(e);
            }
        };
        *self.phase.lock() = Phase::Ready(ctx.clone());
        self.task.lock().take();
        tracing::trace!(
            target: "rill::perf",
            "{} committed in {}us",
            self.name,
            started.elapsed().as_micros()
        );

        let buffered = std::mem::take(&mut *self.replay.lock());
        for event in buffered {
            self.apply(event, &ctx)?;
        }
        Ok(())
    }

    /// Receiver of the page's bus node.
    fn receive(&self, action: &Action) {
        if let Some(handled) = self.interceptors.route(action) {
            tracing::trace!("{} routed interception to {} handlers", self.name, handled);
            return;
        }
        if action.kind() == inner::INSTALL_EXTRA {
            let Some(deps) = action
                .payload::<ExtraDependants<L::State>>()
                .and_then(ExtraDependants::take)
            else {
                tracing::warn!("{} got INSTALL_EXTRA for another state type", self.name);
                return;
            };
            if let Err(e) = self.install_extra(deps) {
                tracing::error!(target: "rill::error", "{} install_extra failed: {}", self.name, e);
            }
            return;
        }
        let Some(ctx) = self.context() else {
            tracing::debug!("{} not ready, dropping {}", self.name, action.kind());
            return;
        };
        ctx.deliver_effect(action);
        self.interceptors.handle(action, None);
    }

    fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Destroyed);
        if let Some(task) = self.task.lock().take() {
            task.cancel();
        }
        self.replay.lock().clear();
        self.scheduler.teardown();
        self.bus.clear_page_receiver();
        self.bus.detach();
        if let Phase::Ready(ctx) = previous {
            let token = ctx.token();
            ctx.teardown();
            ctx.store().destroy();
            let removed = self.runtime.graph().lock().remove_container(token);
            tracing::debug!("{} destroyed, {} root props removed", self.name, removed);
        }
    }
}

impl<L: Logic> Drop for Page<L> {
    fn drop(&mut self) {
        self.bus.detach();
    }
}

impl<L: Logic> fmt::Debug for Page<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("name", &self.name)
            .field("bus", &self.bus.id())
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect, Connector, InterceptorCollector, RuntimeConfig};
    use rill_bus::Dispatch;
    use rill_core::{ActionType, EffectCollector};
    use rill_state::{ContainerBuilder, MergeScope, Prop};
    use rill_store::ReducerCollector;
    use std::time::Duration;

    const SET_NUM: ActionType = ActionType::new("test.page.set_num");
    const PING: ActionType = ActionType::new("test.page.ping");
    const SELECTED: ActionType = ActionType::new("test.page.selected");

    type Log = Arc<Mutex<Vec<String>>>;

    struct Root {
        num: Prop<i32>,
    }

    impl State for Root {
        fn declare(b: &mut ContainerBuilder) -> Self {
            Root { num: b.prop("num", 0) }
        }
    }

    struct Leaf {
        num: Prop<i32>,
    }

    impl State for Leaf {
        fn declare(b: &mut ContainerBuilder) -> Self {
            Leaf { num: b.prop("num", 0) }
        }
    }

    struct LeafLogic {
        name: &'static str,
        log: Log,
    }

    impl Logic for LeafLogic {
        type State = Leaf;

        fn effects(&self, effects: &mut EffectCollector<ComponentContext<Leaf>>) {
            for ev in LifecycleEvent::ALL {
                let (log, name) = (self.log.clone(), self.name);
                effects.add(ev.action_type(), move |_, _| log.lock().push(format!("{name} {ev:?}")));
            }
            let (log, name) = (self.log.clone(), self.name);
            effects.add(PING, move |_, _| log.lock().push(format!("{name} ping")));
        }
    }

    struct Interested {
        log: Log,
    }

    impl Connector<Leaf, Root> for Interested {
        fn depend_parent_state(&self, scope: &mut MergeScope, child: &Leaf, parent: &Root) -> RillResult<()> {
            scope.bind(&child.num, &parent.num);
            Ok(())
        }

        fn interceptors(&self, interceptors: &mut InterceptorCollector<Leaf>) {
            let log = self.log.clone();
            interceptors.add(SELECTED, move |_, ctx| log.lock().push(format!("{} intercepted", ctx.token())));
        }
    }

    struct RootLogic {
        log: Log,
    }

    impl Logic for RootLogic {
        type State = Root;

        fn reducers(&self, reducers: &mut ReducerCollector<Root>) {
            reducers.add(SET_NUM, |s, w, a| w.set(&s.num, *a.payload::<i32>().unwrap_or(&0)));
        }

        fn effects(&self, effects: &mut EffectCollector<ComponentContext<Root>>) {
            let log = self.log.clone();
            effects.add(LifecycleEvent::Create.action_type(), move |_, _| log.lock().push("root Create".into()));
            let log = self.log.clone();
            effects.add(PING, move |_, _| log.lock().push("root ping".into()));
        }

        fn dependencies(&self, deps: &mut DependencyCollector<Root>) {
            let log = self.log.clone();
            deps.add("a", LeafLogic { name: "a", log: log.clone() }, Interested { log: log.clone() });
            deps.add("b", LeafLogic { name: "b", log: log.clone() }, Interested { log });
        }
    }

    fn page_with(config: RuntimeConfig) -> (Arc<Page<RootLogic>>, Log) {
        let runtime = Runtime::new(config).unwrap();
        let log: Log = Arc::default();
        let page = runtime.create_page(RootLogic { log: log.clone() }).unwrap();
        (page, log)
    }

    fn leaf(page: &Page<RootLogic>, key: &str) -> Arc<ComponentContext<Leaf>> {
        page.context().unwrap().child_context::<Leaf>(key).unwrap()
    }

    #[test]
    fn test_lifecycle_reaches_every_component() {
        let (page, log) = page_with(RuntimeConfig::default());
        page.on_create().unwrap();
        assert_eq!(*log.lock(), vec!["root Create", "a Create", "b Create"]);
        page.on_start().unwrap();
        assert!(page.scheduler().is_visible());
        page.on_stop().unwrap();
        assert!(!page.scheduler().is_visible());
    }

    #[test]
    fn test_parent_write_reaches_children() {
        let (page, _log) = page_with(RuntimeConfig::default());
        page.dispatch(Action::new(SET_NUM).with_payload(5i32)).unwrap();
        let a = leaf(&page, "a");
        assert_eq!(a.get(&a.state().num).unwrap(), 5);
        let b = leaf(&page, "b");
        assert_eq!(b.get(&b.state().num).unwrap(), 5);
    }

    #[test]
    fn test_parent_dispatch_requires_private() {
        let (page, log) = page_with(RuntimeConfig::default());
        let a = leaf(&page, "a");
        assert!(matches!(
            a.dispatch_to_parent(Action::new(PING)),
            Err(RillError::CrossScopeViolation { .. })
        ));
        assert!(log.lock().is_empty());
        assert!(a.dispatch_to_parent(Action::private(PING)).unwrap());
        assert_eq!(*log.lock(), vec!["root ping"]);

        let root = page.context().unwrap();
        assert_eq!(root.dispatch_to_children(Action::private(PING)).unwrap(), 2);
    }

    #[test]
    fn test_interceptor_excludes_publisher() {
        let (page, log) = page_with(RuntimeConfig::default());
        let a = leaf(&page, "a");
        let b = leaf(&page, "b");
        a.dispatch_effect(Action::new(SELECTED)).unwrap();
        assert_eq!(*log.lock(), vec![format!("{} intercepted", b.token())]);
    }

    #[test]
    fn test_broadcast_reaches_page_not_components() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let log: Log = Arc::default();
        let first = runtime.create_page(RootLogic { log: log.clone() }).unwrap();
        let _second = runtime.create_page(RootLogic { log: log.clone() }).unwrap();

        let a = leaf(&first, "a");
        assert_eq!(a.broadcast(Action::new(PING)), 2);
        assert_eq!(*log.lock(), vec!["root ping", "root ping"]);
    }

    #[test]
    fn test_background_discovery_replays_lifecycle() {
        let (page, log) = page_with(RuntimeConfig::default().with_discovery(DiscoveryMode::Background));
        page.on_create().unwrap();
        page.on_start().unwrap();
        assert!(log.lock().is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !page.is_ready() && Instant::now() < deadline {
            page.runtime().pump();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(page.is_ready());
        assert_eq!(log.lock()[..3], ["root Create", "a Create", "b Create"]);
        assert!(page.scheduler().is_visible());
    }

    #[test]
    fn test_destroy_before_commit_cancels() {
        let (page, log) = page_with(RuntimeConfig::default().with_discovery(DiscoveryMode::Background));
        page.on_destroy().unwrap();
        assert!(page.is_destroyed());
        std::thread::sleep(Duration::from_millis(20));
        page.runtime().pump();
        assert!(!page.is_ready());
        assert!(log.lock().is_empty());
        assert_eq!(page.runtime().graph().lock().container_count(), 0);
    }

    #[test]
    fn test_install_extra_skips_existing_keys() {
        let (page, log) = page_with(RuntimeConfig::default());
        let mut extra = DependencyCollector::<Root>::new();
        extra.add_logic("a", LeafLogic { name: "a2", log: log.clone() });
        extra.add(
            "c",
            LeafLogic { name: "c", log: log.clone() },
            connect(|scope: &mut MergeScope, child: &Leaf, parent: &Root| {
                scope.bind(&child.num, &parent.num);
                Ok(())
            }),
        );
        assert_eq!(page.install_extra(extra).unwrap(), 1);
        assert_eq!(page.context().unwrap().child_count(), 3);

        let mut late = DependencyCollector::<Root>::new();
        late.add_logic("d", LeafLogic { name: "d", log });
        page.bus().dispatch(&ExtraDependants::action(late)).unwrap();
        assert_eq!(page.context().unwrap().child_count(), 4);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (page, log) = page_with(RuntimeConfig::default());
        let runtime = page.runtime().clone();
        assert_eq!(runtime.root_bus().child_count(), 1);
        assert_eq!(page.interceptors().len(), 2);

        page.on_destroy().unwrap();
        assert!(log.lock().contains(&"a Destroy".to_string()));
        assert!(page.is_destroyed());
        assert_eq!(runtime.graph().lock().container_count(), 0);
        assert!(page.interceptors().is_empty());
        assert_eq!(runtime.root_bus().child_count(), 0);
        assert!(matches!(page.dispatch(Action::new(SET_NUM)), Err(RillError::NotInstalled(_))));
    }
}
