//! Dependants
//!
//! A [`Dependant`] is the live binding of one child component: its
//! logic, its [`Connector`] and where it is in the
//! install -> attach/show -> hide/detach -> destroy cycle.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use rill_core::{Action, ContainerToken, DisposeBag, RillError, RillResult};
use rill_state::{ChangedProp, ContainerKind, MergeScope, PreparedState, SharedGraph, State};
use rill_store::ActionFilter;

use crate::{
    ComponentContext, Connector, EffectSink, GlobalSource, GlobalWatcher, InterceptorCollector,
    Logic, NoopConnector, PageEnv,
};

/// What a parent hands to the children it installs
pub struct InstallEnv<P: State> {
    pub(crate) page: PageEnv,
    pub(crate) parent_token: ContainerToken,
    pub(crate) parent_state: Arc<P>,
    pub(crate) parent_sink: Weak<dyn EffectSink>,
}

impl<P: State> InstallEnv<P> {
    pub fn parent_token(&self) -> ContainerToken {
        self.parent_token
    }

    pub fn parent_state(&self) -> &Arc<P> {
        &self.parent_state
    }
}

/// Object-safe view of a [`Dependant`], keyed by its parent's state
pub trait DependantHandle<P: State>: Send + Sync {
    fn key(&self) -> &'static str;

    /// Create the child container, run the merge window and mount the
    /// child. A second call is a no-op.
    fn install(&self, env: &InstallEnv<P>) -> RillResult<()>;

    /// Subscribe to the global stores the child depends on. After a
    /// detach this re-creates the global edges and pushes a full update.
    fn attach(&self) -> RillResult<()>;

    fn show(&self);

    /// Suspend observation: changes reach neither the child's view nor
    /// its props watchers until `show`, which pushes a full update.
    fn hide(&self);

    /// Remove global edges and subscriptions; the child keeps its
    /// parent links and its own state.
    fn detach(&self);

    fn destroy(&self);

    fn is_installed(&self) -> bool;

    fn is_attached(&self) -> bool;

    fn is_visible(&self) -> bool;

    fn token(&self) -> Option<ContainerToken>;

    fn sink(&self) -> Option<Arc<dyn EffectSink>>;

    /// The child's `Arc<ComponentContext<_>>`, for typed lookup.
    fn context_any(&self) -> Option<Arc<dyn Any + Send + Sync>>;
}

struct Installed<C: State> {
    ctx: Arc<ComponentContext<C>>,
    graph: SharedGraph,
    globals: DisposeBag,
    sources: Vec<Arc<dyn GlobalSource>>,
    attached: bool,
    ever_attached: bool,
    visible: bool,
    ever_shown: bool,
}

pub struct Dependant<L: Logic, P: State> {
    key: &'static str,
    logic: Arc<L>,
    connector: Arc<dyn Connector<L::State, P>>,
    slot: Mutex<Option<Installed<L::State>>>,
    destroyed: AtomicBool,
}

impl<L: Logic, P: State> Dependant<L, P> {
    pub fn new<K>(key: &'static str, logic: L, connector: K) -> Self
    where
        K: Connector<L::State, P>,
    {
        Dependant {
            key,
            logic: Arc::new(logic),
            connector: Arc::new(connector),
            slot: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> Option<Arc<ComponentContext<L::State>>> {
        self.slot.lock().as_ref().map(|i| i.ctx.clone())
    }

    /// Merge window of a freshly committed child. Connector code runs
    /// with the arena unlocked; the declared bindings are applied under
    /// one lock.
    fn merge(
        &self,
        graph: &SharedGraph,
        token: ContainerToken,
        child: &L::State,
        parent: &P,
    ) -> RillResult<Vec<Arc<dyn GlobalSource>>> {
        if !graph.lock().begin_merge(token)? {
            return Ok(Vec::new());
        }
        let merged = self.declare(token, child, parent).and_then(|(scope, sources)| {
            scope.apply(&mut graph.lock())?;
            Ok(sources)
        });
        graph.lock().end_merge(token);
        merged
    }

    fn declare(
        &self,
        token: ContainerToken,
        child: &L::State,
        parent: &P,
    ) -> RillResult<(MergeScope, Vec<Arc<dyn GlobalSource>>)> {
        let mut scope = MergeScope::new(token);
        self.connector.depend_parent_state(&mut scope, child, parent)?;
        let mut watcher = GlobalWatcher::new(scope, child);
        self.connector.depend_global_state(&mut watcher)?;
        Ok(watcher.into_parts())
    }

    fn subscribe_globals(&self, installed: &mut Installed<L::State>) {
        let token = installed.ctx.token();
        for source in &installed.sources {
            if !installed.graph.lock().depends_on_global(token, source.token()) {
                continue;
            }
            let weak = Arc::downgrade(&installed.ctx);
            installed.globals.push(source.subscribe(
                token,
                Arc::new(move |changed: &[ChangedProp]| {
                    if let Some(ctx) = weak.upgrade() {
                        ctx.on_changes(changed);
                    }
                }),
            ));
        }
    }
}

impl<L: Logic, P: State> DependantHandle<P> for Dependant<L, P> {
    fn key(&self) -> &'static str {
        self.key
    }

    fn install(&self, env: &InstallEnv<P>) -> RillResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RillError::NotInstalled(self.key));
        }
        if self.slot.lock().is_some() {
            return Ok(());
        }
        let started = Instant::now();
        let graph = env.page.store.graph().clone();
        let (token, state) = PreparedState::<L::State>::prepare(graph.ids(), ContainerKind::Component)
            .commit(&mut graph.lock())?;

        let sources = match self.merge(&graph, token, &state, &env.parent_state) {
            Ok(sources) => sources,
            Err(e) => {
                graph.lock().remove_container(token);
                return Err(e);
            }
        };

        let connector = self.connector.clone();
        let filter: ActionFilter = Arc::new(move |action: &Action| connector.accepts(action));
        let ctx = match ComponentContext::mount(
            &*self.logic,
            &env.page,
            token,
            Arc::new(state),
            Some(env.parent_sink.clone()),
            Some(filter),
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                graph.lock().remove_container(token);
                return Err(e);
            }
        };

        let mut interceptors = InterceptorCollector::new();
        self.connector.interceptors(&mut interceptors);
        ctx.adopt(interceptors.register(&env.page.interceptors, &ctx));

        *self.slot.lock() = Some(Installed {
            ctx,
            graph,
            globals: DisposeBag::new(),
            sources,
            attached: false,
            ever_attached: false,
            visible: false,
            ever_shown: false,
        });
        tracing::trace!(
            target: "rill::perf",
            "installed `{}` under {} in {}us",
            self.key,
            env.parent_token,
            started.elapsed().as_micros()
        );
        Ok(())
    }

    fn attach(&self) -> RillResult<()> {
        let (ctx, graph, relink) = {
            let slot = self.slot.lock();
            let installed = slot.as_ref().ok_or(RillError::NotInstalled(self.key))?;
            if installed.attached {
                return Ok(());
            }
            (installed.ctx.clone(), installed.graph.clone(), installed.ever_attached)
        };
        let sources = if relink {
            let mut watcher = GlobalWatcher::new(MergeScope::relink(ctx.token()), &**ctx.state());
            self.connector.depend_global_state(&mut watcher)?;
            let (scope, sources) = watcher.into_parts();
            scope.apply(&mut graph.lock())?;
            Some(sources)
        } else {
            None
        };

        let mut slot = self.slot.lock();
        let installed = slot.as_mut().ok_or(RillError::NotInstalled(self.key))?;
        if installed.attached {
            return Ok(());
        }
        if let Some(sources) = sources {
            installed.sources = sources;
        }
        self.subscribe_globals(installed);
        if installed.ever_attached {
            installed.ctx.request_full_update();
        }
        installed.attached = true;
        installed.ever_attached = true;
        Ok(())
    }

    fn show(&self) {
        let mut slot = self.slot.lock();
        let Some(installed) = slot.as_mut() else {
            return;
        };
        if installed.visible {
            return;
        }
        installed.visible = true;
        installed.ctx.set_visible(true);
        if installed.ever_shown {
            installed.ctx.request_full_update();
        }
        installed.ever_shown = true;
    }

    fn hide(&self) {
        if let Some(installed) = self.slot.lock().as_mut() {
            installed.visible = false;
            installed.ctx.set_visible(false);
        }
    }

    fn detach(&self) {
        let mut slot = self.slot.lock();
        let Some(installed) = slot.as_mut() else {
            return;
        };
        if !installed.attached {
            return;
        }
        let token = installed.ctx.token();
        let unlinked = installed.graph.lock().unlink_global(token);
        installed.globals.dispose_all();
        installed.attached = false;
        installed.visible = false;
        installed.ctx.set_visible(false);
        tracing::debug!("detached `{}`, {} global edges removed", self.key, unlinked);
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.detach();
        let Some(installed) = self.slot.lock().take() else {
            return;
        };
        let token = installed.ctx.token();
        installed.ctx.teardown();
        let removed = installed.graph.lock().remove_container(token);
        tracing::debug!("destroyed `{}` ({}), {} props removed", self.key, token, removed);
    }

    fn is_installed(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn is_attached(&self) -> bool {
        self.slot.lock().as_ref().map_or(false, |i| i.attached)
    }

    fn is_visible(&self) -> bool {
        self.slot.lock().as_ref().map_or(false, |i| i.visible)
    }

    fn token(&self) -> Option<ContainerToken> {
        self.slot.lock().as_ref().map(|i| i.ctx.token())
    }

    fn sink(&self) -> Option<Arc<dyn EffectSink>> {
        let ctx = self.context()?;
        Some(ctx)
    }

    fn context_any(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        let ctx = self.context()?;
        Some(ctx)
    }
}

impl<L: Logic, P: State> fmt::Debug for Dependant<L, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependant")
            .field("key", &self.key)
            .field("installed", &self.is_installed())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Children declared by a parent logic
pub struct DependencyCollector<P: State> {
    entries: Vec<Arc<dyn DependantHandle<P>>>,
}

impl<P: State> DependencyCollector<P> {
    pub fn new() -> Self {
        DependencyCollector { entries: Vec::new() }
    }

    pub fn add<L, K>(&mut self, key: &'static str, logic: L, connector: K) -> &mut Self
    where
        L: Logic,
        K: Connector<L::State, P>,
    {
        self.push(Arc::new(Dependant::<L, P>::new(key, logic, connector)))
    }

    /// A child with no dependencies on its parent
    pub fn add_logic<L: Logic>(&mut self, key: &'static str, logic: L) -> &mut Self {
        self.add(key, logic, NoopConnector)
    }

    /// First declaration of a key wins.
    pub fn push(&mut self, handle: Arc<dyn DependantHandle<P>>) -> &mut Self {
        if self.entries.iter().any(|e| e.key() == handle.key()) {
            tracing::warn!("dependency `{}` declared twice, keeping the first", handle.key());
            return self;
        }
        self.entries.push(handle);
        self
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<Arc<dyn DependantHandle<P>>> {
        self.entries
    }
}

impl<P: State> Default for DependencyCollector<P> {
    fn default() -> Self {
        Self::new()
    }
}
