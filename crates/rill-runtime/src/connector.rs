//! Connectors
//!
//! A [`Connector`] is the stateless policy between a child component
//! and its parent: which child properties derive from parent or global
//! state, which external actions the child intercepts, and which
//! actions its reducers see.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use rill_core::{Action, ActionType, ContainerToken, DisposeBag, Disposer, RillResult};
use rill_bus::InterceptorManager;
use rill_state::{MergeScope, Prop, State};
use rill_store::{ChangeCallback, GlobalStore};

use crate::ComponentContext;

pub trait Connector<C: State, P: State>: Send + Sync + 'static {
    /// Runs once, inside the child's merge window. No arena lock is
    /// held, so stores may be read here.
    fn depend_parent_state(&self, _scope: &mut MergeScope, _child: &C, _parent: &P) -> RillResult<()> {
        Ok(())
    }

    /// Runs inside the merge window and again on every re-attach.
    fn depend_global_state(&self, _watcher: &mut GlobalWatcher<'_, C>) -> RillResult<()> {
        Ok(())
    }

    fn interceptors(&self, _interceptors: &mut InterceptorCollector<C>) {}

    /// Filter applied to the child's reducers inside the combined reducer.
    fn accepts(&self, _action: &Action) -> bool {
        true
    }
}

/// No dependencies, no interception
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConnector;

impl<C: State, P: State> Connector<C, P> for NoopConnector {}

/// Connector that only declares parent dependencies
pub struct ParentConnector<C, P, F> {
    bind: F,
    _marker: PhantomData<fn(&C, &P)>,
}

/// Build a connector from a parent-binding function.
pub fn connect<C, P, F>(bind: F) -> ParentConnector<C, P, F>
where
    C: State,
    P: State,
    F: Fn(&mut MergeScope, &C, &P) -> RillResult<()> + Send + Sync + 'static,
{
    ParentConnector {
        bind,
        _marker: PhantomData,
    }
}

impl<C, P, F> Connector<C, P> for ParentConnector<C, P, F>
where
    C: State,
    P: State,
    F: Fn(&mut MergeScope, &C, &P) -> RillResult<()> + Send + Sync + 'static,
{
    fn depend_parent_state(&self, scope: &mut MergeScope, child: &C, parent: &P) -> RillResult<()> {
        (self.bind)(scope, child, parent)
    }
}

// ----------------------------------------------------------------------
// Global dependencies
// ----------------------------------------------------------------------

/// A global store as seen by dependants
pub trait GlobalSource: Send + Sync {
    fn token(&self) -> ContainerToken;

    fn subscribe(&self, dependant: ContainerToken, callback: ChangeCallback) -> Disposer;
}

impl<S: State> GlobalSource for GlobalStore<S> {
    fn token(&self) -> ContainerToken {
        GlobalStore::token(self)
    }

    fn subscribe(&self, dependant: ContainerToken, callback: ChangeCallback) -> Disposer {
        self.observe_for(dependant, move |changed| callback(changed))
    }
}

/// Collects global bindings for one child container.
pub struct GlobalWatcher<'c, C> {
    scope: MergeScope,
    child: &'c C,
    sources: Vec<Arc<dyn GlobalSource>>,
}

impl<'c, C: State> GlobalWatcher<'c, C> {
    pub(crate) fn new(scope: MergeScope, child: &'c C) -> Self {
        GlobalWatcher {
            scope,
            child,
            sources: Vec::new(),
        }
    }

    pub fn child(&self) -> &C {
        self.child
    }

    pub fn token(&self) -> ContainerToken {
        self.scope.child()
    }

    /// `child = store.global`; the edge is tagged global and `child`
    /// becomes read-only for the component.
    pub fn watch<G: State, T: Any>(
        &mut self,
        store: &Arc<GlobalStore<G>>,
        child: &Prop<T>,
        global: &Prop<T>,
    ) -> bool {
        let declared = self.scope.bind(child, global);
        if !self.sources.iter().any(|s| s.token() == store.token()) {
            self.sources.push(store.clone());
        }
        declared
    }

    pub(crate) fn into_parts(self) -> (MergeScope, Vec<Arc<dyn GlobalSource>>) {
        (self.scope, self.sources)
    }
}

// ----------------------------------------------------------------------
// Interception
// ----------------------------------------------------------------------

pub type InterceptFn<C> = Arc<dyn Fn(&Action, &ComponentContext<C>) + Send + Sync>;

pub struct InterceptorCollector<C: State> {
    entries: Vec<(ActionType, InterceptFn<C>)>,
}

impl<C: State> InterceptorCollector<C> {
    pub fn new() -> Self {
        InterceptorCollector { entries: Vec::new() }
    }

    pub fn add<F>(&mut self, kind: ActionType, handler: F) -> &mut Self
    where
        F: Fn(&Action, &ComponentContext<C>) + Send + Sync + 'static,
    {
        self.entries.push((kind, Arc::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn register(self, manager: &InterceptorManager, ctx: &Arc<ComponentContext<C>>) -> DisposeBag {
        let mut bag = DisposeBag::new();
        for (kind, handler) in self.entries {
            let weak = Arc::downgrade(ctx);
            bag.push(manager.register(kind, ctx.token(), move |action| {
                if let Some(ctx) = weak.upgrade() {
                    handler(action, &ctx);
                }
            }));
        }
        bag
    }
}

impl<C: State> Default for InterceptorCollector<C> {
    fn default() -> Self {
        Self::new()
    }
}
