//! Interceptor routing
//!
//! Each page owns an [`InterceptorManager`]: action type -> ordered list
//! of (owner, handler). Every non-private effect action a component
//! publishes is wrapped in an `INTERCEPT` action and routed here, so
//! siblings can react without the publisher knowing who listens. The
//! publisher itself is excluded.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::{inner, Action, ActionType, ContainerToken, Disposer};

pub type InterceptHandler = Arc<dyn Fn(&Action) + Send + Sync>;

/// Payload of an `inner::INTERCEPT` action
#[derive(Debug, Clone)]
pub struct InterceptorPayload {
    pub action: Action,
    pub exclude: Option<ContainerToken>,
}

#[derive(Clone)]
struct Entry {
    id: u64,
    owner: ContainerToken,
    handler: InterceptHandler,
}

#[derive(Default)]
struct Table {
    entries: HashMap<ActionType, Vec<Entry>>,
}

#[derive(Clone, Default)]
pub struct InterceptorManager {
    table: Arc<Mutex<Table>>,
    next_id: Arc<AtomicU64>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `kind` on behalf of `owner`. Handlers run in
    /// registration order.
    pub fn register<F>(&self, kind: ActionType, owner: ContainerToken, handler: F) -> Disposer
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.table
            .lock()
            .entries
            .entry(kind)
            .or_default()
            .push(Entry {
                id,
                owner,
                handler: Arc::new(handler),
            });
        let table = Arc::downgrade(&self.table);
        Disposer::new(move || {
            if let Some(table) = table.upgrade() {
                let mut table = table.lock();
                if let Some(list) = table.entries.get_mut(&kind) {
                    list.retain(|e| e.id != id);
                    if list.is_empty() {
                        table.entries.remove(&kind);
                    }
                }
            }
        })
    }

    /// Drop every handler owned by `owner`.
    pub fn remove_owner(&self, owner: ContainerToken) -> usize {
        let mut table = self.table.lock();
        let mut removed = 0;
        table.entries.retain(|_, list| {
            let before = list.len();
            list.retain(|e| e.owner != owner);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    pub fn intercepts(&self, kind: ActionType) -> bool {
        self.table.lock().entries.contains_key(&kind)
    }

    pub fn owners(&self, kind: ActionType) -> Vec<ContainerToken> {
        self.table
            .lock()
            .entries
            .get(&kind)
            .map(|list| list.iter().map(|e| e.owner).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap a published action for routing through a page.
    pub fn wrap_for_interception(action: Action, publisher: Option<ContainerToken>) -> Action {
        Action::private(inner::INTERCEPT).with_payload(InterceptorPayload {
            action,
            exclude: publisher,
        })
    }

    /// Run every handler registered for `action`, skipping `exclude`.
    /// Returns the number of handlers invoked.
    pub fn handle(&self, action: &Action, exclude: Option<ContainerToken>) -> usize {
        let entries: Vec<Entry> = self
            .table
            .lock()
            .entries
            .get(&action.kind())
            .cloned()
            .unwrap_or_default();
        let mut invoked = 0;
        for entry in entries.iter().filter(|e| Some(e.owner) != exclude) {
            (entry.handler)(action);
            invoked += 1;
        }
        invoked
    }

    /// Unwrap an `INTERCEPT` action and route it. Other actions are
    /// ignored and return `None`.
    pub fn route(&self, action: &Action) -> Option<usize> {
        if action.kind() != inner::INTERCEPT {
            return None;
        }
        let payload = action.payload::<InterceptorPayload>()?;
        Some(self.handle(&payload.action, payload.exclude))
    }
}

impl fmt::Debug for InterceptorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        let mut kinds: Vec<_> = table.entries.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("InterceptorManager").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECT: ActionType = ActionType::new("test.select");

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Fn(&Action) + Send + Sync {
        let log = log.clone();
        move |_| log.lock().push(name)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let manager = InterceptorManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = manager.register(SELECT, ContainerToken::new(1), recorder(&log, "a"));
        let _b = manager.register(SELECT, ContainerToken::new(2), recorder(&log, "b"));

        assert_eq!(manager.handle(&Action::new(SELECT), None), 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_publisher_is_excluded() {
        let manager = InterceptorManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let publisher = ContainerToken::new(1);
        let _a = manager.register(SELECT, publisher, recorder(&log, "publisher"));
        let _b = manager.register(SELECT, ContainerToken::new(2), recorder(&log, "sibling"));

        let wrapped = InterceptorManager::wrap_for_interception(Action::new(SELECT), Some(publisher));
        assert!(wrapped.is_private());
        assert_eq!(manager.route(&wrapped), Some(1));
        assert_eq!(*log.lock(), vec!["sibling"]);
    }

    #[test]
    fn test_route_ignores_plain_actions() {
        let manager = InterceptorManager::new();
        assert_eq!(manager.route(&Action::new(SELECT)), None);
    }

    #[test]
    fn test_dispose_and_remove_owner() {
        let manager = InterceptorManager::new();
        let a = manager.register(SELECT, ContainerToken::new(1), |_| {});
        let _b = manager.register(SELECT, ContainerToken::new(2), |_| {});
        let _c = manager.register(ActionType::new("test.other"), ContainerToken::new(2), |_| {});
        assert_eq!(manager.len(), 3);

        a.dispose();
        assert_eq!(manager.owners(SELECT), vec![ContainerToken::new(2)]);
        assert_eq!(manager.remove_owner(ContainerToken::new(2)), 2);
        assert!(manager.is_empty());
        assert!(!manager.intercepts(SELECT));
    }
}
