//! Store core - observers and precision fan-out
//!
//! Shared by page and global stores. Observers are keyed by container
//! token; a changed root property reaches an observer when the
//! observer owns it or owns one of its children.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::{ContainerToken, Disposer, PropId, StoreId};
use rill_state::{ChangedProp, SharedGraph};

pub type ChangeCallback = Arc<dyn Fn(&[ChangedProp]) + Send + Sync>;

#[derive(Clone)]
pub struct StoreObserver {
    pub token: ContainerToken,
    pub callback: ChangeCallback,
}

/// Store counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Actions run through the combined reducer
    pub dispatched: u64,
    /// Calls to update with at least one public change
    pub updates: u64,
    /// Observer callbacks fired
    pub notifications: u64,
}

pub struct StoreCore {
    id: StoreId,
    graph: SharedGraph,
    root: ContainerToken,
    observers: Arc<Mutex<Vec<(u64, StoreObserver)>>>,
    next_observer: AtomicU64,
    destroyed: AtomicBool,
    stats: Mutex<StoreStats>,
}

impl StoreCore {
    pub fn new(id: StoreId, graph: SharedGraph, root: ContainerToken) -> Self {
        StoreCore {
            id,
            graph,
            root,
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Token of the root container
    pub fn root(&self) -> ContainerToken {
        self.root
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn observe<F>(&self, token: ContainerToken, callback: F) -> Disposer
    where
        F: Fn(&[ChangedProp]) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Disposer::noop();
        }
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((
            id,
            StoreObserver {
                token,
                callback: Arc::new(callback),
            },
        ));
        let observers = Arc::downgrade(&self.observers);
        Disposer::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers.lock().retain(|(oid, _)| *oid != id);
            }
        })
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_observing(&self, token: ContainerToken) -> bool {
        self.observers.lock().iter().any(|(_, o)| o.token == token)
    }

    /// Propagate each root to its children, then notify every observer
    /// owning the root or one of its children. Returns the number of
    /// observers notified.
    pub fn fire(&self, roots: &[PropId]) -> usize {
        if roots.is_empty() || self.is_destroyed() {
            return 0;
        }
        let observers: Vec<StoreObserver> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        let deliveries: Vec<(ChangeCallback, Vec<ChangedProp>)> = {
            let mut graph = self.graph.lock();
            for root in roots {
                if let Err(e) = graph.propagate(*root) {
                    tracing::debug!("skip propagate of {:?}: {}", root, e);
                }
            }
            observers
                .iter()
                .filter_map(|obs| {
                    let changed: Vec<ChangedProp> = roots
                        .iter()
                        .filter_map(|root| {
                            let owner = graph.container_of(*root)?;
                            if owner == obs.token {
                                graph.describe(*root)
                            } else {
                                graph
                                    .child_for(*root, obs.token)
                                    .and_then(|child| graph.describe(child))
                            }
                        })
                        .collect();
                    (!changed.is_empty()).then(|| (obs.callback.clone(), changed))
                })
                .collect()
        };

        for (callback, changed) in &deliveries {
            callback(changed);
        }
        let mut stats = self.stats.lock();
        stats.updates += 1;
        stats.notifications += deliveries.len() as u64;
        deliveries.len()
    }

    pub fn note_dispatch(&self) {
        self.stats.lock().dispatched += 1;
    }

    pub fn stats(&self) -> StoreStats {
        *self.stats.lock()
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.observers.lock().clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
