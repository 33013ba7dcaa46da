//! Dispatch Bus - Hierarchical pub/sub for effect messages
//!
//! The bus is a tree with one process-wide root and one node per page.
//! There are two delivery modes:
//!
//! - Direct dispatch between a component and its declared parent or
//!   children. Only private actions may cross that boundary.
//! - Broadcast. It always climbs to the root and fans out one level to
//!   the page receiver of every attached node, never to a component.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rill_core::{Action, BusId, Disposer, IdAllocator, RillError, RillResult};

pub type DispatchTarget = Arc<dyn Fn(&Action) + Send + Sync>;

/// Anything that accepts effect actions.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: &Action) -> RillResult<()>;
}

/// Reject an action that is about to cross a component boundary
/// without being marked private.
pub fn ensure_private(action: &Action) -> RillResult<()> {
    if action.is_private() {
        return Ok(());
    }
    tracing::warn!(
        "dropping {}: only private actions may cross component scope",
        action.kind()
    );
    Err(RillError::CrossScopeViolation {
        action: action.kind().name(),
    })
}

struct BusNode {
    id: BusId,
    name: &'static str,
    parent: Mutex<Weak<BusNode>>,
    children: Mutex<Vec<Arc<BusNode>>>,
    receiver: Mutex<Option<DispatchTarget>>,
    targets: Mutex<Vec<(u64, DispatchTarget)>>,
    next_target: AtomicU64,
}

impl BusNode {
    fn new(id: BusId, name: &'static str) -> Arc<Self> {
        Arc::new(BusNode {
            id,
            name,
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            receiver: Mutex::new(None),
            targets: Mutex::new(Vec::new()),
            next_target: AtomicU64::new(1),
        })
    }

    fn receive(&self, action: &Action) -> bool {
        let receiver = self.receiver.lock().clone();
        match receiver {
            Some(receiver) => {
                receiver(action);
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct DispatchBus {
    node: Arc<BusNode>,
}

impl DispatchBus {
    /// The process-wide root.
    pub fn root() -> Self {
        DispatchBus {
            node: BusNode::new(BusId::ROOT, "root"),
        }
    }

    /// A detached node for one page.
    pub fn page(ids: &IdAllocator, name: &'static str) -> Self {
        DispatchBus {
            node: BusNode::new(ids.next_bus(), name),
        }
    }

    pub fn id(&self) -> BusId {
        self.node.id
    }

    pub fn name(&self) -> &'static str {
        self.node.name
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.lock().upgrade().is_none()
    }

    pub fn parent(&self) -> Option<DispatchBus> {
        self.node.parent.lock().upgrade().map(|node| DispatchBus { node })
    }

    pub fn child_count(&self) -> usize {
        self.node.children.lock().len()
    }

    /// The page that receives broadcasts and bus-level dispatches.
    pub fn set_page_receiver<F>(&self, receiver: F)
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        *self.node.receiver.lock() = Some(Arc::new(receiver));
    }

    pub fn clear_page_receiver(&self) {
        *self.node.receiver.lock() = None;
    }

    /// Register an extra target on this node.
    pub fn register<F>(&self, target: F) -> Disposer
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        let id = self.node.next_target.fetch_add(1, Ordering::Relaxed);
        self.node.targets.lock().push((id, Arc::new(target)));
        let node = Arc::downgrade(&self.node);
        Disposer::new(move || {
            if let Some(node) = node.upgrade() {
                node.targets.lock().retain(|(tid, _)| *tid != id);
            }
        })
    }

    pub fn target_count(&self) -> usize {
        self.node.targets.lock().len()
    }

    /// Hang `child` under this node; re-attaching moves it.
    pub fn attach(&self, child: &DispatchBus) {
        child.detach();
        *child.node.parent.lock() = Arc::downgrade(&self.node);
        self.node.children.lock().push(child.node.clone());
        tracing::debug!("bus {:?} ({}) attached under {:?}", child.id(), child.name(), self.id());
    }

    /// Remove this node from its parent. Returns whether it was attached.
    pub fn detach(&self) -> bool {
        let parent = std::mem::take(&mut *self.node.parent.lock());
        match parent.upgrade() {
            Some(parent) => {
                parent
                    .children
                    .lock()
                    .retain(|c| !Arc::ptr_eq(c, &self.node));
                true
            }
            None => false,
        }
    }

    fn top(&self) -> Arc<BusNode> {
        let mut node = self.node.clone();
        loop {
            let parent = node.parent.lock().upgrade();
            match parent {
                Some(p) => node = p,
                None => return node,
            }
        }
    }

    /// Deliver `action` to every page receiver hanging off the root.
    /// Returns the number of pages reached.
    pub fn broadcast(&self, action: &Action) -> usize {
        let root = self.top();
        let pages: Vec<Arc<BusNode>> = root.children.lock().clone();
        tracing::debug!(target: "rill::action", "broadcast {} to {} pages", action.kind(), pages.len());
        pages.iter().filter(|page| page.receive(action)).count()
    }
}

impl Dispatch for DispatchBus {
    /// Deliver to this node's page receiver and registered targets.
    fn dispatch(&self, action: &Action) -> RillResult<()> {
        self.node.receive(action);
        let targets: Vec<DispatchTarget> = self
            .node
            .targets
            .lock()
            .iter()
            .map(|(_, t)| t.clone())
            .collect();
        for target in targets {
            target(action);
        }
        Ok(())
    }
}

impl fmt::Debug for DispatchBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchBus")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("children", &self.child_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::ActionType;
    use std::sync::atomic::AtomicUsize;

    const PING: ActionType = ActionType::new("test.ping");

    fn counting(bus: &DispatchBus) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.set_page_receiver(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn test_broadcast_reaches_every_page_once() {
        let ids = IdAllocator::new();
        let root = DispatchBus::root();
        let a = DispatchBus::page(&ids, "a");
        let b = DispatchBus::page(&ids, "b");
        root.attach(&a);
        root.attach(&b);
        let (ha, hb) = (counting(&a), counting(&b));

        assert_eq!(a.broadcast(&Action::new(PING)), 2);
        assert_eq!(ha.load(Ordering::SeqCst), 1);
        assert_eq!(hb.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_skips_targets() {
        let ids = IdAllocator::new();
        let root = DispatchBus::root();
        let page = DispatchBus::page(&ids, "page");
        root.attach(&page);
        let target_hits = Arc::new(AtomicUsize::new(0));
        let t = target_hits.clone();
        let _d = page.register(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        page.broadcast(&Action::new(PING));
        assert_eq!(target_hits.load(Ordering::SeqCst), 0);

        page.dispatch(&Action::new(PING)).unwrap();
        assert_eq!(target_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_page_misses_broadcast() {
        let ids = IdAllocator::new();
        let root = DispatchBus::root();
        let page = DispatchBus::page(&ids, "page");
        root.attach(&page);
        let hits = counting(&page);
        assert!(page.detach());
        assert!(!page.detach());
        assert_eq!(root.child_count(), 0);
        assert_eq!(root.broadcast(&Action::new(PING)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_disposer() {
        let root = DispatchBus::root();
        let d = root.register(|_| {});
        assert_eq!(root.target_count(), 1);
        d.dispose();
        assert_eq!(root.target_count(), 0);
    }

    #[test]
    fn test_ensure_private() {
        assert!(ensure_private(&Action::private(PING)).is_ok());
        assert_eq!(
            ensure_private(&Action::new(PING)),
            Err(RillError::CrossScopeViolation { action: "test.ping" })
        );
    }
}
