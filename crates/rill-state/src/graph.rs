//! Reactive property graph
//!
//! All properties of one runtime live in a single arena keyed by
//! [`PropId`]. Edges are ids, so teardown removes entries instead of
//! chasing references.
//!
//! Invariants:
//! - a property has at most one parent edge, attached once
//! - a parent edge always points at an ultimate root (chains are
//!   flattened at link time, so propagation is one hop)
//! - a root owned by a global container tags every edge onto it as
//!   global-sourced, and such children reject component writes
//! - at most one write session is open system-wide
//! - a property is private iff it has neither parent nor children

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rill_core::{ContainerToken, IdAllocator, PropId, RillError, RillResult, Value};

use crate::builder::PreparedContainer;
use crate::snapshot::StateSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Page,
    Component,
    Global,
}

/// Origin of a parent edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeSource {
    ParentComponent,
    /// Root lives in the global container with this token
    GlobalStore(ContainerToken),
}

impl EdgeSource {
    #[inline]
    pub fn is_global(&self) -> bool {
        matches!(self, EdgeSource::GlobalStore(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParentEdge {
    pub prop: PropId,
    pub source: EdgeSource,
}

/// One-shot merge window of a container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergePhase {
    #[default]
    Pending,
    Merging,
    Merged,
}

/// A change as seen by an observer: the observer's own copy of the
/// property and the value it now holds.
#[derive(Clone, Debug)]
pub struct ChangedProp {
    pub id: PropId,
    pub key: &'static str,
    pub value: Value,
}

impl ChangedProp {
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.value.get::<T>()
    }
}

#[derive(Debug)]
pub struct PropNode {
    key: &'static str,
    container: ContainerToken,
    value: Value,
    type_id: TypeId,
    parent: Option<ParentEdge>,
    children: BTreeMap<ContainerToken, PropId>,
    notify_initial: bool,
}

impl PropNode {
    fn new(key: &'static str, container: ContainerToken, value: Value, notify_initial: bool) -> Self {
        PropNode {
            key,
            container,
            type_id: value.type_id(),
            value,
            parent: None,
            children: BTreeMap::new(),
            notify_initial,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn container(&self) -> ContainerToken {
        self.container
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    pub fn parent(&self) -> Option<ParentEdge> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (ContainerToken, PropId)> + '_ {
        self.children.iter().map(|(t, p)| (*t, *p))
    }

    /// UI properties push their initial value on first render
    pub fn notify_initial(&self) -> bool {
        self.notify_initial
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        self.parent.is_none() && self.children.is_empty()
    }
}

#[derive(Debug)]
struct ContainerMeta {
    kind: ContainerKind,
    name: &'static str,
    keys: HashMap<&'static str, PropId>,
    order: Vec<PropId>,
    merge: MergePhase,
    /// Global containers this container has edges into
    global_sources: HashSet<ContainerToken>,
    /// For global containers: containers with edges into this one
    dependents: HashSet<ContainerToken>,
}

impl ContainerMeta {
    fn new(kind: ContainerKind, name: &'static str) -> Self {
        ContainerMeta {
            kind,
            name,
            keys: HashMap::new(),
            order: Vec::new(),
            merge: MergePhase::Pending,
            global_sources: HashSet::new(),
            dependents: HashSet::new(),
        }
    }
}

/// The property arena
#[derive(Debug)]
pub struct PropGraph {
    ids: Arc<IdAllocator>,
    props: HashMap<PropId, PropNode>,
    containers: HashMap<ContainerToken, ContainerMeta>,
    session: Option<ContainerToken>,
}

impl PropGraph {
    pub fn new() -> Self {
        Self::with_ids(Arc::new(IdAllocator::new()))
    }

    pub fn with_ids(ids: Arc<IdAllocator>) -> Self {
        PropGraph {
            ids,
            props: HashMap::new(),
            containers: HashMap::new(),
            session: None,
        }
    }

    pub fn ids(&self) -> &Arc<IdAllocator> {
        &self.ids
    }

    /// Number of live properties
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    /// Create an empty container; properties are added with [`add_prop`](Self::add_prop).
    pub fn create_container(&mut self, kind: ContainerKind, name: &'static str) -> ContainerToken {
        let token = self.ids.next_container();
        self.containers.insert(token, ContainerMeta::new(kind, name));
        token
    }

    /// Commit a container prepared by a [`ContainerBuilder`](crate::ContainerBuilder).
    pub fn install(&mut self, prepared: PreparedContainer) -> RillResult<ContainerToken> {
        let PreparedContainer {
            token,
            kind,
            name,
            props,
            error,
        } = prepared;
        if let Some(err) = error {
            return Err(err);
        }

        let mut meta = ContainerMeta::new(kind, name);
        for p in props {
            meta.keys.insert(p.key, p.id);
            meta.order.push(p.id);
            self.props
                .insert(p.id, PropNode::new(p.key, token, p.value, p.notify_initial));
        }
        self.containers.insert(token, meta);
        Ok(token)
    }

    pub fn add_prop(
        &mut self,
        container: ContainerToken,
        key: &'static str,
        value: Value,
        notify_initial: bool,
    ) -> RillResult<PropId> {
        let meta = self
            .containers
            .get_mut(&container)
            .ok_or(RillError::ContainerNotFound(container))?;
        if meta.keys.contains_key(key) {
            return Err(RillError::DuplicateKey { key, container });
        }
        let id = self.ids.next_prop();
        meta.keys.insert(key, id);
        meta.order.push(id);
        self.props
            .insert(id, PropNode::new(key, container, value, notify_initial));
        Ok(id)
    }

    pub fn contains_container(&self, token: ContainerToken) -> bool {
        self.containers.contains_key(&token)
    }

    pub fn container_kind(&self, token: ContainerToken) -> Option<ContainerKind> {
        self.containers.get(&token).map(|m| m.kind)
    }

    pub fn container_name(&self, token: ContainerToken) -> Option<&'static str> {
        self.containers.get(&token).map(|m| m.name)
    }

    /// Properties of a container in declaration order
    pub fn props_of(&self, token: ContainerToken) -> Vec<PropId> {
        self.containers
            .get(&token)
            .map(|m| m.order.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, token: ContainerToken, key: &str) -> Option<PropId> {
        self.containers.get(&token).and_then(|m| m.keys.get(key).copied())
    }

    /// Remove a container and every property it owns. Parent edges are
    /// detached; children of removed properties become roots.
    pub fn remove_container(&mut self, token: ContainerToken) -> usize {
        let order = match self.containers.get(&token) {
            Some(meta) => meta.order.clone(),
            None => return 0,
        };
        if self.session == Some(token) {
            self.session = None;
        }

        for id in &order {
            self.unlink(*id);
            let orphans: Vec<PropId> = self
                .props
                .get(id)
                .map(|n| n.children.values().copied().collect())
                .unwrap_or_default();
            for orphan in orphans {
                self.unlink(orphan);
            }
        }
        for id in &order {
            self.props.remove(id);
        }

        if let Some(meta) = self.containers.remove(&token) {
            for global in &meta.global_sources {
                if let Some(g) = self.containers.get_mut(global) {
                    g.dependents.remove(&token);
                }
            }
            for dependent in &meta.dependents {
                if let Some(d) = self.containers.get_mut(dependent) {
                    d.global_sources.remove(&token);
                }
            }
        }
        order.len()
    }

    // ------------------------------------------------------------------
    // Merge window
    // ------------------------------------------------------------------

    /// Opens the merge window. Returns `false` if it was opened before.
    pub fn begin_merge(&mut self, token: ContainerToken) -> RillResult<bool> {
        let meta = self
            .containers
            .get_mut(&token)
            .ok_or(RillError::ContainerNotFound(token))?;
        match meta.merge {
            MergePhase::Pending => {
                meta.merge = MergePhase::Merging;
                Ok(true)
            }
            MergePhase::Merging | MergePhase::Merged => Ok(false),
        }
    }

    pub fn end_merge(&mut self, token: ContainerToken) {
        if let Some(meta) = self.containers.get_mut(&token) {
            if meta.merge == MergePhase::Merging {
                meta.merge = MergePhase::Merged;
            }
        }
    }

    pub fn merge_phase(&self, token: ContainerToken) -> Option<MergePhase> {
        self.containers.get(&token).map(|m| m.merge)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn node(&self, id: PropId) -> RillResult<&PropNode> {
        self.props.get(&id).ok_or(RillError::PropNotFound(id))
    }

    pub fn contains(&self, id: PropId) -> bool {
        self.props.contains_key(&id)
    }

    pub fn read(&self, id: PropId) -> RillResult<&Value> {
        self.node(id).map(|n| &n.value)
    }

    pub fn get<T: Any + Clone>(&self, id: PropId) -> RillResult<T> {
        let node = self.node(id)?;
        node.value.get::<T>().ok_or(RillError::TypeMismatch {
            key: node.key,
            expected: std::any::type_name::<T>(),
            found: node.value.type_name(),
        })
    }

    pub fn container_of(&self, id: PropId) -> Option<ContainerToken> {
        self.props.get(&id).map(|n| n.container)
    }

    /// Missing properties count as private: nothing can observe them.
    pub fn is_private(&self, id: PropId) -> bool {
        self.props.get(&id).map_or(true, PropNode::is_private)
    }

    pub fn describe(&self, id: PropId) -> Option<ChangedProp> {
        self.props.get(&id).map(|n| ChangedProp {
            id,
            key: n.key,
            value: n.value.clone(),
        })
    }

    /// Read-only copy of a container, detached from the graph
    pub fn snapshot(&self, token: ContainerToken) -> RillResult<StateSnapshot> {
        let meta = self
            .containers
            .get(&token)
            .ok_or(RillError::ContainerNotFound(token))?;
        let entries = meta
            .order
            .iter()
            .filter_map(|id| self.props.get(id).map(|n| (*id, n.key, n.value.clone())))
            .collect();
        Ok(StateSnapshot::new(token, meta.name, entries))
    }

    // ------------------------------------------------------------------
    // Write sessions
    // ------------------------------------------------------------------

    pub fn open_session(&mut self, token: ContainerToken) -> RillResult<()> {
        if !self.containers.contains_key(&token) {
            return Err(RillError::ContainerNotFound(token));
        }
        if let Some(open) = self.session {
            return Err(RillError::ProxyBusy(open));
        }
        self.session = Some(token);
        Ok(())
    }

    pub fn close_session(&mut self, token: ContainerToken) {
        if self.session == Some(token) {
            self.session = None;
        }
    }

    pub fn session(&self) -> Option<ContainerToken> {
        self.session
    }

    /// Component write. Legal only inside the owner's open session and
    /// never on a global-sourced property.
    pub fn write(&mut self, id: PropId, value: Value) -> RillResult<()> {
        let session = self.session;
        let node = self.props.get_mut(&id).ok_or(RillError::PropNotFound(id))?;
        if session != Some(node.container) {
            return Err(RillError::WriteWithoutProxy { key: node.key });
        }
        if node.parent.map_or(false, |e| e.source.is_global()) {
            return Err(RillError::MutateGlobalDependency { key: node.key });
        }
        if value.type_id() != node.type_id {
            return Err(RillError::TypeMismatch {
                key: node.key,
                expected: node.value.type_name(),
                found: value.type_name(),
            });
        }
        node.value = value;
        Ok(())
    }

    /// Runtime-internal sync of a value; bypasses session and source checks.
    pub fn inner_set(&mut self, id: PropId, value: Value) -> RillResult<()> {
        let node = self.props.get_mut(&id).ok_or(RillError::PropNotFound(id))?;
        if value.type_id() != node.type_id {
            return Err(RillError::TypeMismatch {
                key: node.key,
                expected: node.value.type_name(),
                found: value.type_name(),
            });
        }
        node.value = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub fn resolve_root(&self, id: PropId) -> PropId {
        let mut current = id;
        let mut hops = 0usize;
        while let Some(edge) = self.props.get(&current).and_then(|n| n.parent) {
            current = edge.prop;
            hops += 1;
            if hops > self.props.len() {
                break;
            }
        }
        current
    }

    /// Link `child` under the ultimate root of `parent`.
    ///
    /// Returns `Ok(false)` when `child` is already linked. The edge is
    /// tagged global-sourced when the root lives in a global container.
    pub fn link_to_parent(&mut self, child: PropId, parent: PropId) -> RillResult<bool> {
        let (child_key, child_container, child_type, child_linked) = {
            let c = self.node(child)?;
            (c.key, c.container, c.type_id, c.parent.is_some())
        };
        if child_linked {
            return Ok(false);
        }
        if !self.props.contains_key(&parent) {
            return Err(RillError::PropNotFound(parent));
        }

        let root = self.resolve_root(parent);
        if root == child {
            return Err(RillError::InvalidLink {
                key: child_key,
                reason: "link would form a cycle",
            });
        }
        let (root_container, root_type, root_type_name, root_value, existing) = {
            let r = self.node(root)?;
            (
                r.container,
                r.type_id,
                r.value.type_name(),
                r.value.clone(),
                r.children.get(&child_container).copied(),
            )
        };
        if root_container == child_container {
            return Err(RillError::InvalidLink {
                key: child_key,
                reason: "parent lives in the same container",
            });
        }
        if root_type != child_type {
            let found = self.node(child)?.value.type_name();
            return Err(RillError::TypeMismatch {
                key: child_key,
                expected: root_type_name,
                found,
            });
        }
        if existing.is_some() {
            return Err(RillError::DuplicateBinding {
                key: child_key,
                container: child_container,
            });
        }

        let source = match self.container_kind(root_container) {
            Some(ContainerKind::Global) => EdgeSource::GlobalStore(root_container),
            _ => EdgeSource::ParentComponent,
        };
        let edge = ParentEdge { prop: root, source };

        // flatten: anything already hanging under `child` moves to the root
        let adopted: Vec<(ContainerToken, PropId)> = match self.props.get_mut(&child) {
            Some(c) => {
                c.parent = Some(edge);
                c.value = root_value.clone();
                std::mem::take(&mut c.children).into_iter().collect()
            }
            None => Vec::new(),
        };
        if let Some(r) = self.props.get_mut(&root) {
            r.children.insert(child_container, child);
        }
        if source.is_global() {
            self.note_global_edge(child_container, root_container);
        }

        for (token, grandchild) in adopted {
            let taken = self
                .props
                .get(&root)
                .map_or(false, |r| r.children.contains_key(&token));
            if taken {
                tracing::warn!(
                    "container {} already bound to root {:?}, dropping flattened edge of {:?}",
                    token,
                    root,
                    grandchild
                );
                if let Some(g) = self.props.get_mut(&grandchild) {
                    g.parent = None;
                }
                continue;
            }
            if let Some(g) = self.props.get_mut(&grandchild) {
                g.parent = Some(edge);
                g.value = root_value.clone();
            }
            if let Some(r) = self.props.get_mut(&root) {
                r.children.insert(token, grandchild);
            }
            if source.is_global() {
                self.note_global_edge(token, root_container);
            }
        }
        Ok(true)
    }

    /// Detach `child` from its parent. Returns whether an edge existed.
    pub fn unlink(&mut self, child: PropId) -> bool {
        let (edge, container) = match self.props.get_mut(&child) {
            Some(node) => match node.parent.take() {
                Some(edge) => (edge, node.container),
                None => return false,
            },
            None => return false,
        };
        if let Some(p) = self.props.get_mut(&edge.prop) {
            if p.children.get(&container) == Some(&child) {
                p.children.remove(&container);
            }
        }
        if let EdgeSource::GlobalStore(global) = edge.source {
            self.refresh_global_membership(container, global);
        }
        true
    }

    /// Detach every global-sourced edge owned by `container`.
    pub fn unlink_global(&mut self, container: ContainerToken) -> usize {
        let globals: Vec<PropId> = self
            .props_of(container)
            .into_iter()
            .filter(|id| {
                self.props
                    .get(id)
                    .and_then(|n| n.parent)
                    .map_or(false, |e| e.source.is_global())
            })
            .collect();
        globals.into_iter().filter(|id| self.unlink(*id)).count()
    }

    pub fn child_for(&self, id: PropId, token: ContainerToken) -> Option<PropId> {
        self.props.get(&id).and_then(|n| n.children.get(&token).copied())
    }

    pub fn children_of(&self, id: PropId) -> Vec<PropId> {
        self.props
            .get(&id)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default()
    }

    /// Copy the value of `id` verbatim to every direct child.
    pub fn propagate(&mut self, id: PropId) -> RillResult<Vec<PropId>> {
        let (value, children) = {
            let n = self.node(id)?;
            (n.value.clone(), n.children.values().copied().collect::<Vec<_>>())
        };
        for child in &children {
            if let Some(c) = self.props.get_mut(child) {
                c.value = value.clone();
            }
        }
        Ok(children)
    }

    /// O(1) test whether `container` has any edge into `global`.
    pub fn has_dependent(&self, global: ContainerToken, container: ContainerToken) -> bool {
        self.containers
            .get(&global)
            .map_or(false, |m| m.dependents.contains(&container))
    }

    pub fn depends_on_global(&self, container: ContainerToken, global: ContainerToken) -> bool {
        self.containers
            .get(&container)
            .map_or(false, |m| m.global_sources.contains(&global))
    }

    pub fn global_sources(&self, container: ContainerToken) -> Vec<ContainerToken> {
        self.containers
            .get(&container)
            .map(|m| m.global_sources.iter().copied().collect())
            .unwrap_or_default()
    }

    fn note_global_edge(&mut self, container: ContainerToken, global: ContainerToken) {
        if let Some(m) = self.containers.get_mut(&container) {
            m.global_sources.insert(global);
        }
        if let Some(g) = self.containers.get_mut(&global) {
            g.dependents.insert(container);
        }
    }

    fn refresh_global_membership(&mut self, container: ContainerToken, global: ContainerToken) {
        let still_linked = self.containers.get(&container).map_or(false, |m| {
            m.order.iter().any(|id| {
                self.props
                    .get(id)
                    .and_then(|n| n.parent)
                    .map_or(false, |e| e.source == EdgeSource::GlobalStore(global))
            })
        });
        if still_linked {
            return;
        }
        if let Some(m) = self.containers.get_mut(&container) {
            m.global_sources.remove(&global);
        }
        if let Some(g) = self.containers.get_mut(&global) {
            g.dependents.remove(&container);
        }
    }
}

impl Default for PropGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The arena shared by every store of one runtime
#[derive(Clone, Debug)]
pub struct SharedGraph {
    inner: Arc<Mutex<PropGraph>>,
    ids: Arc<IdAllocator>,
}

impl SharedGraph {
    pub fn new() -> Self {
        Self::from_graph(PropGraph::new())
    }

    pub fn from_graph(graph: PropGraph) -> Self {
        let ids = graph.ids().clone();
        SharedGraph {
            inner: Arc::new(Mutex::new(graph)),
            ids,
        }
    }

    /// Locks the arena. Never hold the guard across a call into user code.
    pub fn lock(&self) -> MutexGuard<'_, PropGraph> {
        self.inner.lock()
    }

    /// Id source usable without taking the lock
    pub fn ids(&self) -> Arc<IdAllocator> {
        self.ids.clone()
    }
}

impl Default for SharedGraph {
    fn default() -> Self {
        Self::new()
    }
}
