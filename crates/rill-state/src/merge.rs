//! Merge scopes
//!
//! Parent and global dependencies are declared through a
//! [`MergeScope`]. Declaring only records the bindings; no arena lock is
//! held while connector code runs. [`MergeScope::apply`] then links
//! them in one pass, and only while the child container's one-shot
//! merge window is open.

use std::any::Any;

use rill_core::{ContainerToken, PropId, RillError, RillResult};

use crate::{MergePhase, Prop, PropGraph};

#[derive(Debug, Clone)]
enum ChildRef {
    Prop { id: PropId, key: &'static str },
    Key(String),
}

#[derive(Debug, Clone)]
enum ParentRef {
    Prop { id: PropId, key: &'static str },
    Key { container: ContainerToken, key: String },
}

#[derive(Debug, Clone)]
struct Binding {
    child: ChildRef,
    parent: ParentRef,
}

#[derive(Debug)]
pub struct MergeScope {
    child: ContainerToken,
    relink: bool,
    bindings: Vec<Binding>,
}

impl MergeScope {
    pub fn new(child: ContainerToken) -> Self {
        MergeScope {
            child,
            relink: false,
            bindings: Vec::new(),
        }
    }

    /// Scope used when a detached component re-attaches and restores its
    /// global bindings after its merge window has closed.
    pub fn relink(child: ContainerToken) -> Self {
        MergeScope {
            child,
            relink: true,
            bindings: Vec::new(),
        }
    }

    pub fn child(&self) -> ContainerToken {
        self.child
    }

    /// Number of bindings declared so far
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// `child = parent`. Returns false when `child` is already bound in
    /// this scope; the second declaration is dropped.
    pub fn bind<T: Any>(&mut self, child: &Prop<T>, parent: &Prop<T>) -> bool {
        let seen = self
            .bindings
            .iter()
            .any(|b| matches!(b.child, ChildRef::Prop { id, .. } if id == child.id()));
        if seen {
            return false;
        }
        self.bindings.push(Binding {
            child: ChildRef::Prop {
                id: child.id(),
                key: child.key(),
            },
            parent: ParentRef::Prop {
                id: parent.id(),
                key: parent.key(),
            },
        });
        true
    }

    /// Keyed variant of [`bind`](Self::bind). Types are checked when the
    /// scope is applied; an unknown parent key is skipped there.
    pub fn bind_key(&mut self, child_key: &str, parent: ContainerToken, parent_key: &str) -> bool {
        let seen = self
            .bindings
            .iter()
            .any(|b| matches!(&b.child, ChildRef::Key(k) if k == child_key));
        if seen {
            return false;
        }
        self.bindings.push(Binding {
            child: ChildRef::Key(child_key.to_string()),
            parent: ParentRef::Key {
                container: parent,
                key: parent_key.to_string(),
            },
        });
        true
    }

    fn ensure_open(&self, graph: &PropGraph) -> RillResult<()> {
        if self.relink {
            return Ok(());
        }
        match graph.merge_phase(self.child) {
            Some(MergePhase::Merging) => Ok(()),
            Some(_) => Err(RillError::MergeWindowClosed(self.child)),
            None => Err(RillError::ContainerNotFound(self.child)),
        }
    }

    /// Link every declared binding. Returns the number of edges created.
    /// Stops at the first protocol error.
    pub fn apply(self, graph: &mut PropGraph) -> RillResult<usize> {
        self.ensure_open(graph)?;
        let mut linked = 0;
        for binding in &self.bindings {
            if self.link(graph, binding)? {
                linked += 1;
            }
        }
        Ok(linked)
    }

    fn link(&self, graph: &mut PropGraph, binding: &Binding) -> RillResult<bool> {
        let child = match &binding.child {
            ChildRef::Prop { id, key } => {
                if graph.container_of(*id) != Some(self.child) {
                    return Err(RillError::InvalidLink {
                        key: *key,
                        reason: "property belongs to another container",
                    });
                }
                *id
            }
            ChildRef::Key(key) => graph.find(self.child, key).ok_or_else(|| RillError::UnknownKey {
                key: key.clone(),
                container: self.child,
            })?,
        };
        let (parent, parent_key) = match &binding.parent {
            ParentRef::Prop { id, key } => (*id, key.to_string()),
            ParentRef::Key { container, key } => match graph.find(*container, key) {
                Some(id) => (id, key.clone()),
                None => {
                    tracing::warn!("bind target `{}` not found in {}, skipping", key, container);
                    return Ok(false);
                }
            },
        };
        match graph.link_to_parent(child, parent) {
            Err(RillError::PropNotFound(id)) if id == parent => {
                tracing::warn!(
                    "bind target `{}` of {} no longer exists, skipping",
                    parent_key,
                    self.child
                );
                Ok(false)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContainerBuilder, ContainerKind, PreparedState, State};

    struct Parent {
        num: Prop<i32>,
        title: Prop<String>,
    }

    impl State for Parent {
        fn declare(b: &mut ContainerBuilder) -> Self {
            Parent {
                num: b.prop("num", 5),
                title: b.prop("title", String::from("p")),
            }
        }
    }

    struct Child {
        num: Prop<i32>,
        title: Prop<i32>,
    }

    impl State for Child {
        fn declare(b: &mut ContainerBuilder) -> Self {
            Child {
                num: b.prop("num", 0),
                title: b.prop("title", 0),
            }
        }
    }

    fn setup() -> (PropGraph, ContainerToken, Parent, ContainerToken, Child) {
        let mut graph = PropGraph::new();
        let (pt, parent) = PreparedState::<Parent>::prepare(graph.ids().clone(), ContainerKind::Page)
            .commit(&mut graph)
            .unwrap();
        let (ct, child) = PreparedState::<Child>::prepare(graph.ids().clone(), ContainerKind::Component)
            .commit(&mut graph)
            .unwrap();
        (graph, pt, parent, ct, child)
    }

    #[test]
    fn test_apply_outside_window_fails() {
        let (mut graph, _, parent, ct, child) = setup();
        let mut scope = MergeScope::new(ct);
        assert!(scope.bind(&child.num, &parent.num));
        assert_eq!(scope.apply(&mut graph), Err(RillError::MergeWindowClosed(ct)));
        assert!(graph.is_private(child.num.id()));
    }

    #[test]
    fn test_bind_twice_is_noop() {
        let (mut graph, _, parent, ct, child) = setup();
        graph.begin_merge(ct).unwrap();
        let mut scope = MergeScope::new(ct);
        assert!(scope.bind(&child.num, &parent.num));
        assert!(!scope.bind(&child.num, &parent.num));
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.apply(&mut graph), Ok(1));
        graph.end_merge(ct);
        assert_eq!(graph.get::<i32>(child.num.id()).unwrap(), 5);
    }

    #[test]
    fn test_declaring_needs_no_graph() {
        let (mut graph, _, parent, ct, child) = setup();
        let mut scope = MergeScope::new(ct);
        scope.bind(&child.num, &parent.num);
        // arena untouched until apply
        assert!(graph.is_private(parent.num.id()));
        graph.begin_merge(ct).unwrap();
        assert_eq!(scope.apply(&mut graph), Ok(1));
        assert!(!graph.is_private(parent.num.id()));
    }

    #[test]
    fn test_bind_key_rejects_mismatched_types() {
        let (mut graph, pt, _, ct, child) = setup();
        graph.begin_merge(ct).unwrap();
        let mut scope = MergeScope::new(ct);
        scope.bind_key("title", pt, "title");
        let err = scope.apply(&mut graph).unwrap_err();
        assert!(matches!(err, RillError::TypeMismatch { key: "title", .. }));
        assert!(graph.is_private(child.title.id()));
    }

    #[test]
    fn test_bind_key_unknown_parent_skipped() {
        let (mut graph, pt, _, ct, _) = setup();
        graph.begin_merge(ct).unwrap();
        let mut scope = MergeScope::new(ct);
        scope.bind_key("num", pt, "nope");
        assert_eq!(scope.apply(&mut graph), Ok(0));

        let mut scope = MergeScope::new(ct);
        scope.bind_key("nope", pt, "num");
        assert!(matches!(scope.apply(&mut graph), Err(RillError::UnknownKey { .. })));
    }

    #[test]
    fn test_foreign_child_prop_rejected() {
        let (mut graph, _, parent, ct, _) = setup();
        graph.begin_merge(ct).unwrap();
        let mut scope = MergeScope::new(ct);
        scope.bind(&parent.title, &parent.title);
        assert!(matches!(scope.apply(&mut graph), Err(RillError::InvalidLink { .. })));
    }

    #[test]
    fn test_relink_bypasses_window() {
        let (mut graph, _, parent, ct, child) = setup();
        let mut scope = MergeScope::relink(ct);
        scope.bind(&child.num, &parent.num);
        assert_eq!(scope.apply(&mut graph), Ok(1));
    }
}
