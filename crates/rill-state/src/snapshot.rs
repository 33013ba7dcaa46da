//! Read-only state copies

use std::any::Any;
use std::fmt;

use rill_core::{ContainerToken, PropId, Value};

use crate::Prop;

/// Proxy-stripped copy of one container. Values are shared with the
/// arena at the time of the copy; later writes do not show through.
#[derive(Clone)]
pub struct StateSnapshot {
    token: ContainerToken,
    name: &'static str,
    entries: Vec<(PropId, &'static str, Value)>,
}

impl StateSnapshot {
    pub(crate) fn new(
        token: ContainerToken,
        name: &'static str,
        entries: Vec<(PropId, &'static str, Value)>,
    ) -> Self {
        StateSnapshot {
            token,
            name,
            entries,
        }
    }

    pub fn token(&self) -> ContainerToken {
        self.token
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get<T: Any + Clone>(&self, prop: &Prop<T>) -> Option<T> {
        self.entries
            .iter()
            .find(|(id, _, _)| *id == prop.id())
            .and_then(|(_, _, v)| v.get::<T>())
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(_, k, _)| *k == key)
            .map(|(_, _, v)| v)
    }

    pub fn get_key<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|v| v.get::<T>())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(_, k, _)| *k)
    }
}

impl fmt::Debug for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSnapshot")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{ContainerKind, PropGraph};
    use rill_core::Value;

    #[test]
    fn test_snapshot_is_detached() {
        let mut graph = PropGraph::new();
        let token = graph.create_container(ContainerKind::Page, "page");
        let id = graph.add_prop(token, "title", Value::new(String::from("a")), false).unwrap();

        let snap = graph.snapshot(token).unwrap();
        graph.inner_set(id, Value::new(String::from("b"))).unwrap();

        assert_eq!(snap.get_key::<String>("title").as_deref(), Some("a"));
        assert_eq!(graph.snapshot(token).unwrap().get_key::<String>("title").as_deref(), Some("b"));
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["title"]);
    }
}
