//! Change collection
//!
//! A [`StateProxy`] records every property written during one update
//! pass, in order. Private changes are handed out once and leave the
//! buffer; public changes stay until the store clears the proxy after
//! notifying observers.

use std::collections::HashSet;

use rill_core::PropId;

use crate::PropGraph;

#[derive(Debug, Default)]
pub struct StateProxy {
    buffer: Vec<PropId>,
}

/// Result of one write session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub private: Vec<PropId>,
    pub public: Vec<PropId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.private.is_empty() && self.public.is_empty()
    }
}

impl StateProxy {
    pub fn new() -> Self {
        StateProxy { buffer: Vec::new() }
    }

    pub fn record(&mut self, id: PropId) {
        self.buffer.push(id);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Removes and returns the private changes.
    pub fn take_private(&mut self, graph: &PropGraph) -> Vec<PropId> {
        let (private, public): (Vec<PropId>, Vec<PropId>) =
            self.buffer.drain(..).partition(|id| graph.is_private(*id));
        self.buffer = public;
        dedup_ordered(private)
    }

    /// Public changes; the buffer is left untouched.
    pub fn public_changes(&self, graph: &PropGraph) -> Vec<PropId> {
        dedup_ordered(
            self.buffer
                .iter()
                .copied()
                .filter(|id| !graph.is_private(*id))
                .collect(),
        )
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn dedup_ordered(ids: Vec<PropId>) -> Vec<PropId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
