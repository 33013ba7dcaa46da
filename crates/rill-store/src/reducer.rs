//! Reducers and the combined reducer
//!
//! Each component contributes one [`BoundReducer`]: its reducer table
//! bound to its state handles and wrapped by the connector's action
//! filter. A page store holds the [`CombinedReducer`] of every
//! installed component, in install order (parents before children).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rill_core::{Action, ActionType, ContainerToken, Disposer, RillResult};
use rill_state::StateWriter;

use crate::ChangeCallback;

pub type ReduceFn<S> = Arc<dyn Fn(&S, &mut StateWriter, &Action) -> RillResult<()> + Send + Sync>;

/// Decides whether an action reaches a child's reducers
pub type ActionFilter = Arc<dyn Fn(&Action) -> bool + Send + Sync>;

pub struct ReducerCollector<S> {
    reducers: HashMap<ActionType, ReduceFn<S>>,
}

impl<S> ReducerCollector<S> {
    pub fn new() -> Self {
        ReducerCollector {
            reducers: HashMap::new(),
        }
    }

    pub fn add<F>(&mut self, kind: ActionType, reducer: F) -> &mut Self
    where
        F: Fn(&S, &mut StateWriter, &Action) -> RillResult<()> + Send + Sync + 'static,
    {
        self.reducers.insert(kind, Arc::new(reducer));
        self
    }

    pub fn remove(&mut self, kind: ActionType) -> bool {
        self.reducers.remove(&kind).is_some()
    }

    pub fn handles(&self, kind: ActionType) -> bool {
        self.reducers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S> Default for ReducerCollector<S> {
    fn default() -> Self {
        Self::new()
    }
}

pub trait ErasedReducer: Send + Sync {
    /// Container the reducer writes to
    fn owner(&self) -> ContainerToken;

    fn handles(&self, action: &Action) -> bool;

    fn reduce(&self, writer: &mut StateWriter, action: &Action) -> RillResult<()>;
}

pub struct BoundReducer<S> {
    owner: ContainerToken,
    state: Arc<S>,
    reducers: HashMap<ActionType, ReduceFn<S>>,
    filter: Option<ActionFilter>,
}

impl<S: Send + Sync + 'static> BoundReducer<S> {
    pub fn new(owner: ContainerToken, state: Arc<S>, collector: ReducerCollector<S>) -> Self {
        BoundReducer {
            owner,
            state,
            reducers: collector.reducers,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: ActionFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl<S: Send + Sync + 'static> ErasedReducer for BoundReducer<S> {
    fn owner(&self) -> ContainerToken {
        self.owner
    }

    fn handles(&self, action: &Action) -> bool {
        self.reducers.contains_key(&action.kind())
            && self.filter.as_ref().map_or(true, |accept| accept(action))
    }

    fn reduce(&self, writer: &mut StateWriter, action: &Action) -> RillResult<()> {
        match self.reducers.get(&action.kind()) {
            Some(reducer) => reducer(&self.state, writer, action),
            None => Ok(()),
        }
    }
}

/// One component's slot in the combined reducer
#[derive(Clone)]
pub struct ReducerEntry {
    pub reducer: Arc<dyn ErasedReducer>,
    /// Receives the private changes of each pass
    pub on_private: ChangeCallback,
}

#[derive(Default)]
pub struct CombinedReducer {
    entries: Arc<Mutex<Vec<(u64, ReducerEntry)>>>,
    next: AtomicU64,
}

impl CombinedReducer {
    pub fn new() -> Self {
        CombinedReducer::default()
    }

    pub fn add(&self, entry: ReducerEntry) -> Disposer {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, entry));
        let entries = Arc::downgrade(&self.entries);
        Disposer::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().retain(|(eid, _)| *eid != id);
            }
        })
    }

    /// Entries that react to `action`, in registration order
    pub fn entries_for(&self, action: &Action) -> Vec<ReducerEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.reducer.handles(action))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_state::ChangedProp;
    use proptest::prelude::*;

    const SET: ActionType = ActionType::new("test.set");
    const OTHER: ActionType = ActionType::new("test.other");

    fn entry(owner: u64, collector: ReducerCollector<()>) -> ReducerEntry {
        ReducerEntry {
            reducer: Arc::new(BoundReducer::new(ContainerToken::new(owner), Arc::new(()), collector)),
            on_private: Arc::new(|_: &[ChangedProp]| {}),
        }
    }

    #[test]
    fn test_entries_filtered_by_type() {
        let combined = CombinedReducer::new();
        let mut a = ReducerCollector::new();
        a.add(SET, |_, _, _| Ok(()));
        let mut b = ReducerCollector::new();
        b.add(OTHER, |_, _, _| Ok(()));
        let _da = combined.add(entry(1, a));
        let _db = combined.add(entry(2, b));

        let hits = combined.entries_for(&Action::new(SET));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reducer.owner(), ContainerToken::new(1));
    }

    #[test]
    fn test_filter_wraps_reducer() {
        let mut c = ReducerCollector::new();
        c.add(SET, |_, _, _| Ok(()));
        let bound = BoundReducer::new(ContainerToken::new(1), Arc::new(()), c)
            .with_filter(Arc::new(|a: &Action| a.is_private()));
        assert!(!bound.handles(&Action::new(SET)));
        assert!(bound.handles(&Action::private(SET)));
    }

    #[test]
    fn test_dispose_removes_entry() {
        let combined = CombinedReducer::new();
        let mut c = ReducerCollector::new();
        c.add(SET, |_, _, _| Ok(()));
        let d = combined.add(entry(1, c));
        assert_eq!(combined.len(), 1);
        d.dispose();
        assert!(combined.is_empty());
    }

    proptest! {
        /// Each generated entry is (reacts to SET, accepts only private).
        #[test]
        fn test_entries_for_filters_in_order(
            specs in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..12),
            private in any::<bool>(),
        ) {
            let combined = CombinedReducer::new();
            let mut keep = Vec::new();
            for (i, (on_set, private_only)) in specs.iter().enumerate() {
                let mut c = ReducerCollector::new();
                c.add(if *on_set { SET } else { OTHER }, |_, _, _| Ok(()));
                let mut bound = BoundReducer::new(ContainerToken::new(i as u64), Arc::new(()), c);
                if *private_only {
                    bound = bound.with_filter(Arc::new(|a: &Action| a.is_private()));
                }
                keep.push(combined.add(ReducerEntry {
                    reducer: Arc::new(bound),
                    on_private: Arc::new(|_: &[ChangedProp]| {}),
                }));
            }

            let action = if private { Action::private(SET) } else { Action::new(SET) };
            let owners: Vec<ContainerToken> = combined
                .entries_for(&action)
                .iter()
                .map(|e| e.reducer.owner())
                .collect();
            let expected: Vec<ContainerToken> = specs
                .iter()
                .enumerate()
                .filter(|(_, (on_set, private_only))| *on_set && (private || !*private_only))
                .map(|(i, _)| ContainerToken::new(i as u64))
                .collect();
            prop_assert_eq!(owners, expected);
        }
    }
}
