//! Effect collection
//!
//! An [`EffectCollector`] maps action types to side-effect handlers for
//! one context type `C` (a component context or a global store).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::lifecycle::is_lifecycle;
use crate::{Action, ActionType};

pub type EffectFn<C> = Arc<dyn Fn(&Action, &C) + Send + Sync>;

pub struct EffectCollector<C> {
    effects: HashMap<ActionType, EffectFn<C>>,
}

impl<C> EffectCollector<C> {
    pub fn new() -> Self {
        EffectCollector {
            effects: HashMap::new(),
        }
    }

    /// Registers `effect` for `kind`, replacing any earlier handler.
    pub fn add<F>(&mut self, kind: ActionType, effect: F) -> &mut Self
    where
        F: Fn(&Action, &C) + Send + Sync + 'static,
    {
        self.effects.insert(kind, Arc::new(effect));
        self
    }

    pub fn remove(&mut self, kind: ActionType) -> bool {
        self.effects.remove(&kind).is_some()
    }

    pub fn handles(&self, kind: ActionType) -> bool {
        self.effects.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Runs the matching handler. Returns whether the action was
    /// consumed; lifecycle actions always count as consumed.
    pub fn handle(&self, action: &Action, ctx: &C) -> bool {
        match self.effects.get(&action.kind()) {
            Some(effect) => {
                effect(action, ctx);
                true
            }
            None => is_lifecycle(action),
        }
    }
}

impl<C> Default for EffectCollector<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EffectCollector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.effects.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("EffectCollector").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleEvent;
    use parking_lot::Mutex;

    const SAVE: ActionType = ActionType::new("editor.save");

    #[test]
    fn test_handle_runs_matching_effect() {
        let mut effects: EffectCollector<Mutex<Vec<i32>>> = EffectCollector::new();
        effects.add(SAVE, |action, log| {
            log.lock().push(*action.payload::<i32>().unwrap());
        });

        let log = Mutex::new(Vec::new());
        assert!(effects.handle(&Action::new(SAVE).with_payload(3i32), &log));
        assert_eq!(*log.lock(), vec![3]);
    }

    #[test]
    fn test_unhandled_action_not_consumed() {
        let effects: EffectCollector<()> = EffectCollector::new();
        assert!(!effects.handle(&Action::new(SAVE), &()));
    }

    #[test]
    fn test_lifecycle_always_consumed() {
        let effects: EffectCollector<()> = EffectCollector::new();
        assert!(effects.handle(&LifecycleEvent::Resume.to_action(), &()));
    }

    #[test]
    fn test_remove() {
        let mut effects: EffectCollector<()> = EffectCollector::new();
        effects.add(SAVE, |_, _| {});
        assert!(effects.handles(SAVE));
        assert!(effects.remove(SAVE));
        assert!(effects.is_empty());
    }
}
