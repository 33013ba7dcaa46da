//! Dispatch middleware
//!
//! Middleware wraps a page store's dispatch function. The first entry
//! of the list is the outermost wrapper.

use std::sync::Arc;

use rill_core::{Action, RillResult};
use rill_state::StateSnapshot;

pub type DispatchFn = Arc<dyn Fn(Action) -> RillResult<()> + Send + Sync>;

/// Read-only view over every container registered with the store
pub type StateProvider = Arc<dyn Fn() -> Vec<StateSnapshot> + Send + Sync>;

pub trait Middleware: Send + Sync {
    fn wrap(&self, states: StateProvider, next: DispatchFn) -> DispatchFn;
}

pub fn apply_middleware(
    middleware: &[Arc<dyn Middleware>],
    states: StateProvider,
    dispatch: DispatchFn,
) -> DispatchFn {
    middleware
        .iter()
        .rev()
        .fold(dispatch, |next, m| m.wrap(states.clone(), next))
}

/// Logs every action on the `rill::action` target
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn wrap(&self, states: StateProvider, next: DispatchFn) -> DispatchFn {
        Arc::new(move |action: Action| {
            tracing::debug!(
                target: "rill::action",
                "dispatch {} ({:?}) over {} containers",
                action.kind(),
                action.visibility(),
                states().len()
            );
            let kind = action.kind();
            let result = next(action);
            if let Err(e) = &result {
                tracing::debug!(target: "rill::action", "dispatch {} failed: {}", kind, e);
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rill_core::ActionType;

    const PING: ActionType = ActionType::new("test.ping");

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Middleware for Tag {
        fn wrap(&self, _states: StateProvider, next: DispatchFn) -> DispatchFn {
            let (name, log) = (self.0, self.1.clone());
            Arc::new(move |action: Action| {
                log.lock().push(name);
                next(action)
            })
        }
    }

    struct Swallow;

    impl Middleware for Swallow {
        fn wrap(&self, _states: StateProvider, _next: DispatchFn) -> DispatchFn {
            Arc::new(|_: Action| -> RillResult<()> { Ok(()) })
        }
    }

    fn no_states() -> StateProvider {
        Arc::new(|| Vec::<StateSnapshot>::new())
    }

    #[test]
    fn test_first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let base: DispatchFn = Arc::new(move |_: Action| -> RillResult<()> {
            l.lock().push("store");
            Ok(())
        });
        let chain = apply_middleware(
            &[
                Arc::new(Tag("outer", log.clone())),
                Arc::new(LoggingMiddleware),
                Arc::new(Tag("inner", log.clone())),
            ],
            no_states(),
            base,
        );
        chain(Action::new(PING)).unwrap();
        assert_eq!(*log.lock(), vec!["outer", "inner", "store"]);
    }

    #[test]
    fn test_middleware_can_swallow() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let base: DispatchFn = Arc::new(move |_: Action| -> RillResult<()> {
            l.lock().push("store");
            Ok(())
        });
        let chain = apply_middleware(&[Arc::new(Swallow)], no_states(), base);
        chain(Action::new(PING)).unwrap();
        assert!(log.lock().is_empty());
    }
}
