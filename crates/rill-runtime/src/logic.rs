//! Component logic contract

use std::sync::Arc;

use rill_core::EffectCollector;
use rill_state::State;
use rill_store::{Middleware, ReducerCollector};

use crate::{ComponentContext, DependencyCollector, ViewModule};

/// Everything a component contributes besides its state: reducers,
/// effects, child dependencies and an optional view.
pub trait Logic: Send + Sync + 'static {
    type State: State;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn reducers(&self, _reducers: &mut ReducerCollector<Self::State>) {}

    fn effects(&self, _effects: &mut EffectCollector<ComponentContext<Self::State>>) {}

    fn dependencies(&self, _deps: &mut DependencyCollector<Self::State>) {}

    fn view(&self) -> Option<Arc<dyn ViewModule<Self::State>>> {
        None
    }

    /// Only read for the root logic of a page.
    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }
}
