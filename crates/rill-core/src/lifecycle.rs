//! Host lifecycle translation
//!
//! Each host callback maps 1:1 to a private action on the effect
//! channel.

use crate::{Action, ActionType};

pub const ON_CREATE: ActionType = ActionType::new("rill.lifecycle.create");
pub const ON_START: ActionType = ActionType::new("rill.lifecycle.start");
pub const ON_RESUME: ActionType = ActionType::new("rill.lifecycle.resume");
pub const ON_PAUSE: ActionType = ActionType::new("rill.lifecycle.pause");
pub const ON_STOP: ActionType = ActionType::new("rill.lifecycle.stop");
pub const ON_DESTROY: ActionType = ActionType::new("rill.lifecycle.destroy");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::Create,
        LifecycleEvent::Start,
        LifecycleEvent::Resume,
        LifecycleEvent::Pause,
        LifecycleEvent::Stop,
        LifecycleEvent::Destroy,
    ];

    pub fn action_type(self) -> ActionType {
        match self {
            LifecycleEvent::Create => ON_CREATE,
            LifecycleEvent::Start => ON_START,
            LifecycleEvent::Resume => ON_RESUME,
            LifecycleEvent::Pause => ON_PAUSE,
            LifecycleEvent::Stop => ON_STOP,
            LifecycleEvent::Destroy => ON_DESTROY,
        }
    }

    pub fn from_action_type(kind: ActionType) -> Option<Self> {
        Self::ALL.into_iter().find(|ev| ev.action_type() == kind)
    }

    /// Private lifecycle action carrying no payload
    pub fn to_action(self) -> Action {
        Action::private(self.action_type())
    }
}

pub fn is_lifecycle(action: &Action) -> bool {
    LifecycleEvent::from_action_type(action.kind()).is_some()
}
