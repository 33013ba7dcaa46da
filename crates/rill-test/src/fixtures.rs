//! Sample states and logics
//!
//! `Counter -> Mirror -> Echo` is a three-level component chain sharing
//! `num`. `Shell -> Badge` reads `name` from the global `Profile` store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rill_core::{ActionType, EffectCollector, RillResult};
use rill_runtime::{
    connect, ComponentContext, Connector, DependencyCollector, GlobalWatcher, Logic, ViewModule,
};
use rill_state::{ContainerBuilder, MergeScope, Prop, State};
use rill_store::{GlobalStore, ReducerCollector};

use crate::{RecordingView, Recorder};

pub const SET_NUM: ActionType = ActionType::new("fixture.set_num");
pub const BUMP_LOCAL: ActionType = ActionType::new("fixture.bump_local");
pub const SET_MIRROR: ActionType = ActionType::new("fixture.set_mirror");
pub const RENAME_BADGE: ActionType = ActionType::new("fixture.rename_badge");
pub const PING: ActionType = ActionType::new("fixture.ping");

/// Detects overlapping reducer runs.
#[derive(Debug, Default)]
pub struct ReduceGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

impl ReduceGauge {
    pub fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    /// Highest number of reducers seen running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------
// Counter -> Mirror -> Echo
// ----------------------------------------------------------------------

pub struct Counter {
    pub num: Prop<i32>,
    pub local: Prop<i32>,
    pub label: Prop<String>,
}

impl State for Counter {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Counter {
            num: b.prop("num", 0),
            local: b.prop("local", 0),
            label: b.ui_prop("label", String::from("counter")),
        }
    }
}

pub struct Mirror {
    pub num: Prop<i32>,
}

impl State for Mirror {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Mirror { num: b.prop("num", 0) }
    }
}

pub struct Echo {
    pub num: Prop<i32>,
}

impl State for Echo {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Echo { num: b.prop("num", 0) }
    }
}

/// Page logic over [`Counter`]
#[derive(Default)]
pub struct CounterLogic {
    view: Option<Arc<RecordingView<Counter>>>,
    mirror: bool,
    log: Recorder<String>,
    gauge: Arc<ReduceGauge>,
}

impl CounterLogic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(mut self, view: Arc<RecordingView<Counter>>) -> Self {
        self.view = Some(view);
        self
    }

    /// Install the `mirror` child (which installs `echo`).
    pub fn with_mirror(mut self) -> Self {
        self.mirror = true;
        self
    }

    pub fn log(&self) -> Recorder<String> {
        self.log.clone()
    }

    pub fn gauge(&self) -> Arc<ReduceGauge> {
        self.gauge.clone()
    }
}

impl Logic for CounterLogic {
    type State = Counter;

    fn name(&self) -> &'static str {
        "counter"
    }

    fn reducers(&self, reducers: &mut ReducerCollector<Counter>) {
        reducers.add(SET_NUM, |s, w, a| w.set(&s.num, a.payload::<i32>().copied().unwrap_or(0)));
        let gauge = self.gauge.clone();
        reducers.add(BUMP_LOCAL, move |s, w, _| {
            gauge.enter();
            std::thread::yield_now();
            let result = w.modify(&s.local, |n| *n += 1);
            gauge.exit();
            result
        });
    }

    fn effects(&self, effects: &mut EffectCollector<ComponentContext<Counter>>) {
        let log = self.log.clone();
        effects.add(PING, move |_, _| log.push("counter ping".into()));
    }

    fn dependencies(&self, deps: &mut DependencyCollector<Counter>) {
        if self.mirror {
            deps.add(
                "mirror",
                MirrorLogic { log: self.log.clone() },
                connect(|scope: &mut MergeScope, m: &Mirror, c: &Counter| {
                    scope.bind(&m.num, &c.num);
                    Ok(())
                }),
            );
        }
    }

    fn view(&self) -> Option<Arc<dyn ViewModule<Counter>>> {
        self.view.clone().map(|v| v as Arc<dyn ViewModule<Counter>>)
    }
}

pub struct MirrorLogic {
    pub log: Recorder<String>,
}

impl Logic for MirrorLogic {
    type State = Mirror;

    fn name(&self) -> &'static str {
        "mirror"
    }

    fn reducers(&self, reducers: &mut ReducerCollector<Mirror>) {
        reducers.add(SET_MIRROR, |s, w, a| w.set(&s.num, a.payload::<i32>().copied().unwrap_or(0)));
    }

    fn effects(&self, effects: &mut EffectCollector<ComponentContext<Mirror>>) {
        let log = self.log.clone();
        effects.add(PING, move |_, _| log.push("mirror ping".into()));
    }

    fn dependencies(&self, deps: &mut DependencyCollector<Mirror>) {
        deps.add(
            "echo",
            EchoLogic { log: self.log.clone() },
            connect(|scope: &mut MergeScope, e: &Echo, m: &Mirror| {
                scope.bind(&e.num, &m.num);
                Ok(())
            }),
        );
    }
}

pub struct EchoLogic {
    pub log: Recorder<String>,
}

impl Logic for EchoLogic {
    type State = Echo;

    fn name(&self) -> &'static str {
        "echo"
    }

    fn effects(&self, effects: &mut EffectCollector<ComponentContext<Echo>>) {
        let log = self.log.clone();
        effects.add(PING, move |_, _| log.push("echo ping".into()));
    }
}

// ----------------------------------------------------------------------
// Shell -> Badge, with the global Profile
// ----------------------------------------------------------------------

pub struct Profile {
    pub name: Prop<String>,
}

impl State for Profile {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Profile {
            name: b.prop("name", String::from("anon")),
        }
    }
}

pub struct Shell {
    pub title: Prop<String>,
}

impl State for Shell {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Shell {
            title: b.prop("title", String::from("shell")),
        }
    }
}

pub struct Badge {
    pub name: Prop<String>,
    pub views: Prop<u32>,
}

impl State for Badge {
    fn declare(b: &mut ContainerBuilder) -> Self {
        Badge {
            name: b.prop("name", String::new()),
            views: b.prop("views", 0u32),
        }
    }
}

/// Binds `badge.name` to `profile.name`
pub struct ProfileConnector {
    pub store: Arc<GlobalStore<Profile>>,
}

impl Connector<Badge, Shell> for ProfileConnector {
    fn depend_global_state(&self, watcher: &mut GlobalWatcher<'_, Badge>) -> RillResult<()> {
        let name = watcher.child().name;
        watcher.watch(&self.store, &name, &self.store.state().name);
        Ok(())
    }
}

pub struct BadgeLogic;

impl Logic for BadgeLogic {
    type State = Badge;

    fn name(&self) -> &'static str {
        "badge"
    }

    fn reducers(&self, reducers: &mut ReducerCollector<Badge>) {
        reducers.add(RENAME_BADGE, |s, w, a| {
            w.set(&s.name, a.payload::<String>().cloned().unwrap_or_default())
        });
        reducers.add(BUMP_LOCAL, |s, w, _| w.modify(&s.views, |n| *n += 1));
    }
}

pub struct ShellLogic {
    pub profile: Arc<GlobalStore<Profile>>,
}

impl Logic for ShellLogic {
    type State = Shell;

    fn name(&self) -> &'static str {
        "shell"
    }

    fn dependencies(&self, deps: &mut DependencyCollector<Shell>) {
        deps.add(
            "badge",
            BadgeLogic,
            ProfileConnector {
                store: self.profile.clone(),
            },
        );
    }
}
