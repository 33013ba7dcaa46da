//! Runtime harness
//!
//! Drives a [`Runtime`] with a [`ManualFrameSource`] so tests decide
//! exactly when paint ticks happen.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rill_core::{PropId, RillResult};
use rill_frame::ManualFrameSource;
use rill_runtime::{
    ComponentContext, Logic, Page, Runtime, RuntimeConfig, ViewBinding, ViewHandle, ViewModule,
};
use rill_state::{State, StateSnapshot};

/// Runtime with a manual frame clock
pub struct TestRuntime {
    runtime: Runtime,
    frames: Arc<ManualFrameSource>,
}

impl TestRuntime {
    pub fn new() -> RillResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// The writer role binds to the calling thread.
    pub fn with_config(config: RuntimeConfig) -> RillResult<Self> {
        let frames = Arc::new(ManualFrameSource::new());
        let runtime = Runtime::builder()
            .config(config)
            .frame_source(frames.clone())
            .build()?;
        Ok(TestRuntime { runtime, frames })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn frames(&self) -> &Arc<ManualFrameSource> {
        &self.frames
    }

    /// Fire one paint tick. Returns the number of frame callbacks run.
    pub fn tick(&self) -> usize {
        self.frames.advance()
    }

    /// Pump forwarded writer jobs until `done` holds or `timeout` passes.
    pub fn pump_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.runtime.pump();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Create a page and drive it through create and start.
    pub fn start<L: Logic>(&self, logic: L) -> RillResult<Arc<Page<L>>> {
        let page = self.runtime.create_page(logic)?;
        page.on_create()?;
        page.on_start()?;
        Ok(page)
    }
}

impl fmt::Debug for TestRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRuntime")
            .field("runtime", &self.runtime)
            .field("pending_frames", &rill_frame::FrameSource::pending(&*self.frames))
            .finish()
    }
}

/// Thread-safe append-only log
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Recorder<T> {
    pub fn new() -> Self {
        Recorder {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T: Clone> Recorder<T> {
    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.entries.lock().last().cloned()
    }
}

impl<T: PartialEq> Recorder<T> {
    pub fn contains(&self, entry: &T) -> bool {
        self.entries.lock().contains(entry)
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Recorder {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.lock().iter()).finish()
    }
}

pub type Selector<S> = fn(&S) -> Vec<PropId>;

/// View module with a single binding over `select`, recording every
/// render and every snapshot pushed to the binding.
pub struct RecordingView<S> {
    select: Selector<S>,
    renders: AtomicUsize,
    updates: Recorder<StateSnapshot>,
}

impl<S: State> RecordingView<S> {
    pub fn new(select: Selector<S>) -> Arc<Self> {
        Arc::new(RecordingView {
            select,
            renders: AtomicUsize::new(0),
            updates: Recorder::new(),
        })
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> &Recorder<StateSnapshot> {
        &self.updates
    }
}

impl<S: State> ViewModule<S> for RecordingView<S> {
    fn render(&self, ctx: &ComponentContext<S>) -> RillResult<ViewHandle> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(ViewHandle::new(ctx.name()))
    }

    fn declare_dependencies(&self, state: &S) -> Vec<ViewBinding> {
        let updates = self.updates.clone();
        vec![ViewBinding::new((self.select)(state), move |snapshot| {
            updates.push(snapshot.clone());
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_shares_entries() {
        let a = Recorder::new();
        let b = a.clone();
        a.push(1);
        b.push(2);
        assert_eq!(a.entries(), vec![1, 2]);
        assert_eq!(b.take(), vec![1, 2]);
        assert!(a.is_empty());
    }

    #[test]
    fn test_tick_without_requests_is_empty() {
        let t = TestRuntime::new().unwrap();
        assert_eq!(t.tick(), 0);
        assert!(t.pump_until(Duration::from_millis(10), || true));
    }
}
