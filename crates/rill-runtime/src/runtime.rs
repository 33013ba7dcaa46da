//! Runtime context
//!
//! One explicitly constructed [`Runtime`] replaces any ambient
//! singleton: it owns the property arena, the root bus, the writer
//! thread, the discovery pool, the frame source and the registry of
//! global stores. Every page and store receives it by handle.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rill_bus::DispatchBus;
use rill_core::{EffectCollector, IdAllocator, RillResult};
use rill_frame::{FrameSource, PacedFrameSource};
use rill_state::{SharedGraph, State};
use rill_store::{GlobalStore, WriterThread};

use crate::{init_logging, DiscoveryPool, Logic, Page, RuntimeConfig};

struct RuntimeInner {
    config: RuntimeConfig,
    graph: SharedGraph,
    root_bus: DispatchBus,
    writer: WriterThread,
    discovery: DiscoveryPool,
    frames: Arc<dyn FrameSource>,
    paced: Option<Arc<PacedFrameSource>>,
    globals: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    frames: Option<Arc<dyn FrameSource>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a host-provided frame source instead of the paced default.
    pub fn frame_source(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Validate the configuration and bind the writer role to the
    /// calling thread. Installs the global subscriber when `log.install`
    /// is set.
    pub fn build(self) -> RillResult<Runtime> {
        self.config.validate()?;
        if self.config.log.install && !init_logging(&self.config.log) {
            tracing::debug!("logging already initialized, keeping the existing subscriber");
        }
        let discovery = DiscoveryPool::new(self.config.discovery)?;
        let (frames, paced) = match self.frames {
            Some(frames) => (frames, None),
            None => {
                let paced = Arc::new(PacedFrameSource::new(self.config.frame_interval()));
                let frames: Arc<dyn FrameSource> = paced.clone();
                (frames, Some(paced))
            }
        };
        tracing::info!(
            "rill runtime up: discovery={:?} frame_interval={}ms",
            self.config.discovery,
            self.config.frame_interval_ms
        );
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                config: self.config,
                graph: SharedGraph::new(),
                root_bus: DispatchBus::root(),
                writer: WriterThread::bind_current(),
                discovery,
                frames,
                paced,
                globals: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn new(config: RuntimeConfig) -> RillResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.inner.graph
    }

    pub fn ids(&self) -> Arc<IdAllocator> {
        self.inner.graph.ids()
    }

    pub fn root_bus(&self) -> &DispatchBus {
        &self.inner.root_bus
    }

    pub fn writer(&self) -> &WriterThread {
        &self.inner.writer
    }

    pub fn is_writer_thread(&self) -> bool {
        self.inner.writer.is_current()
    }

    pub fn discovery(&self) -> &DiscoveryPool {
        &self.inner.discovery
    }

    pub fn frames(&self) -> Arc<dyn FrameSource> {
        self.inner.frames.clone()
    }

    /// Drain jobs forwarded to the writer thread. Returns how many ran.
    pub fn pump(&self) -> usize {
        self.inner.writer.pump()
    }

    /// Fire due paint ticks of the default paced source.
    pub fn poll_frames(&self, now: Instant) -> usize {
        self.inner.paced.as_ref().map_or(0, |paced| paced.poll(now))
    }

    pub fn create_page<L: Logic>(&self, logic: L) -> RillResult<Arc<Page<L>>> {
        Page::create(self.clone(), logic)
    }

    /// The global store for `S`, created on first use. Later calls
    /// return the same store and ignore `effects`.
    pub fn global_store<S: State>(
        &self,
        effects: EffectCollector<GlobalStore<S>>,
    ) -> RillResult<Arc<GlobalStore<S>>> {
        let mut globals = self.inner.globals.lock();
        if let Some(existing) = globals.get(&TypeId::of::<S>()) {
            if let Ok(store) = existing.clone().downcast::<GlobalStore<S>>() {
                return Ok(store);
            }
        }
        let store = GlobalStore::<S>::create(
            self.inner.graph.clone(),
            self.inner.writer.clone(),
            effects,
        )?;
        globals.insert(TypeId::of::<S>(), store.clone());
        Ok(store)
    }

    pub fn global<S: State>(&self) -> Option<Arc<GlobalStore<S>>> {
        let existing = self.inner.globals.lock().get(&TypeId::of::<S>())?.clone();
        existing.downcast::<GlobalStore<S>>().ok()
    }

    /// Destroy and forget the global store for `S`.
    pub fn remove_global<S: State>(&self) -> bool {
        let removed = self.inner.globals.lock().remove(&TypeId::of::<S>());
        match removed.and_then(|s| s.downcast::<GlobalStore<S>>().ok()) {
            Some(store) => {
                store.destroy();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pages", &self.inner.root_bus.child_count())
            .field("globals", &self.inner.globals.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::RillError;
    use rill_state::{ContainerBuilder, Prop};

    struct Theme {
        dark: Prop<bool>,
    }

    impl State for Theme {
        fn declare(b: &mut ContainerBuilder) -> Self {
            Theme {
                dark: b.prop("dark", false),
            }
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RuntimeConfig::default();
        config.frame_interval_ms = 0;
        assert!(matches!(Runtime::new(config), Err(RillError::Config(_))));
    }

    #[test]
    fn test_global_registry_is_typed() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        assert!(runtime.global::<Theme>().is_none());

        let a = runtime.global_store::<Theme>(EffectCollector::new()).unwrap();
        let b = runtime.global_store::<Theme>(EffectCollector::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(runtime.global::<Theme>().unwrap().token(), a.token());

        a.update_state(|s, w| w.set(&s.dark, true)).unwrap();
        assert!(runtime.global::<Theme>().unwrap().get(&a.state().dark).unwrap());

        assert!(runtime.remove_global::<Theme>());
        assert!(runtime.global::<Theme>().is_none());
        assert!(a.is_destroyed());
    }

    #[test]
    fn test_forwarded_jobs_run_on_pump() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let writer = runtime.writer().clone();
        std::thread::spawn(move || writer.forward("test", Box::new(|| Ok(()))))
            .join()
            .unwrap();
        assert_eq!(runtime.pump(), 1);
        assert_eq!(runtime.pump(), 0);
    }

    #[test]
    fn test_builder_installs_logging() {
        let runtime = Runtime::builder()
            .config(RuntimeConfig::default().with_logging(true))
            .build()
            .unwrap();
        assert!(runtime.config().log.install);
        assert!(crate::logging_installed());
    }
}
