//! Frame-aligned update scheduler
//!
//! Many state changes may land before the next paint. The scheduler
//! folds them into one pass: every change marks the page dirty and
//! requests a one-shot frame callback; on that frame every registered
//! updater runs once and the dirty flag clears.
//!
//! A frame that finds the page hidden, torn down, clean, or without
//! updaters does nothing and is not rescheduled. The next `mark_dirty`
//! asks again.
//!
//! The flags are atomics and setting one twice is harmless, so the
//! frame callback needs no extra locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rill_core::Disposer;

use crate::{FrameRequest, FrameSource, FrameTime};

pub type Updater = Arc<dyn Fn() + Send + Sync>;

/// Scheduler counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frame callbacks posted
    pub frames_requested: u64,
    /// Frames that ran the updaters
    pub frames_fired: u64,
    /// Frames that found nothing to do
    pub ticks_skipped: u64,
}

struct SchedulerInner {
    source: Arc<dyn FrameSource>,
    needs_update: AtomicBool,
    visible: AtomicBool,
    torn_down: AtomicBool,
    drawing: AtomicBool,
    redraw_after_draw: AtomicBool,
    request: Mutex<Option<FrameRequest>>,
    updaters: Mutex<Vec<(u64, Updater)>>,
    next_updater: AtomicU64,
    stats: Mutex<SchedulerStats>,
}

#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<SchedulerInner>,
}

impl UpdateScheduler {
    /// New scheduler; starts hidden until the page becomes visible.
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        UpdateScheduler {
            inner: Arc::new(SchedulerInner {
                source,
                needs_update: AtomicBool::new(false),
                visible: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                drawing: AtomicBool::new(false),
                redraw_after_draw: AtomicBool::new(false),
                request: Mutex::new(None),
                updaters: Mutex::new(Vec::new()),
                next_updater: AtomicU64::new(1),
                stats: Mutex::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn add_updater<F>(&self, updater: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.inner.torn_down.load(Ordering::Acquire) {
            return Disposer::noop();
        }
        let id = self.inner.next_updater.fetch_add(1, Ordering::Relaxed);
        self.inner.updaters.lock().push((id, Arc::new(updater)));
        if self.needs_update() {
            self.request_frame();
        }

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.updaters.lock().retain(|(uid, _)| *uid != id);
            }
        })
    }

    pub fn updater_count(&self) -> usize {
        self.inner.updaters.lock().len()
    }

    /// Record a change and ask for the next frame.
    pub fn mark_dirty(&self) {
        self.inner.needs_update.store(true, Ordering::Release);
        if self.inner.drawing.load(Ordering::Acquire) {
            self.inner.redraw_after_draw.store(true, Ordering::Release);
            return;
        }
        self.request_frame();
    }

    pub fn needs_update(&self) -> bool {
        self.inner.needs_update.load(Ordering::Acquire)
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::Acquire)
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// True while a frame callback is posted and not yet run
    pub fn frame_pending(&self) -> bool {
        self.inner.request.lock().is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.inner.stats.lock()
    }

    /// Hiding drops the pending callback; showing re-arms it if dirty.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::Release);
        if visible {
            if self.needs_update() {
                self.request_frame();
            }
        } else {
            self.cancel_request();
        }
    }

    /// Stop for good: cancel the pending frame and drop all updaters.
    pub fn teardown(&self) {
        self.inner.torn_down.store(true, Ordering::Release);
        self.cancel_request();
        self.inner.updaters.lock().clear();
    }

    /// Post the one-shot frame callback unless one is already pending.
    pub fn request_frame(&self) {
        if self.is_torn_down() || !self.is_visible() {
            return;
        }
        let mut request = self.inner.request.lock();
        if request.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        *request = Some(self.inner.source.post_frame_callback(Box::new(move |time| {
            match weak.upgrade() {
                Some(inner) => UpdateScheduler { inner }.on_frame(time),
                None => tracing::debug!("frame after scheduler dropped"),
            }
        })));
        self.inner.stats.lock().frames_requested += 1;
    }

    fn cancel_request(&self) {
        if let Some(request) = self.inner.request.lock().take() {
            self.inner.source.cancel(request);
        }
    }

    fn skip(&self, reason: &'static str) {
        tracing::debug!("frame skipped: {}", reason);
        self.inner.stats.lock().ticks_skipped += 1;
    }

    fn on_frame(&self, time: FrameTime) {
        self.inner.request.lock().take();

        if self.is_torn_down() {
            return self.skip("torn down");
        }
        if !self.is_visible() {
            return self.skip("hidden");
        }
        let updaters: Vec<Updater> = self
            .inner
            .updaters
            .lock()
            .iter()
            .map(|(_, u)| u.clone())
            .collect();
        if updaters.is_empty() {
            return self.skip("no updaters");
        }
        if !self.inner.needs_update.swap(false, Ordering::AcqRel) {
            return self.skip("clean");
        }

        self.inner.drawing.store(true, Ordering::Release);
        for updater in &updaters {
            updater();
        }
        self.inner.drawing.store(false, Ordering::Release);
        self.inner.stats.lock().frames_fired += 1;
        tracing::trace!(target: "rill::perf", "frame {}ms ran {} updaters", time.as_millis(), updaters.len());

        if self.inner.redraw_after_draw.swap(false, Ordering::AcqRel) && self.needs_update() {
            self.request_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualFrameSource;
    use std::sync::atomic::AtomicUsize;
    use proptest::prelude::*;

    fn visible_scheduler() -> (Arc<ManualFrameSource>, UpdateScheduler) {
        let source = Arc::new(ManualFrameSource::new());
        let scheduler = UpdateScheduler::new(source.clone());
        scheduler.set_visible(true);
        (source, scheduler)
    }

    fn counting(scheduler: &UpdateScheduler) -> (Arc<AtomicUsize>, Disposer) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let d = scheduler.add_updater(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, d)
    }

    #[test]
    fn test_coalesces_changes_per_frame() {
        let (source, scheduler) = visible_scheduler();
        let (hits, _d) = counting(&scheduler);

        for _ in 0..10 {
            scheduler.mark_dirty();
        }
        assert_eq!(source.pending(), 1);
        source.advance();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.needs_update());

        // clean frame: nothing rescheduled
        assert_eq!(source.advance(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hidden_tick_not_rescheduled() {
        let (source, scheduler) = visible_scheduler();
        let (hits, _d) = counting(&scheduler);

        scheduler.mark_dirty();
        scheduler.set_visible(false);
        assert_eq!(source.pending(), 0);
        scheduler.mark_dirty();
        assert_eq!(source.advance(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // showing re-arms
        scheduler.set_visible(true);
        assert_eq!(source.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_updater_is_noop() {
        let (source, scheduler) = visible_scheduler();
        scheduler.mark_dirty();
        assert_eq!(source.advance(), 1);
        assert_eq!(scheduler.stats().ticks_skipped, 1);
        assert_eq!(source.pending(), 0);
        assert!(scheduler.needs_update());

        // registering an updater on a dirty page asks for a frame
        let (hits, _d) = counting(&scheduler);
        source.advance();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_stops_everything() {
        let (source, scheduler) = visible_scheduler();
        let (hits, _d) = counting(&scheduler);
        scheduler.mark_dirty();
        scheduler.teardown();
        assert_eq!(source.advance(), 0);
        scheduler.mark_dirty();
        assert_eq!(source.pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(scheduler.add_updater(|| {}).is_noop());
    }

    #[test]
    fn test_change_during_draw_requests_next_frame() {
        let (source, scheduler) = visible_scheduler();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let s = scheduler.clone();
        let _d = scheduler.add_updater(move || {
            if h.fetch_add(1, Ordering::SeqCst) == 0 {
                s.mark_dirty();
            }
        });

        scheduler.mark_dirty();
        source.advance();
        assert_eq!(source.pending(), 1);
        source.advance();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().frames_fired, 2);
    }

    #[test]
    fn test_disposed_updater_not_called() {
        let (source, scheduler) = visible_scheduler();
        let (hits, d) = counting(&scheduler);
        let (other, _keep) = counting(&scheduler);
        d.dispose();
        scheduler.mark_dirty();
        source.advance();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn test_one_frame_per_burst(bursts in proptest::collection::vec(1usize..32, 1..8)) {
            let (source, scheduler) = visible_scheduler();
            let (hits, _d) = counting(&scheduler);

            for (i, marks) in bursts.iter().enumerate() {
                for _ in 0..*marks {
                    scheduler.mark_dirty();
                }
                prop_assert_eq!(source.pending(), 1);
                source.advance();
                prop_assert_eq!(hits.load(Ordering::SeqCst), i + 1);
            }
            prop_assert_eq!(scheduler.stats().frames_fired, bursts.len() as u64);
            prop_assert_eq!(source.advance(), 0);
        }
    }
}
