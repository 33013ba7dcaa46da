//! Frame sources - the platform's paint tick
//!
//! A [`FrameSource`] runs one-shot callbacks on the next frame. The
//! host drives it from the writer thread: [`ManualFrameSource::advance`]
//! for hosts that own a vsync signal (and for tests),
//! [`PacedFrameSource::poll`] for loops that only know the wall clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default frame interval (~60 Hz)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Time of a frame relative to the source's start
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameTime(pub Duration);

impl FrameTime {
    pub fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }
}

/// Handle to a posted frame callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameRequest(pub u64);

pub type FrameCallback = Box<dyn FnOnce(FrameTime) + Send>;

pub trait FrameSource: Send + Sync {
    /// Run `callback` once on the next frame.
    fn post_frame_callback(&self, callback: FrameCallback) -> FrameRequest;

    /// Cancel a callback that has not fired yet. Unknown requests are ignored.
    fn cancel(&self, request: FrameRequest);

    /// Callbacks waiting for the next frame
    fn pending(&self) -> usize;
}

/// Pending callbacks in posting order
#[derive(Default)]
struct CallbackQueue {
    next: u64,
    pending: BTreeMap<u64, FrameCallback>,
}

impl CallbackQueue {
    fn post(&mut self, callback: FrameCallback) -> FrameRequest {
        self.next += 1;
        self.pending.insert(self.next, callback);
        FrameRequest(self.next)
    }

    fn cancel(&mut self, request: FrameRequest) {
        self.pending.remove(&request.0);
    }

    fn take(&mut self) -> Vec<FrameCallback> {
        std::mem::take(&mut self.pending).into_values().collect()
    }
}

fn run(callbacks: Vec<FrameCallback>, time: FrameTime) -> usize {
    let count = callbacks.len();
    for cb in callbacks {
        cb(time);
    }
    count
}

/// Frame source advanced explicitly by the host
pub struct ManualFrameSource {
    interval: Duration,
    now: Mutex<Duration>,
    queue: Mutex<CallbackQueue>,
}

impl ManualFrameSource {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        ManualFrameSource {
            interval,
            now: Mutex::new(Duration::ZERO),
            queue: Mutex::new(CallbackQueue::default()),
        }
    }

    pub fn now(&self) -> FrameTime {
        FrameTime(*self.now.lock())
    }

    /// Produce one frame. Callbacks posted while it runs wait for the
    /// next one. Returns the number of callbacks fired.
    pub fn advance(&self) -> usize {
        let time = {
            let mut now = self.now.lock();
            *now += self.interval;
            FrameTime(*now)
        };
        let callbacks = self.queue.lock().take();
        run(callbacks, time)
    }
}

impl Default for ManualFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for ManualFrameSource {
    fn post_frame_callback(&self, callback: FrameCallback) -> FrameRequest {
        self.queue.lock().post(callback)
    }

    fn cancel(&self, request: FrameRequest) {
        self.queue.lock().cancel(request);
    }

    fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }
}

/// Frame source paced by wall-clock time
pub struct PacedFrameSource {
    interval: Duration,
    started: Instant,
    last: Mutex<Option<Instant>>,
    queue: Mutex<CallbackQueue>,
}

impl PacedFrameSource {
    pub fn new(interval: Duration) -> Self {
        PacedFrameSource {
            interval,
            started: Instant::now(),
            last: Mutex::new(None),
            queue: Mutex::new(CallbackQueue::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fire pending callbacks if a full interval elapsed since the last
    /// frame. Returns the number fired.
    pub fn poll(&self, now: Instant) -> usize {
        {
            let mut last = self.last.lock();
            if let Some(prev) = *last {
                if now.saturating_duration_since(prev) < self.interval {
                    return 0;
                }
            }
            *last = Some(now);
        }
        let callbacks = self.queue.lock().take();
        run(callbacks, FrameTime(now.saturating_duration_since(self.started)))
    }

    /// Time until the next frame may fire
    pub fn time_to_next(&self, now: Instant) -> Duration {
        match *self.last.lock() {
            Some(prev) => self.interval.saturating_sub(now.saturating_duration_since(prev)),
            None => Duration::ZERO,
        }
    }
}

impl FrameSource for PacedFrameSource {
    fn post_frame_callback(&self, callback: FrameCallback) -> FrameRequest {
        self.queue.lock().post(callback)
    }

    fn cancel(&self, request: FrameRequest) {
        self.queue.lock().cancel(request);
    }

    fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> FrameCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move || {
            let h = h.clone();
            let cb: FrameCallback = Box::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
            cb
        })
    }

    #[test]
    fn test_manual_advance() {
        let source = ManualFrameSource::new();
        let (hits, cb) = counter();
        source.post_frame_callback(cb());
        source.post_frame_callback(cb());
        assert_eq!(source.pending(), 2);

        assert_eq!(source.advance(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(source.now(), FrameTime(DEFAULT_FRAME_INTERVAL));
        // one-shot
        assert_eq!(source.advance(), 0);
    }

    #[test]
    fn test_cancel_only_target() {
        let source = ManualFrameSource::new();
        let (hits, cb) = counter();
        let a = source.post_frame_callback(cb());
        source.post_frame_callback(cb());
        source.cancel(a);
        assert_eq!(source.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_posted_during_frame_waits() {
        let source = Arc::new(ManualFrameSource::new());
        let (hits, cb) = counter();
        let inner = source.clone();
        let next = cb();
        source.post_frame_callback(Box::new(move |_| {
            inner.post_frame_callback(next);
        }));
        assert_eq!(source.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(source.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_paced_respects_interval() {
        let source = PacedFrameSource::new(Duration::from_millis(16));
        let (hits, cb) = counter();
        let t0 = Instant::now();

        source.post_frame_callback(cb());
        assert_eq!(source.poll(t0), 1);

        source.post_frame_callback(cb());
        assert_eq!(source.poll(t0 + Duration::from_millis(5)), 0);
        assert_eq!(source.time_to_next(t0 + Duration::from_millis(5)), Duration::from_millis(11));
        assert_eq!(source.poll(t0 + Duration::from_millis(16)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
