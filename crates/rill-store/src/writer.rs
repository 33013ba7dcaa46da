//! Writer-thread affinity
//!
//! Every mutation of the runtime happens on one designated thread.
//! [`WriterThread`] remembers that thread and offers two paths:
//!
//! - `forward`: queue a job from any thread; the host drains the queue
//!   with `pump` on the writer thread. Jobs from one sender keep their
//!   order; there is no ordering across senders.
//! - `execute`: the dispatch gate. On the writer thread a job runs at
//!   once when the gate is idle, otherwise it waits behind the running
//!   job, so dispatches never interleave.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rill_core::RillResult;
use tokio::sync::mpsc;

pub type Job = Box<dyn FnOnce() -> RillResult<()> + Send>;

#[derive(Default)]
struct Gate {
    busy: bool,
    queue: VecDeque<(&'static str, Job)>,
}

struct WriterInner {
    thread: ThreadId,
    tx: mpsc::UnboundedSender<(&'static str, Job)>,
    rx: Mutex<mpsc::UnboundedReceiver<(&'static str, Job)>>,
    gate: Mutex<Gate>,
    forwarded: AtomicU64,
    executed: AtomicU64,
}

#[derive(Clone)]
pub struct WriterThread {
    inner: Arc<WriterInner>,
}

/// Clears the busy flag even if a job panics.
struct BusyGuard<'a>(&'a WriterThread);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.gate.lock().busy = false;
    }
}

impl WriterThread {
    /// Binds the writer role to the calling thread.
    pub fn bind_current() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        WriterThread {
            inner: Arc::new(WriterInner {
                thread: thread::current().id(),
                tx,
                rx: Mutex::new(rx),
                gate: Mutex::new(Gate::default()),
                forwarded: AtomicU64::new(0),
                executed: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Queue `job` for the writer thread. Never blocks.
    pub fn forward(&self, label: &'static str, job: Job) {
        self.inner.forwarded.fetch_add(1, Ordering::Relaxed);
        if self.inner.tx.send((label, job)).is_err() {
            tracing::warn!("writer queue closed, dropping {}", label);
        }
    }

    /// Run `job` under the dispatch gate.
    ///
    /// Returns the job's own result when it ran synchronously. A job
    /// that was forwarded or queued reports `Ok(())`; its error, if any,
    /// is logged when it runs.
    pub fn execute(&self, label: &'static str, job: Job) -> RillResult<()> {
        if !self.is_current() {
            let this = self.clone();
            self.forward(label, Box::new(move || this.execute(label, job)));
            return Ok(());
        }
        {
            let mut gate = self.inner.gate.lock();
            if gate.busy {
                gate.queue.push_back((label, job));
                return Ok(());
            }
            gate.busy = true;
        }

        let _busy = BusyGuard(self);
        self.inner.executed.fetch_add(1, Ordering::Relaxed);
        let result = job();
        loop {
            let next = self.inner.gate.lock().queue.pop_front();
            let Some((label, job)) = next else { break };
            self.inner.executed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = job() {
                tracing::error!(target: "rill::error", "queued {} failed: {}", label, e);
            }
        }
        result
    }

    /// True while a job holds the dispatch gate
    pub fn is_dispatching(&self) -> bool {
        self.inner.gate.lock().busy
    }

    /// Drain forwarded jobs. Must be called on the writer thread;
    /// returns the number of jobs run.
    pub fn pump(&self) -> usize {
        if !self.is_current() {
            tracing::warn!("pump called off the writer thread");
            return 0;
        }
        let mut ran = 0;
        loop {
            let next = self.inner.rx.lock().try_recv();
            let Ok((label, job)) = next else { break };
            ran += 1;
            if let Err(e) = job() {
                tracing::error!(target: "rill::error", "forwarded {} failed: {}", label, e);
            }
        }
        ran
    }

    /// Jobs forwarded so far
    pub fn forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    /// Jobs run under the gate so far
    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }
}
