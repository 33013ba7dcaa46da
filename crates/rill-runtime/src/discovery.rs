//! Background discovery pool
//!
//! Declaring a page state (`PreparedState::prepare`) may run on one
//! dedicated worker. The result is handed to a continuation which is
//! expected to forward the commit to the writer thread. A task that
//! has not delivered yet can be cancelled by the owning page.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rill_core::{RillError, RillResult};
use tokio::runtime::{Builder, Runtime as TokioRuntime};
use tokio::task::JoinHandle;

use crate::DiscoveryMode;

pub struct DiscoveryPool {
    mode: DiscoveryMode,
    worker: Option<TokioRuntime>,
}

impl DiscoveryPool {
    pub fn new(mode: DiscoveryMode) -> RillResult<Self> {
        let worker = match mode {
            DiscoveryMode::Inline => None,
            DiscoveryMode::Background => Some(
                Builder::new_multi_thread()
                    .worker_threads(1)
                    .max_blocking_threads(1)
                    .thread_name("rill-discovery")
                    .build()
                    .map_err(|e| RillError::Config(format!("discovery worker: {e}")))?,
            ),
        };
        Ok(Self { mode, worker })
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    /// Run `work`, then hand its result to `then` unless the task was
    /// cancelled first. Inline pools do both before returning.
    pub fn spawn<R, W, T>(&self, work: W, then: T) -> DiscoveryTask
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        T: FnOnce(R) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let Some(worker) = &self.worker else {
            then(work());
            return DiscoveryTask {
                cancelled,
                handle: None,
            };
        };
        let flag = cancelled.clone();
        let handle = worker.spawn_blocking(move || {
            let result = work();
            if flag.load(Ordering::SeqCst) {
                tracing::debug!("discovery result dropped after cancel");
                return;
            }
            then(result);
        });
        DiscoveryTask {
            cancelled,
            handle: Some(handle),
        }
    }
}

impl Drop for DiscoveryPool {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown_background();
        }
    }
}

impl fmt::Debug for DiscoveryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryPool").field("mode", &self.mode).finish()
    }
}

/// Handle to one discovery run
pub struct DiscoveryTask {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryTask {
    /// Prevent the continuation from running. Has no effect once it
    /// already ran.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_immediately() {
        let pool = DiscoveryPool::new(DiscoveryMode::Inline).unwrap();
        let (tx, rx) = mpsc::channel();
        let task = pool.spawn(|| 7, move |v| tx.send(v).unwrap());
        assert!(task.is_finished());
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_background_delivers_off_thread() {
        let pool = DiscoveryPool::new(DiscoveryMode::Background).unwrap();
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        let _task = pool.spawn(
            || std::thread::current().id(),
            move |worker| tx.send(worker).unwrap(),
        );
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_cancel_suppresses_continuation() {
        let pool = DiscoveryPool::new(DiscoveryMode::Background).unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();
        let task = pool.spawn(
            move || {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            },
            move |_| tx.send(()).unwrap(),
        );
        task.cancel();
        let _ = gate_tx.send(());
        assert!(task.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
