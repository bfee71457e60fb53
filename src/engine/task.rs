//! Superseding units of work.
//!
//! [`TaskManager`] owns at most one *current* task. Spawning a new task
//! cancels the previous one; waiting always targets whichever task is current
//! when the previous target finishes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag shared between a task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token and wakes every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// How a fetch-and-activate cycle ended.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The result was activated.
    Completed,
    /// Superseded before activation.
    Cancelled,
    /// The resolve call failed.
    Failed(crate::error::ConfidenceError),
}

struct Slot {
    id: u64,
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Runs superseding tasks on a tokio runtime.
pub struct TaskManager {
    runtime: Handle,
    current: Mutex<Option<Slot>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("current", &self.current_id())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Creates a manager spawning onto `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runtime tasks are spawned on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Installs a new current task and cancels its predecessor.
    ///
    /// `make` receives the new task's token. Returns the task id.
    pub fn spawn<F, Fut>(&self, make: F) -> u64
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let work = make(token.clone());

        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            current.replace(Slot {
                id,
                token,
                done: done_rx,
            })
        };
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let _: JoinHandle<()> = self.runtime.spawn(async move {
            work.await;
            let _ = done_tx.send(true);
        });
        id
    }

    /// Id of the current task, if any.
    #[must_use]
    pub fn current_id(&self) -> Option<u64> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| slot.id)
    }

    fn snapshot(&self) -> Option<(u64, CancellationToken, watch::Receiver<bool>)> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| (slot.id, slot.token.clone(), slot.done.clone()))
    }

    /// Waits until the current task has finished.
    ///
    /// If the task is superseded while waiting, the wait moves on to the
    /// replacement rather than returning early.
    pub async fn await_reconciliation(&self) {
        loop {
            let Some((id, token, mut done)) = self.snapshot() else {
                return;
            };
            if token.is_cancelled() && self.current_id() != Some(id) {
                continue;
            }
            while !*done.borrow_and_update() {
                // A dropped sender means the task ended without reporting.
                if done.changed().await.is_err() {
                    break;
                }
            }
            if self.current_id() == Some(id) {
                return;
            }
        }
    }
}
