//! Worker-task bookkeeping shared by the backup and restart schedulers.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    active: Option<Worker>,
    /// Cancelled workers not yet joined.
    retired: Vec<JoinHandle<()>>,
}

/// Holds at most one live worker task per scheduler.
///
/// Disarming only cancels the worker and parks its handle; joining happens
/// later in [`WorkerSlot::join`]. A worker may therefore disarm its own
/// scheduler (a scheduled restart stops the server, which disarms the
/// restart scheduler) without waiting on itself.
pub struct WorkerSlot {
    name: &'static str,
    slots: Mutex<Slots>,
}

impl WorkerSlot {
    /// Empty slot for the scheduler called `name`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Whether a worker task is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Spawn a worker built by `make` unless one is already alive.
    ///
    /// Returns `false` if a live worker was already present.
    pub fn spawn<F, Fut>(&self, make: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.lock();
        if let Some(worker) = slots.active.take() {
            if !worker.handle.is_finished() {
                slots.active = Some(worker);
                return false;
            }
            slots.retired.push(worker.handle);
        }

        let cancel = CancellationToken::new();
        let task = make(cancel.clone()).instrument(info_span!("scheduler", name = self.name));
        let handle = tokio::spawn(task);
        slots.active = Some(Worker { cancel, handle });
        debug!(scheduler = self.name, "worker spawned");
        true
    }

    /// Signal the live worker to stop. Does not wait.
    pub fn disarm(&self) {
        let mut slots = self.lock();
        if let Some(worker) = slots.active.take() {
            worker.cancel.cancel();
            slots.retired.push(worker.handle);
            debug!(scheduler = self.name, "worker cancelled");
        }
        slots.retired.retain(|handle| !handle.is_finished());
    }

    /// Disarm, then wait up to `timeout` for every cancelled worker to exit.
    ///
    /// Must not be called from inside this slot's own worker.
    pub async fn join(&self, timeout: Duration) {
        self.disarm();
        let retired = std::mem::take(&mut self.lock().retired);
        for handle in retired {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(scheduler = self.name, %err, "worker task failed"),
                Err(_) => warn!(
                    scheduler = self.name,
                    ?timeout,
                    "worker did not exit in time; leaving it detached"
                ),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
