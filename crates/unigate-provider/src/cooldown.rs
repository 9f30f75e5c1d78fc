use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{sleep_until, Instant};

use crate::credential::{CredentialId, CredentialStatus};
use crate::pool::CredState;

/// Deadline queue that flips cooled-down credentials back to active.
///
/// A binary heap keyed by deadline plus a notify wakes the recovery task
/// exactly when the next credential is due; no polling.
#[derive(Debug)]
pub(crate) struct CooldownQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, CredentialId)>>>,
    notify: Notify,
    closed: Notify,
}

impl CooldownQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            closed: Notify::new(),
        }
    }

    pub(crate) async fn push(&self, until: Instant, credential_id: CredentialId) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, credential_id)));
        }
        // Always notify: the task re-computes the nearest deadline.
        self.notify.notify_one();
    }

    /// Stops the recovery task; called when the owning pool is retired on
    /// reload or shutdown.
    pub(crate) fn close(&self) {
        self.closed.notify_waiters();
        self.closed.notify_one();
    }

    pub(crate) fn spawn_recover_task(
        self: Arc<Self>,
        states: Arc<RwLock<HashMap<CredentialId, CredState>>>,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((deadline, _))| *deadline)
                };

                match next {
                    None => {
                        tokio::select! {
                            _ = self.notify.notified() => continue,
                            _ = self.closed.notified() => return,
                        }
                    }
                    Some(deadline) => {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = self.notify.notified() => continue,
                            _ = self.closed.notified() => return,
                        }
                    }
                }

                let now = Instant::now();
                let mut due: Vec<CredentialId> = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((deadline, id))) = heap.peek().copied()
                        && deadline <= now
                    {
                        heap.pop();
                        due.push(id);
                    }
                }
                if due.is_empty() {
                    continue;
                }

                // Guard against stale entries: a later, longer cooldown on
                // the same credential must not be cut short.
                let mut guard = states.write().await;
                for id in due {
                    let Some(state) = guard.get_mut(&id) else {
                        continue;
                    };
                    let recover = matches!(
                        state.status,
                        CredentialStatus::QuotaExhausted | CredentialStatus::Failing
                    ) && state.until.is_some_and(|until| until <= now);
                    if recover {
                        state.status = CredentialStatus::Active;
                        state.until = None;
                        tracing::debug!(credential_id = id, "credential cooldown elapsed");
                    }
                }
            }
        });
    }
}
