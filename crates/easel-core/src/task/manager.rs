//! Task manager: runs submitted tasks and tracks them until terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TaskHandle, TaskId, TaskOutcome, TaskState};

struct TrackedTask {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<TaskState>,
}

#[derive(Default)]
struct ManagerInner {
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
    idle: Notify,
}

impl ManagerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TrackedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deregister(&self, id: TaskId) {
        let now_empty = {
            let mut tasks = self.tasks();
            tasks.remove(&id);
            tasks.is_empty()
        };
        if now_empty {
            self.idle.notify_waiters();
        }
    }
}

/// Snapshot of a task that has not reached a terminal state yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
}

/// Caller-side view of a submitted task.
#[derive(Debug)]
pub struct TaskTicket {
    id: TaskId,
    state: watch::Receiver<TaskState>,
    join: JoinHandle<TaskOutcome>,
}

impl TaskTicket {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's current state.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Wait until the task is terminal and its handlers have run.
    pub async fn wait(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failed(format!("task supervisor failed: {e}")),
        }
    }
}

/// Runs [`TaskHandle`]s, one tokio task each, and keeps a registry of the
/// ones still in flight so they can be cancelled in bulk at shutdown.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone, Default)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `handle` on its own task and track it until it is terminal.
    pub fn submit(&self, handle: TaskHandle) -> TaskTicket {
        let id = handle.id;
        let (tx, rx) = watch::channel(TaskState::Pending);

        self.inner.tasks().insert(
            id,
            TrackedTask {
                name: handle.name.clone(),
                cancel: handle.cancel.clone(),
                state: rx.clone(),
            },
        );
        info!(task_id = %id, task_name = %handle.name, "task submitted");

        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move {
            let outcome = handle.execute(&tx).await;
            inner.deregister(id);
            debug!(task_id = %id, ?outcome, "task deregistered");
            outcome
        });

        TaskTicket {
            id,
            state: rx,
            join,
        }
    }

    /// All tracked tasks that have not reached a terminal state.
    pub fn active(&self) -> Vec<ActiveTask> {
        self.inner
            .tasks()
            .iter()
            .filter_map(|(id, tracked)| {
                let state = *tracked.state.borrow();
                (!state.is_terminal()).then(|| ActiveTask {
                    id: *id,
                    name: tracked.name.clone(),
                    state,
                })
            })
            .collect()
    }

    /// Request cancellation of one task. Returns `false` if it is not tracked.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.inner.tasks().get(&id) {
            Some(tracked) => {
                tracked.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Broadcast cancellation to every tracked task. Returns how many were
    /// signalled.
    pub fn cancel_all(&self) -> usize {
        let tasks = self.inner.tasks();
        for (id, tracked) in tasks.iter() {
            debug!(task_id = %id, task_name = %tracked.name, "cancelling task");
            tracked.cancel.cancel();
        }
        tasks.len()
    }

    pub fn len(&self) -> usize {
        self.inner.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks().is_empty()
    }

    /// Wait until no task is tracked. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Cancel everything and wait up to `grace` for the tasks to finish.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let signalled = self.cancel_all();
        if signalled > 0 {
            info!(tasks = signalled, "cancelling running tasks");
        }
        let idle = self.wait_idle(grace).await;
        if !idle {
            warn!(remaining = self.len(), "tasks still running after shutdown grace period");
        }
        idle
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tracked", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FORCED_TERMINATION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn submitted_task_runs_and_deregisters() {
        let manager = TaskManager::new();
        let ticket = manager.submit(TaskHandle::new("quick", |_cancel| async { anyhow::Ok(0) }));

        let outcome = ticket.wait().await;
        assert_eq!(outcome, TaskOutcome::Succeeded(0));
        assert!(manager.is_empty());
        assert!(manager.active().is_empty());
    }

    #[tokio::test]
    async fn active_lists_in_flight_tasks() {
        let manager = TaskManager::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let ticket = manager.submit(TaskHandle::new("blocked", |_cancel| async move {
            let _ = release_rx.await;
            anyhow::Ok(0)
        }));

        let active = manager.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ticket.id());
        assert_eq!(active[0].name, "blocked");
        assert!(!active[0].state.is_terminal());

        release_tx.send(()).unwrap();
        ticket.wait().await;
        assert!(manager.active().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_reaches_every_task_through_success_path() {
        let manager = TaskManager::new();
        let successes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let mut tickets = Vec::new();
        for i in 0..3 {
            let s = Arc::clone(&successes);
            let e = Arc::clone(&errors);
            let handle = TaskHandle::new(format!("worker-{i}"), |cancel| async move {
                cancel.cancelled().await;
                anyhow::Ok(FORCED_TERMINATION)
            })
            .on_success(move |code| {
                assert!(code < 0);
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });
            tickets.push(manager.submit(handle));
        }

        assert_eq!(manager.cancel_all(), 3);
        for ticket in tickets {
            assert!(ticket.wait().await.is_forced_termination());
        }
        assert_eq!(successes.load(Ordering::SeqCst), 3);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_still_completes_the_task() {
        let manager = TaskManager::new();
        let after = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&after);
        let handle = TaskHandle::new("noisy", |_cancel| async { anyhow::Ok(0) })
            .on_success(|_| panic!("handler bug"))
            .after_all(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let ticket = manager.submit(handle);
        assert_eq!(ticket.wait().await, TaskOutcome::Succeeded(0));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
        assert!(manager.wait_idle(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn cancel_unknown_task_returns_false() {
        let manager = TaskManager::new();
        assert!(!manager.cancel(uuid::Uuid::new_v4()));
    }

    #[tokio::test]
    async fn wait_idle_times_out_while_work_is_pending() {
        let manager = TaskManager::new();
        let ticket = manager.submit(TaskHandle::new("slow", |cancel| async move {
            cancel.cancelled().await;
            anyhow::Ok(FORCED_TERMINATION)
        }));

        assert!(!manager.wait_idle(Duration::from_millis(100)).await);
        assert!(manager.shutdown(Duration::from_secs(5)).await);
        assert_eq!(ticket.wait().await, TaskOutcome::Succeeded(FORCED_TERMINATION));
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_empty() {
        let manager = TaskManager::new();
        assert!(manager.wait_idle(Duration::from_millis(10)).await);
    }
}
