//! Asynchronous units of work with completion callbacks.
//!
//! A [`TaskHandle`] wraps one unit of work (typically "run the packaged
//! program") together with the handlers to call when it finishes. Handing
//! it to a [`TaskManager`] runs it on its own tokio task, off the
//! controlling thread.
//!
//! Every task ends in exactly one [`TaskOutcome`]:
//!
//! ```text
//! work -> Ok(code)   => Succeeded(code): on_success..., then after_all...
//! work -> Err / panic => Failed(message): on_error...,   then after_all...
//! ```
//!
//! Cancellation is cooperative. A cancelled runner returns
//! [`crate::FORCED_TERMINATION`] as an ordinary code, so a cancelled task
//! completes through the *success* handlers with a negative code. Callers
//! rely on that: check for a negative code in `on_success`.

mod manager;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::runner::FORCED_TERMINATION;

pub use manager::{ActiveTask, TaskManager, TaskTicket};

/// Identity of a submitted task.
pub type TaskId = Uuid;

/// Lifecycle of a task. Transitions only move forward:
///
/// ```text
/// pending -> running -> succeeded
///                    -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether moving from `self` to `next` is an edge of the state graph.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The work returned a completion code. Negative means the process was
    /// forcibly terminated.
    Succeeded(i32),
    /// The work faulted; the message is derived from the error or panic.
    Failed(String),
}

impl TaskOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Succeeded(code) => Some(*code),
            Self::Failed(_) => None,
        }
    }

    pub fn is_forced_termination(&self) -> bool {
        matches!(self, Self::Succeeded(code) if *code < 0)
    }

    fn state(&self) -> TaskState {
        match self {
            Self::Succeeded(_) => TaskState::Succeeded,
            Self::Failed(_) => TaskState::Failed,
        }
    }
}

type Work = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<i32>> + Send>;
type SuccessHandler = Box<dyn FnOnce(i32) + Send>;
type ErrorHandler = Box<dyn FnOnce(&str) + Send>;
type AfterAllHandler = Box<dyn FnOnce(&TaskOutcome) + Send>;

/// A unit of work plus its completion handlers, ready to submit.
///
/// The work closure receives nothing but the task's cancellation token; it
/// should pass that token to any [`crate::ProcessRunner::run`] call so
/// that [`TaskManager::cancel_all`] reaches the child process.
pub struct TaskHandle {
    id: TaskId,
    name: String,
    cancel: CancellationToken,
    work: Work,
    on_success: Vec<SuccessHandler>,
    on_error: Vec<ErrorHandler>,
    after_all: Vec<AfterAllHandler>,
}

impl TaskHandle {
    /// Wrap `work` into a new pending task.
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<i32>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cancel: CancellationToken::new(),
            work: Box::new(move |cancel| Box::pin(work(cancel))),
            on_success: Vec::new(),
            on_error: Vec::new(),
            after_all: Vec::new(),
        }
    }

    /// Call `handler` with the completion code when the work returns.
    pub fn on_success(mut self, handler: impl FnOnce(i32) + Send + 'static) -> Self {
        self.on_success.push(Box::new(handler));
        self
    }

    /// Call `handler` with a description of the fault if the work fails.
    pub fn on_error(mut self, handler: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_error.push(Box::new(handler));
        self
    }

    /// Call `handler` after the success or error handlers, whatever the
    /// outcome.
    pub fn after_all(mut self, handler: impl FnOnce(&TaskOutcome) + Send + 'static) -> Self {
        self.after_all.push(Box::new(handler));
        self
    }

    /// Tie this task to an existing cancellation token instead of its own.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A clone of the token the work closure will receive.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the work to completion, fire the handlers, and publish the
    /// terminal state.
    async fn execute(self, state: &watch::Sender<TaskState>) -> TaskOutcome {
        let Self {
            id,
            name,
            cancel,
            work,
            on_success,
            on_error,
            after_all,
        } = self;

        advance(state, TaskState::Running);
        debug!(task_id = %id, task_name = %name, "task running");

        // A nested spawn turns a panic in the work into a JoinError instead
        // of tearing down the supervisor.
        let outcome = match tokio::spawn(work(cancel)).await {
            Ok(Ok(code)) => TaskOutcome::Succeeded(code),
            Ok(Err(e)) => TaskOutcome::Failed(format!("{e:#}")),
            Err(e) if e.is_panic() => TaskOutcome::Failed(panic_message(e.into_panic())),
            Err(e) => TaskOutcome::Failed(format!("task aborted: {e}")),
        };

        match &outcome {
            TaskOutcome::Succeeded(code) => {
                if *code == FORCED_TERMINATION {
                    debug!(task_id = %id, "task completed after forced termination");
                }
                for handler in on_success {
                    guarded(id, "on_success", || handler(*code));
                }
            }
            TaskOutcome::Failed(message) => {
                warn!(task_id = %id, task_name = %name, error = %message, "task failed");
                for handler in on_error {
                    guarded(id, "on_error", || handler(message));
                }
            }
        }
        for handler in after_all {
            guarded(id, "after_all", || handler(&outcome));
        }

        advance(state, outcome.state());
        outcome
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("on_success", &self.on_success.len())
            .field("on_error", &self.on_error.len())
            .field("after_all", &self.after_all.len())
            .finish()
    }
}

fn advance(state: &watch::Sender<TaskState>, next: TaskState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            warn!(from = %current, to = %next, "ignoring invalid task state transition");
            false
        }
    });
}

/// Run one completion handler. A panicking handler is logged and does not
/// stop the remaining handlers or the terminal transition.
fn guarded(id: TaskId, group: &str, handler: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(handler)) {
        warn!(task_id = %id, group, panic = %panic_message(payload), "task handler panicked");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}
