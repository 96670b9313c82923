//! The long-lived owner of shared execution state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::pipeline::PipelineContext;
use crate::router::DiagnosticRouter;
use crate::runner::ProcessRunner;
use crate::session::SessionRegistry;
use crate::task::TaskManager;

const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Owns the router, the task manager and the language-server registry for
/// the lifetime of the IDE. Dropping the host without calling
/// [`Host::shutdown`] still kills children (every process is spawned with
/// kill-on-drop), but skips the graceful server handshake.
#[derive(Debug)]
pub struct Host {
    router: Arc<DiagnosticRouter>,
    tasks: TaskManager,
    sessions: SessionRegistry,
    grace: Duration,
}

impl Host {
    /// Create a host whose teardown gives servers and tasks `grace` each.
    pub fn new(grace: Duration) -> Self {
        Self {
            router: Arc::new(DiagnosticRouter::new()),
            tasks: TaskManager::new(),
            sessions: SessionRegistry::new(),
            grace,
        }
    }

    pub fn router(&self) -> &Arc<DiagnosticRouter> {
        &self.router
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// A runner publishing under `tag` into this host's router.
    pub fn runner(&self, tag: impl Into<String>) -> ProcessRunner {
        ProcessRunner::new(Arc::clone(&self.router), tag)
    }

    /// The shared state a pipeline needs to compile and launch.
    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext::new(Arc::clone(&self.router), self.tasks.clone())
    }

    /// Shut down every language server and cancel every running task,
    /// concurrently. Returns once both have finished or timed out.
    pub async fn shutdown(&self) {
        info!(grace_ms = self.grace.as_millis() as u64, "host shutting down");
        let (graceful, idle) = tokio::join!(
            self.sessions.shutdown_all(self.grace),
            self.tasks.shutdown(self.grace)
        );
        info!(graceful_servers = graceful, tasks_idle = idle, "host shut down");
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;
    use crate::runner::FORCED_TERMINATION;
    use crate::task::{TaskHandle, TaskOutcome};

    #[tokio::test]
    async fn shutdown_cancels_tasks_and_stops_servers() {
        let host = Host::new(Duration::from_secs(2));

        let started = host
            .sessions()
            .get_or_start(Invocation::new(["sleep", "30"]))
            .await
            .unwrap();
        assert!(host.sessions().contains(&started.key).await);

        let runner = host.runner("program");
        let ticket = host.tasks().submit(TaskHandle::new("sleeper", move |cancel| async move {
            let code = runner
                .run(Invocation::new(["sleep", "30"]), "program", &cancel)
                .await?;
            anyhow::Ok(code)
        }));

        tokio::time::timeout(Duration::from_secs(10), host.shutdown())
            .await
            .expect("host shutdown must be bounded");

        assert!(host.sessions().is_empty().await);
        assert!(host.tasks().is_empty());
        assert_eq!(ticket.wait().await, TaskOutcome::Succeeded(FORCED_TERMINATION));
    }
}
