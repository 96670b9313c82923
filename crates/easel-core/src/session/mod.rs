//! Language-server sessions.
//!
//! A [`ServerSession`] owns exactly one long-lived server process. It hands
//! the process's stdin/stdout to a message transport and is responsible for
//! making sure the process does not outlive the host:
//!
//! ```text
//! NotStarted --start()--> Running --stop()/shutdown()--> Stopped
//! ```
//!
//! The server's stderr is inherited by the host so crash output stays
//! visible even before a transport is attached.

mod registry;

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::transport::ExternalTransport;

pub use registry::{SessionRegistry, StartedSession};

/// How long a server gets to exit on its own after a completed handshake
/// before it is killed.
const EXIT_AFTER_HANDSHAKE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Stopped,
}

/// Identity of a logical server: the set of its command tokens plus its
/// working directory.
///
/// Token order is ignored, so two proposals for the same project whose
/// arguments were assembled in a different order map to the same server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    tokens: BTreeSet<String>,
    working_dir: Option<PathBuf>,
}

impl SessionKey {
    pub fn of(invocation: &Invocation) -> Self {
        Self {
            tokens: invocation.args().iter().cloned().collect(),
            working_dir: invocation.working_dir().map(PathBuf::from),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<&str> = self.tokens.iter().map(String::as_str).collect();
        write!(f, "{{{}}}", tokens.join(", "))?;
        if let Some(dir) = &self.working_dir {
            write!(f, " @ {}", dir.display())?;
        }
        Ok(())
    }
}

/// The raw byte channels of a running server.
#[derive(Debug)]
pub struct ServerStreams {
    /// Messages to the server.
    pub stdin: ChildStdin,
    /// Messages from the server.
    pub stdout: ChildStdout,
}

/// Lifecycle owner of one language-server process.
#[derive(Debug)]
pub struct ServerSession {
    key: SessionKey,
    invocation: Invocation,
    state: SessionState,
    child: Option<Child>,
    streams: Option<ServerStreams>,
}

impl ServerSession {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            key: SessionKey::of(&invocation),
            invocation,
            state: SessionState::NotStarted,
            child: None,
            streams: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the server process.
    ///
    /// Fails with [`Error::Startup`] if the command is empty or has a blank
    /// token, if the spawn fails, or if the process is already gone right
    /// after creation. On success the session is `Running` and both streams
    /// are available from [`ServerSession::take_streams`].
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::NotStarted {
            return Err(Error::InvalidState(format!(
                "language server {} was already started",
                self.key
            )));
        }
        self.invocation.validate()?;

        info!(command = %self.invocation, "starting language server");
        let mut child = self
            .invocation
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::startup(self.invocation.args(), e.to_string()))?;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                return Err(Error::startup(
                    self.invocation.args(),
                    format!("process exited immediately ({status})"),
                ));
            }
            Err(e) => {
                return Err(Error::startup(
                    self.invocation.args(),
                    format!("process state unknown after spawn: {e}"),
                ));
            }
        }

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::startup(
                self.invocation.args(),
                "server stdio pipes were not created",
            ));
        };

        info!(pid = child.id(), key = %self.key, "language server started");
        self.streams = Some(ServerStreams { stdin, stdout });
        self.child = Some(child);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Hand the server's streams to a transport.
    ///
    /// `None` before a successful [`ServerSession::start`], and after the
    /// streams have been taken once.
    pub fn take_streams(&mut self) -> Option<ServerStreams> {
        self.streams.take()
    }

    /// Whether the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(key = %self.key, %status, "language server has exited");
                false
            }
            Some(Err(e)) => {
                warn!(key = %self.key, error = %e, "error checking language server status");
                false
            }
            None => false,
        }
    }

    /// Kill the server immediately. Calling it again, or before `start`, is
    /// a no-op apart from the state change.
    pub fn stop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!(key = %self.key, error = %e, "kill failed, server already gone");
            }
        }
        self.streams = None;
        if self.state == SessionState::Running {
            info!(key = %self.key, "language server stopped");
        }
        self.state = SessionState::Stopped;
    }

    /// Graceful-then-forced teardown.
    ///
    /// With a transport attached, its shutdown handshake is given `grace`
    /// to complete; whether it completes, fails or times out, the process
    /// is then killed and reaped. Returns whether the handshake completed.
    pub async fn shutdown(
        &mut self,
        transport: Option<&dyn ExternalTransport>,
        grace: Duration,
    ) -> bool {
        if self.state != SessionState::Running {
            self.stop();
            return false;
        }

        let graceful = match transport {
            Some(transport) => match tokio::time::timeout(grace, transport.shutdown()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(key = %self.key, error = %e, "graceful shutdown failed");
                    false
                }
                Err(_) => {
                    warn!(
                        key = %self.key,
                        error = %Error::TransportShutdownTimeout(grace),
                        "forcing language server down"
                    );
                    false
                }
            },
            None => false,
        };

        if let Some(child) = self.child.as_mut() {
            if graceful {
                if let Ok(Ok(status)) =
                    tokio::time::timeout(EXIT_AFTER_HANDSHAKE, child.wait()).await
                {
                    debug!(key = %self.key, %status, "language server exited after handshake");
                }
            }
            if let Err(e) = child.kill().await {
                debug!(key = %self.key, error = %e, "kill after shutdown reported an error");
            }
        }
        self.stop();
        graceful
    }
}

impl PartialEq for ServerSession {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ServerSession {}

impl Hash for ServerSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_with_reordered_tokens_are_equal() {
        let a = ServerSession::new(
            Invocation::new(["jdtls", "-data", "/ws", "--stdio"]).in_dir("/project"),
        );
        let b = ServerSession::new(
            Invocation::new(["--stdio", "jdtls", "/ws", "-data"]).in_dir("/project"),
        );
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());

        use std::collections::HashSet;
        let set: HashSet<_> = [a.key().clone(), b.key().clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn differing_working_dir_makes_sessions_unequal() {
        let a = ServerSession::new(Invocation::new(["pylsp"]).in_dir("/project-a"));
        let b = ServerSession::new(Invocation::new(["pylsp"]).in_dir("/project-b"));
        assert_ne!(a, b);
    }

    #[test]
    fn differing_tokens_make_sessions_unequal() {
        let a = ServerSession::new(Invocation::new(["pylsp", "-v"]));
        let b = ServerSession::new(Invocation::new(["pylsp"]));
        assert_ne!(a, b);
    }

    #[test]
    fn streams_absent_before_start() {
        let mut session = ServerSession::new(Invocation::new(["cat"]));
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.take_streams().is_none());
        assert!(session.pid().is_none());
    }

    #[tokio::test]
    async fn start_empty_command_is_startup_error() {
        let mut session = ServerSession::new(Invocation::new(Vec::<String>::new()));
        let err = session.start().unwrap_err();
        assert!(err.is_startup());
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[tokio::test]
    async fn start_blank_token_is_startup_error() {
        let mut session = ServerSession::new(Invocation::new(["cat", ""]));
        assert!(session.start().unwrap_err().is_startup());
    }

    #[tokio::test]
    async fn start_missing_binary_is_startup_error() {
        let mut session = ServerSession::new(Invocation::new(["/nonexistent/language-server"]));
        assert!(session.start().unwrap_err().is_startup());
    }

    #[tokio::test]
    async fn start_exposes_streams_and_stop_is_idempotent() {
        let mut session = ServerSession::new(Invocation::new(["cat"]));
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.pid().is_some());
        assert!(session.is_alive());

        let streams = session.take_streams();
        assert!(streams.is_some());
        assert!(session.take_streams().is_none(), "streams are handed out once");

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut session = ServerSession::new(Invocation::new(["cat"]));
        session.start().unwrap();
        let err = session.start().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        session.stop();
    }

    #[tokio::test]
    async fn shutdown_without_transport_kills_process() {
        let mut session = ServerSession::new(Invocation::new(["sleep", "30"]));
        session.start().unwrap();

        let graceful = session.shutdown(None, Duration::from_millis(100)).await;
        assert!(!graceful);
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.is_alive());
    }
}
