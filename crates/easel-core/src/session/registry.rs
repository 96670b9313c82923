//! Per-host table of running language servers, keyed by [`SessionKey`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ServerSession, ServerStreams, SessionKey};
use crate::error::Result;
use crate::invocation::Invocation;
use crate::transport::ExternalTransport;

struct ManagedSession {
    session: ServerSession,
    transport: Option<Arc<dyn ExternalTransport>>,
}

/// Result of [`SessionRegistry::get_or_start`].
#[derive(Debug)]
pub struct StartedSession {
    pub key: SessionKey,
    /// The server's streams when a new process was started. A reused
    /// session's streams already belong to its transport.
    pub streams: Option<ServerStreams>,
    pub reused: bool,
}

/// Deduplicates server processes: at most one live session per key.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, ManagedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live session for `invocation`'s key, starting one if none
    /// exists or the previous process has died.
    pub async fn get_or_start(&self, invocation: Invocation) -> Result<StartedSession> {
        let key = SessionKey::of(&invocation);
        let mut sessions = self.sessions.lock().await;

        if let Some(managed) = sessions.get_mut(&key) {
            if managed.session.is_alive() {
                debug!(%key, "reusing running language server");
                return Ok(StartedSession {
                    key,
                    streams: None,
                    reused: true,
                });
            }
            info!(%key, "previous language server is gone, starting a new one");
            managed.session.stop();
            sessions.remove(&key);
        }

        let mut session = ServerSession::new(invocation);
        session.start()?;
        let streams = session.take_streams();
        sessions.insert(
            key.clone(),
            ManagedSession {
                session,
                transport: None,
            },
        );
        Ok(StartedSession {
            key,
            streams,
            reused: false,
        })
    }

    /// Register the transport used for the graceful handshake at shutdown.
    /// Returns `false` if no session exists for `key`.
    pub async fn attach_transport(&self, key: &SessionKey, transport: Arc<dyn ExternalTransport>) -> bool {
        match self.sessions.lock().await.get_mut(key) {
            Some(managed) => {
                managed.transport = Some(transport);
                true
            }
            None => false,
        }
    }

    pub async fn transport(&self, key: &SessionKey) -> Option<Arc<dyn ExternalTransport>> {
        self.sessions
            .lock()
            .await
            .get(key)
            .and_then(|managed| managed.transport.clone())
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Kill and forget one session without the handshake. Returns `false`
    /// if unknown.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(mut managed) => {
                managed.session.stop();
                true
            }
            None => false,
        }
    }

    /// Gracefully stop and forget one session. Returns `false` if unknown.
    pub async fn stop(&self, key: &SessionKey, grace: Duration) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(mut managed) => {
                managed
                    .session
                    .shutdown(managed.transport.as_deref(), grace)
                    .await;
                true
            }
            None => false,
        }
    }

    /// Shut every session down concurrently. Returns how many completed
    /// the graceful handshake.
    pub async fn shutdown_all(&self, grace: Duration) -> usize {
        let drained: Vec<ManagedSession> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, managed)| managed)
            .collect();
        if drained.is_empty() {
            return 0;
        }
        info!(sessions = drained.len(), "shutting down language servers");

        let results = join_all(drained.into_iter().map(|mut managed| async move {
            managed
                .session
                .shutdown(managed.transport.as_deref(), grace)
                .await
        }))
        .await;
        results.into_iter().filter(|graceful| *graceful).count()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
