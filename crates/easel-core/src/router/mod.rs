//! Diagnostic router: named output channels shared by every producer.
//!
//! Producers publish bytes with `write(tag, label, data)`. A channel is a
//! label bound to a sink plus the set of publisher tags allowed to write to
//! it. Channels come and go as UI surfaces open and close, so writes to a
//! missing label, or from a tag the channel does not accept, are dropped
//! silently instead of failing the producer.
//!
//! # Locking
//!
//! ```text
//! channels: RwLock<HashMap<label, Arc<ChannelSlot>>>   (held only for lookup)
//!                                    |
//!                                    v
//!                         ChannelSlot: Mutex<SlotState> (held per write)
//! ```
//!
//! Writers to unrelated labels only share the read side of the map lock,
//! and that is released before the slot is locked. Writers to the same
//! label are totally ordered by the slot mutex, which is what keeps each
//! channel's delivery order identical to production order.

mod sink;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, trace, warn};

pub use sink::{CaptureSink, OutputSink, WriterSink};

/// Standard channel labels used by the pipelines.
pub mod labels {
    /// Compiler and packager diagnostics.
    pub const COMPILER: &str = "compiler";
    /// Output of the user's running program.
    pub const PROGRAM: &str = "program";
}

struct SlotState {
    sink: Box<dyn OutputSink>,
    allowed_tags: HashSet<String>,
    closed: bool,
}

struct ChannelSlot {
    state: Mutex<SlotState>,
}

impl ChannelSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of named output channels.
///
/// One router is owned by the [`crate::Host`] and shared by `Arc` with every
/// runner, pipeline and task that publishes output.
#[derive(Default)]
pub struct DiagnosticRouter {
    channels: RwLock<HashMap<String, Arc<ChannelSlot>>>,
}

impl DiagnosticRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` under `label`, accepting writes from `allowed_tags`.
    ///
    /// If the label is already registered, the old sink is flushed and then
    /// replaced in place; writers that already resolved the channel deliver
    /// to the new sink from that point on.
    pub fn add_channel<I, S>(&self, label: &str, sink: impl OutputSink + 'static, allowed_tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed_tags: HashSet<String> = allowed_tags.into_iter().map(Into::into).collect();
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = channels.get(label) {
            let mut state = slot.lock();
            if let Err(e) = state.sink.flush() {
                warn!(label, error = %e, "failed to flush replaced channel sink");
            }
            state.sink = Box::new(sink);
            state.allowed_tags = allowed_tags;
            debug!(label, "replaced sink on existing channel");
            return;
        }

        channels.insert(
            label.to_string(),
            Arc::new(ChannelSlot {
                state: Mutex::new(SlotState {
                    sink: Box::new(sink),
                    allowed_tags,
                    closed: false,
                }),
            }),
        );
        debug!(label, "channel added");
    }

    /// Detach and close the channel registered under `label`.
    ///
    /// Returns `false` (and logs a warning) if no such channel exists. Any
    /// later write for the label is dropped.
    pub fn remove_channel(&self, label: &str) -> bool {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label);

        let Some(slot) = removed else {
            warn!(label, "remove requested for unknown channel");
            return false;
        };

        let mut state = slot.lock();
        state.closed = true;
        if let Err(e) = state.sink.close() {
            warn!(label, error = %e, "failed to close channel sink");
        }
        debug!(label, "channel removed");
        true
    }

    /// Publish `data` on `label` as publisher `tag`.
    ///
    /// Returns whether the bytes reached a sink. Unknown labels, closed
    /// channels and disallowed tags are ignored.
    pub fn write(&self, tag: &str, label: &str, data: &[u8]) -> bool {
        let slot = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            channels.get(label).cloned()
        };

        let Some(slot) = slot else {
            trace!(tag, label, len = data.len(), "dropping write for absent channel");
            return false;
        };

        let mut state = slot.lock();
        if state.closed {
            trace!(tag, label, "dropping write for removed channel");
            return false;
        }
        if !state.allowed_tags.contains(tag) {
            trace!(tag, label, "publisher tag not allowed on channel");
            return false;
        }
        if let Err(e) = state.sink.write(data) {
            warn!(tag, label, error = %e, "channel sink write failed");
            return false;
        }
        true
    }

    /// Whether a channel is currently registered under `label`.
    pub fn has_channel(&self, label: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(label)
    }

    /// Labels of all registered channels, in no particular order.
    pub fn labels(&self) -> Vec<String> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for DiagnosticRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticRouter")
            .field("channels", &self.labels())
            .finish()
    }
}
