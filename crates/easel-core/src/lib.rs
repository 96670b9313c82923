//! Out-of-process execution and protocol-session layer for the easel IDE.
//!
//! Text recovered from images upstream is compiled, packaged and run with
//! the target language's real toolchain, and language servers are kept
//! alive per project for editor assistance. This crate owns every child
//! process involved in that work.
//!
//! # Architecture
//!
//! ```text
//! Host
//!  |-- DiagnosticRouter  <--- write(tag, label, bytes) --- ProcessRunner
//!  |-- TaskManager ---- submit(TaskHandle) ---> tokio task
//!  |                                              |
//!  |                                              v
//!  |                             ProcessRunner::run(invocation, "program")
//!  |
//!  |-- SessionRegistry -- get_or_start --> ServerSession --> LspTransport
//!
//! PipelinePolicy::compile_and_execute
//!      compile --> package --> TaskManager::submit(run)
//! ```

pub mod error;
pub mod host;
pub mod invocation;
pub mod pipeline;
pub mod router;
pub mod runner;
pub mod session;
pub mod task;
pub mod transport;

pub use error::{Error, Result};
pub use host::Host;
pub use invocation::Invocation;
pub use router::{CaptureSink, DiagnosticRouter, OutputSink, WriterSink};
pub use runner::{FORCED_TERMINATION, ProcessRunner};
pub use pipeline::{BuildRequest, CompilationResult, PipelinePolicy, SourceUnit};
pub use session::{
    ServerSession, ServerStreams, SessionKey, SessionRegistry, SessionState, StartedSession,
};
pub use task::{TaskHandle, TaskManager, TaskOutcome, TaskState, TaskTicket};
pub use transport::{ExternalTransport, LspTransport};
