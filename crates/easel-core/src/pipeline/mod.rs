//! Compile, package and run pipelines.
//!
//! A [`PipelinePolicy`] turns a [`BuildRequest`] into a strictly ordered
//! series of processes:
//!
//! ```text
//! register compiler channel
//!   -> prepare sources (temp tree, output dir, resources)
//!   -> build steps (compile, package), each must exit 0
//!   -> CompileFailed | CompileComplete | Running(ticket)
//!
//! run task (only when executing):
//!   remove compiler channel, register program channel
//!   -> run artifact
//!   -> on_success / on_error, then after_all (remove program channel)
//! ```
//!
//! The [`CompilationResult`] comes back as soon as the build steps are
//! done. The program's outcome is only reported through the task's
//! handlers and the request's completion callback.

mod java;
mod script;
pub mod workspace;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::router::{DiagnosticRouter, OutputSink, WriterSink, labels};
use crate::runner::ProcessRunner;
use crate::task::{TaskHandle, TaskManager, TaskOutcome, TaskTicket};

pub use java::{JavaOptions, JavaPipeline};
pub use script::{ScriptOptions, ScriptPipeline};

/// Publisher tags the pipelines write under.
pub mod tags {
    /// Compiler, packager and syntax checker output.
    pub const TOOLCHAIN: &str = "toolchain";
    /// The user's program.
    pub const PROGRAM: &str = "program";
}

/// One authored image and the source text recovered from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Path of the image the text was recovered from.
    pub origin: PathBuf,
    pub text: String,
}

impl SourceUnit {
    pub fn new(origin: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }
}

/// What the synchronous part of a pipeline produced.
#[derive(Debug)]
pub enum CompilationResult {
    /// Compile and package succeeded; nothing was launched.
    CompileComplete,
    /// A build step exited non-zero. No later step was spawned.
    CompileFailed,
    /// The program was handed to the task manager and is running.
    Running(TaskTicket),
}

impl CompilationResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::CompileFailed)
    }

    pub fn ticket(self) -> Option<TaskTicket> {
        match self {
            Self::Running(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// Progress display driven by the pipelines: "Compiling...",
/// "Packaging...", "Executing...", then an empty status when idle.
pub trait StatusReporter: Send + Sync {
    fn set_status(&self, status: &str);
    fn set_indeterminate(&self, busy: bool);
}

/// Reports progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn set_status(&self, status: &str) {
        if !status.is_empty() {
            info!(status, "pipeline status");
        }
    }

    fn set_indeterminate(&self, _busy: bool) {}
}

type CompletionCallback = Box<dyn FnOnce(&TaskOutcome) + Send>;

/// Inputs of one compile-and-maybe-run request.
pub struct BuildRequest {
    units: Vec<SourceUnit>,
    input_root: PathBuf,
    artifact: PathBuf,
    output_dir: PathBuf,
    resources: Option<PathBuf>,
    libs: Vec<PathBuf>,
    execute: bool,
    compiler_label: String,
    program_label: String,
    compiler_sink: Option<Box<dyn OutputSink>>,
    program_sink: Option<Box<dyn OutputSink>>,
    reporter: Arc<dyn StatusReporter>,
    on_complete: Option<CompletionCallback>,
    cancel: CancellationToken,
}

impl BuildRequest {
    /// A request that builds `units` (found below `input_root`) into
    /// `artifact`, using `output_dir` for compiled output. It does not run
    /// the result unless [`BuildRequest::execute`] is set.
    ///
    /// Compiler output goes to stderr and program output to stdout unless
    /// other sinks are given.
    pub fn new(
        units: Vec<SourceUnit>,
        input_root: impl Into<PathBuf>,
        artifact: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            units,
            input_root: input_root.into(),
            artifact: artifact.into(),
            output_dir: output_dir.into(),
            resources: None,
            libs: Vec::new(),
            execute: false,
            compiler_label: labels::COMPILER.to_string(),
            program_label: labels::PROGRAM.to_string(),
            compiler_sink: None,
            program_sink: None,
            reporter: Arc::new(TracingReporter),
            on_complete: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Copy this file, or this directory's contents, into the output tree
    /// before packaging.
    pub fn resources(mut self, path: impl Into<PathBuf>) -> Self {
        self.resources = Some(path.into());
        self
    }

    /// Library classpath entries.
    pub fn libs<I, P>(mut self, libs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.libs.extend(libs.into_iter().map(Into::into));
        self
    }

    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    /// Publish on these channel labels instead of the standard ones, so
    /// concurrent builds do not share channels.
    pub fn labels(mut self, compiler: impl Into<String>, program: impl Into<String>) -> Self {
        self.compiler_label = compiler.into();
        self.program_label = program.into();
        self
    }

    pub fn compiler_sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.compiler_sink = Some(Box::new(sink));
        self
    }

    pub fn program_sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.program_sink = Some(Box::new(sink));
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Called with the program's outcome after the run task's own handlers.
    pub fn on_complete(mut self, callback: impl FnOnce(&TaskOutcome) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Cancelling `token` stops whichever step is running; a running
    /// program completes with the forced-termination code.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl std::fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRequest")
            .field("units", &self.units.len())
            .field("input_root", &self.input_root)
            .field("artifact", &self.artifact)
            .field("output_dir", &self.output_dir)
            .field("resources", &self.resources)
            .field("libs", &self.libs)
            .field("execute", &self.execute)
            .finish_non_exhaustive()
    }
}

/// Shared state a pipeline publishes into and submits its run task to.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    router: Arc<DiagnosticRouter>,
    tasks: TaskManager,
}

impl PipelineContext {
    pub fn new(router: Arc<DiagnosticRouter>, tasks: TaskManager) -> Self {
        Self { router, tasks }
    }

    pub fn router(&self) -> &Arc<DiagnosticRouter> {
        &self.router
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }
}

/// A per-language strategy for building and running sources.
#[async_trait]
pub trait PipelinePolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Build the request's sources and, if requested, launch the result.
    ///
    /// Returns once the build steps are finished. A process that cannot be
    /// started aborts the pipeline with [`Error::Startup`].
    async fn compile_and_execute(&self, request: BuildRequest) -> Result<CompilationResult>;
}

/// One build process and the status shown while it runs.
#[derive(Debug)]
struct Step {
    status: &'static str,
    invocation: Invocation,
}

/// What a policy prepared for [`drive`]. `scratch` lives until the build
/// steps are done.
#[derive(Debug)]
struct Plan<S> {
    steps: Vec<Step>,
    run: Invocation,
    scratch: S,
}

/// The sequencing shared by every policy.
async fn drive<S, F>(
    ctx: &PipelineContext,
    policy: &str,
    mut request: BuildRequest,
    prepare: F,
) -> Result<CompilationResult>
where
    F: FnOnce(&BuildRequest) -> Result<Plan<S>>,
{
    let router = Arc::clone(&ctx.router);
    let reporter = Arc::clone(&request.reporter);
    let compiler_label = request.compiler_label.clone();
    let compiler_sink: Box<dyn OutputSink> = match request.compiler_sink.take() {
        Some(sink) => sink,
        None => Box::new(WriterSink::new(io::stderr())),
    };
    router.add_channel(&compiler_label, compiler_sink, [tags::TOOLCHAIN]);

    let end_build = || {
        router.remove_channel(&compiler_label);
        reporter.set_indeterminate(false);
        reporter.set_status("");
    };

    let plan = match prepare(&request) {
        Ok(plan) => plan,
        Err(e) => {
            end_build();
            return Err(e);
        }
    };

    let runner = ProcessRunner::new(Arc::clone(&router), tags::TOOLCHAIN);
    let started = Instant::now();
    for step in plan.steps {
        reporter.set_status(step.status);
        reporter.set_indeterminate(true);
        let program = step.invocation.program().unwrap_or_default().to_string();
        let code = match runner
            .run(step.invocation, &compiler_label, &request.cancel)
            .await
        {
            Ok(code) => code,
            Err(e) => {
                end_build();
                return Err(e);
            }
        };
        if code != 0 {
            warn!(policy, program = %program, exit_code = code, "build step failed");
            end_build();
            return Ok(CompilationResult::CompileFailed);
        }
    }
    drop(plan.scratch);
    info!(
        policy,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "build finished"
    );

    if !request.execute {
        end_build();
        return Ok(CompilationResult::CompileComplete);
    }

    let ticket = launch(ctx, policy, request, plan.run);
    Ok(CompilationResult::Running(ticket))
}

/// Hand the packaged program to the task manager.
///
/// The compiler channel stays registered until the task actually starts,
/// then gives way to the program channel.
fn launch(ctx: &PipelineContext, policy: &str, request: BuildRequest, run: Invocation) -> TaskTicket {
    let BuildRequest {
        artifact,
        compiler_label,
        program_label,
        program_sink,
        reporter,
        on_complete,
        cancel,
        ..
    } = request;
    let router = Arc::clone(&ctx.router);
    let program_sink: Box<dyn OutputSink> = match program_sink {
        Some(sink) => sink,
        None => Box::new(WriterSink::new(io::stdout())),
    };
    let launched = Instant::now();

    let work = {
        let router = Arc::clone(&router);
        let reporter = Arc::clone(&reporter);
        let program_label = program_label.clone();
        move |cancel: CancellationToken| async move {
            router.remove_channel(&compiler_label);
            router.add_channel(&program_label, program_sink, [tags::PROGRAM]);
            reporter.set_status("Executing...");
            reporter.set_indeterminate(true);
            let runner = ProcessRunner::new(router, tags::PROGRAM);
            let code = runner.run(run, &program_label, &cancel).await?;
            anyhow::Ok(code)
        }
    };

    let name = format!("{policy}: {}", artifact.display());
    let handle = TaskHandle::new(name, work)
        .with_cancellation(cancel)
        .on_success({
            let reporter = Arc::clone(&reporter);
            move |code| {
                let message = run_summary(code, launched.elapsed());
                if code < 0 {
                    warn!(exit_code = code, "{message}");
                } else {
                    info!(exit_code = code, "{message}");
                }
                reporter.set_status(&message);
            }
        })
        .on_error({
            let reporter = Arc::clone(&reporter);
            move |fault| {
                let message = format!("program stopped: {fault}");
                warn!("{message}");
                reporter.set_status(&message);
            }
        })
        .after_all(move |outcome| {
            reporter.set_indeterminate(false);
            router.remove_channel(&program_label);
            if let Some(callback) = on_complete {
                callback(outcome);
            }
        });

    ctx.tasks.submit(handle)
}

/// Human-readable summary of a finished run.
pub fn run_summary(code: i32, elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    match code {
        c if c < 0 => format!("forcibly terminated after {ms} ms"),
        0 => format!("executed in {ms} ms"),
        _ => format!("executed with errors in {ms} ms"),
    }
}

/// Convert a path into a command token.
fn token(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Join classpath entries with the platform separator.
fn join_paths(paths: &[PathBuf]) -> Result<String> {
    let joined = std::env::join_paths(paths)
        .map_err(|e| Error::InvalidState(format!("invalid library path: {e}")))?;
    Ok(joined.to_string_lossy().into_owned())
}
