//! javac + jar + java.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::workspace::{self, SourceTree};
use super::{
    BuildRequest, CompilationResult, PipelineContext, PipelinePolicy, Plan, Step, join_paths, token,
};
use crate::error::{Error, Result};
use crate::invocation::Invocation;

/// Toolchain binaries and layout for [`JavaPipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaOptions {
    pub javac: String,
    pub jar: String,
    pub java: String,
    /// Entry point written into the jar manifest.
    pub main_class: String,
    /// Extensions of the images sources were recovered from.
    pub source_extensions: Vec<String>,
    /// Base directory for temporary source trees. Defaults to the system
    /// temporary directory.
    #[serde(skip)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for JavaOptions {
    fn default() -> Self {
        Self {
            javac: "javac".into(),
            jar: "jar".into(),
            java: "java".into(),
            main_class: "Main".into(),
            source_extensions: vec!["png".into()],
            scratch_dir: None,
        }
    }
}

/// Compiles into the output directory, packages an executable jar and runs
/// it with `java -jar`, or with an explicit classpath when libraries are
/// given.
#[derive(Debug, Clone)]
pub struct JavaPipeline {
    ctx: PipelineContext,
    options: JavaOptions,
}

impl JavaPipeline {
    pub fn new(ctx: PipelineContext, options: JavaOptions) -> Self {
        Self { ctx, options }
    }

    pub fn options(&self) -> &JavaOptions {
        &self.options
    }

    fn plan(&self, request: &BuildRequest) -> Result<Plan<SourceTree>> {
        if request.units.is_empty() {
            return Err(Error::InvalidState("no source units to compile".into()));
        }
        let opts = &self.options;

        let tree = match &opts.scratch_dir {
            Some(dir) => SourceTree::create_in(dir)?,
            None => SourceTree::create()?,
        };
        let sources =
            tree.write_units(&request.units, &request.input_root, &opts.source_extensions)?;

        workspace::recreate_dir(&request.output_dir)?;
        workspace::remove_file_if_exists(&request.artifact)?;
        if let Some(resources) = &request.resources {
            workspace::copy_resources(resources, &request.output_dir)?;
        }

        let out = token(&request.output_dir);
        let artifact = token(&request.artifact);

        let mut javac = vec![opts.javac.clone(), "-g".into(), "-verbose".into()];
        if !request.libs.is_empty() {
            javac.push("-cp".into());
            javac.push(join_paths(&request.libs)?);
        }
        javac.push("-d".into());
        javac.push(out.clone());
        javac.extend(sources.iter().map(|p| token(p)));

        let jar = [
            opts.jar.clone(),
            "-c".into(),
            "-f".into(),
            artifact.clone(),
            "-e".into(),
            opts.main_class.clone(),
            "-C".into(),
            out,
            ".".into(),
        ];

        let run = if request.libs.is_empty() {
            Invocation::new([opts.java.clone(), "-jar".into(), artifact])
        } else {
            let mut classpath = vec![request.artifact.clone()];
            classpath.extend(request.libs.iter().cloned());
            Invocation::new([
                opts.java.clone(),
                "-cp".into(),
                join_paths(&classpath)?,
                opts.main_class.clone(),
            ])
        };

        Ok(Plan {
            steps: vec![
                Step {
                    status: "Compiling...",
                    invocation: Invocation::new(javac),
                },
                Step {
                    status: "Packaging...",
                    invocation: Invocation::new(jar),
                },
            ],
            run,
            scratch: tree,
        })
    }
}

#[async_trait]
impl PipelinePolicy for JavaPipeline {
    fn name(&self) -> &str {
        "java"
    }

    async fn compile_and_execute(&self, request: BuildRequest) -> Result<CompilationResult> {
        super::drive(&self.ctx, self.name(), request, |req| self.plan(req)).await
    }
}
