//! Interpreted languages: no compiler, the output directory is the
//! artifact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::workspace;
use super::{BuildRequest, CompilationResult, PipelineContext, PipelinePolicy, Plan, Step, token};
use crate::error::{Error, Result};
use crate::invocation::Invocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    pub interpreter: String,
    /// Arguments that make the interpreter check the entry file without
    /// running it. Empty skips the check step.
    pub check_args: Vec<String>,
    /// Entry file relative to the output directory. Defaults to the first
    /// source unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub source_extensions: Vec<String>,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            check_args: vec!["-m".into(), "py_compile".into()],
            entry: None,
            source_extensions: vec!["png".into()],
        }
    }
}

/// Writes the sources and resources into the output directory, optionally
/// syntax-checks the entry file, and runs `<interpreter> <entry>` from the
/// output directory. The request's artifact path is not used.
#[derive(Debug, Clone)]
pub struct ScriptPipeline {
    ctx: PipelineContext,
    options: ScriptOptions,
}

impl ScriptPipeline {
    pub fn new(ctx: PipelineContext, options: ScriptOptions) -> Self {
        Self { ctx, options }
    }

    pub fn options(&self) -> &ScriptOptions {
        &self.options
    }

    fn plan(&self, request: &BuildRequest) -> Result<Plan<()>> {
        let Some(first) = request.units.first() else {
            return Err(Error::InvalidState("no source units to package".into()));
        };
        let opts = &self.options;
        let out = &request.output_dir;

        workspace::recreate_dir(out)?;
        workspace::write_units(out, &request.units, &request.input_root, &opts.source_extensions)?;
        if let Some(resources) = &request.resources {
            workspace::copy_resources(resources, out)?;
        }

        let entry = match &opts.entry {
            Some(entry) => entry.clone(),
            None => token(&workspace::mirror_path(
                &first.origin,
                &request.input_root,
                &opts.source_extensions,
            )?),
        };

        let mut steps = Vec::new();
        if !opts.check_args.is_empty() {
            let mut check = vec![opts.interpreter.clone()];
            check.extend(opts.check_args.iter().cloned());
            check.push(entry.clone());
            steps.push(Step {
                status: "Compiling...",
                invocation: Invocation::new(check).in_dir(out),
            });
        }

        Ok(Plan {
            steps,
            run: Invocation::new([opts.interpreter.clone(), entry]).in_dir(out),
            scratch: (),
        })
    }
}

#[async_trait]
impl PipelinePolicy for ScriptPipeline {
    fn name(&self) -> &str {
        "script"
    }

    async fn compile_and_execute(&self, request: BuildRequest) -> Result<CompilationResult> {
        super::drive(&self.ctx, self.name(), request, |req| self.plan(req)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SourceUnit;
    use crate::router::DiagnosticRouter;
    use crate::task::TaskManager;
    use std::sync::Arc;

    fn pipeline(options: ScriptOptions) -> ScriptPipeline {
        let ctx = PipelineContext::new(Arc::new(DiagnosticRouter::new()), TaskManager::new());
        ScriptPipeline::new(ctx, options)
    }

    #[test]
    fn plan_packages_sources_into_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("dist");
        let res = tmp.path().join("data.csv");
        std::fs::write(&res, "a,b\n").unwrap();

        let request = BuildRequest::new(
            vec![
                SourceUnit::new("/in/main.py.png", "print('hi')\n"),
                SourceUnit::new("/in/util/helpers.py.png", "X = 1\n"),
            ],
            "/in",
            "unused",
            &out,
        )
        .resources(&res);

        let plan = pipeline(ScriptOptions::default()).plan(&request).unwrap();

        assert_eq!(std::fs::read_to_string(out.join("main.py")).unwrap(), "print('hi')\n");
        assert!(out.join("util/helpers.py").is_file());
        assert!(out.join("data.csv").is_file());

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(
            plan.steps[0].invocation.args(),
            ["python3", "-m", "py_compile", "main.py"]
        );
        assert_eq!(plan.run.args(), ["python3", "main.py"]);
        assert_eq!(plan.run.working_dir(), Some(out.as_path()));
    }

    #[test]
    fn empty_check_args_skip_the_check_step() {
        let tmp = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(
            vec![SourceUnit::new("/in/app.rb.png", "puts 1\n")],
            "/in",
            "unused",
            tmp.path().join("dist"),
        );
        let plan = pipeline(ScriptOptions {
            interpreter: "ruby".into(),
            check_args: vec![],
            entry: Some("app.rb".into()),
            ..ScriptOptions::default()
        })
        .plan(&request)
        .unwrap();

        assert!(plan.steps.is_empty());
        assert_eq!(plan.run.args(), ["ruby", "app.rb"]);
    }
}
