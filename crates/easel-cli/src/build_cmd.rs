//! `easel build`: compile recovered sources and optionally run them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use easel_core::pipeline::{
    BuildRequest, CompilationResult, JavaPipeline, PipelinePolicy, ScriptPipeline, SourceUnit,
};
use easel_core::{Host, TaskOutcome};

use crate::config::EaselConfig;

/// Suffix of the sidecar file holding the text recovered from an image.
const SIDECAR_SUFFIX: &str = ".txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Lang {
    Java,
    Script,
}

#[derive(Debug)]
pub struct BuildArgs {
    pub input_dir: PathBuf,
    pub artifact: PathBuf,
    pub out_dir: Option<PathBuf>,
    pub lang: Lang,
    pub run: bool,
    pub resources: Option<PathBuf>,
    pub libs: Vec<PathBuf>,
}

/// Find every `<image>.<ext>.txt` sidecar below `input` whose image
/// extension is one of `extensions`, sorted by path.
///
/// `Main.java.png.txt` yields a unit with origin `Main.java.png` and the
/// sidecar's contents as its text.
pub fn collect_units(input: &Path, extensions: &[String]) -> Result<Vec<SourceUnit>> {
    let mut sidecars = Vec::new();
    find_sidecars(input, extensions, &mut sidecars)?;
    sidecars.sort();

    sidecars
        .into_iter()
        .map(|sidecar| {
            let text = std::fs::read_to_string(&sidecar)
                .with_context(|| format!("failed to read {}", sidecar.display()))?;
            let origin = sidecar.with_extension("");
            Ok(SourceUnit::new(origin, text))
        })
        .collect()
}

fn find_sidecars(dir: &Path, extensions: &[String], found: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read {}", dir.display()))?
            .path();
        if path.is_dir() {
            find_sidecars(&path, extensions, found)?;
        } else if is_sidecar(&path, extensions) {
            found.push(path);
        }
    }
    Ok(())
}

fn is_sidecar(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(image) = name.strip_suffix(SIDECAR_SUFFIX) else {
        return false;
    };
    Path::new(image)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Map a run outcome to the process exit code.
pub fn exit_code_for(outcome: &TaskOutcome) -> i32 {
    match outcome {
        TaskOutcome::Succeeded(code) if *code < 0 => 130,
        TaskOutcome::Succeeded(code) => *code,
        TaskOutcome::Failed(_) => 1,
    }
}

/// Execute `easel build`. Returns the exit code for the process.
pub async fn cmd_build(host: &Host, config: &EaselConfig, args: BuildArgs) -> Result<i32> {
    let (policy, extensions) = match args.lang {
        Lang::Java => (
            Box::new(JavaPipeline::new(host.pipeline_context(), config.java.clone()))
                as Box<dyn PipelinePolicy>,
            config.java.source_extensions.as_slice(),
        ),
        Lang::Script => (
            Box::new(ScriptPipeline::new(host.pipeline_context(), config.script.clone()))
                as Box<dyn PipelinePolicy>,
            config.script.source_extensions.as_slice(),
        ),
    };

    let input_dir = args
        .input_dir
        .canonicalize()
        .with_context(|| format!("input directory {} not found", args.input_dir.display()))?;
    let units = collect_units(&input_dir, extensions)?;
    if units.is_empty() {
        bail!(
            "no recovered sources under {} (expected files like Main.java.png.txt)",
            input_dir.display()
        );
    }
    println!("Building {} source unit(s) with {}", units.len(), policy.name());

    // Scripts are packaged straight into the artifact directory.
    let out_dir = match (args.lang, args.out_dir) {
        (_, Some(dir)) => dir,
        (Lang::Script, None) => args.artifact.clone(),
        (Lang::Java, None) => args
            .artifact
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("classes"),
    };

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, stopping...");
                cancel.cancel();
            }
        })
    };

    let mut request = BuildRequest::new(units, &input_dir, &args.artifact, &out_dir)
        .libs(args.libs)
        .execute(args.run)
        .cancel_token(cancel);
    if let Some(resources) = args.resources {
        request = request.resources(resources);
    }

    let result = policy.compile_and_execute(request).await;
    let code = match result.context("build aborted")? {
        CompilationResult::CompileFailed => {
            eprintln!("Build failed.");
            1
        }
        CompilationResult::CompileComplete => {
            println!("Built {}", args.artifact.display());
            0
        }
        CompilationResult::Running(ticket) => {
            let outcome = ticket.wait().await;
            if let TaskOutcome::Failed(message) = &outcome {
                eprintln!("Program stopped: {message}");
            }
            exit_code_for(&outcome)
        }
    };
    interrupt.abort();
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Vec<String> {
        vec!["png".to_string()]
    }

    #[test]
    fn collects_sidecars_recursively_in_path_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("util")).unwrap();
        std::fs::write(root.join("Main.java.png.txt"), "class Main {}").unwrap();
        std::fs::write(root.join("Main.java.png"), b"\x89PNG").unwrap();
        std::fs::write(root.join("util/Helper.java.png.txt"), "class Helper {}").unwrap();
        std::fs::write(root.join("notes.txt"), "not a sidecar").unwrap();

        let units = collect_units(root, &png()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].origin, root.join("Main.java.png"));
        assert_eq!(units[0].text, "class Main {}");
        assert_eq!(units[1].origin, root.join("util/Helper.java.png"));
    }

    #[test]
    fn sidecar_detection_respects_extensions() {
        assert!(is_sidecar(Path::new("/x/Main.java.png.txt"), &png()));
        assert!(is_sidecar(Path::new("/x/Main.java.PNG.txt"), &png()));
        assert!(!is_sidecar(Path::new("/x/Main.java.jpg.txt"), &png()));
        assert!(!is_sidecar(Path::new("/x/readme.txt"), &png()));
        assert!(!is_sidecar(Path::new("/x/Main.java.png"), &png()));
    }

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(exit_code_for(&TaskOutcome::Succeeded(0)), 0);
        assert_eq!(exit_code_for(&TaskOutcome::Succeeded(3)), 3);
        assert_eq!(exit_code_for(&TaskOutcome::Succeeded(-1)), 130);
        assert_eq!(exit_code_for(&TaskOutcome::Failed("boom".into())), 1);
    }

    #[test]
    fn missing_input_dir_is_an_error() {
        let err = collect_units(Path::new("/nonexistent/easel/input"), &png()).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
