mod build_cmd;
mod config;
mod lsp_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use easel_core::Host;

use build_cmd::{BuildArgs, Lang};
use config::EaselConfig;

#[derive(Parser)]
#[command(name = "easel", about = "Build, run and assist code recovered from images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an easel config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Compile recovered sources, optionally running the result
    Build {
        /// Directory holding the images and their `.txt` sidecars
        input_dir: PathBuf,
        /// Jar to produce (java) or directory to package into (script)
        #[arg(long)]
        artifact: PathBuf,
        /// Compiled-output directory (java; defaults next to the artifact)
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Toolchain to build with
        #[arg(long, value_enum, default_value_t = Lang::Java)]
        lang: Lang,
        /// Run the artifact after a successful build
        #[arg(long)]
        run: bool,
        /// File or directory copied into the artifact
        #[arg(long)]
        resources: Option<PathBuf>,
        /// Library classpath entry (repeatable)
        #[arg(long = "lib")]
        libs: Vec<PathBuf>,
        /// Entry class (overrides EASEL_MAIN_CLASS and the config file)
        #[arg(long)]
        main_class: Option<String>,
    },
    /// Start a project's language server and list its capabilities
    Lsp {
        /// Project root the server is started in
        project_dir: PathBuf,
        /// Language key under [lsp] in the config file
        #[arg(long, default_value = "java")]
        lang: String,
    },
}

/// Execute the `easel init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::starter();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  java.javac = {}", cfg.java.javac);
    println!("  java.main_class = {}", cfg.java.main_class);
    println!("  script.interpreter = {}", cfg.script.interpreter);
    for (lang, tokens) in &cfg.lsp {
        println!("  lsp.{lang} = {}", tokens.join(" "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return cmd_init(force);
    }
    let main_class = match &cli.command {
        Commands::Build { main_class, .. } => main_class.as_deref(),
        _ => None,
    };
    let config = EaselConfig::resolve(main_class)?;
    let host = Host::new(config.grace);

    let result = match cli.command {
        Commands::Build {
            input_dir,
            artifact,
            out_dir,
            lang,
            run,
            resources,
            libs,
            ..
        } => {
            let args = BuildArgs {
                input_dir,
                artifact,
                out_dir,
                lang,
                run,
                resources,
                libs,
            };
            build_cmd::cmd_build(&host, &config, args).await
        }
        Commands::Lsp { project_dir, lang } => {
            lsp_cmd::cmd_lsp(&host, &config, &project_dir, &lang)
                .await
                .map(|()| 0)
        }
        Commands::Init { .. } => Ok(0),
    };

    // Tear down servers and running programs whatever happened above.
    host.shutdown().await;

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_parse() {
        let cli = Cli::try_parse_from([
            "easel",
            "build",
            "input",
            "--artifact",
            "out/app.jar",
            "--run",
            "--lib",
            "a.jar",
            "--lib",
            "b.jar",
            "--main-class",
            "app.Main",
        ])
        .unwrap();
        match cli.command {
            Commands::Build {
                input_dir,
                lang,
                run,
                libs,
                main_class,
                ..
            } => {
                assert_eq!(input_dir, PathBuf::from("input"));
                assert_eq!(lang, Lang::Java);
                assert!(run);
                assert_eq!(libs, vec![PathBuf::from("a.jar"), PathBuf::from("b.jar")]);
                assert_eq!(main_class.as_deref(), Some("app.Main"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn script_lang_parses() {
        let cli =
            Cli::try_parse_from(["easel", "build", "in", "--artifact", "dist", "--lang", "script"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Build { lang: Lang::Script, .. }));
    }

    #[test]
    fn build_requires_artifact() {
        assert!(Cli::try_parse_from(["easel", "build", "in"]).is_err());
    }
}
