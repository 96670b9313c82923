//! A fully resolved command for exactly one process spawn.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// An immutable, ordered command line plus optional working directory and
/// environment overrides.
///
/// The first token is the program; the rest are passed verbatim as
/// arguments. Nothing is interpreted by a shell, so there is no quoting or
/// globbing to worry about.
///
/// Use [`Invocation::new`] for the tokens, then chain [`Invocation::in_dir`]
/// and [`Invocation::with_env`] before handing it to a runner or session.
/// Spawning consumes the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Invocation {
    /// Create an invocation from its command tokens.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// Run the process in `dir` instead of the host's current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable on top of the inherited environment.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The command tokens, program first.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The program token, if any.
    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Reject command lines that can never be spawned: no tokens at all, or
    /// any token that is empty or whitespace only.
    pub fn validate(&self) -> Result<()> {
        if self.args.is_empty() {
            return Err(Error::startup(&self.args, "command is empty"));
        }
        if let Some(pos) = self.args.iter().position(|a| a.trim().is_empty()) {
            return Err(Error::startup(
                &self.args,
                format!("command token {pos} is blank"),
            ));
        }
        Ok(())
    }

    /// Build the tokio command for this invocation.
    ///
    /// Callers must have run [`Invocation::validate`] first; stdio is left
    /// for the caller to configure.
    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.args[0]);
        cmd.args(&self.args[1..]);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))?;
        if let Some(dir) = &self.working_dir {
            write!(f, " (in {})", dir.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_defaults() {
        let inv = Invocation::new(["javac", "-g"]);
        assert_eq!(inv.args(), ["javac", "-g"]);
        assert_eq!(inv.program(), Some("javac"));
        assert!(inv.working_dir().is_none());
        assert!(inv.env().is_empty());
    }

    #[test]
    fn builder_sets_optional_fields() {
        let inv = Invocation::new(["java", "-jar", "app.jar"])
            .in_dir("/tmp/project")
            .with_env("JAVA_HOME", "/opt/jdk");

        assert_eq!(inv.working_dir(), Some(Path::new("/tmp/project")));
        assert_eq!(inv.env().get("JAVA_HOME").map(String::as_str), Some("/opt/jdk"));
        assert_eq!(inv.to_string(), "java -jar app.jar (in /tmp/project)");
    }

    #[test]
    fn validate_rejects_empty_command() {
        let inv = Invocation::new(Vec::<String>::new());
        let err = inv.validate().unwrap_err();
        assert!(err.is_startup());
        assert!(err.to_string().contains("command is empty"));
    }

    #[test]
    fn validate_rejects_blank_token() {
        let inv = Invocation::new(["jdtls", "  ", "-data"]);
        let err = inv.validate().unwrap_err();
        assert!(err.to_string().contains("token 1 is blank"), "got: {err}");
    }

    #[test]
    fn validate_accepts_ordinary_command() {
        assert!(Invocation::new(["true"]).validate().is_ok());
    }
}
