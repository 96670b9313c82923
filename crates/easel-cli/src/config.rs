//! Configuration file management for easel.
//!
//! Provides a TOML-based config file at `~/.config/easel/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use easel_core::pipeline::{JavaOptions, ScriptOptions};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub java: JavaOptions,
    pub script: ScriptOptions,
    pub shutdown: ShutdownSection,
    /// Language name -> language-server command tokens.
    pub lsp: BTreeMap<String, Vec<String>>,
}

impl ConfigFile {
    /// The config `easel init` writes.
    pub fn starter() -> Self {
        let mut lsp = BTreeMap::new();
        lsp.insert("java".to_string(), vec!["jdtls".to_string()]);
        lsp.insert("python".to_string(), vec!["pylsp".to_string()]);
        Self {
            lsp,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSection {
    /// Seconds language servers and running programs get to stop on exit.
    pub grace_secs: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the easel config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/easel` or `~/.config/easel`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("easel");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("easel")
}

/// Return the path to the easel config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct EaselConfig {
    pub java: JavaOptions,
    pub script: ScriptOptions,
    pub lsp: BTreeMap<String, Vec<String>>,
    pub grace: Duration,
}

impl EaselConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Main class: `cli_main_class` > `EASEL_MAIN_CLASS` env > `java.main_class` > `Main`
    /// - Shutdown grace: `EASEL_SHUTDOWN_GRACE_SECS` env > `shutdown.grace_secs` > 5s
    ///
    /// A missing config file means defaults; a malformed one is an error.
    pub fn resolve(cli_main_class: Option<&str>) -> Result<Self> {
        let file = if config_path().exists() {
            load_config()?
        } else {
            ConfigFile::starter()
        };
        Self::from_file(file, cli_main_class)
    }

    fn from_file(file: ConfigFile, cli_main_class: Option<&str>) -> Result<Self> {
        let mut java = file.java;
        if let Some(name) = cli_main_class {
            java.main_class = name.to_string();
        } else if let Ok(name) = std::env::var("EASEL_MAIN_CLASS") {
            java.main_class = name;
        }

        let grace_secs = if let Ok(raw) = std::env::var("EASEL_SHUTDOWN_GRACE_SECS") {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("EASEL_SHUTDOWN_GRACE_SECS is not a number: {raw:?}"))?
        } else {
            file.shutdown.grace_secs
        };

        Ok(Self {
            java,
            script: file.script,
            lsp: file.lsp,
            grace: Duration::from_secs(grace_secs),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
