//! Shared test utilities for easel integration tests.
//!
//! Tests never need a real JDK or interpreter: they stand in for the
//! toolchain with small `/bin/sh` scripts written into a scratch
//! directory, and poll for side effects with [`wait_until`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

/// Write an executable `/bin/sh` script named `name` into `dir`.
///
/// `body` is everything after the shebang line.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
    }
    path
}

/// A scratch directory holding fake toolchain binaries.
pub struct FakeToolchain {
    dir: TempDir,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create toolchain dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Add a script named `name`; returns its path as a command token.
    pub fn script(&self, name: &str, body: &str) -> String {
        write_script(self.dir.path(), name, body)
            .to_string_lossy()
            .into_owned()
    }

    /// Path of a marker file scripts can `touch` to prove they ran.
    pub fn marker(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` every 20ms until it returns true. Returns false if
/// `timeout` elapses first.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
