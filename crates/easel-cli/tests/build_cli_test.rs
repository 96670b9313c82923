//! Integration tests for the `easel` binary.
//!
//! Each test gets its own config directory (via `XDG_CONFIG_HOME`) pointing
//! the toolchain at fake `/bin/sh` scripts.

use std::path::Path;
use std::process::{Command, Output};

use easel_test_utils::FakeToolchain;

fn easel(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_easel"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("EASEL_MAIN_CLASS")
        .env_remove("EASEL_SHUTDOWN_GRACE_SECS")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run easel")
}

fn write_config(config_home: &Path, tools: &FakeToolchain) {
    let dir = config_home.join("easel");
    std::fs::create_dir_all(&dir).unwrap();
    let tool = |name: &str| tools.path().join(name).display().to_string();
    std::fs::write(
        dir.join("config.toml"),
        format!(
            "[java]\njavac = \"{}\"\njar = \"{}\"\njava = \"{}\"\n\n[shutdown]\ngrace_secs = 1\n",
            tool("javac"),
            tool("jar"),
            tool("java"),
        ),
    )
    .unwrap();
}

fn input_dir(root: &Path) -> std::path::PathBuf {
    let input = root.join("input");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("Main.java.png"), b"\x89PNG").unwrap();
    std::fs::write(input.join("Main.java.png.txt"), "class Main {}").unwrap();
    input
}

#[test]
fn build_and_run_prints_program_output() {
    let tools = FakeToolchain::new();
    tools.script("javac", "echo compiled >&2");
    tools.script("jar", "true");
    tools.script("java", "echo \"main=$2\"");
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &tools);
    let work = tempfile::tempdir().unwrap();
    let input = input_dir(work.path());
    let artifact = work.path().join("app.jar");

    let out = easel(
        home.path(),
        &[
            "build",
            input.to_str().unwrap(),
            "--artifact",
            artifact.to_str().unwrap(),
            "--run",
        ],
    );

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout.contains(&format!("main={}", artifact.display())), "stdout: {stdout}");
}

#[test]
fn failed_compile_exits_non_zero_without_running() {
    let tools = FakeToolchain::new();
    let ran = tools.marker("ran");
    tools.script("javac", "echo 'error: cannot find symbol' >&2\nexit 1");
    tools.script("jar", "true");
    tools.script("java", &format!("touch '{}'", ran.display()));
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &tools);
    let work = tempfile::tempdir().unwrap();
    let input = input_dir(work.path());

    let out = easel(
        home.path(),
        &[
            "build",
            input.to_str().unwrap(),
            "--artifact",
            work.path().join("app.jar").to_str().unwrap(),
            "--run",
        ],
    );

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("cannot find symbol"));
    assert!(!ran.exists());
}

#[test]
fn program_exit_code_is_propagated() {
    let tools = FakeToolchain::new();
    tools.script("javac", "true");
    tools.script("jar", "true");
    tools.script("java", "exit 4");
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &tools);
    let work = tempfile::tempdir().unwrap();
    let input = input_dir(work.path());

    let out = easel(
        home.path(),
        &[
            "build",
            input.to_str().unwrap(),
            "--artifact",
            work.path().join("app.jar").to_str().unwrap(),
            "--run",
        ],
    );
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = tempfile::tempdir().unwrap();

    let first = easel(home.path(), &["init"]);
    assert!(first.status.success());
    assert!(home.path().join("easel/config.toml").is_file());

    let second = easel(home.path(), &["init"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = easel(home.path(), &["init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn empty_input_is_an_error() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let out = easel(
        home.path(),
        &[
            "build",
            work.path().to_str().unwrap(),
            "--artifact",
            work.path().join("app.jar").to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no recovered sources"));
}
