//! Runs whichever test command the project layout suggests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::{TestOutcome, TestRunner};

const MAX_FAILURES: usize = 10;

/// Test runner that detects `npm`, `pytest`, `go` or `cargo` projects.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandTestRunner;

impl CommandTestRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, workdir: &Path) -> Result<TestOutcome> {
        let start = Instant::now();

        let root = workdir.to_path_buf();
        let command = tokio::task::spawn_blocking(move || detect_test_command(&root))
            .await
            .context("Test detection task panicked")?;

        let Some(command) = command else {
            info!("No tests found in {}", workdir.display());
            return Ok(TestOutcome::passed(start.elapsed()));
        };

        let argv = shell_words::split(command)
            .with_context(|| format!("Invalid test command: {command}"))?;
        let Some((program, args)) = argv.split_first() else {
            return Ok(TestOutcome::passed(start.elapsed()));
        };

        info!("Running `{}` in {}", command, workdir.display());
        let output = tokio::process::Command::new(program)
            .current_dir(workdir)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {command}"))?;

        let duration = start.elapsed();
        if output.status.success() {
            return Ok(TestOutcome::passed(duration));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let failures = parse_failures(&stdout, &stderr);
        debug!("{} failure lines from {}", failures.len(), command);
        Ok(TestOutcome::failed(failures, duration))
    }
}

/// Picks the test command for a project, or `None` if it has no tests.
fn detect_test_command(root: &Path) -> Option<&'static str> {
    if has_npm_test_script(root) {
        return Some("npm test");
    }

    if root.join("pytest.ini").exists() || root.join("setup.py").exists() {
        return Some("pytest");
    }

    if has_python_test_file(root) {
        return Some("python -m pytest");
    }

    let has_go_tests = std::fs::read_dir(root).ok().is_some_and(|entries| {
        entries
            .flatten()
            .any(|e| e.file_name().to_string_lossy().ends_with("_test.go"))
    });
    if has_go_tests {
        return Some("go test ./...");
    }

    if root.join("Cargo.toml").exists() {
        return Some("cargo test");
    }

    None
}

fn has_npm_test_script(root: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(root.join("package.json")) else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(&content)
        .ok()
        .and_then(|pkg| pkg.get("scripts")?.get("test").cloned())
        .is_some()
}

fn has_python_test_file(root: &Path) -> bool {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() {
                if name != ".git" && name != "node_modules" {
                    pending.push(path);
                }
            } else if name.starts_with("test_") && name.ends_with(".py") {
                return true;
            }
        }
    }
    false
}

/// Extracts failure lines from test output, pytest and jest markers first,
/// then any line mentioning an error.
fn parse_failures(stdout: &str, stderr: &str) -> Vec<String> {
    let output = format!("{stdout}\n{stderr}");
    let lines = || output.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut failures: Vec<String> = Vec::new();
    if output.contains("FAILED") {
        failures.extend(
            lines()
                .filter(|l| l.contains("FAILED") || l.contains("ERROR"))
                .map(str::to_string),
        );
    }
    if output.contains("FAIL") {
        failures.extend(
            lines()
                .filter(|l| l.contains('●') || l.contains("FAIL"))
                .map(str::to_string),
        );
    }
    if failures.is_empty() {
        failures.extend(
            lines()
                .filter(|l| {
                    let lower = l.to_lowercase();
                    ["error", "fail", "exception"].iter().any(|k| lower.contains(k))
                })
                .map(str::to_string),
        );
    }

    failures.truncate(MAX_FAILURES);
    failures
}
