//! Test execution against a working tree.

mod command;

pub(crate) use command::CommandTestRunner;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Result of one test-suite execution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestOutcome {
    pub passed: bool,
    /// Failure lines extracted from the test output; empty when passed.
    pub failures: Vec<String>,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn passed(duration: Duration) -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
            duration,
        }
    }

    pub fn failed(failures: Vec<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            failures,
            duration,
        }
    }
}

/// Trait for test execution backends.
#[async_trait]
pub(crate) trait TestRunner: Send + Sync {
    async fn run_tests(&self, workdir: &Path) -> Result<TestOutcome>;
}
