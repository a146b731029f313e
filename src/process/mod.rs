//! External command execution
//!
//! Provides a trait for running build and run commands so the pipeline can
//! be driven by the real [`TokioRunner`] or by a test double.

mod runner;

pub use runner::TokioRunner;

use crate::error::KilnResult;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A fully rendered command invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Pipeline stage, used in timeout errors and logs ("build", "run", ...)
    pub stage: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a command for a stage, run in `cwd`
    pub fn new(stage: &'static str, program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append environment variables
    pub fn envs<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Stdout, `None` when it was not valid UTF-8
    pub stdout: Option<String>,
    /// Stderr, `None` when it was not valid UTF-8
    pub stderr: Option<String>,
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i32,
}

impl ProcessResult {
    /// Build from raw captured output
    pub fn from_output(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i32) -> Self {
        Self {
            stdout: String::from_utf8(stdout).ok(),
            stderr: String::from_utf8(stderr).ok(),
            exit_code,
        }
    }

    /// Whether the tool reported success
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, as shown for build failures
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.as_deref().unwrap_or_default().trim_end();
        let stderr = self.stderr.as_deref().unwrap_or_default().trim_end();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, _) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stderr, stdout),
        }
    }
}

/// Runs external commands under a deadline
///
/// Implementations must capture stdout and stderr completely, return
/// `KilnError::Timeout` when `timeout` elapses first and
/// `KilnError::Cancelled` when `cancel` fires first. In both cases the
/// process must be terminated before returning.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> KilnResult<ProcessResult>;
}
