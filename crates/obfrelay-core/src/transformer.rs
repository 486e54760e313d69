//! External transformer invocation.
//!
//! Runs `<tool> [tool_args..] gen -O <output_dir> <input_file>` to completion
//! and classifies the result. The child is killed if the optional timeout
//! elapses.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from running the transformer.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {message}")]
    Failed {
        program: String,
        status: ExitStatus,
        message: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The external command-line transformer.
#[derive(Debug, Clone)]
pub struct Transformer {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Option<Duration>,
}

impl Transformer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments inserted between the program and `gen`.
    #[must_use]
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transform `input`, writing results beneath `output_dir`.
    pub async fn run(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<TransformOutput, TransformError> {
        let program = self.program.display().to_string();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("gen")
            .arg("-O")
            .arg(output_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %program,
            input = %input.display(),
            output_dir = %output_dir.display(),
            "Spawning transformer"
        );
        let child = cmd.spawn().map_err(|source| TransformError::Launch {
            program: program.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(timeout) => {
                if let Ok(result) = tokio::time::timeout(timeout, child.wait_with_output()).await {
                    result
                } else {
                    // Dropping the wait future drops the child, which kills it.
                    warn!(program = %program, ?timeout, "Transformer timed out");
                    return Err(TransformError::TimedOut { program, timeout });
                }
            }
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| TransformError::Wait {
            program: program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let message = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                "no output".to_string()
            };
            warn!(program = %program, status = %output.status, "Transformer failed");
            return Err(TransformError::Failed {
                program,
                status: output.status,
                message,
            });
        }

        info!(program = %program, input = %input.display(), "Transformer finished");
        Ok(TransformOutput { stdout, stderr })
    }
}
