//! Runs learner code in a Python interpreter subprocess.
//!
//! Each run is a fresh `python -I -c <source>` process with stdin closed, a
//! wall-clock timeout and bounded output. The runner must be initialized
//! (interpreter probed) before it accepts code; until then every run returns
//! a "not ready" failure instead of waiting.

use crate::config::RunnerConfig;
use crate::error::{LessonError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{OnceLock, RwLock};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// stderr text of a run attempted before the interpreter is available.
pub const NOT_READY_MESSAGE: &str = "Python runner not ready yet.";

/// Outcome of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Captured standard output, trimmed.
    pub stdout: String,
    /// Captured standard error (the traceback on failure).
    pub stderr: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn not_ready() -> Self {
        Self {
            stdout: String::new(),
            stderr: NOT_READY_MESSAGE.to_owned(),
            success: false,
            duration_ms: 0,
        }
    }
}

/// Executes learner code.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Whether [`CodeRunner::execute`] would actually run code now.
    fn is_ready(&self) -> bool;

    /// Runs `source`. Never fails; problems are reported in the result.
    async fn execute(&self, source: &str) -> RunResult;
}

/// Interpreter lifecycle.
///
/// ```text
/// Pending → Ready
///    ↓
///  Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// [`CodeRunner`] backed by a local Python interpreter.
pub struct PythonRunner {
    config: RunnerConfig,
    state: RwLock<RunnerState>,
    /// Resolved interpreter path, set by a successful initialization.
    interpreter: OnceLock<PathBuf>,
}

impl fmt::Debug for PythonRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonRunner")
            .field("python", &self.config.python)
            .field("interpreter", &self.interpreter.get())
            .field("state", &self.state())
            .finish()
    }
}

impl PythonRunner {
    /// Creates a runner in the `Pending` state.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RunnerState::Pending),
            interpreter: OnceLock::new(),
        }
    }

    pub fn state(&self) -> RunnerState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: RunnerState) {
        let previous = self.state();
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        debug!(from = %previous, to = %next, "runner state transition");
    }

    /// Probes the interpreter and marks the runner ready.
    ///
    /// Returns the interpreter's version string.
    ///
    /// # Errors
    ///
    /// Returns [`LessonError::Runner`] (and enters `Failed`) if the
    /// interpreter cannot be started.
    pub async fn initialize(&self) -> Result<String> {
        let Some(python) = locate_python(&self.config.python) else {
            self.set_state(RunnerState::Failed);
            return Err(LessonError::Runner(format!(
                "python interpreter `{}` not found",
                self.config.python
            )));
        };

        let probe = Command::new(&python)
            .arg("-V")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(10), probe).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                self.set_state(RunnerState::Failed);
                return Err(LessonError::Runner(format!(
                    "{} -V exited with {}",
                    self.config.python, output.status
                )));
            }
            Ok(Err(e)) => {
                self.set_state(RunnerState::Failed);
                return Err(LessonError::Runner(format!(
                    "cannot start {}: {e}",
                    self.config.python
                )));
            }
            Err(_) => {
                self.set_state(RunnerState::Failed);
                return Err(LessonError::Runner(format!(
                    "{} -V timed out",
                    self.config.python
                )));
            }
        };

        // Python 2 printed the version on stderr.
        let mut version = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if version.is_empty() {
            version = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        }
        info!(python = %python.display(), %version, "python runner ready");
        let _ = self.interpreter.set(python);
        self.set_state(RunnerState::Ready);
        Ok(version)
    }
}

/// Finds the interpreter on `PATH` (or at an explicit path). An empty
/// setting tries `python3`, then `python`.
fn locate_python(configured: &str) -> Option<PathBuf> {
    let configured = configured.trim();
    if configured.is_empty() {
        ["python3", "python"]
            .iter()
            .find_map(|name| which::which(name).ok())
    } else {
        which::which(configured).ok()
    }
}

/// Decodes at most `max_bytes` of `bytes`, marking truncation.
fn bounded_text(bytes: &[u8], max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..max_bytes]).into_owned();
    text.push_str("\n[output truncated]");
    text
}

#[async_trait]
impl CodeRunner for PythonRunner {
    fn is_ready(&self) -> bool {
        self.state() == RunnerState::Ready
    }

    async fn execute(&self, source: &str) -> RunResult {
        let Some(python) = self.interpreter.get().filter(|_| self.is_ready()) else {
            return RunResult::not_ready();
        };

        let started = Instant::now();
        let child = Command::new(python)
            .arg("-I")
            .arg("-c")
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to spawn python");
                return RunResult {
                    stderr: format!("Could not start Python: {e}"),
                    ..RunResult::default()
                };
            }
        };

        let limit = Duration::from_secs(self.config.timeout_secs.max(1));
        let outcome = tokio::time::timeout(limit, child.wait_with_output()).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(output)) => {
                let result = RunResult {
                    stdout: bounded_text(&output.stdout, self.config.max_output_bytes)
                        .trim()
                        .to_owned(),
                    stderr: bounded_text(&output.stderr, self.config.max_output_bytes)
                        .trim_end()
                        .to_owned(),
                    success: output.status.success(),
                    duration_ms,
                };
                debug!(success = result.success, duration_ms, "python run finished");
                result
            }
            Ok(Err(e)) => RunResult {
                stderr: format!("Python run failed: {e}"),
                duration_ms,
                ..RunResult::default()
            },
            // The child is killed when the timed-out future is dropped.
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "python run timed out");
                RunResult {
                    stderr: format!(
                        "TimeoutError: your program ran for more than {} seconds and was stopped",
                        limit.as_secs()
                    ),
                    duration_ms,
                    ..RunResult::default()
                }
            }
        }
    }
}
