//! Bounded Executor
//!
//! Runs final argument vectors against a [`Backend`] under a fixed number of
//! execution slots. Slots are RAII permits, so they are released on every exit
//! path, including cancellation of the calling future.
//!
//! The subprocess strategy lives here. The embedded strategy is in
//! [`registry`](super::registry).

use super::timeout::ExecutionTimeout;
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command as TokioCommand;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Maximum captured size of each stream (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Exit code reported when the deadline expired
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the backend could not be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Largest slot pool accepted by [`BoundedExecutor::new`]
pub const MAX_CAPACITY: usize = 256;

/// Outcome of one backend invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit status, synthetic for abnormal terminations
    pub exit_code: i32,

    /// Captured standard output (truncated if too large)
    pub stdout: String,

    /// Captured standard error (truncated if too large)
    pub stderr: String,

    /// Wall-clock duration in milliseconds
    pub duration_ms: f64,

    /// Whether the deadline expired
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: String, stderr: String, duration_ms: f64) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            timed_out: false,
        }
    }

    /// A failure that did not come from the backend's own exit status
    pub fn abnormal(exit_code: i32, diagnostic: impl Into<String>, duration_ms: f64) -> Self {
        Self::new(exit_code, String::new(), diagnostic.into(), duration_ms)
    }

    pub(crate) fn timeout(diagnostic: String, duration_ms: f64) -> Self {
        Self {
            timed_out: true,
            ..Self::abnormal(TIMEOUT_EXIT_CODE, diagnostic, duration_ms)
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text returned to the caller: stdout, or stderr when stdout is empty
    pub fn output(&self) -> &str {
        let stdout = strip_leading_nul(&self.stdout);
        if stdout.is_empty() {
            strip_leading_nul(&self.stderr)
        } else {
            stdout
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("Timeout after {:.0}ms", self.duration_ms)
        } else if self.success() {
            format!(
                "Success ({:.0}ms, {} bytes output)",
                self.duration_ms,
                self.stdout.len()
            )
        } else {
            format!(
                "Failed (exit code: {}, {:.0}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len() + self.stderr.len()
            )
        }
    }
}

/// Some backends prefix their output with NUL bytes
fn strip_leading_nul(s: &str) -> &str {
    s.trim_start_matches('\0')
}

/// Narrow adapter between the gateway and a backend CLI
///
/// Implementations never fail: abnormal terminations are reported as an
/// [`ExecutionResult`] with a synthetic non-zero exit code.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Program name, used in logs and error messages
    fn program(&self) -> &str;

    async fn execute(&self, args: &[String]) -> ExecutionResult;
}

/// Fixed-size pool of execution slots
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// The slot pool size is unusable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Executor capacity must be between 1 and {MAX_CAPACITY}, got {0}")]
pub struct InvalidCapacity(pub usize);

impl BoundedExecutor {
    pub fn new(capacity: usize) -> Result<Self, InvalidCapacity> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held by a running command
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `args` on `backend` once a slot is free
    ///
    /// Waiting for a slot suspends the caller without blocking other tasks.
    pub async fn run(&self, backend: &dyn Backend, args: &[String]) -> ExecutionResult {
        let _slot = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult::abnormal(1, "Executor is shut down", 0.0);
            }
        };
        let _active = ActiveGuard::new(backend.program());

        backend.execute(args).await
    }
}

/// Keeps the active-executions gauge accurate on every exit path
struct ActiveGuard<'a> {
    program: &'a str,
}

impl<'a> ActiveGuard<'a> {
    fn new(program: &'a str) -> Self {
        metrics::ACTIVE_EXECUTIONS.with_label_values(&[program]).inc();
        Self { program }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        metrics::ACTIVE_EXECUTIONS
            .with_label_values(&[self.program])
            .dec();
    }
}

/// Configuration for the subprocess strategy
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Executable to spawn (looked up in `PATH` when not absolute)
    pub program: String,

    pub timeout: ExecutionTimeout,

    /// Maximum output size in bytes per stream
    pub max_output_size: usize,

    /// Working directory (default: inherited)
    pub working_dir: Option<PathBuf>,
}

impl SubprocessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: ExecutionTimeout::default(),
            max_output_size: MAX_OUTPUT_SIZE,
            working_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: ExecutionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Spawns a fresh process per invocation
///
/// The command is never run through a shell: `args` are handed to the
/// program as its argv.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    config: SubprocessConfig,
}

impl SubprocessBackend {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }
}

#[async_trait]
impl Backend for SubprocessBackend {
    fn program(&self) -> &str {
        &self.config.program
    }

    async fn execute(&self, args: &[String]) -> ExecutionResult {
        let start = Instant::now();
        let program = &self.config.program;

        let mut process = TokioCommand::new(program);
        process
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.working_dir {
            process.current_dir(dir);
        }

        let child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to spawn process");
                return ExecutionResult::abnormal(
                    SPAWN_FAILURE_EXIT_CODE,
                    format!("Failed to spawn process {}: {}", program, e),
                    elapsed_ms(start),
                );
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match self.config.timeout.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(program = %program, error = %e, "Failed to collect process output");
                return ExecutionResult::abnormal(
                    1,
                    format!("Failed to collect output of {}: {}", program, e),
                    elapsed_ms(start),
                );
            }
            Err(timed_out) => {
                warn!(program = %program, "{}", timed_out);
                return ExecutionResult::timeout(timed_out.to_string(), elapsed_ms(start));
            }
        };

        let stdout = truncate_string(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            self.config.max_output_size,
        );
        let stderr = truncate_string(
            String::from_utf8_lossy(&output.stderr).into_owned(),
            self.config.max_output_size,
        );
        let exit_code = exit_code(&output.status);

        debug!(program = %program, exit_code, "Process finished");
        ExecutionResult::new(exit_code, stdout, stderr, elapsed_ms(start))
    }
}

/// Normal exits keep their code, signals map to `128 + signal`
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Truncate a string to a maximum length, adding ellipsis if truncated
pub(crate) fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
