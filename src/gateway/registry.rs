//! Embedded execution strategy
//!
//! Instead of spawning a process, commands are dispatched to handlers
//! registered in-process under their command name (`server list`,
//! `volume show`). When the registry is built, every name the
//! [`PolicyEngine`] would deny is swapped for a [`RejectedHandler`], so a
//! denied command cannot run even if the per-call check were bypassed.
//!
//! Handlers share one set of output buffers, so only one invocation runs at a
//! time. Buffers are reset before and drained after every call.

use super::error::PolicyViolation;
use super::executor::{truncate_string, Backend, ExecutionResult, MAX_OUTPUT_SIZE};
use super::policy::{bare_words, PolicyEngine};
use super::timeout::ExecutionTimeout;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Exit code of a handler that panicked
pub const HANDLER_PANIC_EXIT_CODE: i32 = 1;

/// Exit code when no handler matches the command words
pub const UNKNOWN_COMMAND_EXIT_CODE: i32 = 2;

/// Exit code of an intercepted (policy-denied) command
pub const REJECTED_EXIT_CODE: i32 = 3;

/// Output buffers handed to a handler
#[derive(Debug, Default)]
pub struct CommandIo {
    pub stdout: String,
    pub stderr: String,
}

impl CommandIo {
    fn reset(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    fn drain(&mut self) -> (String, String) {
        (
            std::mem::take(&mut self.stdout),
            std::mem::take(&mut self.stderr),
        )
    }
}

/// An in-process command implementation
///
/// `args` is the full argument vector, including global flags and the
/// command words. The return value is the exit code.
pub trait CommandHandler: Send + Sync {
    fn run(&self, args: &[String], io: &mut CommandIo) -> i32;
}

impl<F> CommandHandler for F
where
    F: Fn(&[String], &mut CommandIo) -> i32 + Send + Sync,
{
    fn run(&self, args: &[String], io: &mut CommandIo) -> i32 {
        self(args, io)
    }
}

/// Stub installed in place of a denied command
#[derive(Debug, Clone)]
pub struct RejectedHandler {
    name: String,
}

impl RejectedHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CommandHandler for RejectedHandler {
    fn run(&self, _args: &[String], io: &mut CommandIo) -> i32 {
        io.stderr
            .push_str(&PolicyViolation::CommandBlocked(self.name.clone()).to_string());
        io.stderr.push('\n');
        REJECTED_EXIT_CODE
    }
}

/// Command name to handler table
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: BTreeMap<Vec<String>, Arc<dyn CommandHandler>>,
    max_words: usize,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under a space-separated command name
    ///
    /// Registering a name twice replaces the previous handler.
    pub fn register(&mut self, name: &str, handler: impl CommandHandler + 'static) -> &mut Self {
        let words: Vec<String> = name.split_whitespace().map(str::to_string).collect();
        self.max_words = self.max_words.max(words.len());
        self.commands.insert(words, Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.keys().map(|words| words.join(" ")).collect()
    }

    /// Replace every command the engine denies with a [`RejectedHandler`]
    ///
    /// Each name is classified exactly once. Returns the number of commands
    /// rejected.
    pub fn intercept(&mut self, engine: &PolicyEngine) -> usize {
        let mut rejected = 0;
        for (words, handler) in self.commands.iter_mut() {
            if !engine.is_command_allowed(words) {
                let name = words.join(" ");
                debug!(command = %name, "Intercepting denied command");
                *handler = Arc::new(RejectedHandler::new(name));
                rejected += 1;
            }
        }
        info!(
            total = self.commands.len(),
            rejected, "Command registry intercepted"
        );
        rejected
    }

    /// Find the handler for the longest command name leading the bare words
    fn lookup(&self, args: &[String]) -> Option<&Arc<dyn CommandHandler>> {
        let words = bare_words(args);
        (1..=self.max_words.min(words.len()))
            .rev()
            .find_map(|len| self.commands.get(&words[..len]))
    }

    /// Run the matching handler, returning its exit code
    pub fn dispatch(&self, args: &[String], io: &mut CommandIo) -> i32 {
        match self.lookup(args) {
            Some(handler) => handler.run(args, io),
            None => {
                io.stderr.push_str(&format!(
                    "Unknown command: '{}'\n",
                    bare_words(args).join(" ")
                ));
                UNKNOWN_COMMAND_EXIT_CODE
            }
        }
    }
}

/// [`Backend`] adapter over a [`CommandRegistry`]
///
/// Handlers run on the blocking pool. On timeout the caller gets a result
/// right away, but the handler keeps the shared buffers until it returns.
#[derive(Debug)]
pub struct EmbeddedBackend {
    program: String,
    registry: Arc<CommandRegistry>,
    io: Arc<Mutex<CommandIo>>,
    timeout: ExecutionTimeout,
}

impl EmbeddedBackend {
    /// Wrap an already intercepted registry
    pub fn new(program: impl Into<String>, registry: CommandRegistry) -> Self {
        Self {
            program: program.into(),
            registry: Arc::new(registry),
            io: Arc::new(Mutex::new(CommandIo::default())),
            timeout: ExecutionTimeout::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: ExecutionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }
}

#[async_trait]
impl Backend for EmbeddedBackend {
    fn program(&self) -> &str {
        &self.program
    }

    async fn execute(&self, args: &[String]) -> ExecutionResult {
        let start = Instant::now();
        let mut io = self.io.clone().lock_owned().await;
        let registry = self.registry.clone();
        let args = args.to_vec();

        let task = tokio::task::spawn_blocking(move || {
            io.reset();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| registry.dispatch(&args, &mut io)));
            let (stdout, mut stderr) = io.drain();
            let exit_code = match outcome {
                Ok(code) => code,
                Err(payload) => {
                    stderr.push_str(&format!(
                        "Command handler panicked: {}\n",
                        panic_message(&*payload)
                    ));
                    HANDLER_PANIC_EXIT_CODE
                }
            };
            (exit_code, stdout, stderr)
        });

        let elapsed_ms = || start.elapsed().as_secs_f64() * 1000.0;
        match self.timeout.run(task).await {
            Ok(Ok((exit_code, stdout, stderr))) => ExecutionResult::new(
                exit_code,
                truncate_string(stdout, MAX_OUTPUT_SIZE),
                truncate_string(stderr, MAX_OUTPUT_SIZE),
                elapsed_ms(),
            ),
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "Embedded command task failed");
                ExecutionResult::abnormal(HANDLER_PANIC_EXIT_CODE, e.to_string(), elapsed_ms())
            }
            Err(timed_out) => {
                warn!(program = %self.program, "{}", timed_out);
                ExecutionResult::timeout(timed_out.to_string(), elapsed_ms())
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
