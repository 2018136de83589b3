//! Command gateway
//!
//! Turns a caller's free-form command string into an authorized, credentialed
//! invocation of an administrative CLI. Each call goes through the same
//! pipeline:
//!
//! ```text
//! parse -> policy -> credentials -> negotiate -> execute
//! ```
//!
//! Any stage can end the call with a [`GatewayError`]. No backend process is
//! started for a command that fails parsing, policy or credential resolution.

pub mod credentials;
pub mod error;
pub mod executor;
pub mod negotiator;
pub mod parser;
pub mod policy;
pub mod registry;
pub mod timeout;

pub use credentials::{
    CredentialBundle, CredentialResolver, CredentialSource, HeaderCredentials, RequestMetadata,
};
pub use error::{GatewayError, ParseError, PolicyViolation};
pub use executor::{Backend, BoundedExecutor, ExecutionResult, SubprocessBackend, SubprocessConfig};
pub use negotiator::{CapabilityCache, CapabilityNegotiator, VersionCatalog};
pub use parser::{CommandParser, CommandRequest};
pub use policy::{GlobalArgBlocklist, MatchStrategy, PolicyEngine, PolicyMode, PolicySet};
pub use registry::{CommandHandler, CommandIo, CommandRegistry, EmbeddedBackend};
pub use timeout::ExecutionTimeout;

use crate::metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MASK: &str = "***";

/// The full pipeline for one backend
pub struct CommandGateway {
    /// Display name used in credential errors ("OpenStack")
    name: String,
    parser: CommandParser,
    policy: PolicyEngine,
    credentials: CredentialResolver,
    negotiator: Option<CapabilityNegotiator>,
    gateway_args: Vec<String>,
    backend: Arc<dyn Backend>,
    executor: BoundedExecutor,
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("name", &self.name)
            .field("program", &self.backend.program())
            .field("mode", &self.policy.mode())
            .field("negotiates", &self.negotiator.is_some())
            .finish()
    }
}

impl CommandGateway {
    pub fn new(
        name: impl Into<String>,
        policy: PolicyEngine,
        credentials: CredentialResolver,
        backend: Arc<dyn Backend>,
        executor: BoundedExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            parser: CommandParser::new(backend.program()),
            policy,
            credentials,
            negotiator: None,
            gateway_args: Vec::new(),
            backend,
            executor,
        }
    }

    /// Negotiate interface versions before the first execution
    pub fn with_negotiator(mut self, negotiator: CapabilityNegotiator) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    /// Operator-configured arguments added to every invocation
    ///
    /// They bypass the caller blocklist.
    pub fn with_gateway_args(mut self, args: Vec<String>) -> Self {
        self.gateway_args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &str {
        self.backend.program()
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn negotiator(&self) -> Option<&CapabilityNegotiator> {
        self.negotiator.as_ref()
    }

    /// Parse and classify `command` without executing anything
    ///
    /// # Errors
    ///
    /// [`GatewayError::Parse`] or [`GatewayError::Policy`].
    pub fn check(&self, command: &str) -> Result<CommandRequest, GatewayError> {
        let request = self.parser.parse(command)?;
        if let Err(violation) = self.policy.check(request.args()) {
            let err = GatewayError::from(violation);
            metrics::POLICY_DENIALS_TOTAL
                .with_label_values(&[self.program(), err.kind()])
                .inc();
            return Err(err);
        }
        Ok(request)
    }

    /// Run `command` on behalf of a caller, returning the backend output
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`]; a non-zero backend exit becomes
    /// [`GatewayError::Execution`] carrying both output streams.
    pub async fn run(
        &self,
        command: &str,
        metadata: &RequestMetadata,
    ) -> Result<String, GatewayError> {
        let outcome = self.run_inner(command, metadata).await;
        let status = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::COMMANDS_TOTAL
            .with_label_values(&[self.program(), status])
            .inc();
        outcome
    }

    async fn run_inner(
        &self,
        command: &str,
        metadata: &RequestMetadata,
    ) -> Result<String, GatewayError> {
        let request = match self.check(command) {
            Ok(request) => request,
            Err(err) => {
                info!(program = %self.program(), kind = err.kind(), "Command rejected: {}", err);
                return Err(err);
            }
        };

        let credentials = self.credentials.resolve(metadata).map_err(|err| {
            warn!(program = %self.program(), "{}", err);
            err
        })?;

        let mut argv = credentials.to_args();
        argv.extend(self.gateway_args.iter().cloned());

        if let Some(negotiator) = &self.negotiator {
            let cache = negotiator
                .ensure(&self.executor, self.backend.as_ref(), &argv)
                .await?;
            argv.extend(cache.default_args(request.args()));
        }
        argv.extend(request.into_args());

        info!(
            program = %self.program(),
            argv = %mask_args(&argv, credentials.flags()).join(" "),
            "Executing command"
        );

        let timer = metrics::EXECUTION_DURATION_SECONDS
            .with_label_values(&[self.program()])
            .start_timer();
        let result = self.executor.run(self.backend.as_ref(), &argv).await;
        timer.observe_duration();

        debug!(program = %self.program(), "{}", result.summary());

        if result.success() {
            Ok(result.output().to_string())
        } else {
            Err(GatewayError::Execution {
                program: self.program().to_string(),
                code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            })
        }
    }
}

/// Replace the value following each secret flag
fn mask_args<'a>(args: &[String], secret_flags: impl Iterator<Item = &'a str>) -> Vec<String> {
    let secret_flags: Vec<&str> = secret_flags.collect();
    let mut masked = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            masked.push(MASK.to_string());
            hide_next = false;
        } else {
            hide_next = secret_flags.contains(&arg.as_str());
            masked.push(arg.clone());
        }
    }
    masked
}
