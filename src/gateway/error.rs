//! Gateway error taxonomy
//!
//! Every failure a caller can observe is one of these variants. None of them
//! are retried by the gateway itself.

/// The raw command string could not be turned into an argument vector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("No command provided")]
    CommandEmpty,

    #[error("{0} interactive mode is not available")]
    InteractiveModeRejected(String),

    #[error("Command has unbalanced quotes or a trailing escape: {0}")]
    Unbalanced(String),
}

/// The command was rejected by the policy engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("Argument '{0}' is not allowed, credentials and endpoints are managed by the gateway")]
    GlobalArgumentRejected(String),

    #[error("Command '{0}' is currently blocked for automated use as it could modify the deployment.")]
    CommandBlocked(String),
}

/// Errors surfaced by [`CommandGateway::run`](super::CommandGateway::run)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("Missing {0} credentials")]
    CredentialsMissing(String),

    #[error("Failed to negotiate API versions: {0}")]
    Negotiation(String),

    #[error("{program} failed with error code {code}: {}", render_streams(.stdout, .stderr))]
    Execution {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl GatewayError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Policy(PolicyViolation::GlobalArgumentRejected(_)) => "global_argument",
            Self::Policy(PolicyViolation::CommandBlocked(_)) => "blocked",
            Self::CredentialsMissing(_) => "credentials",
            Self::Negotiation(_) => "negotiation",
            Self::Execution { .. } => "execution",
        }
    }
}

fn render_streams(stdout: &str, stderr: &str) -> String {
    serde_json::json!({ "stdout": stdout, "stderr": stderr }).to_string()
}
