//! OpenShift profile (`openshift-cli` tool)
//!
//! `oc` subcommands lead the argument vector, so the lists are matched as
//! prefixes.

use crate::config::OpenShiftConfig;
use crate::gateway::credentials::expand_home;
use crate::gateway::{
    BoundedExecutor, CommandGateway, CredentialResolver, ExecutionTimeout, GlobalArgBlocklist,
    HeaderCredentials, PolicyEngine, PolicyMode, PolicySet, SubprocessBackend, SubprocessConfig,
};
use anyhow::Result;
use std::sync::Arc;

pub const PROGRAM: &str = "oc";
pub const TOOL_NAME: &str = "openshift-cli";
pub const DISPLAY_NAME: &str = "OpenShift";

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "status",
    "projects",
    "explain",
    "get",
    "describe",
    "logs",
    "wait",
    "events",
    "version",
    "whoami",
    "api-versions",
    "api-resources",
    "adm node-logs",
    "policy scc-review",
    "policy scc-subject-review",
    "policy who-can",
    "adm top",
    "adm verify-image-signature",
    "image info",
    "auth can-i",
    "auth whoami",
    "adm policy scc-review",
    "adm policy scc-subject-review",
    "adm policy who-can",
    "adm wait-for-node-reboot",
    "adm wait-for-stable-cluster",
];

/// Denied even when writing is allowed
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    // Output too large to be useful to the caller
    "cluster-info",
    "get-token",
    "logout",
    "config",
    "completion",
    "plugin",
];

/// See `oc options`
pub const GLOBAL_ARGS: &[&str] = &[
    "--cache-dir",
    "--certificate-authority",
    "--client-certificate",
    "--client-key",
    "--cluster",
    "--context",
    "--insecure-skip-tls-verify",
    "--kubeconfig",
    "--match-server-version",
    "--profile-output",
    "--profile",
    "-s",
    "--server",
    "--tls-server-name",
    "--token",
    "--user",
];

pub const CREDENTIAL_FILES: &[&str] = &["config"];

pub const DEFAULT_CREDENTIAL_DIRS: &[&str] = &["~/.kube"];

pub fn header_credentials() -> HeaderCredentials {
    HeaderCredentials {
        token_key: "OCP_TOKEN".to_string(),
        url_key: "OCP_URL".to_string(),
        token_flag: "--token".to_string(),
        url_flag: "--server".to_string(),
    }
}

pub fn policy_engine(config: &OpenShiftConfig) -> Result<PolicyEngine> {
    let policy = PolicySet::new(&config.allowed_commands, &config.blocked_commands)?;
    Ok(PolicyEngine::new(
        PolicyMode::from_allow_write(config.allow_write),
        config.match_strategy,
        policy,
        GlobalArgBlocklist::new(GLOBAL_ARGS.iter().copied()),
    )?)
}

pub fn gateway_args(config: &OpenShiftConfig) -> Vec<String> {
    if config.insecure {
        vec!["--insecure-skip-tls-verify=true".to_string()]
    } else {
        Vec::new()
    }
}

pub fn credential_resolver(config: &OpenShiftConfig) -> CredentialResolver {
    CredentialResolver::new(
        DISPLAY_NAME,
        header_credentials(),
        CREDENTIAL_FILES.iter().map(|s| s.to_string()).collect(),
        config.credential_dirs.iter().map(|dir| expand_home(dir)).collect(),
    )
}

pub fn gateway(config: &OpenShiftConfig, executor: BoundedExecutor) -> Result<CommandGateway> {
    let backend = SubprocessBackend::new(
        SubprocessConfig::new(config.program.clone())
            .with_timeout(ExecutionTimeout::from_secs(config.timeout_secs)),
    );
    Ok(CommandGateway::new(
        DISPLAY_NAME,
        policy_engine(config)?,
        credential_resolver(config),
        Arc::new(backend),
        executor,
    )
    .with_gateway_args(gateway_args(config)))
}
