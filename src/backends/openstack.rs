//! OpenStack profile (`openstack-cli` tool)
//!
//! Commands are classified by verb (`server list` is allowed because of
//! `list`), so the default strategy is [`MatchStrategy::Verb`]. Multi-word
//! entries name complete commands.

use crate::config::OpenStackConfig;
use crate::gateway::credentials::expand_home;
use crate::gateway::{
    Backend, BoundedExecutor, CapabilityCache, CapabilityNegotiator, CommandGateway,
    CredentialResolver, ExecutionTimeout, GlobalArgBlocklist, HeaderCredentials, PolicyEngine,
    PolicyMode, PolicySet, SubprocessBackend, SubprocessConfig, VersionCatalog,
};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

pub const PROGRAM: &str = "openstack";
pub const TOOL_NAME: &str = "openstack-cli";
pub const DISPLAY_NAME: &str = "OpenStack";

/// Read verbs and complete read commands
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "get",
    "show",
    "list",
    "history",
    "alarm-history show",
    "alarm-history search",
    "capabilities list",
    "alarm show",
    "alarm quota show",
    "alarm state get",
    "search",
    "benchmark metric show",
    "alarming capabilities list",
    "simulate",
    "info",
    "collect",
    "benchmark measures show",
    "validate",
    "ping",
    "top",
    "stats",
    "alarm list",
    "contains",
    "homedoc",
    "query",
    "measures aggregation",
    "tail",
    "versions",
    "count",
    "stack resource metadata",
    "database configuration default",
    "metric aggregates",
    "optimize strategy state",
    "rca status",
    "volume summary",
    "stack hook poll",
    "database configuration instances",
    "alarm metrics",
    "stack check",
    "cluster check",
    "baremetal introspection status",
    "rca healthcheck",
    "appcontainer logs",
    "appcontainer quota default",
    "metric status",
    "metric server version",
    "messaging health",
    "database cluster modules",
    "class-schema",
];

/// Write verbs and complete write commands
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "create",
    "delete",
    "update",
    "set",
    "unset",
    "remove",
    "add",
    "abort",
    "complete",
    "revoke",
    "issue",
    "cleanup",
    "migrate",
    "resize",
    "shelve",
    "unshelve",
    "reboot",
    "restart",
    "rebuild",
    "stop",
    "restore",
    "import",
    "failover",
    "associate",
    "revert",
    "run",
    "save",
    "shrink",
    "reset",
    "del",
    "onboard",
    "commit",
    "unrescue",
    "adopt",
    "on",
    "off",
    "forcedown",
    "detach",
    "edit",
    "lock",
    "unlock",
    "purge",
    "rerun",
    "attach",
    "resume",
    "start",
    "pause",
    "create-from-file",
    "request-refresh",
    "rename",
    "post",
    "clear",
    "move",
    "manage",
    "enable",
    "register",
    "rescue",
    "deploy",
    "unpause",
    "disable",
    "abandon",
    "renew",
    "ssh",
    "export",
    "replace",
    "recover",
    "cancel",
    "unhold",
    "accept",
    "pull",
    "exec",
    "upgrade",
    "suspend",
    "disassociate",
    "undeploy",
    "grow",
    "scale",
    "execute",
    "grant",
    "confirm",
    "kill",
    "mark",
    "eject",
    "op",
    "verification",
    "reprocess",
    "expand",
    "evacuate",
    "signed",
    "axfr",
    "unregister",
    "clean",
    "download",
    "authorize",
    "cp",
    "submit",
    "stage",
    "promote",
    "configure",
    "inject",
    "signal",
    "release",
    "secret store",
    "baremetal node inspect",
    "baremetal node service",
    "baremetal node provide",
    "aggregate cache image",
    "cached image queue",
    "baremetal driver passthru call",
    "baremetal node passthru call",
    "static-action call",
    "metric measures batch-metrics",
    "metric measures batch-resources-metrics",
    "cluster node check",
];

/// Flags that would change identity, endpoint or TLS trust
pub const GLOBAL_ARGS: &[&str] = &[
    "--os-cloud",
    "--os-auth-type",
    "--os-auth-url",
    "--os-url",
    "--os-endpoint",
    "--os-token",
    "--os-username",
    "--os-user-id",
    "--os-password",
    "--os-project-name",
    "--os-project-id",
    "--os-domain-name",
    "--os-domain-id",
    "--os-user-domain-name",
    "--os-user-domain-id",
    "--os-project-domain-name",
    "--os-project-domain-id",
    "--os-default-domain",
    "--os-application-credential-id",
    "--os-application-credential-secret",
    "--os-system-scope",
    "--os-trust-id",
    "--os-identity-provider",
    "--os-protocol",
    "--os-cacert",
    "--os-cert",
    "--os-key",
    "--insecure",
    "--verify",
];

pub const CREDENTIAL_FILES: &[&str] = &["clouds.yaml", "secure.yaml"];

pub const DEFAULT_CREDENTIAL_DIRS: &[&str] = &["./", "~/.config/openstack", "/etc/openstack"];

pub fn header_credentials() -> HeaderCredentials {
    HeaderCredentials {
        token_key: "OS_TOKEN".to_string(),
        url_key: "OS_URL".to_string(),
        token_flag: "--os-token".to_string(),
        url_flag: "--os-url".to_string(),
    }
}

/// Build the policy engine described by `config`
pub fn policy_engine(config: &OpenStackConfig) -> Result<PolicyEngine> {
    let policy = PolicySet::new(&config.allowed_commands, config.effective_blocked_commands())?;
    Ok(PolicyEngine::new(
        PolicyMode::from_allow_write(config.allow_write),
        config.match_strategy,
        policy,
        // The client's option parser accepts any unambiguous long-flag prefix
        GlobalArgBlocklist::new(GLOBAL_ARGS.iter().copied()).with_abbreviations(true),
    )?)
}

/// Operator-configured TLS arguments
pub fn gateway_args(config: &OpenStackConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(ca_cert) = &config.ca_cert {
        args.push("--os-cacert".to_string());
        args.push(ca_cert.clone());
    }
    if config.insecure {
        args.push("--insecure".to_string());
    }
    args
}

pub fn credential_resolver(config: &OpenStackConfig) -> CredentialResolver {
    CredentialResolver::new(
        DISPLAY_NAME,
        header_credentials(),
        CREDENTIAL_FILES.iter().map(|s| s.to_string()).collect(),
        config.credential_dirs.iter().map(|dir| expand_home(dir)).collect(),
    )
}

/// Gateway spawning the `openstack` executable
pub fn gateway(config: &OpenStackConfig, executor: BoundedExecutor) -> Result<CommandGateway> {
    let backend = SubprocessBackend::new(
        SubprocessConfig::new(config.program.clone())
            .with_timeout(ExecutionTimeout::from_secs(config.timeout_secs)),
    );
    gateway_with_backend(config, Arc::new(backend), executor)
}

/// Gateway over any [`Backend`], e.g. an embedded command registry
pub fn gateway_with_backend(
    config: &OpenStackConfig,
    backend: Arc<dyn Backend>,
    executor: BoundedExecutor,
) -> Result<CommandGateway> {
    let mut gateway = CommandGateway::new(
        DISPLAY_NAME,
        policy_engine(config)?,
        credential_resolver(config),
        backend,
        executor,
    )
    .with_gateway_args(gateway_args(config));

    if config.negotiate_versions {
        gateway = gateway.with_negotiator(CapabilityNegotiator::new(VersionsShow));
    }
    Ok(gateway)
}

/// `openstack versions show --format json`
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionsShow;

#[derive(Debug, Deserialize)]
struct VersionEntry {
    #[serde(rename = "Service Type")]
    service_type: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Version", default)]
    version: Option<String>,
    #[serde(rename = "Max Microversion", default)]
    max_microversion: Option<String>,
}

impl VersionCatalog for VersionsShow {
    fn discovery_args(&self) -> Vec<String> {
        ["versions", "show", "--format", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn parse(&self, output: &str) -> Result<CapabilityCache, String> {
        let entries: Vec<VersionEntry> = serde_json::from_str(output.trim_start_matches('\0'))
            .map_err(|e| format!("invalid versions output: {}", e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.status == "CURRENT")
            .filter_map(|entry| {
                let version = entry
                    .max_microversion
                    .filter(|v| !v.is_empty())
                    .or(entry.version.filter(|v| !v.is_empty()))?;
                let name = api_name(&entry.service_type);
                // These services reject dotted versions
                let version = if name == "identity" || name == "key_manager" {
                    version.split('.').next().unwrap_or_default().to_string()
                } else {
                    version
                };
                Some((version_flag(&name), version))
            })
            .collect())
    }
}

/// Service type to client argument name
fn api_name(service_type: &str) -> String {
    let mapped = match service_type {
        "block-storage" | "volumev3" | "volumev2" => "volume",
        "metric-storage" => "metric",
        "operator-policy" => "congressclient",
        "alarm" => "alarming",
        "resource-cluster" | "cluster" => "clustering",
        "application-container" => "container",
        "message" => "messaging",
        "resource-optimization" => "infra-optim",
        "root-cause-analysis" => "rca",
        "workflow" | "workflowv2" => "workflow_engine",
        other => return other.replace('-', "_"),
    };
    mapped.to_string()
}

fn version_flag(api_name: &str) -> String {
    format!("--os-{}-api-version", api_name.replace('_', "-"))
}
