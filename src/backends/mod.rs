//! Backend profiles
//!
//! Each profile knows its program, default policy lists, blocked global
//! flags, credential sources and extra arguments, and assembles a
//! [`CommandGateway`] from its section of the [`Config`].

pub mod openshift;
pub mod openstack;

use crate::config::Config;
use crate::gateway::{BoundedExecutor, CommandGateway, PolicyEngine};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The administrative CLIs the gateway can front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BackendKind {
    Openstack,
    Openshift,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Openstack, BackendKind::Openshift];

    /// MCP tool name
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Openstack => openstack::TOOL_NAME,
            Self::Openshift => openshift::TOOL_NAME,
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tool_name() == name)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Openstack => openstack::DISPLAY_NAME,
            Self::Openshift => openshift::DISPLAY_NAME,
        }
    }

    /// Tool description shown to MCP clients
    pub fn description(self) -> &'static str {
        match self {
            Self::Openstack => concat!(
                "Run an OpenStackClient (OSC) command as if it were run in a terminal. ",
                "Credentials are provided by the gateway. Use `openstack` commands, never ",
                "cinder, nova or glance. Microversions default to the latest version; ",
                "override them with `--os-<service>-api-version`. ",
                "Use `--format {table,csv,json,value,yaml}` to choose the output format."
            ),
            Self::Openshift => concat!(
                "Run an OpenShift CLI (`oc`) command as if it were run in a terminal. ",
                "Credentials are provided by the gateway."
            ),
        }
    }

    pub fn enabled(self, config: &Config) -> bool {
        match self {
            Self::Openstack => config.openstack.enabled,
            Self::Openshift => config.openshift.enabled,
        }
    }

    pub fn allow_write(self, config: &Config) -> bool {
        match self {
            Self::Openstack => config.openstack.allow_write,
            Self::Openshift => config.openshift.allow_write,
        }
    }

    pub fn policy_engine(self, config: &Config) -> Result<PolicyEngine> {
        match self {
            Self::Openstack => openstack::policy_engine(&config.openstack),
            Self::Openshift => openshift::policy_engine(&config.openshift),
        }
    }

    pub fn gateway(self, config: &Config, executor: BoundedExecutor) -> Result<CommandGateway> {
        match self {
            Self::Openstack => openstack::gateway(&config.openstack, executor),
            Self::Openshift => openshift::gateway(&config.openshift, executor),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The gateways of every enabled backend, sharing one execution pool
#[derive(Debug, Clone, Default)]
pub struct Gateways {
    gateways: Vec<(BackendKind, Arc<CommandGateway>)>,
}

impl Gateways {
    /// Build a gateway per enabled backend around a shared executor
    pub fn from_config(config: &Config) -> Result<Self> {
        let executor = BoundedExecutor::new(config.server.workers)?;
        let mut gateways = Vec::new();
        for kind in BackendKind::ALL {
            if kind.enabled(config) {
                let gateway = kind.gateway(config, executor.clone())?;
                info!(
                    backend = %kind,
                    program = %gateway.program(),
                    mode = ?gateway.policy().mode(),
                    "Backend enabled"
                );
                gateways.push((kind, Arc::new(gateway)));
            }
        }
        Ok(Self { gateways })
    }

    /// Register a gateway by hand, replacing any previous one of that kind
    pub fn insert(&mut self, kind: BackendKind, gateway: CommandGateway) {
        self.gateways.retain(|(existing, _)| *existing != kind);
        self.gateways.push((kind, Arc::new(gateway)));
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<CommandGateway>> {
        self.gateways
            .iter()
            .find(|(existing, _)| *existing == kind)
            .map(|(_, gateway)| gateway)
    }

    pub fn kinds(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.gateways.iter().map(|(kind, _)| *kind)
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
