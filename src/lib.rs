//! cligate Library
//!
//! Policy-enforced gateway that runs free-form commands from an agent as
//! authorized, credentialed invocations of administrative CLIs
//! (`openstack`, `oc`), served over MCP.

pub mod backends;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod mcp;
pub mod metrics;
