// cligate - Main Entry Point
//
// Policy-enforced gateway in front of administrative CLIs:
// - MCP server exposing one tool per backend
// - Offline policy verdicts
// - One-shot command runs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cligate::backends::BackendKind;
use cligate::config::Config;
use cligate::gateway::{BoundedExecutor, GatewayError, RequestMetadata};
use cligate::logging::{self, LogFormat};
use cligate::mcp;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

/// cligate: policy-enforced gateway for administrative CLIs
#[derive(Parser, Debug)]
#[command(name = "cligate")]
#[command(version)]
#[command(about = "Run agent-issued openstack and oc commands under policy", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to $CLIGATE_CONFIG, then config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server
    Serve,
    /// Print the policy verdict for a command without running it
    Check {
        /// Backend whose policy applies
        #[arg(short, long, value_enum)]
        backend: BackendKind,

        /// Evaluate in write-allowed mode
        #[arg(long)]
        allow_write: bool,

        /// Command string as an agent would send it
        command: String,
    },
    /// Run one command through the full gateway
    Run {
        #[arg(short, long, value_enum)]
        backend: BackendKind,

        /// Request metadata, e.g. `--header OCP_TOKEN=sha256~...`
        #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        command: String,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = Config::load(args.config.as_deref())?;

    let format: LogFormat = config
        .logging
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    logging::init_tracing(config.log_level()?, format, args.verbose)?;
    debug!("Configuration loaded from {:?}", Config::config_path(args.config.as_deref()));

    match args.command {
        Commands::Serve => {
            info!("cligate v{} starting...", env!("CARGO_PKG_VERSION"));
            mcp::serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            backend,
            allow_write,
            command,
        } => {
            if allow_write {
                match backend {
                    BackendKind::Openstack => config.openstack.allow_write = true,
                    BackendKind::Openshift => config.openshift.allow_write = true,
                }
            }
            check(&config, backend, &command)
        }
        Commands::Run {
            backend,
            headers,
            command,
        } => run_once(&config, backend, headers, &command).await,
    }
}

/// Print `allowed: <argv>` or `denied (<kind>): <reason>`
fn check(config: &Config, backend: BackendKind, command: &str) -> Result<ExitCode> {
    let gateway = backend
        .gateway(config, BoundedExecutor::new(1)?)
        .with_context(|| format!("Invalid {} policy", backend))?;

    match gateway.check(command) {
        Ok(request) => {
            println!("allowed: {}", request.args().join(" "));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("denied ({}): {}", e.kind(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_once(
    config: &Config,
    backend: BackendKind,
    headers: Vec<(String, String)>,
    command: &str,
) -> Result<ExitCode> {
    let gateway = backend
        .gateway(config, BoundedExecutor::new(1)?)
        .with_context(|| format!("Invalid {} policy", backend))?;
    let metadata: RequestMetadata = headers.into_iter().collect();

    match gateway.run(command, &metadata).await {
        Ok(output) => {
            print!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        Err(GatewayError::Execution {
            code,
            stdout,
            stderr,
            ..
        }) => {
            print!("{}", stdout);
            eprint!("{}", stderr);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1).max(1)))
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::from(2))
        }
    }
}
