//! routemgr - policy routing manager
//!
//! Performs one reconciliation per invocation and prints its outcome

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sysvm_cfgmgr_common::{AddressFamily, ShellKernel};
use sysvm_routemgrd::{
    ReconciliationOutcome, RouteMgr, RouteMgrConfig, TableRegistry, CONFIG_PATH,
};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// sysvm policy routing manager
#[derive(Parser, Debug)]
#[command(name = "routemgr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the routing table of a device
    RegisterTable { device: String },

    /// Add `default via <gateway>` to the device's table
    AddRoute { device: String, gateway: String },

    /// Add `throw <network>` to the device's table
    AddNetworkRoute { device: String, network: String },

    /// Add a device-scoped IPv6 network route
    AddNetworkRouteV6 { device: String, network: String },

    /// Delete a device-scoped IPv6 network route
    DeleteNetworkRouteV6 { device: String, network: String },

    /// Add the IPv4 default route unless one exists
    AddDefaultRoute { gateway: Option<String> },

    /// Add the IPv4 default route, or change it to the given gateway
    AddOrChangeDefaultRoute { gateway: Option<String> },

    /// Add the IPv6 default route unless one exists
    AddDefaultRouteV6 { gateway: Option<String> },

    /// Maintain the IPv4 default route as the configured role expects
    DefaultRouteForRole { gateway: Option<String> },

    /// Report whether a default route exists
    DefaultRouteExists {
        #[arg(long)]
        ipv6: bool,
    },

    /// Report whether a policy rule is installed
    FindRule {
        #[arg(long)]
        ipv6: bool,
        #[arg(required = true, num_args = 1..)]
        selector: Vec<String>,
    },

    /// Flush the device's routing table and the route cache
    FlushTable { device: String },
}

fn family(ipv6: bool) -> AddressFamily {
    if ipv6 {
        AddressFamily::V6
    } else {
        AddressFamily::V4
    }
}

/// Renders an outcome, warning when the caller's input was incomplete
fn report(outcome: ReconciliationOutcome) -> String {
    match outcome.skip_reason() {
        Some(reason) if reason.is_invalid_input() => warn!("Nothing applied: {}", outcome),
        _ if outcome.applied() => debug!("Kernel updated: {}", outcome),
        _ => {}
    }
    outcome.to_string()
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = RouteMgrConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    debug!(?config, "Configuration loaded");

    let routes = RouteMgr::new(
        ShellKernel::new(config.routing.ip_cmd.clone()),
        TableRegistry::new(config.routing.rt_tables_path.clone()),
    );
    let defaults = routes.default_routes();

    match args.command {
        Command::RegisterTable { device } => {
            let table = routes.register_table(&device).await?;
            println!("{}", table.registry_entry());
        }
        Command::AddRoute { device, gateway } => {
            println!("{}", report(routes.add_route(&device, &gateway).await?));
        }
        Command::AddNetworkRoute { device, network } => {
            println!("{}", report(routes.add_network_route(&device, &network).await?));
        }
        Command::AddNetworkRouteV6 { device, network } => {
            println!("{}", report(routes.add_network_route_v6(&device, &network).await?));
        }
        Command::DeleteNetworkRouteV6 { device, network } => {
            println!("{}", report(routes.delete_network_route_v6(&device, &network).await?));
        }
        Command::AddDefaultRoute { gateway } => {
            let gateway = gateway.unwrap_or_default();
            println!("{}", defaults.add_default_route(&gateway).await?);
        }
        Command::AddOrChangeDefaultRoute { gateway } => {
            let gateway = gateway.unwrap_or_default();
            println!("{}", defaults.add_or_change_default_route(&gateway).await?);
        }
        Command::AddDefaultRouteV6 { gateway } => {
            let gateway = gateway.unwrap_or_default();
            println!("{}", defaults.add_default_route_v6(&gateway).await?);
        }
        Command::DefaultRouteForRole { gateway } => {
            let gateway = gateway.unwrap_or_default();
            println!(
                "{}",
                defaults.apply_for_role(&config.appliance, &gateway).await?
            );
        }
        Command::DefaultRouteExists { ipv6 } => {
            println!("{}", routes.default_route_exists(family(ipv6)).await?);
        }
        Command::FindRule { ipv6, selector } => {
            let selector = selector.join(" ");
            println!("{}", routes.find_rule(family(ipv6), &selector).await?);
        }
        Command::FlushTable { device } => {
            routes.flush_table(&device).await?;
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["routemgr", "add-network-route", "eth1", "10.0.2.0/24"]).unwrap();
        assert_eq!(args.config, PathBuf::from(CONFIG_PATH));
        assert!(matches!(
            args.command,
            Command::AddNetworkRoute { ref device, ref network } if device == "eth1" && network == "10.0.2.0/24"
        ));

        let args = Args::try_parse_from(["routemgr", "-c", "/tmp/r.toml", "add-default-route"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/tmp/r.toml"));
        assert!(matches!(args.command, Command::AddDefaultRoute { gateway: None }));
    }

    #[test]
    fn test_cli_find_rule_joins_selector() {
        let args = Args::try_parse_from(["routemgr", "find-rule", "--ipv6", "from", "all", "lookup", "main"]).unwrap();
        match args.command {
            Command::FindRule { ipv6, selector } => {
                assert!(ipv6);
                assert_eq!(selector.join(" "), "from all lookup main");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_report_outcome() {
        use sysvm_routemgrd::SkipReason;

        assert_eq!(report(ReconciliationOutcome::Added), "added");
        assert_eq!(
            report(ReconciliationOutcome::Skipped(SkipReason::AlreadyPresent)),
            "skipped-already-present"
        );
        assert_eq!(
            report(ReconciliationOutcome::Skipped(SkipReason::MissingAddress)),
            "skipped-invalid-input (address)"
        );
    }

    #[test]
    fn test_cli_v6_subcommand_names() {
        assert!(Args::try_parse_from(["routemgr", "add-default-route-v6", "fd80::1"]).is_ok());
        assert!(Args::try_parse_from(["routemgr", "add-network-route-v6", "eth1", "2021::/64"]).is_ok());
        assert!(Args::try_parse_from(["routemgr", "default-route-exists", "--ipv6"]).is_ok());
    }
}
