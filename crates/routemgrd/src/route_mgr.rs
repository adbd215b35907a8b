//! Route Manager - idempotent reconciliation of routes against kernel state
//!
//! Every operation lists what the kernel currently holds, decides from that
//! listing, and only then issues at most one mutating command. Nothing is
//! locked between the listing and the mutation.

use sysvm_cfgmgr_common::{
    AddressFamily, CfgMgrError, CfgMgrResult, IpCommand, KernelRouting, RouteDestination,
    RouteRecord, RuleRecord,
};
use tracing::{debug, info, instrument, warn};

use crate::commands::*;
use crate::default_route::DefaultRouteMgr;
use crate::table_registry::TableRegistry;
use crate::types::*;

/// Route Manager
///
/// Drives one [`KernelRouting`] implementation. IPv4 and IPv6 share the same
/// decision logic; the address family only selects the command template.
pub struct RouteMgr<K> {
    kernel: K,
    registry: TableRegistry,
}

impl<K: KernelRouting> RouteMgr<K> {
    pub fn new(kernel: K, registry: TableRegistry) -> Self {
        Self { kernel, registry }
    }

    /// Default route operations over this manager
    pub fn default_routes(&self) -> DefaultRouteMgr<'_, K> {
        DefaultRouteMgr::new(self)
    }

    /// Register the policy routing table for `device`
    pub async fn register_table(&self, device: &str) -> CfgMgrResult<RoutingTable> {
        self.registry.register(&self.kernel, device).await
    }

    /// Returns true if the kernel lists a route matching `selector`
    ///
    /// Lines that cannot be parsed are counted as matches: the kernel already
    /// filtered the listing by the selector.
    pub async fn route_present(
        &self,
        family: AddressFamily,
        selector: &[String],
    ) -> CfgMgrResult<bool> {
        let lines = self.kernel.list_routes(family, selector).await?;
        let wanted = match RouteRecord::from_tokens(selector) {
            Ok(wanted) => wanted,
            Err(e) => {
                debug!("Selector '{}' not parseable ({}), trusting kernel filter", selector.join(" "), e);
                return Ok(!lines.is_empty());
            }
        };

        Ok(lines.iter().any(|line| match RouteRecord::parse(line) {
            Ok(observed) => observed.satisfies(&wanted),
            Err(_) => true,
        }))
    }

    /// Apply `statement` with `method`, unless the kernel already agrees
    ///
    /// | observed  | method | action                     |
    /// |-----------|--------|----------------------------|
    /// | not found | add    | `add`                      |
    /// | not found | change | `change` (installs)        |
    /// | found     | delete | `delete`                   |
    /// | found     | other  | skip, already present      |
    /// | not found | delete | skip, not present          |
    #[instrument(skip(self, statement), fields(statement = %statement))]
    pub async fn apply_route(
        &self,
        family: AddressFamily,
        statement: &RouteStatement,
        method: Method,
    ) -> CfgMgrResult<ReconciliationOutcome> {
        let found = self
            .route_present(family, &statement.lookup_selector(family))
            .await?;

        let outcome = match (found, method) {
            (false, Method::Add) => ReconciliationOutcome::Added,
            (false, Method::Change) => ReconciliationOutcome::Changed,
            (true, Method::Delete) => ReconciliationOutcome::Deleted,
            (true, _) => {
                debug!("Route already present");
                return Ok(ReconciliationOutcome::Skipped(SkipReason::AlreadyPresent));
            }
            (false, Method::Delete) => {
                debug!("Route not present, nothing to delete");
                return Ok(ReconciliationOutcome::Skipped(SkipReason::NotPresent));
            }
        };

        let command = IpCommand::route(family, method.verb(), statement.tokens());
        self.kernel.apply(&command).await?;
        info!("{}", command);

        Ok(outcome)
    }

    /// Returns true if an unqualified default route exists for `family`
    pub async fn default_route_exists(&self, family: AddressFamily) -> CfgMgrResult<bool> {
        let selector = vec![family.template().default_selector.to_string()];
        let lines = self.kernel.list_routes(family, &selector).await?;

        let found = lines.iter().find(|line| {
            RouteRecord::parse(line)
                .map(|r| r.destination == RouteDestination::Default)
                .unwrap_or(true)
        });
        match found {
            Some(line) => {
                debug!("Default {} route found: {}", family, line);
                Ok(true)
            }
            None => {
                warn!("No default {} route found", family);
                Ok(false)
            }
        }
    }

    /// Install `default via <gateway>` in the device's table
    #[instrument(skip(self))]
    pub async fn add_route(
        &self,
        device: &str,
        gateway: &str,
    ) -> CfgMgrResult<ReconciliationOutcome> {
        let table = match resolve_table(device, gateway) {
            Ok(table) => table,
            Err(reason) => return Ok(skip(reason, "route")),
        };
        self.apply_route(AddressFamily::V4, &table_default_route(&table, gateway), Method::Add)
            .await
    }

    /// Install `throw <network>` in the device's table
    #[instrument(skip(self))]
    pub async fn add_network_route(
        &self,
        device: &str,
        network: &str,
    ) -> CfgMgrResult<ReconciliationOutcome> {
        let table = match resolve_table(device, network) {
            Ok(table) => table,
            Err(reason) => return Ok(skip(reason, "network route")),
        };
        self.apply_route(AddressFamily::V4, &table_throw_route(&table, network), Method::Add)
            .await
    }

    /// Install the device-scoped IPv6 route `<network> dev <device> proto kernel`
    #[instrument(skip(self))]
    pub async fn add_network_route_v6(
        &self,
        device: &str,
        network: &str,
    ) -> CfgMgrResult<ReconciliationOutcome> {
        if let Some(outcome) = check_link_input(device, network, "IPv6 route")? {
            return Ok(outcome);
        }
        self.apply_route(AddressFamily::V6, &link_route_v6(device, network), Method::Add)
            .await
    }

    /// Remove the device-scoped IPv6 route `<network> dev <device>` if present
    #[instrument(skip(self))]
    pub async fn delete_network_route_v6(
        &self,
        device: &str,
        network: &str,
    ) -> CfgMgrResult<ReconciliationOutcome> {
        if let Some(outcome) = check_link_input(device, network, "IPv6 route deletion")? {
            return Ok(outcome);
        }
        self.apply_route(
            AddressFamily::V6,
            &link_route_v6_delete(device, network),
            Method::Delete,
        )
        .await
    }

    /// Returns true if a policy rule matching `selector` is installed
    ///
    /// A selector that does not parse as a rule is searched for verbatim.
    pub async fn find_rule(&self, family: AddressFamily, selector: &str) -> CfgMgrResult<bool> {
        let lines = self.kernel.list_rules(family).await?;
        let found = match RuleRecord::parse(selector) {
            Ok(wanted) => lines.iter().any(|line| {
                RuleRecord::parse(line)
                    .map(|r| r.matches(&wanted))
                    .unwrap_or(false)
            }),
            Err(_) => lines.iter().any(|line| line.trim().contains(selector)),
        };
        Ok(found)
    }

    /// Empty the device's table, then the route cache
    #[instrument(skip(self))]
    pub async fn flush_table(&self, device: &str) -> CfgMgrResult<()> {
        let table = RoutingTable::for_device(device)?;
        for command in flush_table_cmds(&table) {
            self.kernel.apply(&command).await?;
            debug!("{}", command);
        }
        info!("Flushed table {}", table.name);
        Ok(())
    }
}

/// Resolve the table for a per-interface route, or the reason to skip it
fn resolve_table(device: &str, address: &str) -> Result<RoutingTable, SkipReason> {
    let table = RoutingTable::for_device(device).map_err(|_| SkipReason::MissingTable)?;
    if address.trim().is_empty() {
        return Err(SkipReason::MissingAddress);
    }
    Ok(table)
}

fn check_link_input(
    device: &str,
    address: &str,
    what: &str,
) -> CfgMgrResult<Option<ReconciliationOutcome>> {
    if device.is_empty() || device.chars().any(char::is_whitespace) {
        return Err(CfgMgrError::invalid_device_name(device));
    }
    if address.trim().is_empty() {
        return Ok(Some(skip(SkipReason::MissingAddress, what)));
    }
    Ok(None)
}

fn skip(reason: SkipReason, what: &str) -> ReconciliationOutcome {
    let outcome = ReconciliationOutcome::Skipped(reason);
    info!("Empty parameter while adding {}: {}", what, outcome);
    outcome
}
