//! Default Route Manager - the unqualified default route per address family

use sysvm_cfgmgr_common::{AddressFamily, CfgMgrError, CfgMgrResult, KernelRouting};
use tracing::{info, instrument};

use crate::commands::default_route;
use crate::config::{ApplianceConfig, DefaultRouteStrategy};
use crate::route_mgr::RouteMgr;
use crate::types::Method;

/// Default Route Manager
///
/// Entry points used by appliance role logic. A missing gateway is rejected
/// before the kernel is consulted.
pub struct DefaultRouteMgr<'a, K> {
    routes: &'a RouteMgr<K>,
}

fn require_gateway<'g>(gateway: &'g str, operation: &'static str) -> CfgMgrResult<&'g str> {
    let gateway = gateway.trim();
    if gateway.is_empty() {
        return Err(CfgMgrError::missing_gateway(operation));
    }
    Ok(gateway)
}

impl<'a, K: KernelRouting> DefaultRouteMgr<'a, K> {
    pub fn new(routes: &'a RouteMgr<K>) -> Self {
        Self { routes }
    }

    /// Add `default via <gateway>` unless any IPv4 default route exists
    ///
    /// Returns false when an existing default route was left in place.
    #[instrument(skip(self))]
    pub async fn add_default_route(&self, gateway: &str) -> CfgMgrResult<bool> {
        let gateway = require_gateway(gateway, "add_default_route")?;
        self.add_if_absent(AddressFamily::V4, gateway).await
    }

    /// Add `default via <gateway>`, or point the existing default route at it
    #[instrument(skip(self))]
    pub async fn add_or_change_default_route(&self, gateway: &str) -> CfgMgrResult<bool> {
        let gateway = require_gateway(gateway, "add_or_change_default_route")?;
        let statement = default_route(gateway);

        let method = if self.routes.default_route_exists(AddressFamily::V4).await? {
            info!("Changing default route");
            Method::Change
        } else {
            info!("Adding default route");
            Method::Add
        };
        self.routes
            .apply_route(AddressFamily::V4, &statement, method)
            .await?;
        Ok(true)
    }

    /// Add `default via <gateway>` unless any IPv6 default route exists
    #[instrument(skip(self))]
    pub async fn add_default_route_v6(&self, gateway: &str) -> CfgMgrResult<bool> {
        let gateway = require_gateway(gateway, "add_default_route_v6")?;
        self.add_if_absent(AddressFamily::V6, gateway).await
    }

    /// Maintain the IPv4 default route the way the appliance role expects
    #[instrument(skip(self, config), fields(role = ?config.role))]
    pub async fn apply_for_role(&self, config: &ApplianceConfig, gateway: &str) -> CfgMgrResult<bool> {
        match config.default_route_strategy() {
            DefaultRouteStrategy::AddOrChange => self.add_or_change_default_route(gateway).await,
            DefaultRouteStrategy::Preserve => self.add_default_route(gateway).await,
        }
    }

    async fn add_if_absent(&self, family: AddressFamily, gateway: &str) -> CfgMgrResult<bool> {
        if self.routes.default_route_exists(family).await? {
            return Ok(false);
        }
        info!("Adding default {} route via {}", family, gateway);
        self.routes
            .apply_route(family, &default_route(gateway), Method::Add)
            .await?;
        Ok(true)
    }
}
