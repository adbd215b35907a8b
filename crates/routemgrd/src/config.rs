//! Configuration file support for routemgrd
//!
//! Loads and validates the routing tool configuration and the appliance facts
//! (role, DNS policy, guest addressing) from TOML files.
//! Default location: /etc/sysvm/routemgr.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use sysvm_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};

use crate::tables::RT_TABLES_PATH;

/// Routing tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Path of the `ip` binary
    #[serde(default = "default_ip_cmd")]
    pub ip_cmd: String,

    /// Table-name registry file
    #[serde(default = "default_rt_tables_path")]
    pub rt_tables_path: PathBuf,
}

/// Role the appliance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplianceRole {
    /// Shared-network router
    Router,
    /// VPC router
    VpcRouter,
    /// DHCP/DNS server without routing duties
    DhcpSrvr,
    #[default]
    #[serde(other)]
    Other,
}

/// How the default route is maintained for a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultRouteStrategy {
    /// Leave an existing default route alone
    Preserve,
    /// Point an existing default route at the new gateway
    AddOrChange,
}

/// Per-appliance facts consumed by callers deciding which routes to request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceConfig {
    #[serde(default)]
    pub role: ApplianceRole,

    #[serde(default)]
    pub domain: Option<String>,

    /// Address of the appliance on the guest network
    #[serde(default)]
    pub guest_ip: Option<IpAddr>,

    /// Virtual gateway shared by a redundant router pair
    #[serde(default)]
    pub guest_gw: Option<IpAddr>,

    #[serde(default)]
    pub redundant: bool,

    #[serde(default)]
    pub dns1: Option<IpAddr>,

    #[serde(default)]
    pub dns2: Option<IpAddr>,

    /// Guests resolve through external servers instead of this appliance
    #[serde(default)]
    pub use_extdns: bool,

    /// Offer this appliance as a resolver even when external DNS is used
    #[serde(default)]
    pub expose_dns: bool,

    #[serde(default)]
    pub use_router_ip_as_resolver: bool,

    #[serde(default = "default_has_public_network")]
    pub has_public_network: bool,
}

/// Complete routemgrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteMgrConfig {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub appliance: ApplianceConfig,
}

// Default functions
fn default_ip_cmd() -> String {
    shell::IP_CMD.to_string()
}

fn default_rt_tables_path() -> PathBuf {
    PathBuf::from(RT_TABLES_PATH)
}

fn default_has_public_network() -> bool {
    true
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            ip_cmd: default_ip_cmd(),
            rt_tables_path: default_rt_tables_path(),
        }
    }
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            role: ApplianceRole::default(),
            domain: None,
            guest_ip: None,
            guest_gw: None,
            redundant: false,
            dns1: None,
            dns2: None,
            use_extdns: false,
            expose_dns: false,
            use_router_ip_as_resolver: false,
            has_public_network: default_has_public_network(),
        }
    }
}

impl ApplianceConfig {
    pub fn is_vpc(&self) -> bool {
        self.role == ApplianceRole::VpcRouter
    }

    pub fn is_router(&self) -> bool {
        self.role == ApplianceRole::Router
    }

    pub fn is_dhcp(&self) -> bool {
        self.role == ApplianceRole::DhcpSrvr
    }

    /// Roles that forward guest traffic
    pub fn is_routed(&self) -> bool {
        self.is_vpc() || self.is_router()
    }

    /// Roles that serve instance metadata
    pub fn has_metadata(&self) -> bool {
        self.is_vpc() || self.is_router() || self.is_dhcp()
    }

    pub fn use_extdns(&self) -> bool {
        self.use_extdns
    }

    pub fn expose_dns(&self) -> bool {
        self.expose_dns
    }

    /// True when this appliance runs the guest resolver
    pub fn has_dns(&self) -> bool {
        !self.use_extdns
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn is_redundant(&self) -> bool {
        self.redundant
    }

    pub fn guest_gw(&self) -> Option<IpAddr> {
        self.guest_gw
    }

    pub fn guest_ip(&self) -> Option<IpAddr> {
        self.guest_ip
    }

    pub fn use_router_ip_as_resolver(&self) -> bool {
        self.use_router_ip_as_resolver
    }

    pub fn has_public_network(&self) -> bool {
        self.has_public_network
    }

    /// Resolvers handed to guests, in preference order
    pub fn dns_servers(&self) -> Vec<IpAddr> {
        let mut servers = Vec::new();
        if !self.use_extdns {
            let own = if !self.is_vpc() && self.redundant && self.guest_gw.is_some() {
                self.guest_gw
            } else {
                self.guest_ip
            };
            servers.extend(own);
        }
        if !self.use_router_ip_as_resolver {
            servers.extend(self.dns1);
            servers.extend(self.dns2);
        }
        servers
    }

    /// Firewall chain filtering traffic entering through `device`
    pub fn ingress_chain(&self, device: &str, ip: &str) -> String {
        if self.is_vpc() {
            format!("ACL_INBOUND_{}", device)
        } else {
            format!("FIREWALL_{}", ip)
        }
    }

    /// Firewall chain filtering traffic leaving through `device`
    pub fn egress_chain(&self, device: &str, _ip: &str) -> String {
        if self.is_vpc() {
            format!("ACL_OUTBOUND_{}", device)
        } else {
            "FW_EGRESS_RULES".to_string()
        }
    }

    /// iptables table holding the egress chain; empty means the default table
    pub fn egress_table(&self) -> &'static str {
        if self.is_vpc() {
            "mangle"
        } else {
            ""
        }
    }

    /// VPC routers follow gateway migrations, other roles keep what is installed
    pub fn default_route_strategy(&self) -> DefaultRouteStrategy {
        if self.is_vpc() {
            DefaultRouteStrategy::AddOrChange
        } else {
            DefaultRouteStrategy::Preserve
        }
    }
}

impl RouteMgrConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> CfgMgrResult<Self> {
        toml::from_str(content).map_err(|e| CfgMgrError::invalid_config("config", e.to_string()))
    }

    /// Load configuration from file, or defaults if the file is absent
    pub fn load_or_default(path: &Path) -> CfgMgrResult<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml(&content)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CfgMgrError::file(path, e)),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> CfgMgrResult<()> {
        if self.routing.ip_cmd.trim().is_empty() {
            return Err(CfgMgrError::invalid_config(
                "routing.ip_cmd",
                "must not be empty",
            ));
        }

        if self.routing.rt_tables_path.as_os_str().is_empty() {
            return Err(CfgMgrError::invalid_config(
                "routing.rt_tables_path",
                "must not be empty",
            ));
        }

        if let (Some(ip), Some(gw)) = (self.appliance.guest_ip, self.appliance.guest_gw) {
            if ip.is_ipv4() != gw.is_ipv4() {
                return Err(CfgMgrError::invalid_config(
                    "appliance.guest_gw",
                    "must be in the same address family as guest_ip",
                ));
            }
        }

        Ok(())
    }
}
