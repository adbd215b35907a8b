//! Test fixtures for common routing scenarios
//!
//! Provides a freshly booted appliance's kernel state and sample appliance
//! configuration files

use std::path::PathBuf;

use sysvm_cfgmgr_common::AddressFamily;

use crate::MockKernel;

/// Registry path used by fixtures
pub const RT_TABLES_PATH: &str = "/etc/iproute2/rt_tables";

/// Registry lines shipped by the distribution
pub fn rt_tables_default() -> Vec<&'static str> {
    vec![
        "#",
        "# reserved values",
        "#",
        "255\tlocal",
        "254\tmain",
        "253\tdefault",
        "0\tunspec",
    ]
}

/// Rule lines present on a freshly booted kernel
pub fn default_rules() -> Vec<&'static str> {
    vec![
        "0:\tfrom all lookup local",
        "32766:\tfrom all lookup main",
        "32767:\tfrom all lookup default",
    ]
}

/// A fake kernel with the default registry and rules for both families,
/// and no routes
pub fn pristine_kernel() -> MockKernel {
    let mut kernel = MockKernel::new().with_file(PathBuf::from(RT_TABLES_PATH), rt_tables_default());
    for family in [AddressFamily::V4, AddressFamily::V6] {
        for rule in default_rules() {
            kernel = kernel.with_rule(family, rule);
        }
    }
    kernel
}

/// A fake kernel whose main table already routes through `gateway`
pub fn kernel_with_default_route(gateway: &str, dev: &str) -> MockKernel {
    pristine_kernel().with_route(
        AddressFamily::V4,
        None,
        &format!("default via {} dev {} proto static", gateway, dev),
    )
}

/// Appliance configuration fixtures (TOML)
pub mod appliance_fixtures {
    /// VPC router with a public network
    pub fn vpc_router() -> &'static str {
        r#"
[routing]
ip_cmd = "/sbin/ip"
rt_tables_path = "/etc/iproute2/rt_tables"

[appliance]
role = "vpcrouter"
domain = "cs1cloud.internal"
guest_ip = "10.1.1.1"
dns1 = "8.8.8.8"
dns2 = "8.8.4.4"
"#
    }

    /// Redundant shared-network router using its guest gateway for DNS
    pub fn redundant_router() -> &'static str {
        r#"
[appliance]
role = "router"
redundant = true
guest_gw = "10.1.1.254"
guest_ip = "10.1.1.2"
dns1 = "1.1.1.1"
"#
    }

    /// DHCP server relying on external DNS
    pub fn dhcp_server_extdns() -> &'static str {
        r#"
[appliance]
role = "dhcpsrvr"
use_extdns = true
dns1 = "9.9.9.9"
has_public_network = false
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_pristine_kernel() {
        let kernel = pristine_kernel();
        assert_eq!(kernel.rules(AddressFamily::V4).len(), 3);
        assert_eq!(kernel.rules(AddressFamily::V6).len(), 3);
        assert!(kernel.routes(AddressFamily::V4, None).is_empty());
        assert_eq!(kernel.file_lines(Path::new(RT_TABLES_PATH)).len(), 7);
    }

    #[test]
    fn test_kernel_with_default_route() {
        let kernel = kernel_with_default_route("10.0.0.1", "eth0");
        assert_eq!(
            kernel.routes(AddressFamily::V4, None),
            vec!["default via 10.0.0.1 dev eth0 proto static".to_string()]
        );
    }

    #[test]
    fn test_appliance_fixtures_are_distinct() {
        assert!(appliance_fixtures::vpc_router().contains("vpcrouter"));
        assert!(appliance_fixtures::redundant_router().contains("redundant = true"));
        assert!(appliance_fixtures::dhcp_server_extdns().contains("use_extdns = true"));
    }
}
