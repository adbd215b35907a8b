//! Command builders for policy routing operations

use sysvm_cfgmgr_common::{AddressFamily, IpCommand, Verb};

use crate::tables::proto;
use crate::types::{RouteStatement, RoutingTable};

/// Build the main-table default route statement
///
/// `default via <gateway>`
pub fn default_route(gateway: &str) -> RouteStatement {
    RouteStatement::default_via(gateway)
}

/// Build the per-interface default route statement
///
/// `default via <gateway> table <table> proto static`
pub fn table_default_route(table: &RoutingTable, gateway: &str) -> RouteStatement {
    RouteStatement::default_via(gateway)
        .with_table(table.clone())
        .with_proto(proto::STATIC)
}

/// Build the per-interface throw route statement
///
/// `throw <network> table <table> proto static`
pub fn table_throw_route(table: &RoutingTable, network: &str) -> RouteStatement {
    RouteStatement::throw(network)
        .with_table(table.clone())
        .with_proto(proto::STATIC)
}

/// Build the device-scoped IPv6 network route statement
///
/// `<network> dev <device> proto kernel`
pub fn link_route_v6(device: &str, network: &str) -> RouteStatement {
    RouteStatement::network(network)
        .with_device(device)
        .with_proto(proto::KERNEL)
}

/// Build the IPv6 network route removal statement
///
/// `<network> dev <device>`
pub fn link_route_v6_delete(device: &str, network: &str) -> RouteStatement {
    RouteStatement::network(network).with_device(device)
}

/// Build the command removing a stray `from all` rule
///
/// `lookup` is the table as the rule listing printed it (name or number)
pub fn delete_table_rule_cmd(lookup: &str) -> IpCommand {
    IpCommand::rule(AddressFamily::V4, Verb::Delete, ["from", "all", "table", lookup])
}

/// Build the commands emptying a table and the route cache
pub fn flush_table_cmds(table: &RoutingTable) -> [IpCommand; 2] {
    [
        IpCommand::route(AddressFamily::V4, Verb::Flush, ["table", table.name.as_str()]),
        IpCommand::route(AddressFamily::V4, Verb::Flush, ["cache"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth1() -> RoutingTable {
        RoutingTable::for_device("eth1").unwrap()
    }

    #[test]
    fn test_table_default_route() {
        assert_eq!(
            table_default_route(&eth1(), "10.0.2.1").to_string(),
            "default via 10.0.2.1 table Table_eth1 proto static"
        );
    }

    #[test]
    fn test_table_throw_route() {
        assert_eq!(
            table_throw_route(&eth1(), "10.0.2.0/24").to_string(),
            "throw 10.0.2.0/24 table Table_eth1 proto static"
        );
    }

    #[test]
    fn test_link_route_v6() {
        assert_eq!(
            link_route_v6("eth1", "2021:10:10:10::/64").to_string(),
            "2021:10:10:10::/64 dev eth1 proto kernel"
        );
        assert_eq!(
            link_route_v6_delete("eth1", "2021:10:10:10::/64").to_string(),
            "2021:10:10:10::/64 dev eth1"
        );
    }

    #[test]
    fn test_delete_table_rule_cmd() {
        assert_eq!(
            delete_table_rule_cmd(&eth1().name).to_string(),
            "ip rule delete from all table Table_eth1"
        );
    }

    #[test]
    fn test_flush_table_cmds() {
        let [table, cache] = flush_table_cmds(&eth1());
        assert_eq!(table.to_string(), "ip route flush table Table_eth1");
        assert_eq!(cache.to_string(), "ip route flush cache");
    }
}
