//! Routing table constants for routemgrd

/// Table-name registry maintained by iproute2
pub const RT_TABLES_PATH: &str = "/etc/iproute2/rt_tables";

/// Prefix of per-interface table names (`Table_eth1`)
pub const TABLE_PREFIX: &str = "Table_";

/// Per-interface table numbers start above this base (`eth1` -> 101)
pub const TABLE_NUMBER_BASE: u32 = 100;

/// Default configuration file location
pub const CONFIG_PATH: &str = "/etc/sysvm/routemgr.toml";

/// Route protocol tags
pub mod proto {
    /// Routes installed by this tool
    pub const STATIC: &str = "static";

    /// Link routes as the kernel itself would install them
    pub const KERNEL: &str = "kernel";
}
