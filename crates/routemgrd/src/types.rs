//! Type definitions for routemgrd

use std::fmt;

use serde::{Deserialize, Serialize};
use sysvm_cfgmgr_common::{AddressFamily, CfgMgrError, CfgMgrResult, Verb};

use crate::tables::{TABLE_NUMBER_BASE, TABLE_PREFIX};

/// Per-interface policy routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Interface the table belongs to
    pub device: String,
    /// Table number (`100 + <numeric suffix of device>`)
    pub number: u32,
    /// Table name (`Table_<device>`)
    pub name: String,
}

impl RoutingTable {
    /// Derive the table for a device.
    ///
    /// The number comes from the trailing digits of the device name, so
    /// `eth3` always maps to 103 / `Table_eth3`.
    pub fn for_device(device: &str) -> CfgMgrResult<Self> {
        if device.is_empty() || device.chars().any(char::is_whitespace) {
            return Err(CfgMgrError::invalid_device_name(device));
        }

        let stem_len = device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let suffix = &device[stem_len..];
        let number = suffix
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_add(TABLE_NUMBER_BASE))
            .ok_or_else(|| CfgMgrError::invalid_device_name(device))?;

        Ok(Self {
            device: device.to_string(),
            number,
            name: format!("{}{}", TABLE_PREFIX, device),
        })
    }

    /// Line recorded in the table-name registry
    pub fn registry_entry(&self) -> String {
        format!("{} {}", self.number, self.name)
    }
}

/// Kind of route statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// `default via <gateway>`
    Default,
    /// `<prefix> ...`
    Network,
    /// `throw <prefix>`: forces a lookup miss so the next rule is consulted
    Throw,
}

/// A desired route, rendered into `ip route` clause tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatement {
    pub kind: RouteKind,
    /// CIDR prefix, or `default`
    pub destination: String,
    pub via: Option<String>,
    pub device: Option<String>,
    /// `None` targets the main table
    pub table: Option<RoutingTable>,
    pub proto: Option<&'static str>,
}

impl RouteStatement {
    /// `default via <gateway>` in the main table
    pub fn default_via(gateway: impl Into<String>) -> Self {
        Self {
            kind: RouteKind::Default,
            destination: "default".to_string(),
            via: Some(gateway.into()),
            device: None,
            table: None,
            proto: None,
        }
    }

    /// `<destination>` with no further attributes
    pub fn network(destination: impl Into<String>) -> Self {
        Self {
            kind: RouteKind::Network,
            destination: destination.into(),
            via: None,
            device: None,
            table: None,
            proto: None,
        }
    }

    /// `throw <destination>`
    pub fn throw(destination: impl Into<String>) -> Self {
        Self {
            kind: RouteKind::Throw,
            ..Self::network(destination)
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_table(mut self, table: RoutingTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_proto(mut self, proto: &'static str) -> Self {
        self.proto = Some(proto);
        self
    }

    /// Clause tokens: `[throw] <dest> [via <gw>] [dev <dev>] [table <name>] [proto <p>]`
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(10);
        if self.kind == RouteKind::Throw {
            tokens.push("throw".to_string());
        }
        tokens.push(self.destination.clone());
        if let Some(via) = &self.via {
            tokens.push("via".to_string());
            tokens.push(via.clone());
        }
        if let Some(device) = &self.device {
            tokens.push("dev".to_string());
            tokens.push(device.clone());
        }
        if let Some(table) = &self.table {
            tokens.push("table".to_string());
            tokens.push(table.name.clone());
        }
        if let Some(proto) = self.proto {
            tokens.push("proto".to_string());
            tokens.push(proto.to_string());
        }
        tokens
    }

    /// Selector used to look the statement up before applying it
    pub fn lookup_selector(&self, family: AddressFamily) -> Vec<String> {
        let tokens = self.tokens();
        if family.template().strips_throw {
            tokens.into_iter().filter(|t| t != "throw").collect()
        } else {
            tokens
        }
    }
}

impl fmt::Display for RouteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

/// Requested apply method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Add,
    Change,
    Delete,
}

impl Method {
    pub fn verb(&self) -> Verb {
        match self {
            Method::Add => Verb::Add,
            Method::Change => Verb::Change,
            Method::Delete => Verb::Delete,
        }
    }
}

/// Why an apply did not touch the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// An equivalent route is already installed
    AlreadyPresent,
    /// Delete requested for a route that is not installed
    NotPresent,
    /// No table could be resolved for the device
    MissingTable,
    /// No address was supplied
    MissingAddress,
}

impl SkipReason {
    /// True for skips caused by incomplete caller input
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, SkipReason::MissingTable | SkipReason::MissingAddress)
    }
}

/// Result of reconciling one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconciliationOutcome {
    Added,
    Changed,
    Deleted,
    Skipped(SkipReason),
}

impl ReconciliationOutcome {
    /// True if a mutating command was issued
    pub fn applied(&self) -> bool {
        !matches!(self, ReconciliationOutcome::Skipped(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ReconciliationOutcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationOutcome::Added => f.write_str("added"),
            ReconciliationOutcome::Changed => f.write_str("changed"),
            ReconciliationOutcome::Deleted => f.write_str("deleted"),
            ReconciliationOutcome::Skipped(SkipReason::AlreadyPresent) => {
                f.write_str("skipped-already-present")
            }
            ReconciliationOutcome::Skipped(SkipReason::NotPresent) => {
                f.write_str("skipped-not-present")
            }
            ReconciliationOutcome::Skipped(SkipReason::MissingTable) => {
                f.write_str("skipped-invalid-input (table)")
            }
            ReconciliationOutcome::Skipped(SkipReason::MissingAddress) => {
                f.write_str("skipped-invalid-input (address)")
            }
        }
    }
}
