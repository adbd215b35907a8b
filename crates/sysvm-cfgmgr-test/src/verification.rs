//! Verification helpers for testing the routing reconciler
//!
//! Provides assertion helpers over [`MockKernel`] state and command logs

use crate::MockKernel;
use sysvm_cfgmgr_common::{AddressFamily, RouteRecord, RuleRecord};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected route '{route}' not found in {family} table {table}; have {present:?}")]
    RouteNotFound {
        family: AddressFamily,
        table: String,
        route: String,
        present: Vec<String>,
    },

    #[error("Unexpected rule matching '{selector}' still present: '{rule}'")]
    RulePresent { selector: String, rule: String },

    #[error("Expected command '{command}' was not issued; issued {issued:?}")]
    CommandNotIssued { command: String, issued: Vec<String> },

    #[error("Expected no commands, but {count} were issued: {issued:?}")]
    UnexpectedCommands { count: usize, issued: Vec<String> },

    #[error("Registry entry '{entry}' appears {actual} times, expected {expected}")]
    RegistryCountMismatch {
        entry: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid expectation '{0}'")]
    InvalidExpectation(String),
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Kernel state verification helper
pub struct KernelVerifier<'a> {
    kernel: &'a MockKernel,
}

impl<'a> KernelVerifier<'a> {
    /// Create a new verifier over a fake kernel
    pub fn new(kernel: &'a MockKernel) -> Self {
        Self { kernel }
    }

    /// Verify that a route equivalent to `route` exists in `table` (`None` = main)
    pub fn assert_route_present(
        &self,
        family: AddressFamily,
        table: Option<&str>,
        route: &str,
    ) -> VerifyResult<()> {
        let wanted = RouteRecord::parse(route)
            .map_err(|_| VerificationError::InvalidExpectation(route.to_string()))?;
        let present = self.kernel.routes(family, table);
        let found = present
            .iter()
            .filter_map(|line| RouteRecord::parse(line).ok())
            .any(|r| r.satisfies(&wanted));
        if found {
            Ok(())
        } else {
            Err(VerificationError::RouteNotFound {
                family,
                table: table.unwrap_or("main").to_string(),
                route: route.to_string(),
                present,
            })
        }
    }

    /// Verify that no rule matching `selector` remains
    pub fn assert_no_rule(&self, family: AddressFamily, selector: &str) -> VerifyResult<()> {
        let wanted = RuleRecord::parse(selector)
            .map_err(|_| VerificationError::InvalidExpectation(selector.to_string()))?;
        let offending = self.kernel.rules(family).into_iter().find(|line| {
            RuleRecord::parse(line)
                .map(|r| r.matches(&wanted))
                .unwrap_or(false)
        });
        match offending {
            Some(rule) => Err(VerificationError::RulePresent {
                selector: selector.to_string(),
                rule,
            }),
            None => Ok(()),
        }
    }

    /// Verify that `command` was issued
    pub fn assert_issued(&self, command: &str) -> VerifyResult<()> {
        let issued = self.kernel.issued();
        if issued.iter().any(|c| c == command) {
            Ok(())
        } else {
            Err(VerificationError::CommandNotIssued {
                command: command.to_string(),
                issued,
            })
        }
    }

    /// Verify that no mutating command was issued
    pub fn assert_nothing_issued(&self) -> VerifyResult<()> {
        let issued = self.kernel.issued();
        if issued.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::UnexpectedCommands {
                count: issued.len(),
                issued,
            })
        }
    }

    /// Verify how many times `entry` appears in the registry file at `path`
    pub fn assert_registry_count(
        &self,
        path: &std::path::Path,
        entry: &str,
        expected: usize,
    ) -> VerifyResult<()> {
        let actual = self
            .kernel
            .file_lines(path)
            .iter()
            .filter(|line| sysvm_cfgmgr_common::registry_line_matches(line, entry))
            .count();
        if actual == expected {
            Ok(())
        } else {
            Err(VerificationError::RegistryCountMismatch {
                entry: entry.to_string(),
                expected,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_route_present() {
        let kernel = MockKernel::new().with_route(
            AddressFamily::V4,
            Some("Table_eth1"),
            "throw 10.0.2.0/24 proto static",
        );
        let verifier = KernelVerifier::new(&kernel);
        assert!(verifier
            .assert_route_present(AddressFamily::V4, Some("Table_eth1"), "throw 10.0.2.0/24")
            .is_ok());
        assert!(verifier
            .assert_route_present(AddressFamily::V4, None, "10.0.2.0/24")
            .is_err());
    }

    #[test]
    fn test_no_rule() {
        let kernel =
            MockKernel::new().with_rule(AddressFamily::V4, "32765:\tfrom all lookup Table_eth1");
        let verifier = KernelVerifier::new(&kernel);
        assert!(matches!(
            verifier.assert_no_rule(AddressFamily::V4, "from all lookup Table_eth1"),
            Err(VerificationError::RulePresent { .. })
        ));
        assert!(verifier
            .assert_no_rule(AddressFamily::V4, "from all lookup Table_eth2")
            .is_ok());
    }

    #[test]
    fn test_nothing_issued() {
        let kernel = MockKernel::new();
        assert!(KernelVerifier::new(&kernel).assert_nothing_issued().is_ok());
    }

    #[test]
    fn test_registry_count() {
        let path = Path::new("/etc/iproute2/rt_tables");
        let kernel = MockKernel::new().with_file(path, ["101 Table_eth1", "101\tTable_eth1"]);
        let verifier = KernelVerifier::new(&kernel);
        assert!(verifier.assert_registry_count(path, "101 Table_eth1", 2).is_ok());
        assert!(verifier.assert_registry_count(path, "102 Table_eth2", 0).is_ok());
    }

    #[test]
    fn test_invalid_expectation() {
        let kernel = MockKernel::new();
        assert!(matches!(
            KernelVerifier::new(&kernel).assert_route_present(AddressFamily::V4, None, ""),
            Err(VerificationError::InvalidExpectation(_))
        ));
    }
}
