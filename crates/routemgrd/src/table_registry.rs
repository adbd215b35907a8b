//! Table Registry - per-interface table allocation and registration

use std::path::{Path, PathBuf};

use sysvm_cfgmgr_common::{AddressFamily, CfgMgrResult, KernelRouting, RuleRecord};
use tracing::{debug, info, instrument};

use crate::commands::delete_table_rule_cmd;
use crate::tables::RT_TABLES_PATH;
use crate::types::RoutingTable;

/// Table Registry
///
/// Maps devices to their policy routing tables and keeps the table-name
/// registry file in step. Entries are only ever appended.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    rt_tables_path: PathBuf,
}

impl TableRegistry {
    pub fn new(rt_tables_path: impl Into<PathBuf>) -> Self {
        Self {
            rt_tables_path: rt_tables_path.into(),
        }
    }

    pub fn rt_tables_path(&self) -> &Path {
        &self.rt_tables_path
    }

    /// Register the table for `device`
    ///
    /// Appends `"<number> <name>"` to the registry unless already listed, then
    /// removes every `from all` rule that still sends traffic to the table.
    #[instrument(skip(self, kernel))]
    pub async fn register<K: KernelRouting + ?Sized>(
        &self,
        kernel: &K,
        device: &str,
    ) -> CfgMgrResult<RoutingTable> {
        let table = RoutingTable::for_device(device)?;
        let entry = table.registry_entry();

        if kernel.file_contains(&self.rt_tables_path, &entry).await? {
            debug!("Table {} already registered", table.name);
        } else {
            kernel.append_line(&self.rt_tables_path, &entry).await?;
            info!("Registered table {} ({})", table.name, table.number);
        }

        let stray: Vec<String> = kernel
            .list_rules(AddressFamily::V4)
            .await?
            .iter()
            .filter_map(|line| RuleRecord::parse(line).ok())
            .filter(|rule| rule.sends_all_to(&table.name, table.number))
            .filter_map(|rule| rule.lookup_table().map(str::to_string))
            .collect();

        for lookup in stray {
            kernel.apply(&delete_table_rule_cmd(&lookup)).await?;
            info!("Removed stray rule 'from all lookup {}'", lookup);
        }

        Ok(table)
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new(RT_TABLES_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sysvm_cfgmgr_common::CfgMgrError;
    use sysvm_cfgmgr_test::{pristine_kernel, KernelVerifier, MockKernel};

    #[tokio::test]
    async fn test_register_appends_once() {
        let kernel = pristine_kernel();
        let registry = TableRegistry::default();

        let table = registry.register(&kernel, "eth3").await.unwrap();
        assert_eq!(table.number, 103);
        assert_eq!(table.name, "Table_eth3");

        registry.register(&kernel, "eth3").await.unwrap();

        let verifier = KernelVerifier::new(&kernel);
        verifier
            .assert_registry_count(registry.rt_tables_path(), "103 Table_eth3", 1)
            .unwrap();
        verifier.assert_nothing_issued().unwrap();
    }

    #[tokio::test]
    async fn test_register_recognises_tab_separated_entry() {
        let kernel = MockKernel::new().with_file(RT_TABLES_PATH, ["101\tTable_eth1"]);
        TableRegistry::default().register(&kernel, "eth1").await.unwrap();
        assert_eq!(
            kernel.file_lines(Path::new(RT_TABLES_PATH)),
            vec!["101\tTable_eth1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_register_removes_stray_rules() {
        let kernel = pristine_kernel()
            .with_rule(AddressFamily::V4, "32764:\tfrom all lookup Table_eth1")
            .with_rule(AddressFamily::V4, "32763:\tfrom all lookup 101")
            .with_rule(AddressFamily::V4, "32762:\tfrom 10.0.2.0/24 lookup Table_eth1");

        TableRegistry::default().register(&kernel, "eth1").await.unwrap();

        assert_eq!(
            kernel.issued(),
            vec![
                "ip rule delete from all table Table_eth1".to_string(),
                "ip rule delete from all table 101".to_string(),
            ]
        );
        let verifier = KernelVerifier::new(&kernel);
        verifier
            .assert_no_rule(AddressFamily::V4, "from all lookup Table_eth1")
            .unwrap();
        // source-scoped rules are left alone
        assert!(kernel
            .rules(AddressFamily::V4)
            .iter()
            .any(|r| r.contains("from 10.0.2.0/24")));
    }

    #[tokio::test]
    async fn test_register_invalid_device() {
        let kernel = pristine_kernel();
        let err = TableRegistry::default().register(&kernel, "lo").await.unwrap_err();
        assert!(matches!(err, CfgMgrError::InvalidDeviceName { .. }));
        assert!(kernel.queries().is_empty());
    }

    #[tokio::test]
    async fn test_register_propagates_rule_delete_failure() {
        let kernel = pristine_kernel()
            .with_rule(AddressFamily::V4, "32764:\tfrom all lookup Table_eth1")
            .fail_on("rule delete");
        let err = TableRegistry::default().register(&kernel, "eth1").await.unwrap_err();
        assert!(err.is_command_failure());
    }
}
