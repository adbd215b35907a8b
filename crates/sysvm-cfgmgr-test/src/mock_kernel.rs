//! Stateful fake of the kernel routing interface.
//!
//! [`MockKernel`] keeps routes, rules and registry files in memory and
//! applies commands to that state the way the kernel would, so tests can
//! assert on the resulting state as well as on the commands issued. All
//! clones share the same state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use sysvm_cfgmgr_common::{
    registry_line_matches, AddressFamily, CfgMgrError, CfgMgrResult, IpCommand, IpObject,
    KernelRouting, RouteRecord, RouteType, RuleRecord, Verb,
};

const MAIN_TABLE: &str = "main";

/// A route held by the fake kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRoute {
    pub family: AddressFamily,
    pub table: String,
    pub record: RouteRecord,
}

impl MockRoute {
    /// Renders the route as `ip route show` prints it, without the table.
    pub fn render(&self) -> String {
        let r = &self.record;
        let mut parts = Vec::new();
        if r.route_type == RouteType::Throw {
            parts.push("throw".to_string());
        }
        parts.push(r.destination.to_string());
        if let Some(via) = r.via {
            parts.push(format!("via {}", via));
        }
        if let Some(dev) = &r.dev {
            parts.push(format!("dev {}", dev));
        }
        if let Some(proto) = &r.proto {
            parts.push(format!("proto {}", proto));
        }
        if let Some(metric) = r.metric {
            parts.push(format!("metric {}", metric));
        }
        parts.join(" ")
    }
}

/// Everything the fake kernel knows about.
#[derive(Debug, Default)]
pub struct KernelState {
    pub routes: Vec<MockRoute>,
    pub rules: Vec<(AddressFamily, String)>,
    pub files: HashMap<PathBuf, Vec<String>>,
    /// Mutating commands in the order they were applied (including failures).
    pub issued: Vec<String>,
    /// Listing commands in the order they were run.
    pub queries: Vec<String>,
    /// Any issued command containing one of these fragments fails.
    pub fail_on: Vec<String>,
}

fn table_of(record: &RouteRecord) -> String {
    record
        .table
        .clone()
        .unwrap_or_else(|| MAIN_TABLE.to_string())
}

fn command_failed(command: &str, output: &str) -> CfgMgrError {
    CfgMgrError::ShellCommandFailed {
        command: command.to_string(),
        exit_code: 2,
        output: output.to_string(),
    }
}

fn invalid_clause(command: &str) -> CfgMgrError {
    command_failed(command, "Error: any valid prefix is expected rather than clause")
}

impl KernelState {
    fn apply_route(&mut self, command: &IpCommand, line: &str) -> CfgMgrResult<()> {
        if command.verb == Verb::Flush {
            if command.clause.first().map(String::as_str) == Some("table") {
                let table = command.clause.get(1).cloned().unwrap_or_default();
                self.routes
                    .retain(|r| !(r.family == command.family && r.table == table));
            }
            // `flush cache` has no visible effect
            return Ok(());
        }

        let record = RouteRecord::from_tokens(&command.clause).map_err(|_| invalid_clause(line))?;
        let table = table_of(&record);
        let family = command.family;
        let same_slot = |r: &MockRoute| {
            r.family == family
                && r.table == table
                && r.record.destination == record.destination
                && r.record.metric == record.metric
        };

        match command.verb {
            Verb::Add => {
                if self.routes.iter().any(same_slot) {
                    return Err(command_failed(line, "RTNETLINK answers: File exists"));
                }
                self.routes.push(MockRoute {
                    family,
                    table,
                    record,
                });
            }
            Verb::Change => {
                // installs when nothing occupies the slot
                let route = MockRoute {
                    family,
                    table: table.clone(),
                    record: record.clone(),
                };
                match self.routes.iter().position(same_slot) {
                    Some(idx) => self.routes[idx] = route,
                    None => self.routes.push(route),
                }
            }
            Verb::Delete => {
                let idx = self
                    .routes
                    .iter()
                    .position(|r| r.family == family && r.table == table && r.record.satisfies(&record))
                    .ok_or_else(|| command_failed(line, "RTNETLINK answers: No such process"))?;
                self.routes.remove(idx);
            }
            Verb::Flush => {}
        }
        Ok(())
    }

    fn apply_rule(&mut self, command: &IpCommand, line: &str) -> CfgMgrResult<()> {
        let wanted = RuleRecord::parse(&command.clause.join(" ")).map_err(|_| invalid_clause(line))?;
        match command.verb {
            Verb::Add => {
                let priority = 32765u32.saturating_sub(self.rules.len() as u32);
                self.rules
                    .push((command.family, format!("{}:\t{}", priority, command.clause.join(" "))));
                Ok(())
            }
            Verb::Delete => {
                let family = command.family;
                let idx = self
                    .rules
                    .iter()
                    .position(|(f, text)| {
                        *f == family
                            && RuleRecord::parse(text)
                                .map(|r| r.matches(&wanted))
                                .unwrap_or(false)
                    })
                    .ok_or_else(|| command_failed(line, "RTNETLINK answers: No such file or directory"))?;
                self.rules.remove(idx);
                Ok(())
            }
            Verb::Change | Verb::Flush => Err(invalid_clause(line)),
        }
    }
}

/// In-memory [`KernelRouting`] implementation for tests.
#[derive(Debug, Clone, Default)]
pub struct MockKernel {
    pub state: Arc<Mutex<KernelState>>,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        // a panicking test must not poison the remaining assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds a route. `table` of `None` means the main table.
    pub fn with_route(self, family: AddressFamily, table: Option<&str>, line: &str) -> Self {
        let record = RouteRecord::parse(line).expect("fixture route must parse");
        self.lock().routes.push(MockRoute {
            family,
            table: table.unwrap_or(MAIN_TABLE).to_string(),
            record,
        });
        self
    }

    /// Seeds a rule line as `ip rule show` prints it.
    pub fn with_rule(self, family: AddressFamily, line: &str) -> Self {
        self.lock().rules.push((family, line.to_string()));
        self
    }

    /// Seeds a file with the given lines.
    pub fn with_file<I, S>(self, path: impl Into<PathBuf>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .files
            .insert(path.into(), lines.into_iter().map(Into::into).collect());
        self
    }

    /// Makes every issued command containing `fragment` fail.
    pub fn fail_on(self, fragment: impl Into<String>) -> Self {
        self.lock().fail_on.push(fragment.into());
        self
    }

    /// Mutating commands issued so far.
    pub fn issued(&self) -> Vec<String> {
        self.lock().issued.clone()
    }

    /// Listing commands run so far.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Forgets the issued and query logs, keeping kernel state.
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.issued.clear();
        state.queries.clear();
    }

    /// Routes of `family` in `table` (`None` = main), rendered as `ip` prints them.
    pub fn routes(&self, family: AddressFamily, table: Option<&str>) -> Vec<String> {
        let table = table.unwrap_or(MAIN_TABLE);
        self.lock()
            .routes
            .iter()
            .filter(|r| r.family == family && r.table == table)
            .map(MockRoute::render)
            .collect()
    }

    /// Rule lines of `family`.
    pub fn rules(&self, family: AddressFamily) -> Vec<String> {
        self.lock()
            .rules
            .iter()
            .filter(|(f, _)| *f == family)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Lines of a seeded or appended file.
    pub fn file_lines(&self, path: &Path) -> Vec<String> {
        self.lock().files.get(path).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl KernelRouting for MockKernel {
    async fn list_routes(
        &self,
        family: AddressFamily,
        selector: &[String],
    ) -> CfgMgrResult<Vec<String>> {
        let mut state = self.lock();
        state.queries.push(format!(
            "ip {} route show {}",
            family.template().list_flag,
            selector.join(" ")
        ));

        if selector.is_empty() {
            return Ok(state
                .routes
                .iter()
                .filter(|r| r.family == family && r.table == MAIN_TABLE)
                .map(MockRoute::render)
                .collect());
        }

        let wanted = RouteRecord::from_tokens(selector)
            .map_err(|_| invalid_clause(&selector.join(" ")))?;
        let table = table_of(&wanted);
        Ok(state
            .routes
            .iter()
            .filter(|r| r.family == family && r.table == table && r.record.satisfies(&wanted))
            .map(MockRoute::render)
            .collect())
    }

    async fn list_rules(&self, family: AddressFamily) -> CfgMgrResult<Vec<String>> {
        let mut state = self.lock();
        state
            .queries
            .push(format!("ip {} rule show", family.template().list_flag));
        Ok(state
            .rules
            .iter()
            .filter(|(f, _)| *f == family)
            .map(|(_, line)| line.clone())
            .collect())
    }

    async fn apply(&self, command: &IpCommand) -> CfgMgrResult<()> {
        let line = command.to_string();
        let mut state = self.lock();
        state.issued.push(line.clone());

        if state.fail_on.iter().any(|f| line.contains(f.as_str())) {
            return Err(command_failed(&line, "RTNETLINK answers: Operation not permitted"));
        }

        match command.object {
            IpObject::Route => state.apply_route(command, &line),
            IpObject::Rule => state.apply_rule(command, &line),
        }
    }

    async fn file_contains(&self, path: &Path, entry: &str) -> CfgMgrResult<bool> {
        Ok(self
            .lock()
            .files
            .get(path)
            .map(|lines| lines.iter().any(|l| registry_line_matches(l, entry)))
            .unwrap_or(false))
    }

    async fn append_line(&self, path: &Path, entry: &str) -> CfgMgrResult<()> {
        self.lock()
            .files
            .entry(path.to_path_buf())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add(clause: &[&str]) -> IpCommand {
        IpCommand::route(AddressFamily::V4, Verb::Add, clause.iter().copied())
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let kernel = MockKernel::new();
        kernel
            .apply(&add(&["throw", "10.0.2.0/24", "table", "Table_eth1", "proto", "static"]))
            .await
            .unwrap();

        let selector: Vec<String> = ["10.0.2.0/24", "table", "Table_eth1", "proto", "static"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let lines = kernel.list_routes(AddressFamily::V4, &selector).await.unwrap();
        assert_eq!(lines, vec!["throw 10.0.2.0/24 proto static".to_string()]);

        // not visible from the main table
        let main: Vec<String> = vec!["10.0.2.0/24".to_string()];
        assert!(kernel.list_routes(AddressFamily::V4, &main).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_add_fails() {
        let kernel = MockKernel::new().with_route(AddressFamily::V4, None, "default via 10.0.0.1 dev eth0");
        let err = kernel
            .apply(&add(&["default", "via", "10.0.0.2"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File exists"));
        assert_eq!(kernel.issued(), vec!["ip route add default via 10.0.0.2".to_string()]);
    }

    #[tokio::test]
    async fn test_change_replaces_slot() {
        let kernel = MockKernel::new().with_route(AddressFamily::V4, None, "default via 10.0.0.1 dev eth0");
        kernel
            .apply(&IpCommand::route(AddressFamily::V4, Verb::Change, ["default", "via", "10.0.0.2"]))
            .await
            .unwrap();
        assert_eq!(
            kernel.routes(AddressFamily::V4, None),
            vec!["default via 10.0.0.2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rule_delete() {
        let kernel = MockKernel::new()
            .with_rule(AddressFamily::V4, "0:\tfrom all lookup local")
            .with_rule(AddressFamily::V4, "32765:\tfrom all lookup Table_eth1");
        kernel
            .apply(&IpCommand::rule(
                AddressFamily::V4,
                Verb::Delete,
                ["from", "all", "table", "Table_eth1"],
            ))
            .await
            .unwrap();
        assert_eq!(
            kernel.rules(AddressFamily::V4),
            vec!["0:\tfrom all lookup local".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fail_on() {
        let kernel = MockKernel::new().fail_on("route add");
        assert!(kernel.apply(&add(&["10.0.0.0/8", "dev", "eth0"])).await.is_err());
        assert!(kernel.routes(AddressFamily::V4, None).is_empty());
    }

    #[tokio::test]
    async fn test_files() {
        let path = PathBuf::from("/etc/iproute2/rt_tables");
        let kernel = MockKernel::new().with_file(&path, ["255\tlocal"]);
        assert!(kernel.file_contains(&path, "255 local").await.unwrap());
        kernel.append_line(&path, "101 Table_eth1").await.unwrap();
        assert_eq!(
            kernel.file_lines(&path),
            vec!["255\tlocal".to_string(), "101 Table_eth1".to_string()]
        );
    }
}
