//! Kernel routing interface.
//!
//! [`KernelRouting`] is the only path through which route and rule state is
//! observed or mutated. [`ShellKernel`] implements it with the `ip` command;
//! tests substitute a stateful fake.
//!
//! Address-family differences live in [`FamilyTemplate`] data rather than in
//! separate code paths.

use async_trait::async_trait;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::{CfgMgrError, CfgMgrResult};
use crate::shell::{self, shellquote, IP_CMD};

/// IP address family of a route or rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Per-family `ip` command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyTemplate {
    /// Flag used when listing routes and rules.
    pub list_flag: &'static str,
    /// Flag used when mutating; empty leaves the family implicit (inet).
    pub apply_flag: &'static str,
    /// Selector that matches the unqualified default route.
    pub default_selector: &'static str,
    /// Whether `throw` is dropped from lookup selectors. It is a route
    /// type, not part of the destination match.
    pub strips_throw: bool,
}

const V4_TEMPLATE: FamilyTemplate = FamilyTemplate {
    list_flag: "-4",
    apply_flag: "",
    default_selector: "0/0",
    strips_throw: true,
};

const V6_TEMPLATE: FamilyTemplate = FamilyTemplate {
    list_flag: "-6",
    apply_flag: "-6",
    default_selector: "default",
    strips_throw: false,
};

impl AddressFamily {
    /// Returns the command template for this family.
    pub fn template(&self) -> &'static FamilyTemplate {
        match self {
            AddressFamily::V4 => &V4_TEMPLATE,
            AddressFamily::V6 => &V6_TEMPLATE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object an `ip` command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpObject {
    Route,
    Rule,
}

impl IpObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpObject::Route => "route",
            IpObject::Rule => "rule",
        }
    }
}

/// Mutating `ip` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Change,
    Delete,
    Flush,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Add => "add",
            Verb::Change => "change",
            Verb::Delete => "delete",
            Verb::Flush => "flush",
        }
    }
}

/// A mutating `ip` command: family, object, verb and clause tokens.
///
/// Displays as the command line an operator would type, e.g.
/// `ip route add throw 10.0.2.0/24 table Table_eth1 proto static`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpCommand {
    pub family: AddressFamily,
    pub object: IpObject,
    pub verb: Verb,
    pub clause: Vec<String>,
}

impl IpCommand {
    pub fn new<I, S>(family: AddressFamily, object: IpObject, verb: Verb, clause: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            family,
            object,
            verb,
            clause: clause.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds an `ip route` command.
    pub fn route<I, S>(family: AddressFamily, verb: Verb, clause: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(family, IpObject::Route, verb, clause)
    }

    /// Builds an `ip rule` command.
    pub fn rule<I, S>(family: AddressFamily, verb: Verb, clause: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(family, IpObject::Rule, verb, clause)
    }

    /// Leading `ip` arguments: family flag, object and verb.
    fn head(&self) -> Vec<&'static str> {
        let flag = self.family.template().apply_flag;
        let mut head = Vec::with_capacity(3);
        if !flag.is_empty() {
            head.push(flag);
        }
        head.push(self.object.as_str());
        head.push(self.verb.as_str());
        head
    }

    /// Renders the command for `/bin/sh`, quoting every clause token.
    pub fn to_shell(&self, ip_cmd: &str) -> String {
        let mut parts = vec![ip_cmd.to_string()];
        parts.extend(self.head().into_iter().map(str::to_string));
        parts.extend(self.clause.iter().map(|t| shellquote(t)));
        parts.join(" ")
    }
}

impl fmt::Display for IpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ip {}", self.head().join(" "))?;
        for token in &self.clause {
            write!(f, " {}", token)?;
        }
        Ok(())
    }
}

/// Returns true if a registry line holds the same whitespace-separated
/// tokens as `entry`. Comment lines never match.
pub fn registry_line_matches(line: &str, entry: &str) -> bool {
    let line = line.trim_start();
    !line.starts_with('#') && line.split_whitespace().eq(entry.split_whitespace())
}

/// Observe-and-mutate access to kernel routing state.
///
/// Listing methods return the raw output lines; interpretation is left to
/// the caller. A non-zero exit status surfaces as
/// [`CfgMgrError::ShellCommandFailed`] and is never retried here.
#[async_trait]
pub trait KernelRouting: Send + Sync {
    /// Lists routes matching `selector` (`ip <family> route show <selector>`).
    async fn list_routes(
        &self,
        family: AddressFamily,
        selector: &[String],
    ) -> CfgMgrResult<Vec<String>>;

    /// Lists policy rules (`ip <family> rule show`).
    async fn list_rules(&self, family: AddressFamily) -> CfgMgrResult<Vec<String>>;

    /// Applies a mutating command.
    async fn apply(&self, command: &IpCommand) -> CfgMgrResult<()>;

    /// Returns true if `path` holds a line equal to `entry`.
    /// A missing file contains nothing.
    async fn file_contains(&self, path: &Path, entry: &str) -> CfgMgrResult<bool>;

    /// Appends `entry` as a new line to `path`.
    async fn append_line(&self, path: &Path, entry: &str) -> CfgMgrResult<()>;
}

/// [`KernelRouting`] backed by the `ip` binary and the local filesystem.
#[derive(Debug, Clone)]
pub struct ShellKernel {
    ip_cmd: String,
}

impl ShellKernel {
    pub fn new(ip_cmd: impl Into<String>) -> Self {
        Self {
            ip_cmd: ip_cmd.into(),
        }
    }

    pub fn ip_cmd(&self) -> &str {
        &self.ip_cmd
    }
}

impl Default for ShellKernel {
    fn default() -> Self {
        Self::new(IP_CMD)
    }
}

#[async_trait]
impl KernelRouting for ShellKernel {
    async fn list_routes(
        &self,
        family: AddressFamily,
        selector: &[String],
    ) -> CfgMgrResult<Vec<String>> {
        let mut cmd = format!("{} {} route show", self.ip_cmd, family.template().list_flag);
        for token in selector {
            cmd.push(' ');
            cmd.push_str(&shellquote(token));
        }
        Ok(shell::exec_or_throw(&cmd).await?.stdout_lines())
    }

    async fn list_rules(&self, family: AddressFamily) -> CfgMgrResult<Vec<String>> {
        let cmd = format!("{} {} rule show", self.ip_cmd, family.template().list_flag);
        Ok(shell::exec_or_throw(&cmd).await?.stdout_lines())
    }

    async fn apply(&self, command: &IpCommand) -> CfgMgrResult<()> {
        shell::exec_or_throw(&command.to_shell(&self.ip_cmd)).await?;
        Ok(())
    }

    async fn file_contains(&self, path: &Path, entry: &str) -> CfgMgrResult<bool> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(content
                .lines()
                .any(|line| registry_line_matches(line, entry))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CfgMgrError::file(path, e)),
        }
    }

    async fn append_line(&self, path: &Path, entry: &str) -> CfgMgrResult<()> {
        let needs_newline = match tokio::fs::read(path).await {
            Ok(content) => content.last().map(|b| *b != b'\n').unwrap_or(false),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(CfgMgrError::file(path, e)),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CfgMgrError::file(path, e))?;

        let mut line = String::with_capacity(entry.len() + 2);
        if needs_newline {
            line.push('\n');
        }
        line.push_str(entry);
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CfgMgrError::file(path, e))?;
        file.flush().await.map_err(|e| CfgMgrError::file(path, e))?;

        tracing::debug!(path = %path.display(), entry, "Appended registry entry");
        Ok(())
    }
}
