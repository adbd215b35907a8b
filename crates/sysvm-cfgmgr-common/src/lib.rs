//! Common infrastructure for the sysvm routing configuration tools.
//!
//! - [`shell`]: shell command execution with proper quoting
//! - [`kernel`]: the [`KernelRouting`] interface to routes, rules and the
//!   table-name registry, plus its `ip`-backed implementation
//! - [`parse`]: typed records for `ip route` / `ip rule` output
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use sysvm_cfgmgr_common::{AddressFamily, IpCommand, KernelRouting, ShellKernel, Verb};
//!
//! let kernel = ShellKernel::default();
//! let lines = kernel.list_routes(AddressFamily::V4, &["0/0".to_string()]).await?;
//! if lines.is_empty() {
//!     let cmd = IpCommand::route(AddressFamily::V4, Verb::Add, ["default", "via", "10.0.0.1"]);
//!     kernel.apply(&cmd).await?;
//! }
//! ```

pub mod error;
pub mod kernel;
pub mod parse;
pub mod shell;

pub use error::{CfgMgrError, CfgMgrResult};
pub use kernel::{
    registry_line_matches, AddressFamily, FamilyTemplate, IpCommand, IpObject, KernelRouting,
    ShellKernel, Verb,
};
pub use parse::{ParseError, RouteDestination, RouteRecord, RouteType, RuleAction, RuleRecord};
