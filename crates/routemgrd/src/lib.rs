//! Policy routing manager for sysvm appliances
//!
//! Keeps per-interface routing tables, their policy rules and the default
//! routes in step with what the appliance configuration asks for. Each
//! operation inspects the kernel first and only mutates what differs, so
//! repeating a call is harmless.

pub mod config;
mod commands;
mod default_route;
mod route_mgr;
mod table_registry;
mod tables;
mod types;

pub use commands::*;
pub use config::{
    ApplianceConfig, ApplianceRole, DefaultRouteStrategy, RouteMgrConfig, RoutingConfig,
};
pub use default_route::DefaultRouteMgr;
pub use route_mgr::RouteMgr;
pub use table_registry::TableRegistry;
pub use tables::*;
pub use types::*;
