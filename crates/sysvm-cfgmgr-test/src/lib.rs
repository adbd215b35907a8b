//! Test infrastructure for the sysvm routing tools
//!
//! Provides:
//! - A stateful fake kernel ([`MockKernel`]) implementing `KernelRouting`
//! - Fixtures for a freshly booted appliance and sample configurations
//! - Verification helpers over kernel state and issued commands

pub mod fixtures;
mod mock_kernel;
mod verification;

pub use fixtures::*;
pub use mock_kernel::{KernelState, MockKernel, MockRoute};
pub use verification::*;
