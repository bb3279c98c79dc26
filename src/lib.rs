//! Envoy Harness Library
//!
//! Provisions envoy for control-plane integration tests: resolve a binary,
//! render a bootstrap, launch a process or container, clean up afterwards.
//! The operator CLI entry point is in main.rs.
//!
//! ```no_run
//! use envoy_harness::{Cleanup, EnvoyFactory};
//!
//! # fn main() -> envoy_harness::Result<()> {
//! let mut factory = EnvoyFactory::from_env()?;
//! let mut envoy = factory.new_instance()?;
//! envoy.run_with_port(9901)?;
//! // ... exercise the control plane ...
//! envoy.clean()?;
//! factory.clean()?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bootstrap;
pub mod config;
pub mod docker;
pub mod error;
pub mod factory;
pub mod instance;
pub mod lifecycle;
pub mod logcapture;
pub mod logging;
pub mod provider;
pub mod reporter;
pub mod signals;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use factory::EnvoyFactory;
pub use instance::{EnvoyInstance, InstanceState};
pub use lifecycle::Cleanup;
pub use provider::BinaryProvider;
