//! towerqa common library
//!
//! Configuration, API resource types and result oracles shared by the
//! towerqa harness and its suites.

pub mod config;
pub mod error;
pub mod sharding;
pub mod types;

pub use config::{QaConfig, UserCredentials};
pub use error::{Error, Result};
pub use sharding::{all_jobs_overlap, expected_shard_host_counts, JobWindow};
pub use types::*;

/// towerqa version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
