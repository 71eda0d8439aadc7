//! Daemon configuration
//!
//! Loaded from `fleet.toml`. A missing file means defaults; `FLEET_*`
//! environment variables override individual keys.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_fleet_toml, parse_fleet_toml_str, to_toml};
pub use schema::{ApmConfig, DaemonConfig};
pub use store::ConfigStore;
