//! Configuration
//!
//! `AppConfig` is read from a TOML file; every section falls back to its
//! defaults when absent.

pub mod schema;
pub mod store;

pub use schema::*;
pub use store::ConfigStore;
