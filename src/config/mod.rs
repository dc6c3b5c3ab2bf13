//! Client configuration
//!
//! Configuration lives in a JSON file (see [`ConfigStore`]); every section is
//! `#[serde(default)]` so partial files are valid.

pub mod schema;
pub mod store;

pub use schema::*;
pub use store::ConfigStore;
