//! Configuration module for assetline
//!
//! Provides types and parsing for `assetline.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::{default_config, find_config, load_config, ConfigError, CONFIG_FILENAME};
pub use schema::*;
