//! Configuration for droidwalk
//!
//! Supports `.droidwalk/config.toml` in the working directory. Every field
//! is optional; missing values take the tool's built-in defaults.

pub mod settings;
pub mod types;

pub use settings::{config_path, load_settings};
pub use types::*;
