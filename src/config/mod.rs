//! Survey Configuration Module
//!
//! One TOML file configures all three processes (trigger, upload, serve).
//!
//! ## Loading Order
//!
//! 1. `AEROSURVEY_CONFIG` environment variable (path to TOML file)
//! 2. `aerosurvey.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is passed explicitly to every task; command-line flags
//! are applied on top of it by the binaries before any task starts.

mod survey_config;
pub mod defaults;
pub mod validation;

pub use survey_config::*;
pub use validation::ValidationWarning;
