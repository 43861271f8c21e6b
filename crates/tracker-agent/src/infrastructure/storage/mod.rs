//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory.
//! - Writing it back, e.g. to seed a first-run file with the defaults.
//! - Providing sensible defaults when the file does not exist yet.

pub mod config;
