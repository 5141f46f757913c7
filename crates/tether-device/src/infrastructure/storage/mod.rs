//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the device's TOML configuration file, fills
//! in defaults for anything missing, and can write the effective
//! configuration back out (useful for generating a starting file).

pub mod config;
