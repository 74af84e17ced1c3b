//! CLI, configuration, command implementations
//!
//! This crate provides the `mirrorsync` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::AppConfig;
pub use error::{CliError, CliResult};
