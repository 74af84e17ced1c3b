//! Command implementations.

pub mod config;
#[cfg(feature = "google")]
pub mod serve;
pub mod state;
#[cfg(feature = "google")]
pub mod watch;
