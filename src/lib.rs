pub mod adapters;
#[cfg(feature = "cli")]
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::Cli;
pub use config::Config;

pub use adapters::{github::GitHub, polar::Polar};
pub use core::index::Index;
pub use utils::error::{InsidersError, Result};
