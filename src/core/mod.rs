pub mod backlog;
pub mod distribution;
pub mod index;
pub mod project;
pub mod sponsors;
pub mod version;

pub use crate::utils::error::Result;
