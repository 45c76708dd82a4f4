// Application layer: wires the command line to the core operations.

pub mod commands;

pub use commands::{debug_info, run, Context};
