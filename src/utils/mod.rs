pub mod error;
pub mod logger;
pub mod process;
pub mod table;
pub mod validation;
