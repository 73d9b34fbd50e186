// Courier Core - Domain Logic, Ports & Worker Engine
// NO infrastructure dependencies (database and HTTP live in adapter crates)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
