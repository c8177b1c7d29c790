//! Sibyl Core - shared data structures, error handling, logging, and configuration
//!
//! Everything the engine and the CLI have in common lives here.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;
