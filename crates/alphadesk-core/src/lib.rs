//! Alphadesk Core
//!
//! Core types, errors, and configuration for the alphadesk trading pipeline.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use types::*;
