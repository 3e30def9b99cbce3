//! FrameCap Common Utilities
//!
//! Shared infrastructure for all FrameCap crates:
//! - Error types, result aliases, and recorder failure kinds
//! - Media timestamps and clock utilities
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
