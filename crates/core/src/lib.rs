//! Core utilities shared by the framepace crates.
//!
//! - Error types for the platform and application layers
//! - Logging initialization

mod error;
mod logging;

pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging, try_init_logging};
