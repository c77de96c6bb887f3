//! # Busiloo Common
//!
//! Logging configuration and small helpers shared by the Busiloo offline worker crates.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};

/// Milliseconds since the Unix epoch. Clocks set before 1970 read as zero.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
