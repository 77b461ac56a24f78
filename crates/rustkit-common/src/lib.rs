//! # RustKit Common
//!
//! Logging configuration shared by the RustKit crates and tools.
//!
//! ## Features
//!
//! - `tracing-subscriber` setup with env filters
//! - Pretty, compact and JSON output
//! - Verbosity presets for command-line tools

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
