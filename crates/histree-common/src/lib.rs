//! Shared utilities for histree crates
//!
//! Currently this is the logging bootstrap used by binaries and test
//! harnesses, and a helper for rendering error cause chains.

pub mod logging;

pub use logging::{format_error, init, LogLevel, LogOptions};
