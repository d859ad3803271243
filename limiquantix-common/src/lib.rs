//! # limiquantix Common
//!
//! Shared utilities for the limiquantix tools.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use limiquantix_common::init_logging;
//!
//! // Initialize with level; RUST_LOG overrides it when set
//! init_logging("info")?;
//! tracing::info!("ready");
//! ```

pub mod logging;

// Re-export logging functions
pub use logging::{init_logging, init_logging_json, init_logging_with, LogFormat};
