//! # blockstore Common
//!
//! Shared utilities for the blockstore components.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use blockstore_common::init_logging;
//!
//! init_logging("info")?;
//! tracing::info!(backend = "lvm", "Backend ready");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
