//! CROCUS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the CROCUS data pipeline crates.
//!
//! # Overview
//!
//! - **Error Handling**: Common error and result types
//! - **Logging**: Console and per-run log file setup on top of `tracing`
//! - **Time**: Injectable clock and UTC day parsing for job windows
//!
//! # Example
//!
//! ```no_run
//! use crocus_common::time::{parse_day, Clock, SystemClock};
//!
//! fn main() -> crocus_common::Result<()> {
//!     let start = parse_day("2025-05-09T00:00:00Z")?;
//!     let today = SystemClock.today();
//!     assert!(start <= today);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{CrocusError, Result};
