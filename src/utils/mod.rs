//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and timekeeping.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by [`crate::config::LoggingConfig`]
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Game clock used for latency timestamps and receipt diagnostics

pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};
pub use time::{GameClock, ManualClock, SystemGameClock};
