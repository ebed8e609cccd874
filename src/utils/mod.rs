//! # Utility Modules
//!
//! Supporting utilities shared across the protocol core.
//!
//! ## Components
//! - **Logging**: tracing subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
