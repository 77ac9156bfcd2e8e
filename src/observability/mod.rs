//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured log lines)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Function log stream (stdout, JSON in deployed functions)
//!     → Whatever metrics recorder the embedding runtime installs
//! ```
//!
//! # Design Decisions
//! - Each invocation runs inside a span carrying the request id
//! - Connection ids appear in log fields, never in metric labels

pub mod logging;
pub mod metrics;
