//! Telemetry-correlated request pipeline for the constellation service.
//!
//! This crate implements the in-process signal pipeline a single service
//! instance needs: spans with ambient context propagation, log records
//! correlated to the active span, aggregated metric points, and batching
//! OTLP/HTTP exporters for all three signals.
//!
//! The building blocks are intentionally small:
//!
//! - [`Context`] carries the active span across call boundaries and async
//!   suspension points without explicit parameter threading.
//! - [`trace::TracerProvider`] / [`trace::Tracer`] create spans and hand
//!   finished spans to span processors.
//! - [`logs::Logger`] stamps every emitted record with the active span's
//!   trace/span ids before queueing it for export.
//! - [`metrics::MeterProvider`] aggregates counter/histogram points and
//!   exports them periodically.
//! - [`export::otlp`] sends batches to a collector over HTTP with gzip
//!   compression, bounded timeouts and bounded in-flight requests.

#![warn(missing_debug_implementations, unreachable_pub)]

#[macro_use]
mod internal_logs;

mod common;
mod context;
mod error;
mod resource;

pub mod export;
pub mod logs;
pub mod metrics;
pub mod testing;
pub mod trace;

pub use common::{Key, KeyValue, Value};
pub use context::{Context, ContextGuard, FutureContextExt, WithContext};
pub use error::{TelemetryError, TelemetryResult};
pub use resource::{Resource, ResourceBuilder};

#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, warn};
}

/// Returns the current time, as used for all span/log timestamps.
pub(crate) fn now() -> std::time::SystemTime {
    std::time::SystemTime::now()
}
