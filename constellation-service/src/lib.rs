//! The constellation person service: a thin CRUD layer wired through the
//! telemetry pipeline.
//!
//! Every operation runs under a server-kind span, with client-kind children
//! around store calls and a producer-kind child around queue hand-off. Log
//! lines written through the `log` facade inside those operations are
//! correlated to the active span automatically.

pub mod config;
pub mod init;
pub mod person;
pub mod telemetry;

pub use config::ServiceConfig;
pub use init::TelemetryStack;
pub use telemetry::{SpanOptions, Telemetry};
