//! Exporter traits and the transport that delivers batches to a collector.
//!
//! Exporters are synchronous: they run on dedicated pipeline threads (or the
//! test thread), never on request paths. Delivery is at-most-once; a failed
//! batch is logged locally and dropped.

use crate::logs::LogRecord;
use crate::metrics::ResourceMetrics;
use crate::resource::Resource;
use crate::trace::SpanData;
use std::fmt;

pub(crate) mod batch;
pub mod otlp;

pub use batch::{BatchConfig, BatchConfigBuilder};

/// The result of an export attempt.
pub type ExportResult = crate::TelemetryResult<()>;

/// Sends batches of finished spans to a backend.
pub trait SpanExporter: Send + fmt::Debug {
    /// Exports a batch. Blocks until delivered, failed or timed out.
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult;

    /// Installs the resource attached to every exported batch.
    fn set_resource(&mut self, _resource: &Resource) {}

    /// Releases transport resources. No exports follow.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}

/// Sends batches of log records to a backend.
pub trait LogExporter: Send + fmt::Debug {
    /// Exports a batch. Blocks until delivered, failed or timed out.
    fn export(&mut self, batch: Vec<LogRecord>) -> ExportResult;

    /// Installs the resource attached to every exported batch.
    fn set_resource(&mut self, _resource: &Resource) {}

    /// Releases transport resources. No exports follow.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}

impl SpanExporter for Box<dyn SpanExporter> {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        self.as_mut().export(batch)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.as_mut().set_resource(resource);
    }

    fn shutdown(&mut self) -> ExportResult {
        self.as_mut().shutdown()
    }
}

impl LogExporter for Box<dyn LogExporter> {
    fn export(&mut self, batch: Vec<LogRecord>) -> ExportResult {
        self.as_mut().export(batch)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.as_mut().set_resource(resource);
    }

    fn shutdown(&mut self) -> ExportResult {
        self.as_mut().shutdown()
    }
}

/// Sends metric snapshots to a backend.
pub trait MetricsExporter: Send + fmt::Debug {
    /// Exports one collected snapshot.
    fn export(&mut self, metrics: &ResourceMetrics) -> ExportResult;

    /// Releases transport resources. No exports follow.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}
