//! In-memory exporters for asserting on pipeline output in tests.

use crate::export::{ExportResult, LogExporter, MetricsExporter, SpanExporter};
use crate::logs::LogRecord;
use crate::metrics::ResourceMetrics;
use crate::resource::Resource;
use crate::trace::SpanData;
use crate::TelemetryError;
use std::sync::{Arc, Mutex};

/// A [`SpanExporter`] that collects finished spans in memory.
///
/// Clones share storage, so a clone kept by the test observes everything the
/// pipeline exports.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    resource: Arc<Mutex<Resource>>,
}

impl InMemorySpanExporter {
    /// All spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|spans| spans.clone()).unwrap_or_default()
    }

    /// The resource the pipeline installed.
    pub fn resource(&self) -> Resource {
        self.resource
            .lock()
            .map(|resource| resource.clone())
            .unwrap_or_default()
    }

    /// Discards all collected spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        self.spans.lock()?.extend(batch);
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut slot) = self.resource.lock() {
            *slot = resource.clone();
        }
    }
}

/// A [`LogExporter`] that collects emitted records in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogExporter {
    logs: Arc<Mutex<Vec<LogRecord>>>,
    resource: Arc<Mutex<Resource>>,
}

impl InMemoryLogExporter {
    /// All records exported so far, in export order.
    pub fn get_emitted_logs(&self) -> Vec<LogRecord> {
        self.logs.lock().map(|logs| logs.clone()).unwrap_or_default()
    }

    /// The resource the pipeline installed.
    pub fn resource(&self) -> Resource {
        self.resource
            .lock()
            .map(|resource| resource.clone())
            .unwrap_or_default()
    }

    /// Discards all collected records.
    pub fn reset(&self) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.clear();
        }
    }
}

impl LogExporter for InMemoryLogExporter {
    fn export(&mut self, batch: Vec<LogRecord>) -> ExportResult {
        self.logs.lock()?.extend(batch);
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut slot) = self.resource.lock() {
            *slot = resource.clone();
        }
    }
}

/// A [`MetricsExporter`] that collects snapshots in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsExporter {
    snapshots: Arc<Mutex<Vec<ResourceMetrics>>>,
}

impl InMemoryMetricsExporter {
    /// All snapshots exported so far, in export order.
    pub fn get_exported_snapshots(&self) -> Vec<ResourceMetrics> {
        self.snapshots
            .lock()
            .map(|snapshots| snapshots.clone())
            .unwrap_or_default()
    }

    /// Discards all collected snapshots.
    pub fn reset(&self) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.clear();
        }
    }
}

impl MetricsExporter for InMemoryMetricsExporter {
    fn export(&mut self, metrics: &ResourceMetrics) -> ExportResult {
        self.snapshots.lock()?.push(metrics.clone());
        Ok(())
    }
}

/// An exporter that fails every export, for exercising failure isolation.
#[derive(Clone, Debug, Default)]
pub struct FailingExporter;

impl SpanExporter for FailingExporter {
    fn export(&mut self, _batch: Vec<SpanData>) -> ExportResult {
        Err(TelemetryError::Export("collector unreachable".to_string()))
    }
}

impl LogExporter for FailingExporter {
    fn export(&mut self, _batch: Vec<LogRecord>) -> ExportResult {
        Err(TelemetryError::Export("collector unreachable".to_string()))
    }
}

impl MetricsExporter for FailingExporter {
    fn export(&mut self, _metrics: &ResourceMetrics) -> ExportResult {
        Err(TelemetryError::Export("collector unreachable".to_string()))
    }
}
