use crate::export::batch::{BatchConfig, BatchProcessor};
use crate::export::LogExporter;
use crate::logs::LogRecord;
use crate::resource::Resource;
use crate::{Context, TelemetryResult};
use std::fmt;
use std::sync::Mutex;

/// Receives every emitted log record from the provider.
pub trait LogProcessor: Send + Sync + fmt::Debug {
    /// Called for each emitted record. Must not block the emitting thread.
    fn emit(&self, record: LogRecord);

    /// Exports all buffered records, blocking until done or timed out.
    fn force_flush(&self) -> TelemetryResult<()>;

    /// Flushes and releases resources. Further records are discarded.
    fn shutdown(&self) -> TelemetryResult<()>;

    /// Installs the provider's resource before the pipeline starts.
    fn set_resource(&mut self, resource: &Resource);
}

/// Exports each record synchronously on the emitting thread. Used in tests.
#[derive(Debug)]
pub struct SimpleLogProcessor {
    exporter: Mutex<Box<dyn LogExporter>>,
}

impl SimpleLogProcessor {
    /// Creates a simple processor around `exporter`.
    pub fn new<E: LogExporter + 'static>(exporter: E) -> Self {
        SimpleLogProcessor {
            exporter: Mutex::new(Box::new(exporter)),
        }
    }
}

impl LogProcessor for SimpleLogProcessor {
    fn emit(&self, record: LogRecord) {
        let _suppress = Context::enter_telemetry_suppressed_scope();
        let result = self
            .exporter
            .lock()
            .map_err(crate::TelemetryError::from)
            .and_then(|mut exporter| exporter.export(vec![record]));
        if let Err(err) = result {
            otel_warn!(name: "SimpleLogProcessor.ExportFailed", error = %err);
        }
    }

    fn force_flush(&self) -> TelemetryResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TelemetryResult<()> {
        let mut exporter = self.exporter.lock()?;
        exporter.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.set_resource(resource);
        }
    }
}

/// Queues records and exports them in batches from a dedicated thread.
///
/// `emit` never blocks: when the queue is full the record is dropped and a
/// warning is logged once.
#[derive(Debug)]
pub struct BatchLogProcessor {
    inner: BatchProcessor<LogRecord>,
}

impl BatchLogProcessor {
    /// Creates a builder for a `BatchLogProcessor`.
    pub fn builder<E: LogExporter + 'static>(exporter: E) -> BatchLogProcessorBuilder {
        BatchLogProcessorBuilder {
            exporter: Box::new(exporter),
            config: BatchConfig::default(),
        }
    }
}

impl LogProcessor for BatchLogProcessor {
    fn emit(&self, record: LogRecord) {
        self.inner.append(record);
    }

    fn force_flush(&self) -> TelemetryResult<()> {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> TelemetryResult<()> {
        self.inner.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// A builder for [`BatchLogProcessor`].
#[derive(Debug)]
pub struct BatchLogProcessorBuilder {
    exporter: Box<dyn LogExporter>,
    config: BatchConfig,
}

impl BatchLogProcessorBuilder {
    /// Overrides the batching configuration.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the processor, spawning its export thread.
    pub fn build(self) -> BatchLogProcessor {
        BatchLogProcessor {
            inner: BatchProcessor::spawn("logs", self.exporter, self.config),
        }
    }
}
