//! The log pipeline: records stamped with the active span's ids, queued for
//! batched export.
//!
//! Correlation happens at emission time. If the current [`Context`] holds a
//! valid, still-recording span, its trace and span ids are copied onto the
//! record; otherwise the record ships uncorrelated rather than being held or
//! dropped.
//!
//! [`Context`]: crate::Context

use crate::export::LogExporter;
use crate::resource::Resource;
use crate::trace::{SpanId, TraceId};
use crate::{Context, KeyValue, TelemetryError, TelemetryResult};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

mod bridge;
mod log_processor;

pub use bridge::LogBridge;
pub use log_processor::{BatchLogProcessor, LogProcessor, SimpleLogProcessor};

/// Numeric log severity, aligned with the OTLP severity number ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Finest-grained detail.
    Trace = 1,
    /// Debugging detail.
    Debug = 5,
    /// Routine information.
    Info = 9,
    /// Something unexpected but recoverable.
    Warn = 13,
    /// A failure.
    Error = 17,
}

impl Severity {
    /// The OTLP severity number.
    pub fn severity_number(self) -> u32 {
        self as u32
    }

    /// The canonical uppercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    /// Maps a textual log level to a severity.
    ///
    /// Accepts the common aliases (`verbose` and `silly` map to trace);
    /// unknown levels fall back to info so no record is ever rejected over
    /// its level name.
    pub fn from_level(level: &str) -> Severity {
        match level.to_ascii_lowercase().as_str() {
            "error" => Severity::Error,
            "warn" => Severity::Warn,
            "info" => Severity::Info,
            "debug" => Severity::Debug,
            "trace" | "verbose" | "silly" => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

/// One emitted log record, as handed to processors and exporters.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// When the record was emitted.
    pub timestamp: SystemTime,
    /// The numeric severity.
    pub severity: Severity,
    /// The uppercase severity name.
    pub severity_text: Cow<'static, str>,
    /// The formatted message.
    pub body: String,
    /// Attributes, including the original `log.level`.
    pub attributes: Vec<KeyValue>,
    /// The correlated trace id, when a span was active at emission.
    pub trace_id: Option<TraceId>,
    /// The correlated span id, when a span was active at emission.
    pub span_id: Option<SpanId>,
}

impl LogRecord {
    /// Builds a record from a textual level and message body, timestamped
    /// now.
    ///
    /// The original level string is preserved as a `log.level` attribute;
    /// the severity text is its canonical uppercase form.
    pub fn new(level: &str, body: impl Into<String>) -> Self {
        let severity = Severity::from_level(level);
        LogRecord {
            timestamp: crate::now(),
            severity,
            severity_text: Cow::Borrowed(severity.as_str()),
            body: body.into(),
            attributes: vec![KeyValue::new("log.level", level.to_string())],
            trace_id: None,
            span_id: None,
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// Creates [`Logger`]s and owns the log processing pipeline.
#[derive(Clone, Debug)]
pub struct LoggerProvider {
    inner: Arc<LoggerProviderInner>,
}

#[derive(Debug)]
struct LoggerProviderInner {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Resource,
    is_shutdown: AtomicBool,
}

impl LoggerProvider {
    /// Creates a builder for a `LoggerProvider`.
    pub fn builder() -> LoggerProviderBuilder {
        LoggerProviderBuilder::default()
    }

    /// Returns a named [`Logger`] backed by this provider.
    pub fn logger(&self, scope: impl Into<Cow<'static, str>>) -> Logger {
        Logger {
            scope: scope.into(),
            provider: self.clone(),
        }
    }

    /// The resource describing this service instance.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    /// Flushes all registered processors.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.force_flush() {
                otel_warn!(name: "LoggerProvider.ForceFlushFailed", error = %err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Flushes and shuts down all registered processors. Idempotent.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.shutdown() {
                otel_warn!(name: "LoggerProvider.ShutdownFailed", error = %err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

/// Emits log records into the pipeline.
#[derive(Clone, Debug)]
pub struct Logger {
    scope: Cow<'static, str>,
    provider: LoggerProvider,
}

impl Logger {
    /// The instrumentation scope this logger reports under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Emits a record, stamping it with the active span's ids when one is
    /// recording.
    ///
    /// Never blocks and never fails; after provider shutdown, and inside
    /// suppressed scopes, records are discarded.
    pub fn emit(&self, mut record: LogRecord) {
        if self.provider.is_shutdown() {
            return;
        }
        let suppressed = Context::map_current(|cx| {
            if cx.is_telemetry_suppressed() {
                return true;
            }
            if record.trace_id.is_none() {
                let span = cx.span();
                let span_context = span.span_context();
                if span_context.is_valid() && span.is_recording() {
                    record.trace_id = Some(span_context.trace_id());
                    record.span_id = Some(span_context.span_id());
                }
            }
            false
        });
        if suppressed {
            return;
        }

        let processors = &self.provider.inner.processors;
        if let Some((last, rest)) = processors.split_last() {
            for processor in rest {
                processor.emit(record.clone());
            }
            last.emit(record);
        }
    }

    pub(crate) fn provider(&self) -> &LoggerProvider {
        &self.provider
    }
}

/// A builder for [`LoggerProvider`].
#[derive(Debug, Default)]
pub struct LoggerProviderBuilder {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Option<Resource>,
}

impl LoggerProviderBuilder {
    /// Adds a log processor to the pipeline.
    pub fn with_log_processor<P: LogProcessor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Adds a processor exporting each record synchronously. Intended for
    /// tests.
    pub fn with_simple_exporter<E: LogExporter + 'static>(self, exporter: E) -> Self {
        self.with_log_processor(SimpleLogProcessor::new(exporter))
    }

    /// Adds a processor exporting records in batches from a dedicated
    /// thread.
    pub fn with_batch_exporter<E: LogExporter + 'static>(self, exporter: E) -> Self {
        self.with_log_processor(BatchLogProcessor::builder(exporter).build())
    }

    /// Sets the resource attached to all exported records.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Builds the provider, pushing the resource into every processor.
    pub fn build(self) -> LoggerProvider {
        let resource = self.resource.unwrap_or_else(|| Resource::builder().build());
        let mut processors = self.processors;
        for processor in &mut processors {
            processor.set_resource(&resource);
        }
        LoggerProvider {
            inner: Arc::new(LoggerProviderInner {
                processors,
                resource,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryLogExporter, InMemorySpanExporter};
    use crate::trace::TracerProvider;

    fn test_pipeline() -> (LoggerProvider, InMemoryLogExporter) {
        let exporter = InMemoryLogExporter::default();
        let provider = LoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(Severity::from_level("error").severity_number(), 17);
        assert_eq!(Severity::from_level("WARN").severity_number(), 13);
        assert_eq!(Severity::from_level("info").severity_number(), 9);
        assert_eq!(Severity::from_level("debug").severity_number(), 5);
        assert_eq!(Severity::from_level("verbose").severity_number(), 1);
        assert_eq!(Severity::from_level("silly").severity_number(), 1);
        assert_eq!(Severity::from_level("whatever").severity_number(), 9);
    }

    #[test]
    fn record_carries_level_attribute() {
        let record = LogRecord::new("verbose", "hello");
        assert_eq!(record.severity_text, "TRACE");
        assert_eq!(record.attributes[0], KeyValue::new("log.level", "verbose"));
    }

    #[test]
    fn record_without_span_ships_uncorrelated() {
        let (provider, exporter) = test_pipeline();
        provider.logger("test").emit(LogRecord::new("info", "lonely"));

        let records = exporter.get_emitted_logs();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trace_id, None);
        assert_eq!(records[0].span_id, None);
    }

    #[test]
    fn record_inside_span_is_stamped() {
        let (provider, exporter) = test_pipeline();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(InMemorySpanExporter::default())
            .build();

        let span = tracer_provider.tracer("test").start("op");
        let span_context = *span.span_context();
        let cx = Context::current().with_span(span);
        let _guard = cx.attach();

        provider.logger("test").emit(LogRecord::new("info", "inside"));

        let records = exporter.get_emitted_logs();
        assert_eq!(records[0].trace_id, Some(span_context.trace_id()));
        assert_eq!(records[0].span_id, Some(span_context.span_id()));
    }

    #[test]
    fn record_after_span_end_is_not_stamped() {
        let (provider, exporter) = test_pipeline();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(InMemorySpanExporter::default())
            .build();

        let cx = Context::current().with_span(tracer_provider.tracer("test").start("op"));
        let _guard = cx.attach();
        Context::current().span().end();

        provider.logger("test").emit(LogRecord::new("info", "late"));
        assert_eq!(exporter.get_emitted_logs()[0].trace_id, None);
    }

    #[test]
    fn suppressed_scope_discards_records() {
        let (provider, exporter) = test_pipeline();
        {
            let _guard = Context::enter_telemetry_suppressed_scope();
            provider.logger("test").emit(LogRecord::new("info", "hidden"));
        }
        assert!(exporter.get_emitted_logs().is_empty());
    }

    #[test]
    fn shutdown_discards_further_records() {
        let (provider, exporter) = test_pipeline();
        provider.shutdown().unwrap();
        provider.logger("test").emit(LogRecord::new("info", "late"));
        assert!(exporter.get_emitted_logs().is_empty());
    }
}
