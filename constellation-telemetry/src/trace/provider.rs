use crate::export::SpanExporter;
use crate::resource::Resource;
use crate::trace::{
    BatchSpanProcessor, IdGenerator, RandomIdGenerator, SimpleSpanProcessor, SpanData,
    SpanProcessor, Tracer,
};
use crate::{TelemetryError, TelemetryResult};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Creates [`Tracer`]s and owns the span processing pipeline.
///
/// Cloning is cheap; all clones share the same processors, resource and
/// shutdown state. After [`shutdown`], tracers built from this provider
/// return non-recording spans.
///
/// [`shutdown`]: TracerProvider::shutdown
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<ProviderInner>,
}

#[derive(Debug)]
struct ProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    resource: Resource,
    id_generator: Box<dyn IdGenerator>,
    is_shutdown: AtomicBool,
}

impl TracerProvider {
    /// Creates a builder for a `TracerProvider`.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Returns a named [`Tracer`] backed by this provider.
    pub fn tracer(&self, scope: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer::new(scope.into(), self.clone())
    }

    /// The resource describing this service instance.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.inner.id_generator.as_ref()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    /// Hands a finished span to every registered processor.
    pub(crate) fn export_finished_span(&self, span: SpanData) {
        let processors = &self.inner.processors;
        if let Some((last, rest)) = processors.split_last() {
            for processor in rest {
                processor.on_end(span.clone());
            }
            last.on_end(span);
        }
    }

    /// Flushes all registered processors, blocking until each confirms or
    /// times out.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.force_flush() {
                otel_warn!(name: "TracerProvider.ForceFlushFailed", error = %err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Flushes and shuts down all registered processors. Idempotent; later
    /// calls return [`TelemetryError::AlreadyShutdown`].
    pub fn shutdown(&self) -> TelemetryResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.shutdown() {
                otel_warn!(name: "TracerProvider.ShutdownFailed", error = %err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

/// A builder for [`TracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    resource: Option<Resource>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl TracerProviderBuilder {
    /// Adds a span processor to the pipeline.
    pub fn with_span_processor<P: SpanProcessor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Adds a processor exporting each finished span synchronously, on the
    /// caller's thread. Intended for tests.
    pub fn with_simple_exporter<E: SpanExporter + 'static>(self, exporter: E) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(exporter))
    }

    /// Adds a processor exporting finished spans in batches from a dedicated
    /// thread.
    pub fn with_batch_exporter<E: SpanExporter + 'static>(self, exporter: E) -> Self {
        self.with_span_processor(BatchSpanProcessor::builder(exporter).build())
    }

    /// Sets the resource attached to all exported spans.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Overrides the id generator.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, id_generator: G) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Builds the provider, pushing the resource into every processor.
    pub fn build(self) -> TracerProvider {
        let resource = self.resource.unwrap_or_else(|| Resource::builder().build());
        let mut processors = self.processors;
        for processor in &mut processors {
            processor.set_resource(&resource);
        }
        TracerProvider {
            inner: Arc::new(ProviderInner {
                processors,
                resource,
                id_generator: self
                    .id_generator
                    .unwrap_or_else(|| Box::<RandomIdGenerator>::default()),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}
