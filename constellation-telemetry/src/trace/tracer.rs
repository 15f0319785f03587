use crate::trace::{Span, SpanContext, SpanData, SpanKind, Status, TracerProvider};
use crate::{Context, KeyValue};
use std::borrow::Cow;
use std::time::SystemTime;

/// Creates spans on behalf of one instrumentation scope.
///
/// Cheap to clone; holds only a scope name and a provider handle.
#[derive(Clone, Debug)]
pub struct Tracer {
    scope: Cow<'static, str>,
    provider: TracerProvider,
}

impl Tracer {
    pub(crate) fn new(scope: Cow<'static, str>, provider: TracerProvider) -> Self {
        Tracer { scope, provider }
    }

    /// The instrumentation scope this tracer reports under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Starts a span with defaults: internal kind, current time, parent from
    /// the current context.
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.span_builder(name).start()
    }

    /// Returns a builder for a span with non-default settings.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder {
            tracer: self.clone(),
            name: name.into(),
            kind: SpanKind::Internal,
            attributes: Vec::new(),
            deadline: None,
            start_time: None,
        }
    }

    fn build_with_context(&self, builder: SpanBuilder, parent: &Context) -> Span {
        if self.provider.is_shutdown() || parent.is_telemetry_suppressed() {
            return Span::non_recording();
        }

        let id_generator = self.provider.id_generator();
        let parent_span_context = parent
            .span
            .as_ref()
            .map(|span| *span.span_context())
            .filter(SpanContext::is_valid);

        // Children share the parent's trace; roots open a new one.
        let trace_id = match parent_span_context {
            Some(parent_cx) => parent_cx.trace_id(),
            None => id_generator.new_trace_id(),
        };
        let span_context = SpanContext::new(trace_id, id_generator.new_span_id());

        let data = SpanData {
            span_context,
            parent_span_id: parent_span_context.map(|cx| cx.span_id()),
            name: builder.name,
            kind: builder.kind,
            start_time: builder.start_time.unwrap_or_else(crate::now),
            end_time: SystemTime::UNIX_EPOCH,
            attributes: builder.attributes,
            events: Vec::new(),
            status: Status::Unset,
        };

        Span::new(span_context, data, builder.deadline, self.provider.clone())
    }
}

/// Configures a span before it starts.
#[derive(Debug)]
pub struct SpanBuilder {
    tracer: Tracer,
    name: Cow<'static, str>,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
    deadline: Option<SystemTime>,
    start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// Sets the span kind.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets initial attributes.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Sets a deadline. A span ending past its deadline records a
    /// `deadline.exceeded` event, and an error status if none was set.
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Overrides the start timestamp.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Starts the span, parented to the current context's span if one is
    /// active.
    pub fn start(self) -> Span {
        Context::map_current(|parent| {
            let tracer = self.tracer.clone();
            tracer.build_with_context(self, parent)
        })
    }

    /// Starts the span with an explicit parent context.
    pub fn start_with_context(self, parent: &Context) -> Span {
        let tracer = self.tracer.clone();
        tracer.build_with_context(self, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySpanExporter;
    use crate::trace::TraceId;

    fn test_pipeline() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn root_span_opens_a_new_trace() {
        let (provider, exporter) = test_pipeline();
        provider.tracer("test").start("root").end();

        let spans = exporter.get_finished_spans();
        assert_ne!(spans[0].span_context.trace_id(), TraceId::INVALID);
        assert_eq!(spans[0].parent_span_id, None);
    }

    #[test]
    fn child_inherits_trace_and_parent_ids() {
        let (provider, exporter) = test_pipeline();
        let tracer = provider.tracer("test");

        let root = tracer.start("root");
        let root_cx = *root.span_context();
        let cx = Context::current().with_span(root);
        let _guard = cx.attach();

        tracer.start("child").end();
        Context::current().span().end();

        let spans = exporter.get_finished_spans();
        let child = spans.iter().find(|s| s.name == "child").unwrap();
        assert_eq!(child.span_context.trace_id(), root_cx.trace_id());
        assert_eq!(child.parent_span_id, Some(root_cx.span_id()));
        assert_ne!(child.span_context.span_id(), root_cx.span_id());
    }

    #[test]
    fn explicit_parent_context_wins() {
        let (provider, exporter) = test_pipeline();
        let tracer = provider.tracer("test");

        let root = tracer.start("root");
        let root_cx = *root.span_context();
        let parent = Context::new().with_span(root);

        tracer
            .span_builder("child")
            .start_with_context(&parent)
            .end();
        parent.span().end();

        let spans = exporter.get_finished_spans();
        let child = spans.iter().find(|s| s.name == "child").unwrap();
        assert_eq!(child.parent_span_id, Some(root_cx.span_id()));
    }

    #[test]
    fn suppressed_scope_yields_non_recording_spans() {
        let (provider, exporter) = test_pipeline();
        let _guard = Context::enter_telemetry_suppressed_scope();
        let mut span = provider.tracer("test").start("suppressed");
        assert!(!span.is_recording());
        span.end();
        assert!(exporter.get_finished_spans().is_empty());
    }

    #[test]
    fn builder_settings_are_recorded() {
        let (provider, exporter) = test_pipeline();
        provider
            .tracer("test")
            .span_builder("op")
            .with_kind(SpanKind::Server)
            .with_attributes([KeyValue::new("endpoint", "/person")])
            .start()
            .end();

        let spans = exporter.get_finished_spans();
        assert_eq!(spans[0].kind, SpanKind::Server);
        assert_eq!(spans[0].attributes[0], KeyValue::new("endpoint", "/person"));
    }
}
