//! Spans: recorded operations with attributes, events and an outcome.

use crate::trace::{Event, SpanContext, SpanId, SpanKind, Status, TracerProvider};
use crate::KeyValue;
use std::borrow::Cow;
use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

const EXCEPTION_EVENT_NAME: &str = "exception";
const EXCEPTION_MESSAGE_KEY: &str = "exception.message";
const DEADLINE_EVENT_NAME: &str = "deadline.exceeded";

/// Everything recorded about one finished span.
///
/// This is what span processors receive and exporters serialize.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// The span's identifying context.
    pub span_context: SpanContext,
    /// The parent span's id, if this span has an in-process parent.
    pub parent_span_id: Option<SpanId>,
    /// The operation name.
    pub name: Cow<'static, str>,
    /// The span's role in the request flow.
    pub kind: SpanKind,
    /// When the operation started.
    pub start_time: SystemTime,
    /// When the operation ended. Never earlier than `start_time`.
    pub end_time: SystemTime,
    /// Attributes describing the operation.
    pub attributes: Vec<KeyValue>,
    /// Timestamped annotations.
    pub events: Vec<Event>,
    /// The recorded outcome.
    pub status: Status,
}

/// A started, possibly recording, span.
///
/// Mutations after [`end`] are silently ignored, and a span ends at most
/// once: explicitly, or implicitly on drop.
///
/// [`end`]: Span::end
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanData>,
    deadline: Option<SystemTime>,
    provider: Option<TracerProvider>,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        data: SpanData,
        deadline: Option<SystemTime>,
        provider: TracerProvider,
    ) -> Self {
        Span {
            span_context,
            data: Some(data),
            deadline,
            provider: Some(provider),
        }
    }

    /// A span that records nothing and exports nothing.
    pub(crate) fn non_recording() -> Self {
        Span {
            span_context: SpanContext::NONE,
            data: None,
            deadline: None,
            provider: None,
        }
    }

    /// The span's identifying context.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Whether the span is still recording. False for suppressed spans and
    /// after `end`.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    fn with_data<T>(&mut self, f: impl FnOnce(&mut SpanData) -> T) -> Option<T> {
        self.data.as_mut().map(f)
    }

    /// Sets a single attribute, replacing nothing: duplicate keys are kept
    /// in recording order.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        self.with_data(|data| data.attributes.push(attribute));
    }

    /// Sets multiple attributes.
    pub fn set_attributes(&mut self, attributes: impl IntoIterator<Item = KeyValue>) {
        self.with_data(|data| data.attributes.extend(attributes));
    }

    /// Sets the span status. Has no effect unless the new status ranks above
    /// the current one in the `Ok > Error > Unset` order.
    pub fn set_status(&mut self, status: Status) {
        self.with_data(|data| {
            if status > data.status {
                data.status = status;
            }
        });
    }

    /// Adds a timestamped event.
    pub fn add_event(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) {
        let timestamp = crate::now();
        self.with_data(|data| data.events.push(Event::new(name, timestamp, attributes)));
    }

    /// Records an error as an `exception` event carrying its display message.
    ///
    /// Does not change the span status; callers decide the outcome.
    pub fn record_error(&mut self, err: &dyn std::error::Error) {
        let message = KeyValue::new(EXCEPTION_MESSAGE_KEY, err.to_string());
        self.add_event(EXCEPTION_EVENT_NAME, vec![message]);
    }

    /// Ends the span now. Later calls, and the implicit end on drop, are
    /// no-ops.
    pub fn end(&mut self) {
        self.end_at(crate::now());
    }

    /// Ends the span with an explicit end timestamp.
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) {
        self.end_at(timestamp);
    }

    fn end_at(&mut self, timestamp: SystemTime) {
        let provider = match self.provider.take() {
            Some(provider) => provider,
            None => return,
        };
        let mut data = match self.data.take() {
            Some(data) => data,
            None => return,
        };

        data.end_time = timestamp.max(data.start_time);

        if let Some(deadline) = self.deadline {
            if data.end_time > deadline {
                data.events
                    .push(Event::new(DEADLINE_EVENT_NAME, data.end_time, Vec::new()));
                if data.status == Status::Unset {
                    data.status = Status::error("deadline exceeded");
                }
            }
        }

        // Spans left Unset resolve from their own evidence on end.
        if data.status == Status::Unset {
            data.status = match exception_message(&data.events) {
                Some(message) => Status::error(message),
                None => Status::Ok,
            };
        }

        provider.export_finished_span(data);
    }
}

fn exception_message(events: &[Event]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|event| event.name == EXCEPTION_EVENT_NAME)
        .map(|event| {
            event
                .attributes
                .iter()
                .find(|kv| kv.key.as_str() == EXCEPTION_MESSAGE_KEY)
                .map(|kv| kv.value.as_string())
                .unwrap_or_default()
        })
}

impl Drop for Span {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("span_context", &self.span_context)
            .field("recording", &self.data.is_some())
            .finish()
    }
}

/// A span installed in a [`Context`], shareable across threads and clones of
/// the context.
///
/// [`Context`]: crate::Context
#[derive(Debug)]
pub struct ActiveSpan {
    span_context: SpanContext,
    inner: Option<Mutex<Span>>,
}

impl ActiveSpan {
    pub(crate) const fn noop() -> Self {
        ActiveSpan {
            span_context: SpanContext::NONE,
            inner: None,
        }
    }

    /// The span's identifying context.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    fn with_span<T>(&self, f: impl FnOnce(&mut Span) -> T) -> Option<T> {
        let inner = self.inner.as_ref()?;
        match inner.lock() {
            Ok(mut span) => Some(f(&mut span)),
            Err(_) => None,
        }
    }
}

impl From<Span> for ActiveSpan {
    fn from(span: Span) -> Self {
        ActiveSpan {
            span_context: *span.span_context(),
            inner: Some(Mutex::new(span)),
        }
    }
}

/// A borrowed handle to the span in a context.
///
/// All operations delegate to the underlying span and are no-ops on a no-op
/// or already-ended span.
#[derive(Debug)]
pub struct SpanRef<'a>(&'a ActiveSpan);

impl<'a> SpanRef<'a> {
    pub(crate) fn new(span: &'a ActiveSpan) -> Self {
        SpanRef(span)
    }

    /// The span's identifying context.
    pub fn span_context(&self) -> &SpanContext {
        self.0.span_context()
    }

    /// Whether the span is still recording.
    pub fn is_recording(&self) -> bool {
        self.0.with_span(|span| span.is_recording()).unwrap_or(false)
    }

    /// Sets a single attribute on the span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.0.with_span(|span| span.set_attribute(attribute));
    }

    /// Sets multiple attributes on the span.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        self.0.with_span(|span| span.set_attributes(attributes));
    }

    /// Sets the span status, subject to the status order.
    pub fn set_status(&self, status: Status) {
        self.0.with_span(|span| span.set_status(status));
    }

    /// Adds a timestamped event to the span.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.0.with_span(|span| span.add_event(name, attributes));
    }

    /// Records an error as an `exception` event.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        self.0.with_span(|span| span.record_error(err));
    }

    /// Ends the span.
    pub fn end(&self) {
        self.0.with_span(|span| span.end());
    }

    /// Ends the span with an explicit end timestamp.
    pub fn end_with_timestamp(&self, timestamp: SystemTime) {
        self.0.with_span(|span| span.end_with_timestamp(timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySpanExporter;
    use crate::trace::TracerProvider;
    use std::time::Duration;

    fn test_pipeline() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn end_exports_exactly_once() {
        let (provider, exporter) = test_pipeline();
        let mut span = provider.tracer("test").start("op");
        span.end();
        span.end();
        drop(span);
        assert_eq!(exporter.get_finished_spans().len(), 1);
    }

    #[test]
    fn drop_ends_implicitly() {
        let (provider, exporter) = test_pipeline();
        {
            let _span = provider.tracer("test").start("op");
        }
        let spans = exporter.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "op");
    }

    #[test]
    fn mutations_after_end_are_ignored() {
        let (provider, exporter) = test_pipeline();
        let mut span = provider.tracer("test").start("op");
        span.end();
        span.set_attribute(KeyValue::new("late", true));
        span.add_event("late", Vec::new());
        span.set_status(Status::error("late"));

        let spans = exporter.get_finished_spans();
        assert!(spans[0].attributes.is_empty());
        assert!(spans[0].events.is_empty());
        assert_eq!(spans[0].status, Status::Ok);
    }

    #[test]
    fn end_time_never_precedes_start_time() {
        let (provider, exporter) = test_pipeline();
        let mut span = provider.tracer("test").start("op");
        span.end_with_timestamp(SystemTime::UNIX_EPOCH);
        let spans = exporter.get_finished_spans();
        assert_eq!(spans[0].start_time, spans[0].end_time);
    }

    #[test]
    fn status_order_is_enforced() {
        let (provider, exporter) = test_pipeline();
        let mut span = provider.tracer("test").start("op");
        span.set_status(Status::error("first"));
        span.set_status(Status::Unset);
        span.set_status(Status::Ok);
        span.set_status(Status::error("after ok"));
        span.end();
        assert_eq!(exporter.get_finished_spans()[0].status, Status::Ok);
    }

    #[test]
    fn unset_status_resolves_from_exception_events() {
        let (provider, exporter) = test_pipeline();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");

        let mut failed = provider.tracer("test").start("failed");
        failed.record_error(&err);
        failed.end();

        let mut clean = provider.tracer("test").start("clean");
        clean.end();

        let spans = exporter.get_finished_spans();
        assert_eq!(spans[0].status, Status::error("boom"));
        assert_eq!(spans[0].events[0].name, "exception");
        assert_eq!(spans[1].status, Status::Ok);
    }

    #[test]
    fn missed_deadline_is_recorded() {
        let (provider, exporter) = test_pipeline();
        let start = crate::now();
        let mut span = provider
            .tracer("test")
            .span_builder("op")
            .with_start_time(start)
            .with_deadline(start + Duration::from_millis(10))
            .start();
        span.end_with_timestamp(start + Duration::from_secs(1));

        let spans = exporter.get_finished_spans();
        assert_eq!(spans[0].events[0].name, "deadline.exceeded");
        assert_eq!(spans[0].status, Status::error("deadline exceeded"));
    }

    #[test]
    fn met_deadline_leaves_span_clean() {
        let (provider, exporter) = test_pipeline();
        let start = crate::now();
        let mut span = provider
            .tracer("test")
            .span_builder("op")
            .with_start_time(start)
            .with_deadline(start + Duration::from_secs(60))
            .start();
        span.end_with_timestamp(start + Duration::from_millis(5));

        let spans = exporter.get_finished_spans();
        assert!(spans[0].events.is_empty());
        assert_eq!(spans[0].status, Status::Ok);
    }
}
