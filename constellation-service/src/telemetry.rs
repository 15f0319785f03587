//! The async-first telemetry facade used by service code.
//!
//! [`Telemetry::with_span`] wraps a future in a span: the span is active for
//! every poll of the future, ends exactly once, and carries the outcome.
//! Errors are recorded and re-raised unchanged; instrumentation never alters
//! control flow.

use constellation_telemetry::trace::{get_active_span, SpanKind, Status, Tracer};
use constellation_telemetry::{Context, FutureContextExt, KeyValue};
use std::borrow::Cow;
use std::future::Future;
use std::time::SystemTime;

/// Per-span settings for [`Telemetry::with_span`].
#[derive(Clone, Debug)]
pub struct SpanOptions {
    /// The span kind. Defaults to internal.
    pub kind: SpanKind,
    /// Initial attributes.
    pub attributes: Vec<KeyValue>,
    /// Optional deadline; exceeding it marks the span on end.
    pub deadline: Option<SystemTime>,
}

impl Default for SpanOptions {
    fn default() -> Self {
        SpanOptions {
            kind: SpanKind::Internal,
            attributes: Vec::new(),
            deadline: None,
        }
    }
}

impl SpanOptions {
    /// Options for a span of the given kind.
    pub fn of_kind(kind: SpanKind) -> Self {
        SpanOptions {
            kind,
            ..SpanOptions::default()
        }
    }

    /// Adds an initial attribute.
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Sets the deadline.
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A cheap, cloneable handle for instrumenting service operations.
#[derive(Clone, Debug)]
pub struct Telemetry {
    tracer: Tracer,
}

impl Telemetry {
    /// Creates a facade over `tracer`.
    pub fn new(tracer: Tracer) -> Self {
        Telemetry { tracer }
    }

    /// Runs `fut` under a new span.
    ///
    /// The span parents onto the caller's active span, becomes the active
    /// span for the duration of the future, and ends when the future
    /// resolves. On `Err` the error is recorded as an exception event and
    /// the status set to error; the result is returned unchanged either way.
    pub async fn with_span<F, T, E>(
        &self,
        name: impl Into<Cow<'static, str>>,
        options: SpanOptions,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let mut builder = self
            .tracer
            .span_builder(name)
            .with_kind(options.kind)
            .with_attributes(options.attributes);
        if let Some(deadline) = options.deadline {
            builder = builder.with_deadline(deadline);
        }

        let cx = Context::current().with_span(builder.start());
        let result = fut.with_context(cx.clone()).await;

        let span = cx.span();
        if let Err(err) = &result {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
        span.end();
        result
    }

    /// Adds attributes to the caller's active span, if any.
    pub fn add_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        get_active_span(|span| span.set_attributes(attributes));
    }

    /// Adds an event to the caller's active span, if any.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        get_active_span(|span| span.add_event(name, attributes));
    }

    /// Records an error on the caller's active span, if any.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        get_active_span(|span| span.record_error(err));
    }
}
