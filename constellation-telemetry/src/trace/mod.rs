//! The tracing pipeline: span creation, in-flight mutation, and hand-off of
//! finished spans to processors.
//!
//! [`TracerProvider`] owns the processors and the shared [`Resource`];
//! [`Tracer`]s are cheap handles that build [`Span`]s. A started span becomes
//! the active span by installing it into a [`Context`]; downstream code
//! reaches it through [`get_active_span`] without any parameter threading.
//!
//! [`Resource`]: crate::Resource
//! [`Context`]: crate::Context

use crate::Context;
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

mod id_generator;
mod provider;
mod span;
mod span_processor;
mod tracer;

pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use span::{ActiveSpan, Span, SpanData, SpanRef};
pub use span_processor::{BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor};
pub use tracer::{SpanBuilder, Tracer};

/// A 16-byte trace identifier, shared by every span in one trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// The zero id, marking an absent or non-recording trace.
    pub const INVALID: TraceId = TraceId(0);

    /// Construct a `TraceId` from its representation as a `u128`.
    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    /// The id as a `u128`.
    pub const fn to_u128(self) -> u128 {
        self.0
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// An 8-byte span identifier, unique within its trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// The zero id, marking an absent or non-recording span.
    pub const INVALID: SpanId = SpanId(0);

    /// Construct a `SpanId` from its representation as a `u64`.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// The id as a `u64`.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The identifying part of a span: its trace id and span id.
///
/// Copied freely into log records and child spans; valid only when both ids
/// are non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    is_sampled: bool,
}

impl SpanContext {
    /// An invalid, empty span context.
    pub const NONE: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        is_sampled: false,
    };

    /// Construct a new, sampled `SpanContext`.
    pub const fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        SpanContext {
            trace_id,
            span_id,
            is_sampled: true,
        }
    }

    /// The trace id.
    pub const fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id.
    pub const fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Whether the span is recorded and exported.
    pub const fn is_sampled(&self) -> bool {
        self.is_sampled
    }

    /// Whether both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }
}

/// The role a span plays in a request flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Outgoing synchronous call.
    Client,
    /// Incoming synchronous call.
    Server,
    /// Message handed to a queue or broker.
    Producer,
    /// Message received from a queue or broker.
    Consumer,
    /// In-process operation.
    Internal,
}

/// The outcome of the operation a span describes.
///
/// Statuses form a total order `Ok > Error > Unset`; a span's status only
/// ever moves up this order, so a late `Ok` overrides an earlier error and
/// nothing overrides `Ok`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// No explicit outcome was recorded.
    #[default]
    Unset,
    /// The operation failed.
    Error {
        /// A developer-facing description of the failure.
        description: Cow<'static, str>,
    },
    /// The operation completed successfully.
    Ok,
}

impl Status {
    /// An error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// A timestamped annotation on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The event name.
    pub name: Cow<'static, str>,
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// Attributes describing the event.
    pub attributes: Vec<crate::KeyValue>,
}

impl Event {
    /// Construct a new `Event`.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        timestamp: SystemTime,
        attributes: Vec<crate::KeyValue>,
    ) -> Self {
        Event {
            name: name.into(),
            timestamp,
            attributes,
        }
    }
}

/// Executes a closure with a reference to the active span in the current
/// context.
///
/// When no span is active the closure still runs, against a no-op span, so
/// instrumentation never needs a fallback path.
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(SpanRef<'_>) -> T,
{
    // Works on a snapshot: the closure may end the span, which re-enters the
    // thread-local context through the processors' suppression scopes.
    let cx = Context::current();
    f(cx.span())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_hex_formatting() {
        assert_eq!(
            format!("{:x}", TraceId::from_u128(0x2a)),
            "0000000000000000000000000000002a"
        );
        assert_eq!(format!("{:x}", SpanId::from_u64(0x2a)), "000000000000002a");
    }

    #[test]
    fn span_context_validity() {
        assert!(!SpanContext::NONE.is_valid());
        assert!(!SpanContext::new(TraceId::from_u128(1), SpanId::INVALID).is_valid());
        assert!(!SpanContext::new(TraceId::INVALID, SpanId::from_u64(1)).is_valid());
        assert!(SpanContext::new(TraceId::from_u128(1), SpanId::from_u64(1)).is_valid());
    }

    #[test]
    fn status_total_order() {
        assert!(Status::Ok > Status::error("boom"));
        assert!(Status::error("boom") > Status::Unset);
        assert!(Status::Ok > Status::Unset);
    }
}
