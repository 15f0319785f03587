//! Execution-scoped context propagation.
//!
//! A [`Context`] carries the active span (and a telemetry-suppression flag)
//! across API boundaries within one logical operation. Contexts are
//! immutable; installing one for the current scope returns a guard that
//! restores the previous context exactly once when dropped.
//!
//! For async code, [`FutureContextExt::with_context`] wraps a future so the
//! context is re-attached around every poll, keeping the association correct
//! across suspension points and across worker threads.

use crate::trace::{ActiveSpan, Span, SpanRef};
use pin_project_lite::pin_project;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context as TaskContext;
use std::task::Poll;

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

static NOOP_SPAN: ActiveSpan = ActiveSpan::noop();

/// An execution-scoped value carrying the active span.
///
/// Each logical operation has an independent, isolated active-span slot:
/// concurrent operations never observe each other's context. Nested
/// [`attach`] calls are temporary overrides restored in LIFO order.
///
/// [`attach`]: Context::attach
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) span: Option<Arc<ActiveSpan>>,
    suppress_telemetry: bool,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(Clone::clone)
    }

    /// Applies a function to the current context without cloning it.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&cx.borrow().current))
    }

    /// Returns a copy of this context with `span` installed as active.
    pub fn with_span(&self, span: Span) -> Self {
        Context {
            span: Some(Arc::new(ActiveSpan::from(span))),
            suppress_telemetry: self.suppress_telemetry,
        }
    }

    /// Returns a clone of the current context with `span` installed as active.
    pub fn current_with_span(span: Span) -> Self {
        Self::map_current(|cx| cx.with_span(span))
    }

    /// Returns a reference to this context's span, or a no-op span if none
    /// has been installed.
    pub fn span(&self) -> SpanRef<'_> {
        match self.span.as_ref() {
            Some(span) => SpanRef::new(span),
            None => SpanRef::new(&NOOP_SPAN),
        }
    }

    /// Returns whether a span has been installed in this context.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// Installs this context as current, returning a guard that restores the
    /// previous context when dropped.
    ///
    /// The restore happens exactly once, even if the scope unwinds.
    pub fn attach(self) -> ContextGuard {
        let pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));
        ContextGuard {
            pos,
            _not_send: PhantomData,
        }
    }

    /// Returns whether telemetry emission is suppressed in this context.
    #[inline]
    pub fn is_telemetry_suppressed(&self) -> bool {
        self.suppress_telemetry
    }

    /// Returns whether telemetry emission is suppressed in the current
    /// context.
    #[inline]
    pub fn is_current_telemetry_suppressed() -> bool {
        Self::map_current(|cx| cx.suppress_telemetry)
    }

    /// Enters a scope in which the pipeline's own work does not generate new
    /// telemetry. Used by exporter threads to avoid telemetry-induced
    /// telemetry loops.
    pub fn enter_telemetry_suppressed_scope() -> ContextGuard {
        Self::map_current(|cx| Context {
            span: cx.span.clone(),
            suppress_telemetry: true,
        })
        .attach()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Context");
        match &self.span {
            Some(span) => dbg.field("span", span.span_context()),
            None => dbg.field("span", &"None"),
        };
        dbg.field("suppress_telemetry", &self.suppress_telemetry)
            .finish()
    }
}

/// A guard that restores the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    /// Position of the replaced context in the per-thread stack.
    pos: usize,
    /// Relies on thread locals, so must not cross threads.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|cx| cx.borrow_mut().pop(self.pos));
    }
}

/// Per-thread stack of attached contexts.
///
/// Guards carry the position of the context they replaced, which allows
/// out-of-order drops: dropping a guard below the top marks its slot as
/// vacated without disturbing the current context, and the vacated slots are
/// reclaimed when the top is popped.
struct ContextStack {
    current: Context,
    stack: Vec<Option<Context>>,
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current: Context::default(),
            stack: Vec::with_capacity(8),
        }
    }
}

impl ContextStack {
    fn push(&mut self, cx: Context) -> usize {
        // Position 0 is the base context and is never popped; the first
        // pushed context gets position 1.
        let pos = self.stack.len() + 1;
        let previous = std::mem::replace(&mut self.current, cx);
        self.stack.push(Some(previous));
        pos
    }

    fn pop(&mut self, pos: usize) {
        if pos == 0 || pos > self.stack.len() {
            otel_warn!(
                name: "Context.PopOutOfBounds",
                position = pos,
                stack_length = self.stack.len()
            );
            return;
        }
        if pos == self.stack.len() {
            // Top of the stack: restore, then reclaim any slots vacated by
            // earlier out-of-order drops.
            if let Some(Some(previous)) = self.stack.pop() {
                self.current = previous;
            }
            while let Some(None) = self.stack.last() {
                let _ = self.stack.pop();
            }
        } else {
            // Out-of-order drop: vacate the slot, keep the current context.
            let _ = self.stack[pos].take();
        }
    }
}

pin_project! {
    /// A future with an associated telemetry [`Context`].
    ///
    /// The context is attached for the duration of every `poll`, so any code
    /// the future runs, on whichever thread it resumes, observes it as
    /// current.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        this.inner.poll(task_cx)
    }
}

impl<F: std::future::Future> FutureContextExt for F {}

/// Extension trait attaching a telemetry [`Context`] to futures.
pub trait FutureContextExt: Sized {
    /// Attaches the provided [`Context`] to this future.
    ///
    /// The attached context is set as current while the future is polled.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this future.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(Context::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TracerProvider;

    fn named_span(name: &'static str) -> Span {
        let provider = TracerProvider::builder().build();
        provider.tracer("test").span_builder(name).start()
    }

    #[test]
    fn empty_current_context_has_no_span() {
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn attach_and_restore() {
        let cx = Context::new().with_span(named_span("outer"));
        let outer_id = cx.span().span_context().span_id();
        {
            let _guard = cx.attach();
            assert!(Context::current().has_active_span());
            assert_eq!(Context::current().span().span_context().span_id(), outer_id);
        }
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn nested_attach_restores_lifo() {
        let outer = Context::new().with_span(named_span("outer"));
        let outer_id = outer.span().span_context().span_id();
        let _outer_guard = outer.attach();

        let inner = Context::current_with_span(named_span("inner"));
        let inner_id = inner.span().span_context().span_id();
        {
            let _inner_guard = inner.attach();
            assert_eq!(Context::current().span().span_context().span_id(), inner_id);
        }
        assert_eq!(Context::current().span().span_context().span_id(), outer_id);
    }

    #[test]
    fn out_of_order_guard_drop_does_not_corrupt_stack() {
        let cx_a = Context::new().with_span(named_span("a"));
        let cx_b = Context::new().with_span(named_span("b"));
        let b_id = cx_b.span().span_context().span_id();

        let guard_a = cx_a.attach();
        let guard_b = cx_b.attach();

        // Dropping the lower guard first must leave the top context current.
        drop(guard_a);
        assert_eq!(Context::current().span().span_context().span_id(), b_id);

        drop(guard_b);
        assert!(!Context::current().has_active_span());
    }

    #[test]
    fn suppression_is_scoped() {
        assert!(!Context::is_current_telemetry_suppressed());
        {
            let _guard = Context::enter_telemetry_suppressed_scope();
            assert!(Context::is_current_telemetry_suppressed());
        }
        assert!(!Context::is_current_telemetry_suppressed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn with_context_survives_suspension() {
        let cx = Context::new().with_span(named_span("async"));
        let expected = cx.span().span_context().span_id();

        let task = async move {
            let before = Context::current().span().span_context().span_id();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let after = Context::current().span().span_context().span_id();
            (before, after)
        };

        let (before, after) = task.with_context(cx).await;
        assert_eq!(before, expected);
        assert_eq!(after, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_are_isolated() {
        let make_task = |name: &'static str| {
            let cx = Context::new().with_span(named_span(name));
            let id = cx.span().span_context().span_id();
            let fut = async move {
                for _ in 0..16 {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    assert_eq!(Context::current().span().span_context().span_id(), id);
                }
            };
            fut.with_context(cx)
        };

        let (a, b) = tokio::join!(
            tokio::spawn(make_task("a")),
            tokio::spawn(make_task("b"))
        );
        a.unwrap();
        b.unwrap();
    }
}
