/// Internal diagnostics for the pipeline itself.
///
/// These macros route through `tracing` rather than the crate's own log
/// pipeline so that exporter failures can never feed back into the signals
/// they are trying to deliver.
#[macro_export]
macro_rules! otel_debug {
    (name: $name:expr $(, $($fields:tt)+)?) => {
        $crate::_private::debug!(target: env!("CARGO_PKG_NAME"), name = $name $(, $($fields)+)?)
    };
}

/// Internal warning diagnostics. See [`otel_debug`].
#[macro_export]
macro_rules! otel_warn {
    (name: $name:expr $(, $($fields:tt)+)?) => {
        $crate::_private::warn!(target: env!("CARGO_PKG_NAME"), name = $name $(, $($fields)+)?)
    };
}

/// Internal error diagnostics. See [`otel_debug`].
#[macro_export]
macro_rules! otel_error {
    (name: $name:expr $(, $($fields:tt)+)?) => {
        $crate::_private::error!(target: env!("CARGO_PKG_NAME"), name = $name $(, $($fields)+)?)
    };
}
