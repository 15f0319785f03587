//! Process bootstrap and shutdown for the telemetry pipeline.

use crate::config::ServiceConfig;
use constellation_telemetry::export::otlp::OtlpExporterBuilder;
use constellation_telemetry::logs::{LogBridge, LoggerProvider};
use constellation_telemetry::metrics::MeterProvider;
use constellation_telemetry::trace::TracerProvider;
use constellation_telemetry::{Resource, TelemetryError, TelemetryResult};

/// The three signal providers, held for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct TelemetryStack {
    /// Span pipeline.
    pub tracer_provider: TracerProvider,
    /// Correlated log pipeline.
    pub logger_provider: LoggerProvider,
    /// Metrics pipeline.
    pub meter_provider: MeterProvider,
}

impl TelemetryStack {
    /// Builds the full pipeline from the environment and installs the log
    /// bridge as the global `log` backend.
    ///
    /// Fails fast on configuration errors (malformed endpoint, logger
    /// already installed) rather than degrading silently later.
    pub fn init(config: &ServiceConfig) -> TelemetryResult<TelemetryStack> {
        let resource = Resource::builder().build();

        let tracer_provider = TracerProvider::builder()
            .with_resource(resource.clone())
            .with_batch_exporter(OtlpExporterBuilder::from_env().build_span_exporter()?)
            .build();

        let logger_provider = LoggerProvider::builder()
            .with_resource(resource.clone())
            .with_batch_exporter(OtlpExporterBuilder::from_env().build_log_exporter()?)
            .build();

        let meter_provider = MeterProvider::builder()
            .with_resource(resource)
            .with_periodic_exporter_interval(
                OtlpExporterBuilder::from_env().build_metrics_exporter()?,
                config.metric_export_interval,
            )
            .build();

        LogBridge::install(&logger_provider, config.max_log_level)
            .map_err(|err| TelemetryError::Config(format!("log bridge: {err}")))?;

        Ok(TelemetryStack {
            tracer_provider,
            logger_provider,
            meter_provider,
        })
    }

    /// Flushes and shuts down all three pipelines, returning the first
    /// failure after attempting every one.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        let mut result = Ok(());
        for outcome in [
            self.tracer_provider.shutdown(),
            self.logger_provider.shutdown(),
            self.meter_provider.shutdown(),
        ] {
            if result.is_ok() {
                if let Err(err) = outcome {
                    result = Err(err);
                }
            }
        }
        result
    }
}
