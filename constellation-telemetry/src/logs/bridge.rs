//! Adapter feeding the `log` facade into the correlated log pipeline.

use crate::logs::{LogRecord, Logger, LoggerProvider};
use crate::KeyValue;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A [`log::Log`] implementation that forwards every record into a
/// [`LoggerProvider`] pipeline.
///
/// Emission never blocks and never surfaces errors to the logging call
/// site; a broken pipeline degrades to dropped records.
#[derive(Debug)]
pub struct LogBridge {
    logger: Logger,
}

impl LogBridge {
    /// Creates a bridge emitting through `provider`.
    pub fn new(provider: &LoggerProvider) -> Self {
        LogBridge {
            logger: provider.logger("log-bridge"),
        }
    }

    /// Installs the bridge as the global `log` logger.
    pub fn install(
        provider: &LoggerProvider,
        max_level: LevelFilter,
    ) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(LogBridge::new(provider)))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

impl Log for LogBridge {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let entry = LogRecord::new(level_str(record.level()), record.args().to_string())
            .with_attribute(KeyValue::new("log.target", record.target().to_string()));
        self.logger.emit(entry);
    }

    fn flush(&self) {
        let _ = self.logger.provider().force_flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::Severity;
    use crate::testing::InMemoryLogExporter;

    #[test]
    fn bridge_converts_levels_and_targets() {
        let exporter = InMemoryLogExporter::default();
        let provider = LoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let bridge = LogBridge::new(&provider);

        bridge.log(
            &Record::builder()
                .args(format_args!("it broke"))
                .level(Level::Error)
                .target("constellation_service::person")
                .build(),
        );

        let records = exporter.get_emitted_logs();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Error);
        assert_eq!(records[0].severity_text, "ERROR");
        assert_eq!(records[0].body, "it broke");
        assert!(records[0]
            .attributes
            .contains(&KeyValue::new("log.level", "error")));
        assert!(records[0].attributes.contains(&KeyValue::new(
            "log.target",
            "constellation_service::person"
        )));
    }
}
