//! Process configuration resolved once at startup.

use log::LevelFilter;
use std::env;
use std::time::Duration;

const DEFAULT_METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Service-level settings. Exporter transport settings (endpoint, auth,
/// compression, timeouts) are resolved by the telemetry crate's own
/// builders.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// How often metric snapshots are exported. `OTLP_METRIC_EXPORT_INTERVAL`
    /// in milliseconds; default 60s.
    pub metric_export_interval: Duration,
    /// Most verbose level forwarded into the log pipeline. `LOG_LEVEL`;
    /// default info.
    pub max_log_level: LevelFilter,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            metric_export_interval: DEFAULT_METRIC_EXPORT_INTERVAL,
            max_log_level: LevelFilter::Info,
        }
    }
}

impl ServiceConfig {
    /// Reads the configuration from the environment, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = ServiceConfig::default();

        if let Ok(raw) = env::var("OTLP_METRIC_EXPORT_INTERVAL") {
            if let Ok(millis) = raw.parse::<u64>() {
                config.metric_export_interval = Duration::from_millis(millis);
            }
        }

        if let Ok(raw) = env::var("LOG_LEVEL") {
            if let Ok(level) = raw.parse::<LevelFilter>() {
                config.max_log_level = level;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        temp_env::with_vars_unset(["OTLP_METRIC_EXPORT_INTERVAL", "LOG_LEVEL"], || {
            let config = ServiceConfig::from_env();
            assert_eq!(config.metric_export_interval, Duration::from_secs(60));
            assert_eq!(config.max_log_level, LevelFilter::Info);
        });
    }

    #[test]
    fn env_overrides() {
        temp_env::with_vars(
            [
                ("OTLP_METRIC_EXPORT_INTERVAL", Some("5000")),
                ("LOG_LEVEL", Some("debug")),
            ],
            || {
                let config = ServiceConfig::from_env();
                assert_eq!(config.metric_export_interval, Duration::from_millis(5000));
                assert_eq!(config.max_log_level, LevelFilter::Debug);
            },
        );
    }
}
