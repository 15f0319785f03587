//! OTLP/HTTP JSON exporters for all three signals.
//!
//! Endpoint resolution, authentication, gzip compression and timeouts are
//! configured from the environment (or overridden on the builder) once at
//! startup; a bad configuration fails the build rather than degrading later.
//!
//! Delivery is at-most-once. A non-success response or transport error drops
//! the batch with a local warning; there are no retries.

use crate::export::{ExportResult, LogExporter, MetricsExporter, SpanExporter};
use crate::logs::LogRecord;
use crate::metrics::{Metric, MetricData, ResourceMetrics};
use crate::resource::Resource;
use crate::trace::{SpanData, SpanKind, Status};
use crate::{TelemetryError, TelemetryResult, Value};
use flate2::write::GzEncoder;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "4318";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

const TRACES_PATH: &str = "v1/traces";
const LOGS_PATH: &str = "v1/logs";
const METRICS_PATH: &str = "v1/metrics";

/// Payload compression applied to outgoing requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    /// Gzip-compress request bodies. The default.
    Gzip,
    /// Send bodies uncompressed.
    None,
}

/// Resolves the collector URL for one signal path.
///
/// Precedence: `OTLP_ENDPOINT`, then `OTEL_EXPORTER_OTLP_ENDPOINT`, then a
/// URL assembled from `OTLP_HOST` and `OTLP_PORT` (defaulting to
/// `http://localhost:4318`).
fn resolve_endpoint(explicit: Option<&str>, signal_path: &str) -> TelemetryResult<Url> {
    let base = match explicit {
        Some(endpoint) => endpoint.to_string(),
        None => non_empty_var("OTLP_ENDPOINT")
            .or_else(|| non_empty_var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .unwrap_or_else(|| {
                let host = non_empty_var("OTLP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
                let port = non_empty_var("OTLP_PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
                format!("http://{host}:{port}")
            }),
    };
    let full = format!("{}/{signal_path}", base.trim_end_matches('/'));
    Url::parse(&full)
        .map_err(|err| TelemetryError::Config(format!("invalid collector endpoint {full:?}: {err}")))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Configures and builds the OTLP exporters.
#[derive(Clone, Debug)]
pub struct OtlpExporterBuilder {
    endpoint: Option<String>,
    auth_token: Option<String>,
    timeout: Duration,
    compression: Compression,
    concurrency_limit: usize,
}

impl Default for OtlpExporterBuilder {
    fn default() -> Self {
        OtlpExporterBuilder {
            endpoint: None,
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
            compression: Compression::Gzip,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl OtlpExporterBuilder {
    /// Creates a builder populated from the environment.
    ///
    /// Reads `OTLP_AUTH_TOKEN`, `OTLP_TIMEOUT` (milliseconds),
    /// `OTLP_COMPRESSION` (`gzip` or `none`) and `OTLP_CONCURRENCY_LIMIT`.
    /// Unparseable values fall back to the defaults with a warning.
    pub fn from_env() -> Self {
        let mut builder = OtlpExporterBuilder::default();

        builder.auth_token = non_empty_var("OTLP_AUTH_TOKEN");

        if let Some(raw) = non_empty_var("OTLP_TIMEOUT") {
            match raw.parse::<u64>() {
                Ok(millis) => builder.timeout = Duration::from_millis(millis),
                Err(_) => {
                    otel_warn!(name: "OtlpExporter.InvalidTimeout", value = raw.as_str())
                }
            }
        }

        if let Some(raw) = non_empty_var("OTLP_COMPRESSION") {
            match raw.to_ascii_lowercase().as_str() {
                "gzip" => builder.compression = Compression::Gzip,
                "none" => builder.compression = Compression::None,
                _ => otel_warn!(name: "OtlpExporter.InvalidCompression", value = raw.as_str()),
            }
        }

        if let Some(raw) = non_empty_var("OTLP_CONCURRENCY_LIMIT") {
            match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => builder.concurrency_limit = limit,
                _ => {
                    otel_warn!(name: "OtlpExporter.InvalidConcurrencyLimit", value = raw.as_str())
                }
            }
        }

        builder
    }

    /// Overrides the collector base URL (signal paths are appended).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the bearer token attached to every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the payload compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Caps concurrent in-flight requests per exporter.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Builds the span exporter.
    pub fn build_span_exporter(self) -> TelemetryResult<OtlpSpanExporter> {
        Ok(OtlpSpanExporter {
            client: self.client(TRACES_PATH)?,
            resource: Resource::default(),
        })
    }

    /// Builds the log exporter.
    pub fn build_log_exporter(self) -> TelemetryResult<OtlpLogExporter> {
        Ok(OtlpLogExporter {
            client: self.client(LOGS_PATH)?,
            resource: Resource::default(),
        })
    }

    /// Builds the metrics exporter.
    pub fn build_metrics_exporter(self) -> TelemetryResult<OtlpMetricsExporter> {
        Ok(OtlpMetricsExporter {
            client: self.client(METRICS_PATH)?,
        })
    }

    fn client(self, signal_path: &str) -> TelemetryResult<OtlpHttpClient> {
        let endpoint = resolve_endpoint(self.endpoint.as_deref(), signal_path).map_err(|err| {
            otel_error!(name: "OtlpExporter.InvalidEndpoint", error = %err);
            err
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| {
                otel_error!(name: "OtlpExporter.ClientBuildFailed", error = %err);
                TelemetryError::Config(format!("http client: {err}"))
            })?;
        otel_debug!(
            name: "OtlpExporter.Configured",
            endpoint = endpoint.as_str(),
            compression = ?self.compression,
        );
        Ok(OtlpHttpClient {
            client,
            endpoint,
            auth_token: self.auth_token,
            compression: self.compression,
            in_flight: Arc::new(AtomicUsize::new(0)),
            concurrency_limit: self.concurrency_limit,
        })
    }
}

/// The shared HTTP delivery path under all three exporters.
#[derive(Debug)]
struct OtlpHttpClient {
    client: reqwest::blocking::Client,
    endpoint: Url,
    auth_token: Option<String>,
    compression: Compression,
    in_flight: Arc<AtomicUsize>,
    concurrency_limit: usize,
}

impl OtlpHttpClient {
    fn send(&self, payload: Vec<u8>) -> ExportResult {
        let _guard = InFlightGuard::acquire(&self.in_flight, self.concurrency_limit)?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        let payload = match self.compression {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&payload)?;
                request = request.header(reqwest::header::CONTENT_ENCODING, "gzip");
                encoder.finish()?
            }
            Compression::None => payload,
        };

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .body(payload)
            .send()
            .map_err(|err| TelemetryError::Export(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(TelemetryError::Export(format!(
                "collector returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Holds one in-flight slot for the duration of a request.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a AtomicUsize, limit: usize) -> TelemetryResult<Self> {
        if in_flight.fetch_add(1, Ordering::SeqCst) >= limit {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(TelemetryError::Export(
                "concurrency limit reached, dropping batch".to_string(),
            ));
        }
        Ok(InFlightGuard { in_flight })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exports span batches as OTLP/HTTP JSON.
#[derive(Debug)]
pub struct OtlpSpanExporter {
    client: OtlpHttpClient,
    resource: Resource,
}

impl SpanExporter for OtlpSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        let request = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: OtlpResource::from(&self.resource),
                scope_spans: vec![ScopeSpans {
                    scope: OtlpScope::default(),
                    spans: batch.iter().map(OtlpSpan::from).collect(),
                }],
            }],
        };
        self.client.send(serde_json::to_vec(&request)?)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.clone();
    }
}

/// Exports log record batches as OTLP/HTTP JSON.
#[derive(Debug)]
pub struct OtlpLogExporter {
    client: OtlpHttpClient,
    resource: Resource,
}

impl LogExporter for OtlpLogExporter {
    fn export(&mut self, batch: Vec<LogRecord>) -> ExportResult {
        let request = ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: OtlpResource::from(&self.resource),
                scope_logs: vec![ScopeLogs {
                    scope: OtlpScope::default(),
                    log_records: batch.iter().map(OtlpLogRecord::from).collect(),
                }],
            }],
        };
        self.client.send(serde_json::to_vec(&request)?)
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.clone();
    }
}

/// Exports metric snapshots as OTLP/HTTP JSON.
#[derive(Debug)]
pub struct OtlpMetricsExporter {
    client: OtlpHttpClient,
}

impl MetricsExporter for OtlpMetricsExporter {
    fn export(&mut self, metrics: &ResourceMetrics) -> ExportResult {
        let request = ExportMetricsServiceRequest {
            resource_metrics: vec![OtlpResourceMetrics {
                resource: OtlpResource::from(&metrics.resource),
                scope_metrics: vec![ScopeMetrics {
                    scope: OtlpScope::default(),
                    metrics: metrics.metrics.iter().map(OtlpMetric::from).collect(),
                }],
            }],
        };
        self.client.send(serde_json::to_vec(&request)?)
    }
}

// OTLP JSON wire model. Ids are lowercase hex, 64-bit integers travel as
// strings, and key names are camelCase, matching protobuf JSON mapping.

fn unix_nanos(time: SystemTime) -> String {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportTraceServiceRequest<'a> {
    resource_spans: Vec<ResourceSpans<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans<'a> {
    resource: OtlpResource<'a>,
    scope_spans: Vec<ScopeSpans<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportLogsServiceRequest<'a> {
    resource_logs: Vec<ResourceLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs<'a> {
    resource: OtlpResource<'a>,
    scope_logs: Vec<ScopeLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetricsServiceRequest<'a> {
    resource_metrics: Vec<OtlpResourceMetrics<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpResourceMetrics<'a> {
    resource: OtlpResource<'a>,
    scope_metrics: Vec<ScopeMetrics<'a>>,
}

#[derive(Serialize)]
struct OtlpResource<'a> {
    attributes: Vec<OtlpKeyValue<'a>>,
}

impl<'a> From<&'a Resource> for OtlpResource<'a> {
    fn from(resource: &'a Resource) -> Self {
        let mut attributes: Vec<_> = resource
            .iter()
            .map(|(key, value)| OtlpKeyValue {
                key: key.as_str(),
                value: OtlpAnyValue(value),
            })
            .collect();
        attributes.sort_by_key(|kv| kv.key);
        OtlpResource { attributes }
    }
}

#[derive(Serialize)]
struct OtlpScope {
    name: &'static str,
    version: &'static str,
}

impl Default for OtlpScope {
    fn default() -> Self {
        OtlpScope {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeSpans<'a> {
    scope: OtlpScope,
    spans: Vec<OtlpSpan<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs<'a> {
    scope: OtlpScope,
    log_records: Vec<OtlpLogRecord<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeMetrics<'a> {
    scope: OtlpScope,
    metrics: Vec<OtlpMetric<'a>>,
}

#[derive(Serialize)]
struct OtlpKeyValue<'a> {
    key: &'a str,
    value: OtlpAnyValue<'a>,
}

impl<'a> From<&'a crate::KeyValue> for OtlpKeyValue<'a> {
    fn from(kv: &'a crate::KeyValue) -> Self {
        OtlpKeyValue {
            key: kv.key.as_str(),
            value: OtlpAnyValue(&kv.value),
        }
    }
}

struct OtlpAnyValue<'a>(&'a Value);

impl Serialize for OtlpAnyValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self.0 {
            Value::Bool(v) => map.serialize_entry("boolValue", v)?,
            Value::I64(v) => map.serialize_entry("intValue", &v.to_string())?,
            Value::F64(v) => map.serialize_entry("doubleValue", v)?,
            Value::String(v) => map.serialize_entry("stringValue", v.as_ref())?,
        }
        map.end()
    }
}

struct StringBody<'a>(&'a str);

impl Serialize for StringBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("stringValue", self.0)?;
        map.end()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSpan<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: &'a str,
    kind: u32,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<OtlpKeyValue<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<OtlpEvent<'a>>,
    status: OtlpStatus<'a>,
}

impl<'a> From<&'a SpanData> for OtlpSpan<'a> {
    fn from(span: &'a SpanData) -> Self {
        OtlpSpan {
            trace_id: format!("{:x}", span.span_context.trace_id()),
            span_id: format!("{:x}", span.span_context.span_id()),
            parent_span_id: span.parent_span_id.map(|id| format!("{id:x}")),
            name: &span.name,
            kind: match span.kind {
                SpanKind::Internal => 1,
                SpanKind::Server => 2,
                SpanKind::Client => 3,
                SpanKind::Producer => 4,
                SpanKind::Consumer => 5,
            },
            start_time_unix_nano: unix_nanos(span.start_time),
            end_time_unix_nano: unix_nanos(span.end_time),
            attributes: span.attributes.iter().map(OtlpKeyValue::from).collect(),
            events: span.events.iter().map(OtlpEvent::from).collect(),
            status: OtlpStatus::from(&span.status),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpEvent<'a> {
    name: &'a str,
    time_unix_nano: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<OtlpKeyValue<'a>>,
}

impl<'a> From<&'a crate::trace::Event> for OtlpEvent<'a> {
    fn from(event: &'a crate::trace::Event) -> Self {
        OtlpEvent {
            name: &event.name,
            time_unix_nano: unix_nanos(event.timestamp),
            attributes: event.attributes.iter().map(OtlpKeyValue::from).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpStatus<'a> {
    code: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    message: &'a str,
}

impl<'a> From<&'a Status> for OtlpStatus<'a> {
    fn from(status: &'a Status) -> Self {
        match status {
            Status::Unset => OtlpStatus {
                code: 0,
                message: "",
            },
            Status::Ok => OtlpStatus {
                code: 1,
                message: "",
            },
            Status::Error { description } => OtlpStatus {
                code: 2,
                message: description,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpLogRecord<'a> {
    time_unix_nano: String,
    severity_number: u32,
    severity_text: &'a str,
    body: StringBody<'a>,
    attributes: Vec<OtlpKeyValue<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
}

impl<'a> From<&'a LogRecord> for OtlpLogRecord<'a> {
    fn from(record: &'a LogRecord) -> Self {
        OtlpLogRecord {
            time_unix_nano: unix_nanos(record.timestamp),
            severity_number: record.severity.severity_number(),
            severity_text: &record.severity_text,
            body: StringBody(&record.body),
            attributes: record.attributes.iter().map(OtlpKeyValue::from).collect(),
            trace_id: record.trace_id.map(|id| format!("{id:x}")),
            span_id: record.span_id.map(|id| format!("{id:x}")),
        }
    }
}

/// Cumulative temporality, the only one this pipeline produces.
const AGGREGATION_TEMPORALITY_CUMULATIVE: u32 = 2;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpMetric<'a> {
    name: &'a str,
    unit: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sum: Option<OtlpSum<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    histogram: Option<OtlpHistogram<'a>>,
}

impl<'a> From<&'a Metric> for OtlpMetric<'a> {
    fn from(metric: &'a Metric) -> Self {
        let (sum, histogram) = match &metric.data {
            MetricData::Sum(points) => (
                Some(OtlpSum {
                    data_points: points
                        .iter()
                        .map(|point| OtlpNumberDataPoint {
                            attributes: point.attributes.iter().map(OtlpKeyValue::from).collect(),
                            start_time_unix_nano: unix_nanos(point.start_time),
                            time_unix_nano: unix_nanos(point.time),
                            as_int: point.value.to_string(),
                        })
                        .collect(),
                    aggregation_temporality: AGGREGATION_TEMPORALITY_CUMULATIVE,
                    is_monotonic: true,
                }),
                None,
            ),
            MetricData::Histogram(points) => (
                None,
                Some(OtlpHistogram {
                    data_points: points
                        .iter()
                        .map(|point| OtlpHistogramDataPoint {
                            attributes: point.attributes.iter().map(OtlpKeyValue::from).collect(),
                            start_time_unix_nano: unix_nanos(point.start_time),
                            time_unix_nano: unix_nanos(point.time),
                            count: point.count.to_string(),
                            sum: point.sum,
                            bucket_counts: point
                                .bucket_counts
                                .iter()
                                .map(|count| count.to_string())
                                .collect(),
                            explicit_bounds: &point.bounds,
                        })
                        .collect(),
                    aggregation_temporality: AGGREGATION_TEMPORALITY_CUMULATIVE,
                }),
            ),
        };
        OtlpMetric {
            name: &metric.name,
            unit: &metric.unit,
            sum,
            histogram,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSum<'a> {
    data_points: Vec<OtlpNumberDataPoint<'a>>,
    aggregation_temporality: u32,
    is_monotonic: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpNumberDataPoint<'a> {
    attributes: Vec<OtlpKeyValue<'a>>,
    start_time_unix_nano: String,
    time_unix_nano: String,
    as_int: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpHistogram<'a> {
    data_points: Vec<OtlpHistogramDataPoint<'a>>,
    aggregation_temporality: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpHistogramDataPoint<'a> {
    attributes: Vec<OtlpKeyValue<'a>>,
    start_time_unix_nano: String,
    time_unix_nano: String,
    count: String,
    sum: f64,
    bucket_counts: Vec<String>,
    explicit_bounds: &'a [f64],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanContext, SpanId, TraceId};
    use crate::KeyValue;
    use std::borrow::Cow;

    const ENDPOINT_VARS: [&str; 4] = [
        "OTLP_ENDPOINT",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "OTLP_HOST",
        "OTLP_PORT",
    ];

    #[test]
    fn endpoint_defaults_to_localhost() {
        temp_env::with_vars_unset(ENDPOINT_VARS, || {
            let url = resolve_endpoint(None, TRACES_PATH).unwrap();
            assert_eq!(url.as_str(), "http://localhost:4318/v1/traces");
        });
    }

    #[test]
    fn endpoint_host_port_fallback() {
        temp_env::with_vars(
            [
                ("OTLP_ENDPOINT", None),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", None),
                ("OTLP_HOST", Some("collector.internal")),
                ("OTLP_PORT", Some("9999")),
            ],
            || {
                let url = resolve_endpoint(None, LOGS_PATH).unwrap();
                assert_eq!(url.as_str(), "http://collector.internal:9999/v1/logs");
            },
        );
    }

    #[test]
    fn endpoint_precedence() {
        temp_env::with_vars(
            [
                ("OTLP_ENDPOINT", Some("http://first:1")),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://second:2")),
            ],
            || {
                let url = resolve_endpoint(None, METRICS_PATH).unwrap();
                assert_eq!(url.as_str(), "http://first:1/v1/metrics");
            },
        );
        temp_env::with_vars(
            [
                ("OTLP_ENDPOINT", None),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://second:2/")),
            ],
            || {
                let url = resolve_endpoint(None, METRICS_PATH).unwrap();
                assert_eq!(url.as_str(), "http://second:2/v1/metrics");
            },
        );
    }

    #[test]
    fn malformed_endpoint_is_a_config_error() {
        let result = resolve_endpoint(Some("not a url"), TRACES_PATH);
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn builder_from_env_reads_transport_settings() {
        temp_env::with_vars(
            [
                ("OTLP_AUTH_TOKEN", Some("secret")),
                ("OTLP_TIMEOUT", Some("5000")),
                ("OTLP_COMPRESSION", Some("none")),
                ("OTLP_CONCURRENCY_LIMIT", Some("3")),
            ],
            || {
                let builder = OtlpExporterBuilder::from_env();
                assert_eq!(builder.auth_token.as_deref(), Some("secret"));
                assert_eq!(builder.timeout, Duration::from_millis(5000));
                assert_eq!(builder.compression, Compression::None);
                assert_eq!(builder.concurrency_limit, 3);
            },
        );
    }

    #[test]
    fn builder_ignores_unparseable_settings() {
        temp_env::with_vars(
            [
                ("OTLP_TIMEOUT", Some("soon")),
                ("OTLP_COMPRESSION", Some("brotli")),
                ("OTLP_CONCURRENCY_LIMIT", Some("0")),
            ],
            || {
                let builder = OtlpExporterBuilder::from_env();
                assert_eq!(builder.timeout, DEFAULT_TIMEOUT);
                assert_eq!(builder.compression, Compression::Gzip);
                assert_eq!(builder.concurrency_limit, DEFAULT_CONCURRENCY_LIMIT);
            },
        );
    }

    fn sample_span() -> SpanData {
        SpanData {
            span_context: SpanContext::new(TraceId::from_u128(0xab), SpanId::from_u64(0xcd)),
            parent_span_id: Some(SpanId::from_u64(0x12)),
            name: Cow::Borrowed("op"),
            kind: SpanKind::Server,
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
            end_time: SystemTime::UNIX_EPOCH + Duration::from_secs(2),
            attributes: vec![KeyValue::new("count", 7i64)],
            events: Vec::new(),
            status: Status::error("boom"),
        }
    }

    #[test]
    fn span_wire_shape() {
        let json = serde_json::to_value(OtlpSpan::from(&sample_span())).unwrap();
        assert_eq!(json["traceId"], "000000000000000000000000000000ab");
        assert_eq!(json["spanId"], "00000000000000cd");
        assert_eq!(json["parentSpanId"], "0000000000000012");
        assert_eq!(json["kind"], 2);
        assert_eq!(json["startTimeUnixNano"], "1000000000");
        assert_eq!(json["endTimeUnixNano"], "2000000000");
        assert_eq!(json["attributes"][0]["key"], "count");
        assert_eq!(json["attributes"][0]["value"]["intValue"], "7");
        assert_eq!(json["status"]["code"], 2);
        assert_eq!(json["status"]["message"], "boom");
        assert!(json.get("events").is_none());
    }

    #[test]
    fn log_wire_shape() {
        let mut record = LogRecord::new("warn", "careful");
        record.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(3);
        record.trace_id = Some(TraceId::from_u128(1));
        record.span_id = Some(SpanId::from_u64(2));

        let json = serde_json::to_value(OtlpLogRecord::from(&record)).unwrap();
        assert_eq!(json["timeUnixNano"], "3000000000");
        assert_eq!(json["severityNumber"], 13);
        assert_eq!(json["severityText"], "WARN");
        assert_eq!(json["body"]["stringValue"], "careful");
        assert_eq!(json["traceId"], "00000000000000000000000000000001");
        assert_eq!(json["spanId"], "0000000000000002");
        assert_eq!(json["attributes"][0]["key"], "log.level");
        assert_eq!(json["attributes"][0]["value"]["stringValue"], "warn");
    }

    #[test]
    fn uncorrelated_log_omits_ids() {
        let record = LogRecord::new("info", "plain");
        let json = serde_json::to_value(OtlpLogRecord::from(&record)).unwrap();
        assert!(json.get("traceId").is_none());
        assert!(json.get("spanId").is_none());
    }

    #[test]
    fn metric_wire_shape() {
        use crate::metrics::{MetricData, SumPoint};
        let metric = Metric {
            name: Cow::Borrowed("requests"),
            unit: Cow::Borrowed("{request}"),
            data: MetricData::Sum(vec![SumPoint {
                attributes: vec![KeyValue::new("op", "create")],
                value: 9,
                start_time: SystemTime::UNIX_EPOCH,
                time: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
            }]),
        };

        let json = serde_json::to_value(OtlpMetric::from(&metric)).unwrap();
        assert_eq!(json["name"], "requests");
        assert_eq!(json["sum"]["aggregationTemporality"], 2);
        assert_eq!(json["sum"]["isMonotonic"], true);
        assert_eq!(json["sum"]["dataPoints"][0]["asInt"], "9");
        assert!(json.get("histogram").is_none());
    }

    #[test]
    fn value_kinds_serialize_to_their_any_value_fields() {
        let cases = [
            (Value::from(true), "boolValue", serde_json::json!(true)),
            (Value::from(5i64), "intValue", serde_json::json!("5")),
            (Value::from(1.5f64), "doubleValue", serde_json::json!(1.5)),
            (Value::from("s"), "stringValue", serde_json::json!("s")),
        ];
        for (value, field, expected) in cases {
            let json = serde_json::to_value(OtlpAnyValue(&value)).unwrap();
            assert_eq!(json[field], expected);
            assert_eq!(json.as_object().unwrap().len(), 1);
        }
    }

    #[test]
    fn gzip_payload_round_trips() {
        use std::io::Read;
        let payload = br#"{"resourceSpans":[]}"#.to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }
}
