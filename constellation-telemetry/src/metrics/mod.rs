//! The metrics pipeline: in-process aggregation with periodic export.
//!
//! Instruments aggregate cumulatively in memory, keyed by their attribute
//! set. A [`PeriodicReader`] snapshots every instrument on a fixed interval
//! and hands the snapshot to a [`MetricsExporter`].
//!
//! [`MetricsExporter`]: crate::export::MetricsExporter

use crate::resource::Resource;
use crate::{KeyValue, TelemetryError, TelemetryResult};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

mod periodic_reader;

pub use periodic_reader::PeriodicReader;

/// Default histogram bucket boundaries, in the unit of the instrument.
const DEFAULT_HISTOGRAM_BOUNDS: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// One collected snapshot: the resource plus every instrument's points.
#[derive(Clone, Debug)]
pub struct ResourceMetrics {
    /// The service instance the points describe.
    pub resource: Resource,
    /// One entry per instrument.
    pub metrics: Vec<Metric>,
}

/// A single instrument's snapshot.
#[derive(Clone, Debug)]
pub struct Metric {
    /// The instrument name.
    pub name: Cow<'static, str>,
    /// The unit of measure.
    pub unit: Cow<'static, str>,
    /// The aggregated points.
    pub data: MetricData,
}

/// Aggregated points, by instrument kind.
#[derive(Clone, Debug)]
pub enum MetricData {
    /// Monotonic cumulative sums.
    Sum(Vec<SumPoint>),
    /// Cumulative histograms.
    Histogram(Vec<HistogramPoint>),
}

/// One cumulative sum point.
#[derive(Clone, Debug)]
pub struct SumPoint {
    /// The attribute set this point aggregates.
    pub attributes: Vec<KeyValue>,
    /// The cumulative value since `start_time`.
    pub value: u64,
    /// When aggregation started.
    pub start_time: SystemTime,
    /// When the point was collected.
    pub time: SystemTime,
}

/// One cumulative histogram point.
#[derive(Clone, Debug)]
pub struct HistogramPoint {
    /// The attribute set this point aggregates.
    pub attributes: Vec<KeyValue>,
    /// Total recorded values since `start_time`.
    pub count: u64,
    /// Sum of recorded values since `start_time`.
    pub sum: f64,
    /// Upper bucket boundaries.
    pub bounds: Vec<f64>,
    /// Per-bucket counts; one more entry than `bounds`.
    pub bucket_counts: Vec<u64>,
    /// When aggregation started.
    pub start_time: SystemTime,
    /// When the point was collected.
    pub time: SystemTime,
}

/// A monotonically increasing counter.
///
/// Cheap to clone; all clones aggregate into the same points.
#[derive(Clone, Debug)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

#[derive(Debug)]
struct CounterInner {
    name: Cow<'static, str>,
    unit: Cow<'static, str>,
    start_time: SystemTime,
    points: Mutex<Vec<(Vec<KeyValue>, u64)>>,
}

impl Counter {
    /// Adds to the counter for the given attribute set.
    pub fn add(&self, value: u64, attributes: &[KeyValue]) {
        let attributes = normalized(attributes);
        if let Ok(mut points) = self.inner.points.lock() {
            match points.iter().position(|(attrs, _)| *attrs == attributes) {
                Some(idx) => points[idx].1 += value,
                None => points.push((attributes, value)),
            }
        }
    }

    fn collect(&self, time: SystemTime) -> Metric {
        let points = match self.inner.points.lock() {
            Ok(points) => points
                .iter()
                .map(|(attributes, value)| SumPoint {
                    attributes: attributes.clone(),
                    value: *value,
                    start_time: self.inner.start_time,
                    time,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Metric {
            name: self.inner.name.clone(),
            unit: self.inner.unit.clone(),
            data: MetricData::Sum(points),
        }
    }
}

/// Records a distribution of values into fixed buckets.
///
/// Cheap to clone; all clones aggregate into the same points.
#[derive(Clone, Debug)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    name: Cow<'static, str>,
    unit: Cow<'static, str>,
    bounds: Vec<f64>,
    start_time: SystemTime,
    points: Mutex<Vec<(Vec<KeyValue>, HistogramCell)>>,
}

#[derive(Clone, Debug)]
struct HistogramCell {
    count: u64,
    sum: f64,
    bucket_counts: Vec<u64>,
}

impl Histogram {
    /// Records one value for the given attribute set.
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        let attributes = normalized(attributes);
        let bucket = self
            .inner
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.inner.bounds.len());

        if let Ok(mut points) = self.inner.points.lock() {
            let idx = match points.iter().position(|(attrs, _)| *attrs == attributes) {
                Some(idx) => idx,
                None => {
                    points.push((
                        attributes,
                        HistogramCell {
                            count: 0,
                            sum: 0.0,
                            bucket_counts: vec![0; self.inner.bounds.len() + 1],
                        },
                    ));
                    points.len() - 1
                }
            };
            let cell = &mut points[idx].1;
            cell.count += 1;
            cell.sum += value;
            cell.bucket_counts[bucket] += 1;
        }
    }

    fn collect(&self, time: SystemTime) -> Metric {
        let points = match self.inner.points.lock() {
            Ok(points) => points
                .iter()
                .map(|(attributes, cell)| HistogramPoint {
                    attributes: attributes.clone(),
                    count: cell.count,
                    sum: cell.sum,
                    bounds: self.inner.bounds.clone(),
                    bucket_counts: cell.bucket_counts.clone(),
                    start_time: self.inner.start_time,
                    time,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Metric {
            name: self.inner.name.clone(),
            unit: self.inner.unit.clone(),
            data: MetricData::Histogram(points),
        }
    }
}

/// Attribute identity is order-insensitive.
fn normalized(attributes: &[KeyValue]) -> Vec<KeyValue> {
    let mut attributes = attributes.to_vec();
    attributes.sort_by(|a, b| a.key.cmp(&b.key));
    attributes
}

#[derive(Clone, Debug)]
enum Instrument {
    Counter(Counter),
    Histogram(Histogram),
}

/// Creates [`Meter`]s and owns the aggregation state and the reader.
#[derive(Clone, Debug)]
pub struct MeterProvider {
    inner: Arc<MeterProviderInner>,
}

#[derive(Debug)]
struct MeterProviderInner {
    instruments: Mutex<Vec<Instrument>>,
    resource: Resource,
    reader: Mutex<Option<PeriodicReader>>,
    is_shutdown: AtomicBool,
}

impl MeterProvider {
    /// Creates a builder for a `MeterProvider`.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Returns a named [`Meter`] backed by this provider.
    pub fn meter(&self, scope: impl Into<Cow<'static, str>>) -> Meter {
        Meter {
            scope: scope.into(),
            provider: self.clone(),
        }
    }

    /// The resource describing this service instance.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Snapshots every instrument. Collection does not reset aggregation;
    /// temporality is cumulative.
    pub fn collect(&self) -> ResourceMetrics {
        let time = crate::now();
        let metrics = match self.inner.instruments.lock() {
            Ok(instruments) => instruments
                .iter()
                .map(|instrument| match instrument {
                    Instrument::Counter(counter) => counter.collect(time),
                    Instrument::Histogram(histogram) => histogram.collect(time),
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        ResourceMetrics {
            resource: self.inner.resource.clone(),
            metrics,
        }
    }

    /// Collects and exports immediately, blocking until done or timed out.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        match &*self.inner.reader.lock()? {
            Some(reader) => reader.force_flush(),
            None => Ok(()),
        }
    }

    /// Exports a final snapshot and stops the reader. Idempotent.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        match self.inner.reader.lock()?.take() {
            Some(reader) => reader.shutdown(),
            None => Ok(()),
        }
    }

    fn register(&self, instrument: Instrument) {
        if let Ok(mut instruments) = self.inner.instruments.lock() {
            instruments.push(instrument);
        }
    }
}

/// Creates instruments on behalf of one instrumentation scope.
#[derive(Clone, Debug)]
pub struct Meter {
    scope: Cow<'static, str>,
    provider: MeterProvider,
}

impl Meter {
    /// The instrumentation scope this meter reports under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Creates and registers a monotonic counter.
    pub fn u64_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
        unit: impl Into<Cow<'static, str>>,
    ) -> Counter {
        let counter = Counter {
            inner: Arc::new(CounterInner {
                name: name.into(),
                unit: unit.into(),
                start_time: crate::now(),
                points: Mutex::new(Vec::new()),
            }),
        };
        self.provider.register(Instrument::Counter(counter.clone()));
        counter
    }

    /// Creates and registers a histogram with the default bucket bounds.
    pub fn f64_histogram(
        &self,
        name: impl Into<Cow<'static, str>>,
        unit: impl Into<Cow<'static, str>>,
    ) -> Histogram {
        let histogram = Histogram {
            inner: Arc::new(HistogramInner {
                name: name.into(),
                unit: unit.into(),
                bounds: DEFAULT_HISTOGRAM_BOUNDS.to_vec(),
                start_time: crate::now(),
                points: Mutex::new(Vec::new()),
            }),
        };
        self.provider
            .register(Instrument::Histogram(histogram.clone()));
        histogram
    }
}

/// A builder for [`MeterProvider`].
#[derive(Debug, Default)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    reader_config: Option<periodic_reader::ReaderConfig>,
}

impl MeterProviderBuilder {
    /// Sets the resource attached to every snapshot.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Adds a periodic reader exporting through `exporter` on the default
    /// 60s interval.
    pub fn with_periodic_exporter<E: crate::export::MetricsExporter + 'static>(
        self,
        exporter: E,
    ) -> Self {
        let interval = periodic_reader::DEFAULT_INTERVAL;
        self.with_periodic_exporter_interval(exporter, interval)
    }

    /// Adds a periodic reader with an explicit export interval.
    pub fn with_periodic_exporter_interval<E: crate::export::MetricsExporter + 'static>(
        mut self,
        exporter: E,
        interval: std::time::Duration,
    ) -> Self {
        self.reader_config = Some(periodic_reader::ReaderConfig::new(
            Box::new(exporter),
            interval,
        ));
        self
    }

    /// Builds the provider, spawning the reader thread if one is configured.
    pub fn build(self) -> MeterProvider {
        let resource = self.resource.unwrap_or_else(|| Resource::builder().build());
        let provider = MeterProvider {
            inner: Arc::new(MeterProviderInner {
                instruments: Mutex::new(Vec::new()),
                resource,
                reader: Mutex::new(None),
                is_shutdown: AtomicBool::new(false),
            }),
        };
        if let Some(config) = self.reader_config {
            let reader = PeriodicReader::spawn(config, provider.clone());
            if let Ok(mut slot) = provider.inner.reader.lock() {
                *slot = Some(reader);
            }
        }
        provider
    }
}
