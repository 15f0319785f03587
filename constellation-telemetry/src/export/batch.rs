//! The shared batching engine behind the span and log batch processors.
//!
//! One dedicated thread per signal owns the exporter. Producers append
//! through a bounded channel and never block: when the queue is full the
//! item is dropped and a warning is logged once.

use crate::export::{ExportResult, LogExporter, SpanExporter};
use crate::logs::LogRecord;
use crate::resource::Resource;
use crate::trace::SpanData;
use crate::{Context, TelemetryError, TelemetryResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
const DEFAULT_SCHEDULED_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
const DEFAULT_MAX_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
const ENV_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
const ENV_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
const ENV_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Batching parameters shared by the span and log pipelines.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub(crate) max_queue_size: usize,
    pub(crate) scheduled_delay: Duration,
    pub(crate) max_export_batch_size: usize,
    pub(crate) max_export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig::builder().build()
    }
}

impl BatchConfig {
    /// Creates a builder with the default parameters.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }
}

/// A builder for [`BatchConfig`].
#[derive(Clone, Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    /// Seeds the builder from the `OTEL_BSP_*` environment variables
    /// (durations in milliseconds), falling back to the built-in defaults
    /// for anything unset or unparseable.
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: env_usize(ENV_MAX_QUEUE_SIZE, DEFAULT_MAX_QUEUE_SIZE),
            scheduled_delay: env_millis(ENV_SCHEDULE_DELAY, DEFAULT_SCHEDULED_DELAY),
            max_export_batch_size: env_usize(
                ENV_MAX_EXPORT_BATCH_SIZE,
                DEFAULT_MAX_EXPORT_BATCH_SIZE,
            ),
            max_export_timeout: env_millis(ENV_EXPORT_TIMEOUT, DEFAULT_MAX_EXPORT_TIMEOUT),
        }
    }
}

impl BatchConfigBuilder {
    /// Maximum items buffered before new ones are dropped. Default 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Interval between scheduled exports. Default 5s.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Batch size that triggers an immediate export. Default 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Grace timeout for flush and shutdown. Default 30s.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Builds the config. The batch size never exceeds the queue size.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size: self.max_export_batch_size.min(self.max_queue_size),
            max_export_timeout: self.max_export_timeout,
        }
    }
}

/// What the exporter-owning worker thread needs from an exporter, generic
/// over the signal type.
pub(crate) trait Exporter<T>: Send + 'static {
    fn export(&mut self, batch: Vec<T>) -> ExportResult;
    fn set_resource(&mut self, resource: &Resource);
    fn shutdown(&mut self) -> ExportResult;
}

impl<E: SpanExporter + 'static> Exporter<SpanData> for E {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        SpanExporter::export(self, batch)
    }

    fn set_resource(&mut self, resource: &Resource) {
        SpanExporter::set_resource(self, resource);
    }

    fn shutdown(&mut self) -> ExportResult {
        SpanExporter::shutdown(self)
    }
}

impl<E: LogExporter + 'static> Exporter<LogRecord> for E {
    fn export(&mut self, batch: Vec<LogRecord>) -> ExportResult {
        LogExporter::export(self, batch)
    }

    fn set_resource(&mut self, resource: &Resource) {
        LogExporter::set_resource(self, resource);
    }

    fn shutdown(&mut self) -> ExportResult {
        LogExporter::shutdown(self)
    }
}

enum BatchMessage<T> {
    Item(T),
    Flush(SyncSender<ExportResult>),
    Shutdown(SyncSender<ExportResult>),
    SetResource(Resource),
}

/// The queue-and-thread pair behind a batch processor.
#[derive(Debug)]
pub(crate) struct BatchProcessor<T: Send + 'static> {
    sender: SyncSender<BatchMessage<T>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped: AtomicUsize,
    max_export_timeout: Duration,
    signal: &'static str,
}

impl<T: Send + 'static> BatchProcessor<T> {
    pub(crate) fn spawn<E: Exporter<T>>(
        signal: &'static str,
        exporter: E,
        config: BatchConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::sync_channel(config.max_queue_size);
        let max_export_timeout = config.max_export_timeout;
        let handle = thread::Builder::new()
            .name(format!("constellation-{signal}"))
            .spawn(move || worker(exporter, receiver, config, signal))
            .expect("failed to spawn batch export thread");

        BatchProcessor {
            sender,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
            max_export_timeout,
            signal,
        }
    }

    /// Queues one item. Never blocks; drops on a full queue.
    pub(crate) fn append(&self, item: T) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        if self.sender.try_send(BatchMessage::Item(item)).is_err() {
            // Warn only on the first drop; the total is reported at shutdown.
            if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                otel_warn!(
                    name: "BatchProcessor.QueueFull",
                    signal = self.signal,
                    message = "telemetry queue is full, dropping items"
                );
            }
        }
    }

    pub(crate) fn force_flush(&self) -> TelemetryResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let (ack, wait) = mpsc::sync_channel(1);
        self.sender
            .try_send(BatchMessage::Flush(ack))
            .map_err(|_| TelemetryError::Internal("flush could not be queued".into()))?;
        wait.recv_timeout(self.max_export_timeout)
            .map_err(|_| TelemetryError::Timeout(self.max_export_timeout))?
    }

    pub(crate) fn shutdown(&self) -> TelemetryResult<()> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            otel_warn!(
                name: "BatchProcessor.ItemsDropped",
                signal = self.signal,
                count = dropped
            );
        }
        let (ack, wait) = mpsc::sync_channel(1);
        self.sender
            .try_send(BatchMessage::Shutdown(ack))
            .map_err(|_| TelemetryError::Internal("shutdown could not be queued".into()))?;
        let result = wait
            .recv_timeout(self.max_export_timeout)
            .map_err(|_| TelemetryError::Timeout(self.max_export_timeout))?;
        self.join_worker();
        result
    }

    pub(crate) fn set_resource(&self, resource: &Resource) {
        let _ = self.sender.try_send(BatchMessage::SetResource(resource.clone()));
    }

    fn join_worker(&self) {
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl<T: Send + 'static> Drop for BatchProcessor<T> {
    fn drop(&mut self) {
        // Last-chance flush for pipelines dropped without explicit shutdown.
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            let (ack, wait) = mpsc::sync_channel(1);
            if self.sender.try_send(BatchMessage::Shutdown(ack)).is_ok() {
                let _ = wait.recv_timeout(self.max_export_timeout);
            }
            self.join_worker();
        }
    }
}

fn worker<T, E: Exporter<T>>(
    mut exporter: E,
    receiver: Receiver<BatchMessage<T>>,
    config: BatchConfig,
    signal: &'static str,
) {
    // The pipeline's own HTTP and logging activity must not loop back in.
    let _suppress = Context::enter_telemetry_suppressed_scope();
    otel_debug!(name: "BatchProcessor.ThreadStarted", signal = signal);

    let mut batch = Vec::with_capacity(config.max_export_batch_size);
    let mut next_export = Instant::now() + config.scheduled_delay;

    loop {
        let timeout = next_export.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(timeout) {
            Ok(BatchMessage::Item(item)) => {
                batch.push(item);
                if batch.len() >= config.max_export_batch_size {
                    let _ = export_batch(&mut exporter, &mut batch, signal);
                    next_export = Instant::now() + config.scheduled_delay;
                }
            }
            Ok(BatchMessage::Flush(ack)) => {
                let result = export_batch(&mut exporter, &mut batch, signal);
                let _ = ack.send(result);
                next_export = Instant::now() + config.scheduled_delay;
            }
            Ok(BatchMessage::Shutdown(ack)) => {
                let result = export_batch(&mut exporter, &mut batch, signal);
                let _ = ack.send(result.and_then(|_| exporter.shutdown()));
                break;
            }
            Ok(BatchMessage::SetResource(resource)) => {
                exporter.set_resource(&resource);
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = export_batch(&mut exporter, &mut batch, signal);
                next_export = Instant::now() + config.scheduled_delay;
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = export_batch(&mut exporter, &mut batch, signal);
                let _ = exporter.shutdown();
                break;
            }
        }
    }

    otel_debug!(name: "BatchProcessor.ThreadStopped", signal = signal);
}

fn export_batch<T, E: Exporter<T>>(
    exporter: &mut E,
    batch: &mut Vec<T>,
    signal: &'static str,
) -> ExportResult {
    if batch.is_empty() {
        return Ok(());
    }
    let count = batch.len();
    let result = exporter.export(std::mem::take(batch));
    match &result {
        Ok(()) => {
            otel_debug!(name: "BatchProcessor.BatchExported", signal = signal, count = count)
        }
        Err(err) => {
            // At-most-once delivery: the batch is gone, only the log remains.
            otel_warn!(
                name: "BatchProcessor.ExportFailed",
                signal = signal,
                count = count,
                error = %err
            )
        }
    }
    result
}
