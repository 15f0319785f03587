use crate::export::{ExportResult, MetricsExporter};
use crate::metrics::{MeterProvider, MeterProviderInner};
use crate::{Context, TelemetryError, TelemetryResult};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, Weak};
use std::thread;
use std::time::Duration;

pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const ACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub(crate) struct ReaderConfig {
    exporter: Box<dyn MetricsExporter>,
    interval: Duration,
}

impl ReaderConfig {
    pub(crate) fn new(exporter: Box<dyn MetricsExporter>, interval: Duration) -> Self {
        ReaderConfig { exporter, interval }
    }
}

enum ReaderMessage {
    Flush(SyncSender<ExportResult>),
    Shutdown(SyncSender<ExportResult>),
}

/// Collects and exports metric snapshots from a dedicated thread on a fixed
/// interval.
///
/// The thread holds only a weak reference to the provider, so dropping every
/// provider handle stops the reader instead of leaking it.
#[derive(Debug)]
pub struct PeriodicReader {
    sender: SyncSender<ReaderMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PeriodicReader {
    pub(crate) fn spawn(config: ReaderConfig, provider: MeterProvider) -> Self {
        let (sender, receiver) = mpsc::sync_channel(4);
        let weak = std::sync::Arc::downgrade(&provider.inner);
        let handle = thread::Builder::new()
            .name("constellation-metrics".to_string())
            .spawn(move || worker(config, weak, receiver))
            .expect("failed to spawn metrics reader thread");
        PeriodicReader {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn force_flush(&self) -> TelemetryResult<()> {
        let (ack, wait) = mpsc::sync_channel(1);
        self.sender
            .try_send(ReaderMessage::Flush(ack))
            .map_err(|_| TelemetryError::Internal("flush could not be queued".into()))?;
        wait.recv_timeout(ACK_TIMEOUT)
            .map_err(|_| TelemetryError::Timeout(ACK_TIMEOUT))?
    }

    pub(crate) fn shutdown(&self) -> TelemetryResult<()> {
        let (ack, wait) = mpsc::sync_channel(1);
        self.sender
            .try_send(ReaderMessage::Shutdown(ack))
            .map_err(|_| TelemetryError::Internal("shutdown could not be queued".into()))?;
        let result = wait
            .recv_timeout(ACK_TIMEOUT)
            .map_err(|_| TelemetryError::Timeout(ACK_TIMEOUT))?;
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        result
    }
}

fn worker(
    config: ReaderConfig,
    provider: Weak<MeterProviderInner>,
    receiver: Receiver<ReaderMessage>,
) {
    let _suppress = Context::enter_telemetry_suppressed_scope();
    otel_debug!(name: "PeriodicReader.ThreadStarted", interval_secs = config.interval.as_secs());
    let mut exporter = config.exporter;

    loop {
        match receiver.recv_timeout(config.interval) {
            Ok(ReaderMessage::Flush(ack)) => {
                let _ = ack.send(collect_and_export(&provider, &mut exporter));
            }
            Ok(ReaderMessage::Shutdown(ack)) => {
                // The final snapshot ships before the transport closes.
                let result = collect_and_export(&provider, &mut exporter)
                    .and_then(|_| exporter.shutdown());
                let _ = ack.send(result);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = collect_and_export(&provider, &mut exporter);
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = collect_and_export(&provider, &mut exporter);
                let _ = exporter.shutdown();
                break;
            }
        }
    }

    otel_debug!(name: "PeriodicReader.ThreadStopped");
}

fn collect_and_export(
    provider: &Weak<MeterProviderInner>,
    exporter: &mut Box<dyn MetricsExporter>,
) -> ExportResult {
    let inner = match provider.upgrade() {
        Some(inner) => inner,
        None => return Ok(()),
    };
    let snapshot = MeterProvider { inner }.collect();
    let result = exporter.export(&snapshot);
    if let Err(err) = &result {
        otel_warn!(name: "PeriodicReader.ExportFailed", error = %err);
    }
    result
}
