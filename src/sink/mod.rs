mod console;
mod csv_log;

pub use console::ConsoleSink;
pub use csv_log::CsvLogSink;

use crate::metrics::DerivedMetric;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Log a drop warning on the first drop and then every Nth one
const DROP_WARN_EVERY: u64 = 100;

/// Downstream consumer of derived metrics.
///
/// Sinks run on the dispatcher thread, never on the polling tasks, so a slow
/// sink can at worst fill the queue; it cannot stall polling.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn report(&mut self, metric: &DerivedMetric) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

enum SinkMessage {
    Report(Box<DerivedMetric>),
    Close,
}

/// Cheap, cloneable sender side handed to every polling task
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkMessage>,
    dropped: Arc<AtomicU64>,
}

impl SinkHandle {
    /// Queue a metric without waiting. Returns false if it was dropped.
    pub fn report(&self, metric: DerivedMetric) -> bool {
        match self.tx.try_send(SinkMessage::Report(Box::new(metric))) {
            Ok(()) => true,
            Err(TrySendError::Full(SinkMessage::Report(metric))) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
                    tracing::warn!(
                        "Sink queue full, dropped report for {} {} ({} dropped so far)",
                        metric.target,
                        metric.oid,
                        dropped
                    );
                }
                false
            }
            Err(TrySendError::Full(SinkMessage::Close)) => false,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Sink dispatcher closed, report discarded");
                false
            }
        }
    }

    /// Reports dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fans reports out to every configured sink on a dedicated thread
pub struct SinkDispatcher {
    handle: SinkHandle,
    worker: Option<JoinHandle<()>>,
}

impl SinkDispatcher {
    pub fn spawn(sinks: Vec<Box<dyn Sink>>, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let names: Vec<String> = sinks.iter().map(|s| s.name().to_string()).collect();

        let worker = std::thread::Builder::new()
            .name("sink-dispatcher".to_string())
            .spawn(move || run_dispatcher(sinks, rx))?;

        tracing::info!(
            "Sink dispatcher started (sinks: [{}], queue: {})",
            names.join(", "),
            capacity
        );

        Ok(Self {
            handle: SinkHandle {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Drain queued reports, flush every sink and stop the worker thread.
    /// Gives up waiting after `deadline`.
    pub async fn shutdown(mut self, deadline: Duration) {
        let dropped = self.handle.dropped();
        if dropped > 0 {
            tracing::warn!("{} reports were dropped due to sink backpressure", dropped);
        }

        let close = self.handle.tx.send(SinkMessage::Close);
        if tokio::time::timeout(deadline, close).await.is_err() {
            tracing::warn!("Sink dispatcher did not accept close within {:?}", deadline);
            return;
        }

        let Some(worker) = self.worker.take() else {
            return;
        };
        let join = tokio::task::spawn_blocking(move || worker.join());
        match tokio::time::timeout(deadline, join).await {
            Ok(Ok(Ok(()))) => tracing::info!("Sink dispatcher stopped"),
            Ok(Ok(Err(_))) => tracing::error!("Sink dispatcher thread panicked"),
            Ok(Err(e)) => tracing::error!("Sink dispatcher join failed: {}", e),
            Err(_) => tracing::warn!("Sink dispatcher did not stop within {:?}", deadline),
        }
    }
}

fn run_dispatcher(mut sinks: Vec<Box<dyn Sink>>, mut rx: mpsc::Receiver<SinkMessage>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            SinkMessage::Report(metric) => {
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.report(&metric) {
                        tracing::warn!("Sink {} failed to record report: {:#}", sink.name(), e);
                    }
                }
            }
            SinkMessage::Close => break,
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.flush() {
            tracing::error!("Failed to flush sink {}: {:#}", sink.name(), e);
        }
    }
}
