//! Logger handle: mirrors records locally and ships them in batches
//!
//! Records are buffered until one of three triggers fires: the buffer reaches
//! its flush threshold, the flush interval elapses, or the owner calls
//! [`Logger::flush`]/[`Logger::shutdown`]. Delivery happens on a background
//! task so `log` never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::buffer::{BufferPolicy, Enqueued, LogBatch, LogBuffer};
use super::record::{Context, LogLevel, LogRecord};
use super::transport::{LogTransport, deliver};
use crate::observability::Metrics;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Shorter intervals are raised to this
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

enum FlushCommand {
    Batch(LogBatch),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct Shipping {
    buffer: Arc<LogBuffer>,
    commands: mpsc::UnboundedSender<FlushCommand>,
}

/// Cheap-to-clone logger handle.
///
/// Built with [`Logger::spawn`] it ships records to a [`LogTransport`];
/// built with [`Logger::local`] it only writes to `tracing`.
#[derive(Clone)]
pub struct Logger {
    shipping: Option<Arc<Shipping>>,
    component: Option<Arc<str>>,
}

impl Logger {
    /// Start the background flush task and return a handle to it.
    ///
    /// `flush_interval` is clamped to [`MIN_FLUSH_INTERVAL`].
    pub fn spawn(
        policy: BufferPolicy,
        flush_interval: Duration,
        transport: Arc<dyn LogTransport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        if flush_interval < MIN_FLUSH_INTERVAL {
            warn!(
                requested_ms = flush_interval.as_millis() as u64,
                "Flush interval too short, using {}ms",
                MIN_FLUSH_INTERVAL.as_millis()
            );
        }
        let flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        let buffer = Arc::new(LogBuffer::new(policy));
        let (commands, rx) = mpsc::unbounded_channel();

        let worker = FlushWorker {
            buffer: Arc::clone(&buffer),
            transport,
            metrics,
            flush_interval,
        };
        tokio::spawn(worker.run(rx));

        info!(
            flush_threshold = policy.flush_threshold,
            capacity = policy.capacity,
            interval_ms = flush_interval.as_millis() as u64,
            "Remote log shipping started"
        );

        Self {
            shipping: Some(Arc::new(Shipping { buffer, commands })),
            component: None,
        }
    }

    /// Logger that writes to the local console only.
    pub fn local() -> Self {
        Self {
            shipping: None,
            component: None,
        }
    }

    /// A handle that tags every record with `component`.
    pub fn for_component(&self, component: impl Into<String>) -> Self {
        Self {
            shipping: self.shipping.clone(),
            component: Some(Arc::from(component.into())),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: Option<Context>) {
        let mut record = LogRecord::new(level, message);
        if let Some(context) = context {
            record = record.with_context(context);
        }
        self.record(record);
    }

    /// Mirror a prepared record to `tracing` and queue it for shipping.
    pub fn record(&self, mut record: LogRecord) {
        if record.component().is_none() {
            if let Some(component) = &self.component {
                record = record.with_component(component.as_ref());
            }
        }

        mirror(&record);

        let Some(shipping) = &self.shipping else {
            return;
        };

        if shipping.buffer.enqueue(record) == Enqueued::ThresholdReached {
            let batch = shipping.buffer.drain();
            if !batch.is_empty() {
                debug!(records = batch.len(), "Flush threshold reached");
                // A closed channel means the worker is gone; the records are
                // already mirrored locally.
                let _ = shipping.commands.send(FlushCommand::Batch(batch));
            }
        }
    }

    /// Records waiting in the buffer
    pub fn pending(&self) -> usize {
        self.shipping.as_ref().map_or(0, |s| s.buffer.len())
    }

    /// Records evicted by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.shipping.as_ref().map_or(0, |s| s.buffer.dropped())
    }

    /// Drain the buffer and wait until everything queued so far is delivered.
    pub async fn flush(&self) {
        self.request(FlushCommand::Flush).await;
    }

    /// Final flush, then stop the background task.
    pub async fn shutdown(&self) {
        self.request(FlushCommand::Shutdown).await;
    }

    async fn request(&self, make: fn(oneshot::Sender<()>) -> FlushCommand) {
        let Some(shipping) = &self.shipping else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if shipping.commands.send(make(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Write a record to the local `tracing` subscriber at its own level.
pub fn mirror(record: &LogRecord) {
    let component = record.component().unwrap_or("-");
    let message = record.message();
    match record.level() {
        LogLevel::Debug => tracing::debug!(component, "{message}"),
        LogLevel::Info => tracing::info!(component, "{message}"),
        LogLevel::Warn => tracing::warn!(component, "{message}"),
        LogLevel::Error => tracing::error!(component, "{message}"),
    }
}

struct FlushWorker {
    buffer: Arc<LogBuffer>,
    transport: Arc<dyn LogTransport>,
    metrics: Arc<Metrics>,
    flush_interval: Duration,
}

impl FlushWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<FlushCommand>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(FlushCommand::Batch(batch)) => {
                        self.ship(batch).await;
                        ticker.reset();
                    }
                    Some(FlushCommand::Flush(ack)) => {
                        self.ship(self.buffer.drain()).await;
                        ticker.reset();
                        let _ = ack.send(());
                    }
                    Some(FlushCommand::Shutdown(ack)) => {
                        self.ship(self.buffer.drain()).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.ship(self.buffer.drain()).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.ship(self.buffer.drain()).await;
                }
            }
        }

        debug!("Log flush worker stopped");
    }

    async fn ship(&self, batch: LogBatch) {
        deliver(self.transport.as_ref(), batch, &self.metrics).await;
    }
}
