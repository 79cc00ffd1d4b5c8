//! Client-side structured logging with buffered remote delivery
//!
//! - [`LogRecord`] - one structured entry, timestamped at creation
//! - [`LogBuffer`] - bounded drop-oldest queue drained into [`LogBatch`]es
//! - [`LogTransport`] - one-shot delivery of a batch, see [`deliver`]
//! - [`Logger`] - the handle call sites use; flushes on size, interval or request

mod buffer;
mod logger;
mod record;
mod transport;

pub use buffer::{BufferPolicy, DEFAULT_CAPACITY, DEFAULT_FLUSH_THRESHOLD, Enqueued, LogBatch, LogBuffer};
pub use logger::{DEFAULT_FLUSH_INTERVAL, Logger, mirror};
pub use record::{Context, LogLevel, LogRecord, RecordError, record};
pub use transport::{HttpLogTransport, LogTransport, TransportError, TransportOutcome, deliver};
