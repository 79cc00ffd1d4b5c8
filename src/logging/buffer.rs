//! Bounded in-process queue of pending log records

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::record::LogRecord;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 20;
pub const DEFAULT_CAPACITY: usize = 1000;

/// Size limits for a [`LogBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Pending count at which the buffer asks to be flushed
    pub flush_threshold: usize,
    /// Hard ceiling; the oldest record is evicted beyond this
    pub capacity: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Ordered batch of records removed from the buffer in one drain.
///
/// Serializes to the ingestion endpoint body: `{ "logs": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogBatch {
    #[serde(rename = "logs")]
    records: Vec<LogRecord>,
}

impl LogBatch {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }
}

/// What `enqueue` observed after appending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Buffered,
    /// Pending count reached the flush threshold
    ThresholdReached,
}

/// Log buffer shared by every call site.
///
/// `enqueue` and `drain` hold the same lock, so a record lands in exactly one
/// drained batch.
#[derive(Debug)]
pub struct LogBuffer {
    pending: Mutex<VecDeque<LogRecord>>,
    policy: BufferPolicy,
    dropped: AtomicU64,
}

impl LogBuffer {
    pub fn new(policy: BufferPolicy) -> Self {
        let policy = BufferPolicy {
            capacity: policy.capacity.max(1),
            flush_threshold: policy.flush_threshold.max(1),
        };
        Self {
            pending: Mutex::new(VecDeque::with_capacity(policy.flush_threshold)),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    /// Append a record at the tail, evicting the oldest record when full.
    pub fn enqueue(&self, record: LogRecord) -> Enqueued {
        let mut pending = self.pending.lock();

        if pending.len() >= self.policy.capacity {
            pending.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, capacity = self.policy.capacity, "Log buffer full, evicted oldest record");
        }

        pending.push_back(record);

        if pending.len() >= self.policy.flush_threshold {
            Enqueued::ThresholdReached
        } else {
            Enqueued::Buffered
        }
    }

    /// Remove and return everything currently buffered.
    pub fn drain(&self) -> LogBatch {
        let drained = std::mem::take(&mut *self.pending.lock());
        LogBatch::new(drained.into())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Records evicted by the drop-oldest policy since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(BufferPolicy::default())
    }
}
