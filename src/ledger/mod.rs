/// Fjall-based persistence for ingested log entries
///
/// The ingestion endpoint appends every accepted entry here. Entries are
/// keyed by creation time, so the operator view reads them newest first
/// with a reverse prefix scan and retention drops a key range.
///
/// ## Usage
///
/// ```rust,ignore
/// use genrelay::ledger::LogLedger;
///
/// let ledger = LogLedger::open("data/ledger")?;
/// ledger.append(&entries)?;
/// let latest = ledger.recent(50)?;
/// ```
pub mod entry;
pub mod error;
pub mod partitions;
pub mod store;

pub use entry::{DEFAULT_SOURCE, DEFAULT_URL, StoredLog};
pub use error::{LedgerError, Result};
pub use store::LogLedger;
