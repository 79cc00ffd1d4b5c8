use thiserror::Error;

/// Failures of the on-disk log ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger storage error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Stored log could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
