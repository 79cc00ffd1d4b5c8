/// Key layout for Fjall partitions
///
/// Partition structure:
/// - `logs`: log:{created_ms:016}:{id} -> StoredLog (JSON)
/// - `metadata`: meta:{key} -> value (string)
///
/// The zero-padded millisecond prefix makes byte order equal to time order,
/// so range scans double as time scans.

pub const LOG_PREFIX: &str = "log:";

/// Encode a log key: log:{created_ms:016}:{id}
pub fn encode_log_key(created_ms: u64, id: &str) -> Vec<u8> {
    format!("{LOG_PREFIX}{created_ms:016}:{id}").into_bytes()
}

/// Lower bound for every key created at or after `created_ms`
pub fn encode_log_bound(created_ms: u64) -> Vec<u8> {
    format!("{LOG_PREFIX}{created_ms:016}:").into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
