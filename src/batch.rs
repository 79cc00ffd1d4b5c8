//! Batch generation from a JSON-lines prompt file
//!
//! Each line looks like:
//!
//! ```json
//! {"key": "covers/fox", "prompt": "a fox in the snow", "kind": "image"}
//! ```
//!
//! `kind` defaults to `content`; `model` overrides the configured model.
//! Successful payloads land in object storage as `<key>.<ext>` next to a
//! `<key>.json` sidecar describing the call. Keys that already have a stored
//! payload are kept as they are unless the runner is told to overwrite, so an
//! interrupted run can be resumed with the same file.

use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::orchestrator::{GenerationResult, Orchestrator};
use crate::provider::{GenerationKind, GenerationRequest};
use crate::storage::StorageClient;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to read batch file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Batch file has no valid entries ({} malformed lines)", skipped.len())]
    NoValidEntries { skipped: Vec<SkippedLine> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchItem {
    pub key: String,
    pub prompt: String,
    #[serde(default)]
    pub kind: GenerationKind,
    #[serde(default)]
    pub model: Option<String>,
}

impl BatchItem {
    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            kind: self.kind,
            prompt: self.prompt.clone(),
            model: self.model.clone(),
        }
    }
}

/// A line that could not be parsed
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub key: String,
    /// Object key of the stored payload
    pub stored: Option<String>,
    pub error: Option<String>,
    /// Payload was already in storage and nothing was generated
    pub reused: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub outcomes: Vec<ItemOutcome>,
    pub skipped: Vec<SkippedLine>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn reused(&self) -> usize {
        self.outcomes.iter().filter(|o| o.reused).count()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} succeeded", self.succeeded(), self.total())?;
        let reused = self.reused();
        if reused > 0 {
            write!(f, ", {reused} already stored")?;
        }
        if !self.skipped.is_empty() {
            write!(f, ", {} malformed lines skipped", self.skipped.len())?;
        }
        Ok(())
    }
}

/// Parse JSON lines. Blank lines are ignored; line numbers start at 1.
pub fn parse_items(input: &str) -> (Vec<BatchItem>, Vec<SkippedLine>) {
    let mut items = Vec::new();
    let mut skipped = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match serde_json::from_str::<BatchItem>(raw) {
            Ok(item) if item.key.trim().is_empty() => skipped.push(SkippedLine {
                line,
                reason: "key must not be empty".into(),
            }),
            Ok(item) if item.prompt.trim().is_empty() => skipped.push(SkippedLine {
                line,
                reason: "prompt must not be empty".into(),
            }),
            Ok(item) => items.push(item),
            Err(e) => skipped.push(SkippedLine {
                line,
                reason: e.to_string(),
            }),
        }
    }

    (items, skipped)
}

pub struct BatchRunner<'a> {
    orchestrator: &'a Orchestrator,
    storage: &'a StorageClient,
    overwrite: bool,
}

impl<'a> BatchRunner<'a> {
    pub fn new(orchestrator: &'a Orchestrator, storage: &'a StorageClient) -> Self {
        Self {
            orchestrator,
            storage,
            overwrite: false,
        }
    }

    /// Regenerate keys that already have a stored payload
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub async fn run_file(&self, path: &Path) -> Result<BatchSummary, BatchError> {
        let input = tokio::fs::read_to_string(path).await?;
        self.run_str(&input).await
    }

    pub async fn run_str(&self, input: &str) -> Result<BatchSummary, BatchError> {
        let (items, skipped) = parse_items(input);
        for bad in &skipped {
            warn!(line = bad.line, reason = %bad.reason, "Skipping malformed batch line");
        }
        if items.is_empty() {
            return Err(BatchError::NoValidEntries { skipped });
        }

        let mut outcomes: Vec<Option<ItemOutcome>> = Vec::with_capacity(items.len());
        let mut pending = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match self.already_stored(item).await {
                Some(stored) => {
                    info!(key = %item.key, object = %stored, "Keeping stored payload");
                    outcomes.push(Some(ItemOutcome {
                        key: item.key.clone(),
                        stored: Some(stored),
                        error: None,
                        reused: true,
                    }));
                }
                None => {
                    outcomes.push(None);
                    pending.push(index);
                }
            }
        }

        let requests: Vec<GenerationRequest> =
            pending.iter().map(|&index| items[index].request()).collect();
        let results = self.orchestrator.invoke_many(&requests).await;

        for (&index, result) in pending.iter().zip(results) {
            outcomes[index] = Some(self.store(&items[index], &result).await);
        }
        let outcomes = outcomes.into_iter().flatten().collect();

        let summary = BatchSummary { outcomes, skipped };
        info!(
            total = summary.total(),
            succeeded = summary.succeeded(),
            skipped = summary.skipped.len(),
            "Batch run finished"
        );
        Ok(summary)
    }

    async fn already_stored(&self, item: &BatchItem) -> Option<String> {
        if self.overwrite {
            return None;
        }
        match self.storage.stored_object(&item.key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %item.key, error = %e, "Could not check for a stored payload, regenerating");
                None
            }
        }
    }

    async fn store(&self, item: &BatchItem, result: &GenerationResult) -> ItemOutcome {
        let failed = |error: String| ItemOutcome {
            key: item.key.clone(),
            stored: None,
            error: Some(error),
            reused: false,
        };

        let Some(payload) = result.payload.as_ref().filter(|_| result.success) else {
            let message = result
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.kind.as_str(), e.message))
                .unwrap_or_else(|| "no payload".to_string());
            return failed(message);
        };

        let metadata = json!({
            "key": item.key,
            "prompt": item.prompt,
            "kind": result.kind,
            "model": result.model,
            "mime_type": payload.mime_type(),
            "attempts": result.attempts,
            "elapsed_ms": result.elapsed_ms,
            "created_at": Utc::now(),
        });

        match self.storage.put_payload(&item.key, payload, &metadata).await {
            Ok(uploaded) => ItemOutcome {
                key: item.key.clone(),
                stored: Some(uploaded.key),
                error: None,
                reused: false,
            },
            Err(e) => {
                error!(key = %item.key, error = %e, "Failed to store batch payload");
                failed(format!("storage: {e}"))
            }
        }
    }
}
