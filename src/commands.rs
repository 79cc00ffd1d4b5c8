use std::net::SocketAddr;
use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use genrelay::api::{self, AppState};
use genrelay::batch::{BatchError, BatchRunner, SkippedLine};
use genrelay::context::AppContext;
use genrelay::ledger::LogLedger;
use genrelay::provider::{GenerationKind, GenerationRequest, Payload};
use genrelay::storage::StorageClient;

use crate::cli::{BatchArgs, GenerateArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn serve(context: &AppContext, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let config = &context.config;

    info!(path = %config.server.ledger_path.display(), "Opening log ledger");
    let ledger = LogLedger::open(&config.server.ledger_path)
        .map_err(|e| format!("Failed to open log ledger: {e}"))?;

    if config.server.retention_days > 0 {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(config.server.retention_days));
        match ledger.prune_older_than(cutoff) {
            Ok(removed) => info!(removed, retention_days = config.server.retention_days, "Pruned stored logs"),
            Err(e) => warn!(error = %e, "Failed to prune stored logs"),
        }
    }

    let address = address.unwrap_or(config.server.bind_addr);
    let state = AppState::new(
        config.clone(),
        ledger,
        context.orchestrator(),
        context.metrics.clone(),
    );
    let ledger = state.ledger.clone();

    api::run(state, address).await?;

    ledger.persist()?;
    Ok(())
}

pub async fn generate(context: &AppContext, args: GenerateArgs) -> Result<(), AnyError> {
    let orchestrator = context.require_orchestrator()?;

    let mut request = if args.image {
        GenerationRequest::image(args.prompt)
    } else {
        GenerationRequest::content(args.prompt)
    };
    if let Some(model) = args.model {
        request = request.with_model(model);
    }

    let result = orchestrator.invoke(&request).await;

    let payload = match (&result.payload, &result.error) {
        (Some(payload), None) => payload,
        (_, Some(error)) => {
            return Err(format!(
                "generation failed after {} attempt(s) [{}]: {}",
                result.attempts,
                error.kind.as_str(),
                error.message
            )
            .into());
        }
        (None, None) => return Err("provider returned no payload".into()),
    };

    let out = match (args.out, request.kind, payload) {
        (Some(path), _, _) => Some(path),
        // Binary output never goes to the terminal.
        (None, GenerationKind::Image, Payload::Image { .. }) => {
            Some(format!("generated.{}", payload.extension()).into())
        }
        (None, _, _) => None,
    };

    match out {
        Some(path) => {
            write_payload(&path, payload).await?;
            println!("{} ({}) -> {}", result.model, payload.mime_type(), path.display());
        }
        None => match payload {
            Payload::Text { text } => println!("{text}"),
            Payload::ImageUri { uri, .. } => println!("{uri}"),
            Payload::Image { .. } => {}
        },
    }

    Ok(())
}

async fn write_payload(path: &Path, payload: &Payload) -> Result<(), AnyError> {
    match payload {
        Payload::Text { text } => tokio::fs::write(path, text).await?,
        Payload::Image { data, .. } => tokio::fs::write(path, data).await?,
        Payload::ImageUri { uri, .. } => tokio::fs::write(path, uri).await?,
    }
    Ok(())
}

pub async fn batch(context: &AppContext, args: BatchArgs) -> Result<(), AnyError> {
    let orchestrator = context.require_orchestrator()?;
    let storage = StorageClient::from_config(&context.config.storage)?;

    let summary = match BatchRunner::new(&orchestrator, &storage)
        .overwrite(args.overwrite)
        .run_file(&args.file)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            if let BatchError::NoValidEntries { skipped } = &e {
                print_skipped(skipped);
            }
            return Err(e.into());
        }
    };

    print_skipped(&summary.skipped);
    for outcome in &summary.outcomes {
        match (&outcome.stored, &outcome.error) {
            (Some(stored), _) if outcome.reused => println!("kept   {} -> {stored}", outcome.key),
            (Some(stored), _) => println!("ok     {} -> {stored}", outcome.key),
            (None, Some(error)) => println!("failed {}: {error}", outcome.key),
            (None, None) => {}
        }
    }
    println!("{summary}");

    Ok(())
}

fn print_skipped(skipped: &[SkippedLine]) {
    for line in skipped {
        eprintln!("line {}: {}", line.line, line.reason);
    }
}
