//! Rate-limited, retried, normalized generation calls
//!
//! `invoke` takes one token from the shared bucket, runs the provider call
//! through the retry policy, normalizes the response and records the outcome
//! through the logger. Failures come back as a [`GenerationResult`] with
//! `success: false`; nothing here panics or returns `Err` to the caller.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::limiter::TokenBucket;
use crate::logging::{Context, LogLevel, Logger};
use crate::observability::Metrics;
use crate::provider::{
    GenerationKind, GenerationProvider, GenerationRequest, Payload, ProviderError, normalize,
};
use crate::retry::{RetryError, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad request, auth failure or another non-retryable provider answer
    FatalProvider,
    RetriesExhausted,
    /// Deadline passed while waiting for a token, calling or backing off
    Timeout,
    /// The provider answered but nothing usable could be extracted
    InvalidResponse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FatalProvider => "fatal_provider",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Normalized outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
    pub kind: GenerationKind,
    pub model: String,
    pub attempts: u32,
    pub rate_limit_wait_ms: u64,
    pub elapsed_ms: u64,
}

impl GenerationResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Default model per generation kind
#[derive(Debug, Clone)]
pub struct Models {
    pub content: String,
    pub image: String,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            content: "gemini-2.0-flash".to_string(),
            image: "imagen-3.0-fast-generate-001".to_string(),
        }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn GenerationProvider>,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
    logger: Logger,
    metrics: Arc<Metrics>,
    models: Models,
    deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        limiter: Arc<TokenBucket>,
        retry: RetryPolicy,
        logger: Logger,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
            logger: logger.for_component("orchestrator"),
            metrics,
            models: Models::default(),
            deadline: None,
        }
    }

    pub fn with_models(mut self, models: Models) -> Self {
        self.models = models;
        self
    }

    /// Budget applied to every `invoke` that doesn't pass its own deadline.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    pub async fn invoke(&self, request: &GenerationRequest) -> GenerationResult {
        let deadline = self.deadline.map(|budget| Instant::now() + budget);
        self.run(request, deadline).await
    }

    pub async fn invoke_with_deadline(
        &self,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> GenerationResult {
        self.run(request, Some(deadline)).await
    }

    /// Run requests one after another through the same limiter.
    ///
    /// A failed item does not stop the rest; results keep request order.
    pub async fn invoke_many(&self, requests: &[GenerationRequest]) -> Vec<GenerationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.invoke(request).await);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(total = results.len(), succeeded, "Batch invocation finished");
        results
    }

    fn model_for<'a>(&'a self, request: &'a GenerationRequest) -> &'a str {
        match (&request.model, request.kind) {
            (Some(model), _) => model,
            (None, GenerationKind::Content) => &self.models.content,
            (None, GenerationKind::Image) => &self.models.image,
        }
    }

    async fn run(&self, request: &GenerationRequest, deadline: Option<Instant>) -> GenerationResult {
        let started = Instant::now();
        let model = self.model_for(request).to_string();

        let waited = match self.limiter.until_ready(deadline).await {
            Ok(waited) => waited,
            Err(e) => {
                let error = GenerationError {
                    kind: ErrorKind::Timeout,
                    message: e.to_string(),
                };
                return self.finish(request, model, started, Duration::ZERO, 0, Err(error));
            }
        };
        if !waited.is_zero() {
            self.metrics.rate_limit_waited();
        }

        let outcome = self
            .retry
            .run(deadline, |_attempt| self.call(request.kind, &request.prompt, &model))
            .await;

        let attempts = match &outcome {
            Ok(retried) => retried.attempt_count(),
            Err(e) => e.attempts().len() as u32,
        };
        self.metrics.retried(u64::from(attempts.saturating_sub(1)));

        let outcome = outcome.map(|retried| retried.value).map_err(to_generation_error);
        self.finish(request, model, started, waited, attempts, outcome)
    }

    async fn call(
        &self,
        kind: GenerationKind,
        prompt: &str,
        model: &str,
    ) -> Result<Payload, ProviderError> {
        let response = match kind {
            GenerationKind::Content => self.provider.generate_content(prompt, model).await?,
            GenerationKind::Image => self.provider.generate_image(prompt, model).await?,
        };
        Ok(normalize(response)?)
    }

    fn finish(
        &self,
        request: &GenerationRequest,
        model: String,
        started: Instant,
        waited: Duration,
        attempts: u32,
        outcome: Result<Payload, GenerationError>,
    ) -> GenerationResult {
        let result = match outcome {
            Ok(payload) => GenerationResult {
                success: true,
                payload: Some(payload),
                error: None,
                kind: request.kind,
                model,
                attempts,
                rate_limit_wait_ms: waited.as_millis() as u64,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Err(error) => GenerationResult {
                success: false,
                payload: None,
                error: Some(error),
                kind: request.kind,
                model,
                attempts,
                rate_limit_wait_ms: waited.as_millis() as u64,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        };

        if result.success {
            self.metrics.invocation_succeeded();
        } else {
            self.metrics.invocation_failed();
        }
        self.record(request, &result);
        result
    }

    fn record(&self, request: &GenerationRequest, result: &GenerationResult) {
        let mut context = Context::new();
        context.insert("kind".into(), json!(result.kind.as_str()));
        context.insert("model".into(), json!(result.model));
        context.insert("attempts".into(), json!(result.attempts));
        context.insert("rate_limit_wait_ms".into(), json!(result.rate_limit_wait_ms));
        context.insert("elapsed_ms".into(), json!(result.elapsed_ms));
        context.insert("prompt_chars".into(), json!(request.prompt.chars().count()));

        match &result.error {
            None => {
                if let Some(payload) = &result.payload {
                    context.insert("mime_type".into(), json!(payload.mime_type()));
                }
                self.logger
                    .log(LogLevel::Info, "Generation succeeded", Some(context));
            }
            Some(error) => {
                context.insert("error_kind".into(), json!(error.kind.as_str()));
                context.insert("error".into(), json!(error.message));
                self.logger.log(LogLevel::Error, "Generation failed", Some(context));
            }
        }
    }
}

fn to_generation_error(err: RetryError<ProviderError>) -> GenerationError {
    let kind = match &err {
        RetryError::Fatal {
            error: ProviderError::Malformed(_),
            ..
        } => ErrorKind::InvalidResponse,
        RetryError::Fatal { .. } => ErrorKind::FatalProvider,
        RetryError::Exhausted { .. } => ErrorKind::RetriesExhausted,
        RetryError::Timeout { .. } => ErrorKind::Timeout,
    };
    let message = match &err {
        RetryError::Fatal { error, .. } => error.to_string(),
        RetryError::Exhausted { last, .. } => format!("{err}: {last}"),
        RetryError::Timeout { last: Some(last), .. } => format!("{err}: {last}"),
        RetryError::Timeout { last: None, .. } => err.to_string(),
    };
    GenerationError { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::RateLimit;
    use crate::logging::{BufferPolicy, LogBatch, LogTransport, TransportError};
    use crate::provider::ProviderResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    type Script = Box<dyn Fn(usize) -> Result<Value, ProviderError> + Send + Sync>;

    /// Provider whose answer depends on the call number
    struct FakeProvider {
        script: Script,
        calls: Mutex<Vec<(Instant, String, String)>>,
    }

    impl FakeProvider {
        fn new(script: impl Fn(usize) -> Result<Value, ProviderError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn answer(&self, op: &str, model: &str) -> crate::provider::Result<ProviderResponse> {
            let n = {
                let mut calls = self.calls.lock();
                calls.push((Instant::now(), op.to_string(), model.to_string()));
                calls.len() - 1
            };
            let value = (self.script)(n)?;
            serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl GenerationProvider for FakeProvider {
        async fn generate_content(&self, _prompt: &str, model: &str) -> crate::provider::Result<ProviderResponse> {
            self.answer("content", model)
        }

        async fn generate_image(&self, _prompt: &str, model: &str) -> crate::provider::Result<ProviderResponse> {
            self.answer("image", model)
        }
    }

    fn text(s: &str) -> Result<Value, ProviderError> {
        Ok(json!({"candidates": [{"content": {"parts": [{"text": s}]}}]}))
    }

    fn quota() -> ProviderError {
        ProviderError::Status {
            status: 429,
            code: Some("RESOURCE_EXHAUSTED".into()),
            message: "Quota exceeded".into(),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    fn orchestrator(provider: Arc<FakeProvider>, limit: RateLimit, max_attempts: u32) -> Orchestrator {
        Orchestrator::new(
            provider,
            Arc::new(TokenBucket::new(limit)),
            policy(max_attempts),
            Logger::local(),
            Arc::new(Metrics::new()),
        )
    }

    fn generous() -> RateLimit {
        RateLimit::new(100, 100.0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_per_minute_spaces_calls() {
        let provider = FakeProvider::new(|_| text("ok"));
        let limit = RateLimit::new(1, 1.0 / 60.0).unwrap();
        let orch = orchestrator(Arc::clone(&provider), limit, 3);

        let request = GenerationRequest::content("hello");
        let first = orch.invoke(&request).await;
        let second = orch.invoke(&request).await;

        assert!(first.success && second.success);
        assert_eq!(first.rate_limit_wait_ms, 0);

        let calls = provider.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        let gap = calls[1].0 - calls[0].0;
        assert!(gap >= Duration::from_secs(59), "gap {gap:?}");
        assert!(gap <= Duration::from_secs(61), "gap {gap:?}");
        assert!(second.rate_limit_wait_ms >= 59_000);
    }

    #[tokio::test]
    async fn test_inline_image_under_candidates_is_exposed() {
        let provider = FakeProvider::new(|_| {
            Ok(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "rendered"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw=="}}
                ]}}]
            }))
        });
        let orch = orchestrator(provider, generous(), 3);

        let result = orch.invoke(&GenerationRequest::image("a red fox")).await;

        assert!(result.success);
        assert!(result.error.is_none());
        let payload = result.payload.unwrap();
        assert_eq!(payload.image_bytes().unwrap().as_ref(), &[0x89, b'P', b'N', b'G']);
        assert_eq!(payload.mime_type(), "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_then_success() {
        let provider = FakeProvider::new(|n| if n < 2 { Err(quota()) } else { text("finally") });
        let orch = orchestrator(Arc::clone(&provider), generous(), 5);

        let start = Instant::now();
        let result = orch.invoke(&GenerationRequest::content("retry me")).await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(provider.call_count(), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(orch.metrics.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_not_retried() {
        let provider = FakeProvider::new(|_| {
            Err(ProviderError::Status {
                status: 400,
                code: Some("INVALID_ARGUMENT".into()),
                message: "prompt rejected".into(),
            })
        });
        let orch = orchestrator(Arc::clone(&provider), generous(), 5);

        let result = orch.invoke(&GenerationRequest::content("bad")).await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::FatalProvider));
        assert_eq!(result.attempts, 1);
        assert_eq!(provider.call_count(), 1);
        assert!(result.error.unwrap().message.contains("prompt rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let provider = FakeProvider::new(|_| {
            Err(ProviderError::Status {
                status: 503,
                code: None,
                message: "overloaded".into(),
            })
        });
        let orch = orchestrator(Arc::clone(&provider), generous(), 3);

        let result = orch.invoke(&GenerationRequest::image("busy")).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::RetriesExhausted));
        assert_eq!(result.attempts, 3);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unusable_response_is_invalid() {
        let provider = FakeProvider::new(|_| Ok(json!({"candidates": []})));
        let orch = orchestrator(Arc::clone(&provider), generous(), 5);

        let result = orch.invoke(&GenerationRequest::content("empty")).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidResponse));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_waiting_for_token() {
        let provider = FakeProvider::new(|_| text("ok"));
        let limit = RateLimit::new(1, 1.0 / 60.0).unwrap();
        let orch = orchestrator(Arc::clone(&provider), limit, 3)
            .with_deadline(Some(Duration::from_secs(10)));

        assert!(orch.invoke(&GenerationRequest::content("first")).await.success);
        let second = orch.invoke(&GenerationRequest::content("second")).await;

        assert_eq!(second.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(second.attempts, 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_backoff() {
        let provider = FakeProvider::new(|_| Err(quota()));
        let orch = orchestrator(Arc::clone(&provider), generous(), 10);

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = orch
            .invoke_with_deadline(&GenerationRequest::content("x"), deadline)
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        // 1s + 2s fit, the 4s backoff does not
        assert_eq!(provider.call_count(), 3);
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test]
    async fn test_invoke_many_collects_each_outcome() {
        let provider = FakeProvider::new(|n| {
            if n == 1 {
                Err(ProviderError::Auth("denied".into()))
            } else {
                text("fine")
            }
        });
        let orch = orchestrator(Arc::clone(&provider), generous(), 3);

        let requests = vec![
            GenerationRequest::content("one"),
            GenerationRequest::content("two"),
            GenerationRequest::content("three"),
        ];
        let results = orch.invoke_many(&requests).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error_kind(), Some(ErrorKind::FatalProvider));
        assert!(results[2].success);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_many_shares_the_bucket() {
        let provider = FakeProvider::new(|_| text("ok"));
        let limit = RateLimit::new(2, 1.0).unwrap();
        let orch = orchestrator(Arc::clone(&provider), limit, 1);

        let requests: Vec<_> = (0..4).map(|i| GenerationRequest::content(format!("p{i}"))).collect();
        let start = Instant::now();
        let results = orch.invoke_many(&requests).await;

        assert!(results.iter().all(|r| r.success));
        // Two immediate, then one per second
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_model_selection() {
        let provider = FakeProvider::new(|n| {
            if n == 1 {
                Ok(json!({"predictions": [{"bytesBase64Encoded": "AAEC"}]}))
            } else {
                text("ok")
            }
        });
        let orch = orchestrator(Arc::clone(&provider), generous(), 1).with_models(Models {
            content: "text-model".into(),
            image: "image-model".into(),
        });

        orch.invoke(&GenerationRequest::content("a")).await;
        orch.invoke(&GenerationRequest::image("b")).await;
        let overridden = orch
            .invoke(&GenerationRequest::content("c").with_model("custom"))
            .await;

        let calls = provider.calls.lock().clone();
        let seen: Vec<_> = calls.iter().map(|(_, op, model)| (op.as_str(), model.as_str())).collect();
        assert_eq!(
            seen,
            vec![("content", "text-model"), ("image", "image-model"), ("content", "custom")]
        );
        assert_eq!(overridden.model, "custom");
    }

    #[derive(Default)]
    struct CapturingTransport {
        records: Mutex<Vec<(LogLevel, String, Option<String>, Context)>>,
    }

    #[async_trait]
    impl LogTransport for CapturingTransport {
        async fn send(&self, batch: &LogBatch) -> Result<(), TransportError> {
            self.records.lock().extend(batch.records().iter().map(|r| {
                (
                    r.level(),
                    r.message().to_string(),
                    r.component().map(str::to_string),
                    r.context().cloned().unwrap_or_default(),
                )
            }));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_every_invocation_is_logged() {
        let transport = Arc::new(CapturingTransport::default());
        let metrics = Arc::new(Metrics::new());
        let logger = Logger::spawn(
            BufferPolicy {
                flush_threshold: 20,
                capacity: 100,
            },
            Duration::from_secs(5),
            Arc::clone(&transport) as Arc<dyn LogTransport>,
            Arc::clone(&metrics),
        );
        let provider = FakeProvider::new(|n| {
            if n == 0 {
                text("ok")
            } else {
                Err(ProviderError::Auth("denied".into()))
            }
        });
        let orch = Orchestrator::new(
            provider,
            Arc::new(TokenBucket::new(generous())),
            policy(3),
            logger.clone(),
            Arc::clone(&metrics),
        );

        orch.invoke(&GenerationRequest::content("good")).await;
        orch.invoke(&GenerationRequest::image("bad")).await;
        logger.flush().await;

        let records = transport.records.lock().clone();
        assert_eq!(records.len(), 2);

        let (level, message, component, context) = &records[0];
        assert_eq!(*level, LogLevel::Info);
        assert_eq!(message, "Generation succeeded");
        assert_eq!(component.as_deref(), Some("orchestrator"));
        assert_eq!(context["kind"], "content");
        assert_eq!(context["attempts"], 1);

        let (level, _, _, context) = &records[1];
        assert_eq!(*level, LogLevel::Error);
        assert_eq!(context["error_kind"], "fatal_provider");

        let snap = metrics.snapshot();
        assert_eq!(snap.invocations_succeeded, 1);
        assert_eq!(snap.invocations_failed, 1);
    }
}
