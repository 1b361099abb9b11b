use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;

use crate::error::{PipelineError, Stage};
use crate::models::{ChatModel, CompletionRequest, ModelError};
use crate::pipeline::config::RetryPolicy;
use crate::sentinels::{is_truncation_marker, strip_code_fence};
use crate::textutil::{char_len, char_midpoint};

/// What a single model call amounted to.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Ok(String),
    TooLarge,
    Transient(ModelError),
    Fatal(ModelError),
}

impl CallOutcome {
    fn classify(result: Result<String, ModelError>, detect_truncation: bool) -> Self {
        match result {
            Ok(text) => {
                if detect_truncation
                    && (is_truncation_marker(&text) || is_truncation_marker(&strip_code_fence(&text)))
                {
                    CallOutcome::TooLarge
                } else {
                    CallOutcome::Ok(text)
                }
            }
            Err(e) if e.is_transient() => CallOutcome::Transient(e),
            Err(e) => CallOutcome::Fatal(e),
        }
    }
}

/// Calls the chat model for one piece of text, retrying transient failures with
/// exponential backoff. Truncation is reported, never returned as text.
pub struct Translator<'a> {
    model: &'a dyn ChatModel,
    model_id: &'a str,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl<'a> Translator<'a> {
    pub fn new(model: &'a dyn ChatModel, model_id: &'a str, retry: RetryPolicy) -> Self {
        Self {
            model,
            model_id,
            retry,
            call_timeout: None,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = Some(limit);
        self
    }

    async fn call_once(&self, system: &str, user: &str, detect_truncation: bool) -> CallOutcome {
        let req = CompletionRequest::deterministic(self.model_id, system, user);
        let result = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.model.complete(req)).await {
                Ok(r) => r,
                Err(_) => Err(ModelError::Timeout(limit.as_secs())),
            },
            None => self.model.complete(req).await,
        };
        CallOutcome::classify(result, detect_truncation)
    }

    async fn call_with_retry(
        &self,
        stage: Stage,
        system: &str,
        user: &str,
        detect_truncation: bool,
    ) -> Result<String, PipelineError> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(system, user, detect_truncation).await {
                CallOutcome::Ok(text) => return Ok(text),
                CallOutcome::TooLarge => {
                    return Err(PipelineError::ChunkTooLarge {
                        stage,
                        chunk: None,
                        chars: char_len(user),
                    })
                }
                CallOutcome::Transient(err) if attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt)
                        + Duration::from_millis(jitter_ms(self.retry.jitter_ms));
                    tracing::warn!(
                        %stage,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                CallOutcome::Transient(err) | CallOutcome::Fatal(err) => {
                    return Err(PipelineError::Upstream {
                        stage,
                        chunk: None,
                        source: err,
                    })
                }
            }
        }
    }

    /// Free-form completion (QA, titles). The reply is trimmed, nothing else.
    pub async fn complete(
        &self,
        stage: Stage,
        system: &str,
        user: &str,
    ) -> Result<String, PipelineError> {
        let text = self.call_with_retry(stage, system, user, false).await?;
        Ok(text.trim().to_string())
    }

    /// Translates one chunk. A `TRUNCATED` reply becomes [`PipelineError::ChunkTooLarge`].
    pub async fn translate(&self, chunk: &str, prompt: &str) -> Result<String, PipelineError> {
        let raw = self
            .call_with_retry(Stage::Translate, prompt, chunk, true)
            .await?;
        Ok(strip_code_fence(&raw))
    }

    /// Like [`Translator::translate`], but a truncated chunk of at least `min_chars` is
    /// split at its midpoint and both halves are translated the same way.
    pub fn translate_halving<'b>(
        &'b self,
        chunk: &'b str,
        prompt: &'b str,
        min_chars: usize,
    ) -> BoxFuture<'b, Result<String, PipelineError>> {
        async move {
            match self.translate(chunk, prompt).await {
                Err(PipelineError::ChunkTooLarge { .. })
                    if char_len(chunk) >= min_chars.max(2) =>
                {
                    let (left, right) = chunk.split_at(char_midpoint(chunk));
                    tracing::info!(chars = char_len(chunk), "reply truncated, halving chunk");
                    let left = self.translate_halving(left, prompt, min_chars).await?;
                    let right = self.translate_halving(right, prompt, min_chars).await?;
                    Ok(format!("{left}\n{right}"))
                }
                other => other,
            }
        }
        .boxed()
    }
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}
