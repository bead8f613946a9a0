//! Narrative generation state machine.
//!
//! `INIT -> PROMPT_READY -> EXTRACTED -> DONE` on the model path,
//! `... -> FALLBACK_REQUIRED -> DONE` on any failure. [`NarrativeEngine::generate`]
//! never fails: every run ends in `DONE` with exactly one narrative.

use super::client::{GenerationParams, ModelClient};
use super::fallback::synthesize_fallback;
use super::prompt::{build_prompt, CONTROL_LABEL, FINDINGS_OPEN, PREAMBLE, SEVERITY_HEADING};
use crate::error::GenerationError;
use crate::models::{Narrative, NarrativeOrigin, Report};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeState {
    Init,
    PromptReady,
    Extracted,
    FallbackRequired,
    Done,
}

impl fmt::Display for NarrativeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NarrativeState::Init => "INIT",
            NarrativeState::PromptReady => "PROMPT_READY",
            NarrativeState::Extracted => "EXTRACTED",
            NarrativeState::FallbackRequired => "FALLBACK_REQUIRED",
            NarrativeState::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-indexed): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each model call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub params: GenerationParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            params: GenerationParams::default(),
        }
    }
}

/// Turns a report into its narrative.
pub struct NarrativeEngine {
    client: Option<Arc<dyn ModelClient>>,
    config: EngineConfig,
}

impl NarrativeEngine {
    pub fn new(client: Arc<dyn ModelClient>, config: EngineConfig) -> Self {
        Self {
            client: Some(client),
            config,
        }
    }

    /// An engine that always takes the fallback path, without any model call.
    pub fn fallback_only(config: EngineConfig) -> Self {
        Self {
            client: None,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Produce the narrative for `report`.
    ///
    /// Cancelling `cancel` aborts the model call and moves straight to the
    /// fallback.
    pub async fn generate(&self, report: Arc<Report>, cancel: &CancellationToken) -> Narrative {
        self.run(report, cancel).await.0
    }

    /// Like [`generate`](Self::generate), also returning the visited states.
    pub async fn run(
        &self,
        report: Arc<Report>,
        cancel: &CancellationToken,
    ) -> (Narrative, Vec<NarrativeState>) {
        let mut trace = vec![NarrativeState::Init];

        let prompt = build_prompt(&report);
        advance(&mut trace, NarrativeState::PromptReady);
        debug!("Prompt ready ({} chars)", prompt.len());

        let outcome = match self.invoke(&prompt, cancel).await.and_then(|raw| extract(&raw)) {
            Ok(text) => {
                advance(&mut trace, NarrativeState::Extracted);
                validate(&text).map(|_| text)
            }
            Err(e) => Err(e),
        };

        let narrative = match outcome {
            Ok(text) => {
                info!("Narrative generated by model ({} chars)", text.len());
                Narrative::new(text, NarrativeOrigin::Model, report)
            }
            Err(e) => {
                warn!("Model narrative unavailable: {}", e);
                advance(&mut trace, NarrativeState::FallbackRequired);
                let text = synthesize_fallback(&report);
                info!("Fallback narrative synthesized ({} chars)", text.len());
                Narrative::new(text, NarrativeOrigin::Fallback, report)
            }
        };

        advance(&mut trace, NarrativeState::Done);
        (narrative, trace)
    }

    /// Call the model with a per-attempt timeout and bounded retries.
    async fn invoke(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let client = self.client.as_ref().ok_or(GenerationError::Disabled)?;
        let max_attempts = self.config.retry.max_retries + 1;
        let timeout = self.config.call_timeout;

        let mut attempt = 0;
        loop {
            debug!(
                "Invoking model {} (attempt {}/{})",
                client.name(),
                attempt + 1,
                max_attempts
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GenerationError::Cancelled),
                r = tokio::time::timeout(timeout, client.generate(prompt, &self.config.params)) => {
                    r.unwrap_or(Err(GenerationError::Timeout(timeout)))
                }
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.config.retry.delay(attempt);
                    warn!(
                        "Model call failed ({}), retrying in {}ms",
                        e,
                        delay.as_millis()
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn advance(trace: &mut Vec<NarrativeState>, next: NarrativeState) {
    if let Some(current) = trace.last() {
        debug!("Narrative state {} -> {}", current, next);
    }
    trace.push(next);
}

/// Pull the narrative text out of a raw model response.
fn extract(raw: &str) -> Result<String, GenerationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text.to_string())
}

/// Reject responses that repeat the prompt instead of summarizing it.
fn validate(text: &str) -> Result<(), GenerationError> {
    if text.contains(FINDINGS_OPEN) || text.contains(PREAMBLE) {
        return Err(GenerationError::PromptEcho);
    }

    let echoes_block = text.lines().map(str::trim_start).any(|line| {
        line.starts_with(SEVERITY_HEADING) || line.starts_with(CONTROL_LABEL)
    });
    if echoes_block {
        return Err(GenerationError::PromptEcho);
    }
    Ok(())
}
