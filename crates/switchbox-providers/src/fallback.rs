//! Fallback chain — tries a primary model, then fallbacks, on failure.
//!
//! Each candidate is a model string resolved independently via
//! [`crate::http_provider::create_provider`]; a candidate that just failed
//! sits in a short cooldown so a flaky provider doesn't get retried on
//! every single message.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use switchbox_core::types::{FailoverReason, FallbackAttempt, LlmResponse, Message, ToolDefinition};

use crate::registry::ProviderConfig;
use crate::traits::{LlmProvider, LlmRequestConfig};

/// How long a candidate that just failed is skipped for.
const COOLDOWN: Duration = Duration::from_secs(60);

/// Raised when every candidate in a fallback chain failed or was in cooldown.
#[derive(Debug, thiserror::Error)]
#[error("all {} fallback candidates exhausted", .attempts.len())]
pub struct ProviderExhausted {
    pub attempts: Vec<FallbackAttempt>,
}

/// Classify a provider error string into a `FailoverReason`.
///
/// Matches substrings the way HTTP error bodies and status lines usually
/// read, not a structured error type — providers surface errors as free text.
pub fn classify_error(error: &str) -> FailoverReason {
    let lower = error.to_lowercase();
    if lower.contains("401") || lower.contains("403") || lower.contains("auth") {
        FailoverReason::Auth
    } else if lower.contains("429") || lower.contains("rate") {
        FailoverReason::RateLimit
    } else if lower.contains("402") || lower.contains("billing") || lower.contains("quota") {
        FailoverReason::Billing
    } else if lower.contains("timeout") || lower.contains("timed out") {
        FailoverReason::Timeout
    } else if lower.contains("overloaded") || lower.contains("529") || lower.contains("503") {
        FailoverReason::Overloaded
    } else if lower.contains("format") || lower.contains("parse") {
        FailoverReason::Format
    } else {
        FailoverReason::Unknown
    }
}

/// Tries each candidate model in order, skipping ones in cooldown, and
/// records the last N attempts for diagnostics.
pub struct FallbackChain {
    providers: HashMap<String, ProviderConfig>,
    cooldowns: Mutex<HashMap<String, Instant>>,
}

impl FallbackChain {
    pub fn new(providers: HashMap<String, ProviderConfig>) -> Self {
        Self {
            providers,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    fn in_cooldown(&self, model: &str) -> bool {
        let cooldowns = self.cooldowns.lock().unwrap();
        cooldowns
            .get(model)
            .map(|since| since.elapsed() < COOLDOWN)
            .unwrap_or(false)
    }

    fn mark_failed(&self, model: &str) {
        let mut cooldowns = self.cooldowns.lock().unwrap();
        cooldowns.insert(model.to_string(), Instant::now());
    }

    /// Try each model in `candidates` in order. Returns the first successful
    /// response along with the attempt log, or the last response if every
    /// candidate failed (so the caller always gets something to show).
    pub async fn execute(
        &self,
        candidates: &[String],
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        config: &LlmRequestConfig,
    ) -> (LlmResponse, Vec<FallbackAttempt>) {
        let mut attempts = Vec::new();
        let mut last_response: Option<LlmResponse> = None;

        for model in candidates {
            if self.in_cooldown(model) {
                attempts.push(FallbackAttempt {
                    provider: model.clone(),
                    model: model.clone(),
                    skipped: true,
                    ..Default::default()
                });
                continue;
            }

            let provider = match crate::http_provider::create_provider(model, &self.providers) {
                Ok(p) => p,
                Err(e) => {
                    // No matching provider is a config gap, not a provider
                    // outage — skip it and move on without a cooldown.
                    attempts.push(FallbackAttempt {
                        provider: model.clone(),
                        model: model.clone(),
                        error: Some(e),
                        reason: Some(FailoverReason::Unknown),
                        skipped: true,
                        ..Default::default()
                    });
                    continue;
                }
            };

            let started = Instant::now();
            let response = provider.chat(messages, tools, model, config).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            if let Some(err) = response.error.clone() {
                attempts.push(FallbackAttempt {
                    provider: model.clone(),
                    model: model.clone(),
                    error: Some(err.clone()),
                    reason: Some(classify_error(&err)),
                    duration_ms,
                    skipped: false,
                });
                self.mark_failed(model);
                last_response = Some(response);
                continue;
            }

            attempts.push(FallbackAttempt {
                provider: model.clone(),
                model: model.clone(),
                duration_ms,
                ..Default::default()
            });
            return (response, attempts);
        }

        (
            last_response.unwrap_or_else(|| {
                LlmResponse::error("All fallback candidates failed or were in cooldown")
            }),
            attempts,
        )
    }

    /// Like [`Self::execute`], but surfaces [`ProviderExhausted`] instead of
    /// a packaged error response when every candidate failed.
    pub async fn try_execute(
        &self,
        candidates: &[String],
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        config: &LlmRequestConfig,
    ) -> Result<(LlmResponse, Vec<FallbackAttempt>), ProviderExhausted> {
        let (response, attempts) = self.execute(candidates, messages, tools, config).await;
        if response.is_error() {
            Err(ProviderExhausted { attempts })
        } else {
            Ok((response, attempts))
        }
    }
}
