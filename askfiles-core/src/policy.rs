//! Model invocation policy
//!
//! Runs a generation call against the current model with bounded retries and
//! falls back through the rest of the model roster when the current model is
//! overloaded.
//!
//! ## Failure classes
//!
//! | Upstream message contains | Retried | Triggers fallback |
//! |---------------------------|---------|-------------------|
//! | `503`, `overloaded`, `Service Unavailable` | yes | yes |
//! | `429`, `rate limit` | yes | no |
//! | anything else | no | no |
//!
//! ## Current model
//!
//! The roster remembers the last model that succeeded through fallback and
//! starts every later call there. The cursor is a plain atomic: two requests
//! that fall back at the same time both write it and the last write wins.
//! Both writers name a model that just answered, so the race is benign.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{GeminiConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::types::GenerationMode;

/// How many times to try one model and how long to wait between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub attempts: u32,
    /// Delay after the first failure; doubles after each further failure
    pub initial_delay: Duration,
}

impl RetryPlan {
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
        }
    }

    /// Backoff after the failed attempt with zero-based index `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Ordered model names plus the cursor of the current default
#[derive(Debug)]
pub struct ModelRoster {
    models: Vec<String>,
    current: AtomicUsize,
}

impl ModelRoster {
    pub fn new(models: Vec<String>) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config("model roster is empty".to_string()));
        }
        Ok(Self {
            models,
            current: AtomicUsize::new(0),
        })
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Name of the model new calls start with
    pub fn current(&self) -> &str {
        &self.models[self.current_index()]
    }

    fn promote(&self, index: usize) {
        self.current.store(index, Ordering::Relaxed);
    }
}

/// Retry and fallback policy wrapped around a generation call
#[derive(Debug)]
pub struct InvocationPolicy {
    roster: ModelRoster,
    primary: RetryPlan,
    fallback: RetryPlan,
}

impl InvocationPolicy {
    pub fn new(roster: ModelRoster, primary: RetryPlan, fallback: RetryPlan) -> Self {
        Self {
            roster,
            primary,
            fallback,
        }
    }

    pub fn from_config(gemini: &GeminiConfig, retry: &RetryConfig) -> Result<Self> {
        Ok(Self::new(
            ModelRoster::new(gemini.models.clone())?,
            RetryPlan::new(retry.primary_attempts, retry.primary_delay()),
            RetryPlan::new(retry.fallback_attempts, retry.fallback_delay()),
        ))
    }

    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    /// Run `call` with retries, falling back to other models on overload.
    ///
    /// `call` receives the model name and `mode` and must already have the
    /// question and file parts bound. Non-overload failures of the current
    /// model are returned unchanged.
    pub async fn invoke<F, Fut>(&self, mode: GenerationMode, call: F) -> Result<String>
    where
        F: Fn(String, GenerationMode) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let start = self.roster.current_index();
        let primary_model = &self.roster.models[start];

        let mut last_error = match retry_with_backoff(&self.primary, primary_model, mode, &call).await
        {
            Ok(text) => return Ok(text),
            Err(e) if !is_overloaded(&e) => return Err(e),
            Err(e) => e,
        };

        tracing::warn!(
            model = %primary_model,
            error = %last_error,
            "Model overloaded, trying fallback models"
        );

        for (index, model) in self.roster.models.iter().enumerate() {
            if index == start {
                continue;
            }

            tracing::info!(model = %model, "Trying fallback model");
            match retry_with_backoff(&self.fallback, model, mode, &call).await {
                Ok(text) => {
                    self.roster.promote(index);
                    tracing::info!(model = %model, "Fallback model answered, now the default");
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Fallback model failed");
                    last_error = e;
                }
            }
        }

        Err(Error::AllModelsUnavailable {
            last: last_error.to_string(),
        })
    }
}

/// Try one model up to `plan.attempts` times.
///
/// Every retryable failure is followed by a backoff delay, the last one
/// included, so an exhausted loop has cooled down before the caller moves on.
async fn retry_with_backoff<F, Fut>(
    plan: &RetryPlan,
    model: &str,
    mode: GenerationMode,
    call: &F,
) -> Result<String>
where
    F: Fn(String, GenerationMode) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut last_error = None;

    for attempt in 0..plan.attempts {
        match call(model.to_string(), mode).await {
            Ok(text) => return Ok(text),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                let delay = plan.delay_after(attempt);
                tracing::warn!(
                    model,
                    "Attempt {}/{} failed ({}), waiting {:?}",
                    attempt + 1,
                    plan.attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Upstream {
        status: None,
        message: "max retries exceeded".to_string(),
    }))
}

/// Check if an error is transient (overload or rate limit)
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Upstream { message, .. } => {
            is_overload_message(message)
                || message.contains("429")
                || message.contains("rate limit")
        }
        _ => false,
    }
}

/// Check if an error means the model is out of capacity
pub fn is_overloaded(error: &Error) -> bool {
    match error {
        Error::Upstream { message, .. } => is_overload_message(message),
        _ => false,
    }
}

fn is_overload_message(message: &str) -> bool {
    message.contains("503")
        || message.contains("overloaded")
        || message.contains("Service Unavailable")
}
