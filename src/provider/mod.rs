//! Ordered fallback over interchangeable providers
//!
//! A [`ProviderChain`] holds providers for one operation, tried in priority
//! order, plus one [`LocalProvider`] that always answers. The chain never
//! returns an error: when every remote provider fails the local stage runs,
//! and if the local stage fails too its [`LocalProvider::minimal`] output is
//! used.
//!
//! ```text
//! P1 ──err──▶ P2 ──err──▶ … ──err──▶ local.generate ──err──▶ local.minimal
//!  │ok         │ok                       │ok                        │
//!  ▼           ▼                         ▼                          ▼
//!  FallbackResult { value, used_provider, used_fallback, errors, attempts }
//! ```

mod error;

pub use error::ProviderError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// ============================================================================
// Traits
// ============================================================================

/// One external implementation of an operation
#[async_trait]
pub trait Provider<I, O>: Send + Sync {
    /// Name used in logs, error maps and resilience statistics
    fn name(&self) -> &str;

    /// Perform the operation
    async fn invoke(&self, input: &I) -> std::result::Result<O, ProviderError>;
}

/// The last stage of a chain, running without external dependencies
#[async_trait]
pub trait LocalProvider<I, O>: Send + Sync {
    /// Name reported as `used_provider`
    fn name(&self) -> &str {
        "local"
    }

    /// Best-effort local generation
    async fn generate(&self, input: &I) -> std::result::Result<O, ProviderError>;

    /// Deterministic output built purely from the input; cannot fail
    fn minimal(&self, input: &I) -> O;
}

/// Receives a report of every provider attempt
pub trait AttemptRecorder: Send + Sync {
    fn record_attempt(&self, attempt: &AttemptRecord);
}

/// Closure-backed provider, handy for wiring ad hoc collaborators and tests
pub struct FnProvider<F> {
    name: String,
    func: F,
}

impl<F> FnProvider<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> Provider<I, O> for FnProvider<F>
where
    I: Sync + 'static,
    O: Send + 'static,
    F: Fn(&I) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<O, ProviderError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &I) -> std::result::Result<O, ProviderError> {
        (self.func)(input).await
    }
}

// ============================================================================
// Results
// ============================================================================

/// Timing and outcome of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Operation the chain serves (e.g. `script`)
    pub operation: String,
    /// Provider that was tried
    pub provider: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Whether this attempt was the local stage
    pub local: bool,
}

/// Output of a chain invocation with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackResult<O> {
    pub value: O,
    /// Provider whose output is `value`
    pub used_provider: String,
    /// True when the highest-priority provider did not produce `value`
    pub used_fallback: bool,
    /// True when `value` came from the local stage
    pub used_local: bool,
    /// Error message per failed provider
    pub errors: BTreeMap<String, String>,
    /// Every attempt in order
    pub attempts: Vec<AttemptRecord>,
}

impl<O> FallbackResult<O> {
    /// Map the value, keeping provenance
    pub fn map<U>(self, f: impl FnOnce(O) -> U) -> FallbackResult<U> {
        FallbackResult {
            value: f(self.value),
            used_provider: self.used_provider,
            used_fallback: self.used_fallback,
            used_local: self.used_local,
            errors: self.errors,
            attempts: self.attempts,
        }
    }

    /// Separate the value from its provenance
    pub fn into_parts(self) -> (O, FallbackResult<()>) {
        let FallbackResult {
            value,
            used_provider,
            used_fallback,
            used_local,
            errors,
            attempts,
        } = self;
        (
            value,
            FallbackResult {
                value: (),
                used_provider,
                used_fallback,
                used_local,
                errors,
                attempts,
            },
        )
    }
}

// ============================================================================
// Chain
// ============================================================================

struct RankedProvider<I, O> {
    priority: u32,
    provider: Arc<dyn Provider<I, O>>,
}

/// Ordered-fallback invoker for one operation
pub struct ProviderChain<I, O> {
    operation: String,
    providers: Vec<RankedProvider<I, O>>,
    local: Arc<dyn LocalProvider<I, O>>,
    timeout: Option<Duration>,
    recorder: Option<Arc<dyn AttemptRecorder>>,
}

impl<I, O> std::fmt::Debug for ProviderChain<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("operation", &self.operation)
            .field("providers", &self.provider_names())
            .field("local", &self.local.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<I, O> ProviderChain<I, O> {
    /// Start building a chain for `operation`
    pub fn builder(operation: impl Into<String>) -> ProviderChainBuilder<I, O> {
        ProviderChainBuilder {
            operation: operation.into(),
            providers: Vec::new(),
            local: None,
            timeout: None,
            recorder: None,
        }
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Provider names in the order they are tried, local stage excluded
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider.name()).collect()
    }

    /// Per-attempt deadline
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<I, O> ProviderChain<I, O>
where
    I: Sync,
    O: Send,
{
    /// Run the cascade. Never fails.
    pub async fn invoke(&self, input: &I) -> FallbackResult<O> {
        let mut errors = BTreeMap::new();
        let mut attempts = Vec::with_capacity(self.providers.len() + 1);

        for (index, ranked) in self.providers.iter().enumerate() {
            let provider = &ranked.provider;
            let name = provider.name().to_string();
            let started = Instant::now();

            let outcome = self.race(provider.invoke(input)).await;
            let attempt = self.attempt_record(&name, started, outcome.as_ref().err(), false);
            self.report(&attempt);
            attempts.push(attempt);

            match outcome {
                Ok(value) => {
                    if index > 0 {
                        tracing::info!(
                            operation = %self.operation,
                            provider = %name,
                            failed = errors.len(),
                            "Fallback provider succeeded"
                        );
                    }
                    return FallbackResult {
                        value,
                        used_provider: name,
                        used_fallback: index > 0,
                        used_local: false,
                        errors,
                        attempts,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        operation = %self.operation,
                        provider = %name,
                        error = %e,
                        "Provider failed, advancing chain"
                    );
                    errors.insert(name, e.to_string());
                }
            }
        }

        crate::metrics::record_fallback_use(&self.operation);

        let local_name = self.local.name().to_string();
        let started = Instant::now();
        let outcome = self.race(self.local.generate(input)).await;
        let attempt = self.attempt_record(&local_name, started, outcome.as_ref().err(), true);
        self.report(&attempt);
        attempts.push(attempt);

        let (value, used_provider) = match outcome {
            Ok(value) => (value, local_name),
            Err(e) => {
                tracing::error!(
                    operation = %self.operation,
                    error = %e,
                    "Local provider failed, using minimal output"
                );
                errors.insert(local_name.clone(), e.to_string());
                (self.local.minimal(input), format!("{local_name}:minimal"))
            }
        };

        tracing::info!(
            operation = %self.operation,
            provider = %used_provider,
            failed = errors.len(),
            "Answered by local fallback"
        );

        FallbackResult {
            value,
            used_provider,
            used_fallback: true,
            used_local: true,
            errors,
            attempts,
        }
    }

    async fn race<F>(&self, call: F) -> std::result::Result<O, ProviderError>
    where
        F: Future<Output = std::result::Result<O, ProviderError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ProviderError::Timeout(limit))),
            None => call.await,
        }
    }

    fn attempt_record(
        &self,
        provider: &str,
        started: Instant,
        error: Option<&ProviderError>,
        local: bool,
    ) -> AttemptRecord {
        AttemptRecord {
            operation: self.operation.clone(),
            provider: provider.to_string(),
            success: error.is_none(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.map(ToString::to_string),
            local,
        }
    }

    fn report(&self, attempt: &AttemptRecord) {
        crate::metrics::record_provider_attempt(&attempt.operation, &attempt.provider, attempt.success);
        if let Some(recorder) = &self.recorder {
            recorder.record_attempt(attempt);
        }
    }
}

/// Builder for [`ProviderChain`]
pub struct ProviderChainBuilder<I, O> {
    operation: String,
    providers: Vec<RankedProvider<I, O>>,
    local: Option<Arc<dyn LocalProvider<I, O>>>,
    timeout: Option<Duration>,
    recorder: Option<Arc<dyn AttemptRecorder>>,
}

impl<I, O> ProviderChainBuilder<I, O> {
    /// Append a provider after those already added
    pub fn provider(self, provider: Arc<dyn Provider<I, O>>) -> Self {
        let priority = self
            .providers
            .iter()
            .map(|p| p.priority.saturating_add(1))
            .max()
            .unwrap_or(0);
        self.provider_with_priority(provider, priority)
    }

    /// Add a provider with an explicit rank (lower is tried first)
    pub fn provider_with_priority(mut self, provider: Arc<dyn Provider<I, O>>, priority: u32) -> Self {
        self.providers.push(RankedProvider { priority, provider });
        self
    }

    /// Add a provider only when configured
    pub fn provider_opt(self, provider: Option<Arc<dyn Provider<I, O>>>) -> Self {
        match provider {
            Some(p) => self.provider(p),
            None => self,
        }
    }

    /// Set the infallible last stage
    pub fn local(mut self, local: Arc<dyn LocalProvider<I, O>>) -> Self {
        self.local = Some(local);
        self
    }

    /// Deadline applied to each attempt
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Report attempts to a recorder
    pub fn recorder(mut self, recorder: Arc<dyn AttemptRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Build the chain; a local stage is required
    pub fn build(mut self) -> Result<ProviderChain<I, O>> {
        let local = self.local.take().ok_or_else(|| {
            Error::config(format!(
                "provider chain '{}' requires a local provider",
                self.operation
            ))
        })?;

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config(format!(
                "provider chain '{}' timeout must be greater than zero",
                self.operation
            )));
        }

        // stable: equal priorities keep insertion order
        self.providers.sort_by_key(|p| p.priority);

        Ok(ProviderChain {
            operation: self.operation,
            providers: self.providers,
            local,
            timeout: self.timeout,
            recorder: self.recorder,
        })
    }
}
