//! Priority-ordered reasoning provider chain with automatic failover.
//!
//! Providers are tried in ascending priority. A provider that was probed
//! unavailable is skipped; an error, a non-success status or a timeout
//! moves on to the next one. The chain never returns partial output: either
//! one provider's full reply or [`RunnerError::AllProvidersFailed`] listing
//! every provider's failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ProviderFailure, RunnerError};
use crate::prompt::RenderedPrompt;
use crate::provider::ReasoningProvider;

/// A successful reply together with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// Provider name.
    pub provider: String,
    /// Model that answered.
    pub model: String,
    /// Raw reply text.
    pub text: String,
}

/// Availability of one provider, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Rank in the chain.
    pub priority: u8,
    /// Model identifier.
    pub model: String,
    /// Result of the last probe.
    pub available: bool,
}

/// Ordered list of providers tried until one answers.
pub struct ProviderChain {
    providers: Vec<Arc<dyn ReasoningProvider>>,
    available: RwLock<Vec<bool>>,
    timeout: Duration,
}

impl ProviderChain {
    /// Create a chain; providers are sorted by priority. Nothing is
    /// available until [`ProviderChain::initialize`] runs.
    pub fn new(mut providers: Vec<Arc<dyn ReasoningProvider>>, timeout: Duration) -> Self {
        providers.sort_by_key(|p| p.priority());
        let available = RwLock::new(vec![false; providers.len()]);
        Self {
            providers,
            available,
            timeout,
        }
    }

    /// Probe every provider and record its availability.
    pub async fn initialize(&self) {
        let mut probed = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let ok = provider.check_availability().await;
            if ok {
                info!(
                    provider = provider.name(),
                    priority = provider.priority(),
                    model = provider.model(),
                    "reasoning provider available"
                );
            } else {
                warn!(
                    provider = provider.name(),
                    priority = provider.priority(),
                    "reasoning provider unavailable"
                );
            }
            probed.push(ok);
        }
        *self.available.write().await = probed;
    }

    /// Re-probe every provider.
    pub async fn refresh(&self) {
        self.initialize().await;
    }

    /// Current availability of every provider, in chain order.
    pub async fn available_providers(&self) -> Vec<ProviderStatus> {
        let available = self.available.read().await.clone();
        self.providers
            .iter()
            .zip(available)
            .map(|(p, available)| ProviderStatus {
                name: p.name().to_owned(),
                priority: p.priority(),
                model: p.model().to_owned(),
                available,
            })
            .collect()
    }

    /// Send `prompt` to the first provider that answers.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::AllProvidersFailed`] when no provider answered.
    pub async fn query(&self, prompt: &RenderedPrompt) -> Result<ProviderResponse, RunnerError> {
        // Copied out so the lock is not held across provider calls.
        let available = self.available.read().await.clone();
        let mut failures = Vec::new();

        for (index, provider) in self.providers.iter().enumerate() {
            let name = provider.name();
            if !available.get(index).copied().unwrap_or(false) {
                failures.push(ProviderFailure {
                    provider: name.to_owned(),
                    reason: RunnerError::ProviderUnavailable(name.to_owned()).to_string(),
                });
                continue;
            }

            debug!(provider = name, "querying reasoning provider");
            match tokio::time::timeout(self.timeout, provider.query(prompt)).await {
                Ok(Ok(text)) => {
                    info!(provider = name, model = provider.model(), "reasoning provider answered");
                    return Ok(ProviderResponse {
                        provider: name.to_owned(),
                        model: provider.model().to_owned(),
                        text,
                    });
                }
                Ok(Err(e)) => {
                    warn!(provider = name, error = %e, "reasoning provider failed, trying next");
                    failures.push(ProviderFailure {
                        provider: name.to_owned(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        provider = name,
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "reasoning provider timed out, trying next"
                    );
                    failures.push(ProviderFailure {
                        provider: name.to_owned(),
                        reason: format!("timeout after {}ms", self.timeout.as_millis()),
                    });
                }
            }
        }

        Err(RunnerError::AllProvidersFailed(failures))
    }
}

impl core::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<_> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderChain")
            .field("providers", &names)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
