//! Provider contract and the fallback chain.
//!
//! A [`Provider`] is an interchangeable backend capable of fulfilling a
//! generation request. The [`chain::ProviderChain`] walks an ordered list of
//! providers with bounded retries, capped exponential backoff, and a hard
//! per-attempt timeout, falling back to the next available provider until one
//! succeeds or all are exhausted.

pub mod chain;
pub mod http;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Caller-tunable knobs for a single generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.options.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// Provider-native model that produced the content.
    pub model: String,
    /// Identity of the provider that served the request.
    pub provider: String,
    /// Wall-clock completion time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub latency_ms: u64,
}

/// A completed generation, as returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub usage: TokenUsage,
    pub meta: GenerationMeta,
}

/// Contract required of every backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identity used in statistics, logs, and management calls.
    fn name(&self) -> &str;

    /// Availability probe. Must not error: a probe that cannot complete
    /// reads as unavailable.
    async fn check_availability(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

pub(crate) fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
