//! HTTP-backed provider speaking the OpenAI-style chat-completions shape.
//!
//! The operating mode is resolved once at construction: with an API key the
//! provider issues real calls; without one it runs a deterministic stand-in
//! that fabricates a completion locally. Both paths sit behind the same
//! [`Provider`] impl, so callers and the chain never branch on it.

use crate::provider::{
    unix_ms, Generation, GenerationMeta, GenerationRequest, Provider, TokenUsage,
};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Stable identity reported to the chain and statistics.
    pub name: String,
    pub base_url: String,
    /// Presence of a key selects live mode at construction time.
    pub api_key: Option<String>,
    /// Default model when the request doesn't name one.
    pub model: String,
}

impl HttpProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    StandIn,
}

/// OpenAI-compatible chat-completions backend over `reqwest`.
pub struct HttpProvider {
    cfg: HttpProviderConfig,
    client: reqwest::Client,
    mode: Mode,
}

impl HttpProvider {
    pub fn new(cfg: HttpProviderConfig) -> Self {
        let mode = if cfg.api_key.is_some() {
            Mode::Live
        } else {
            Mode::StandIn
        };
        if mode == Mode::StandIn {
            info!(
                provider = cfg.name.as_str(),
                "no api key configured, running in deterministic stand-in mode"
            );
        }
        Self {
            cfg,
            client: reqwest::Client::new(),
            mode,
        }
    }

    pub fn is_live(&self) -> bool {
        self.mode == Mode::Live
    }

    fn model_for(&self, request: &GenerationRequest) -> String {
        request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.cfg.model.clone())
    }

    async fn generate_live(&self, request: &GenerationRequest) -> Result<Generation> {
        let started = Instant::now();
        let model = self.model_for(request);
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = request.options.temperature {
            body["temperature"] = temperature.into();
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(self.cfg.api_key.as_deref().unwrap_or_default())
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider_with_context(
                format!("HTTP {}: {}", status.as_u16(), text),
                ErrorContext::new()
                    .with_details(format!("model: {}", model))
                    .with_source("http_provider"),
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                Error::provider_with_context(
                    "response carried no message content",
                    ErrorContext::new().with_source("http_provider"),
                )
            })?;
        let usage = serde_json::from_value::<TokenUsage>(json["usage"].clone()).unwrap_or_default();
        let served_model = json["model"].as_str().unwrap_or(&model).to_string();
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            provider = self.cfg.name.as_str(),
            model = served_model.as_str(),
            latency_ms,
            "live generation completed"
        );

        Ok(Generation {
            content,
            usage,
            meta: GenerationMeta {
                model: served_model,
                provider: self.cfg.name.clone(),
                timestamp_ms: unix_ms(),
                latency_ms,
            },
        })
    }

    /// Deterministic local completion; output depends only on the request.
    fn generate_stand_in(&self, request: &GenerationRequest) -> Generation {
        let model = self.model_for(request);
        let content = format!(
            "[stand-in:{}] echo of {} prompt byte(s): {}",
            model,
            request.prompt.len(),
            request.prompt
        );
        let prompt_tokens = request.prompt.split_whitespace().count() as u32;
        let completion_tokens = content.split_whitespace().count() as u32;
        Generation {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            meta: GenerationMeta {
                model,
                provider: self.cfg.name.clone(),
                timestamp_ms: unix_ms(),
                latency_ms: 0,
            },
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn check_availability(&self) -> bool {
        match self.mode {
            Mode::StandIn => true,
            Mode::Live => {
                let probe = self
                    .client
                    .get(format!("{}/models", self.cfg.base_url))
                    .bearer_auth(self.cfg.api_key.as_deref().unwrap_or_default())
                    .send()
                    .await;
                match probe {
                    Ok(resp) => resp.status().is_success(),
                    Err(err) => {
                        debug!(
                            provider = self.cfg.name.as_str(),
                            error = %err,
                            "availability probe failed"
                        );
                        false
                    }
                }
            }
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        match self.mode {
            Mode::Live => self.generate_live(request).await,
            Mode::StandIn => Ok(self.generate_stand_in(request)),
        }
    }
}
