//! AI provider abstraction: a single text-generation interface behind which
//! every real model backend lives (SPEC_FULL.md 4.5). This crate ships only
//! `EchoProvider`, a deterministic test double — real network clients are
//! out of scope.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub system_prompt: Option<String>,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            stop_sequences: Vec::new(),
            system_prompt: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GenerateOptions {
    /// Clamp temperature into `[0, 2]` and require a positive token budget,
    /// per the enumerated option constraints (SPEC_FULL.md 4.5).
    pub fn validated(mut self) -> Result<Self, ProviderError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ProviderError::UnknownModel(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ProviderError::UnknownModel("maxTokens must be > 0".to_string()));
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub content: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub finish_reason: FinishReason,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub context_window: u32,
    pub price_in_per_1k: Decimal,
    pub price_out_per_1k: Decimal,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError>;

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<BoxStream<'static, StreamChunk>, ProviderError>;

    fn list_models(&self) -> Vec<ModelInfo>;

    async fn health_check(&self) -> HealthStatus;

    /// `(in_tokens/1000)*priceIn + (out_tokens/1000)*priceOut`, rounded
    /// half-even to 6 fractional digits (SPEC_FULL.md 4.1).
    fn estimate_cost(&self, tokens_in: u64, tokens_out: u64, model: Option<&str>) -> Decimal {
        let models = self.list_models();
        let info = model
            .and_then(|m| models.iter().find(|mi| mi.id == m))
            .or_else(|| models.first());
        let Some(info) = info else {
            return Decimal::ZERO;
        };
        let cost = (Decimal::from_u64(tokens_in).unwrap_or_default() / Decimal::from(1000))
            * info.price_in_per_1k
            + (Decimal::from_u64(tokens_out).unwrap_or_default() / Decimal::from(1000))
                * info.price_out_per_1k;
        cost.round_dp_with_strategy(6, rust_decimal::RoundingStrategy::MidpointNearestEven)
    }
}

/// Extract the first fenced code block, optionally restricted to a given
/// language tag (`"json"`, `"rust"`, ...). Falls back to `None` if no fence
/// is present.
pub fn extract_fenced_block(text: &str, lang: Option<&str>) -> Option<String> {
    let fence = match lang {
        Some(lang) => format!("```{lang}"),
        None => "```".to_string(),
    };
    let start = text.find(&fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// Tolerant JSON extraction: prefers a ```json fenced block, falls back to
/// parsing the raw text (SPEC_FULL.md 4.5).
pub fn extract_json(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    if let Some(block) = extract_fenced_block(text, Some("json")) {
        if let Ok(v) = serde_json::from_str(&block) {
            return Ok(v);
        }
    }
    serde_json::from_str(text.trim())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Assemble a chat-message list from an optional system prompt and the
/// user's prompt.
pub fn assemble_messages(system_prompt: Option<&str>, user_prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(sys) = system_prompt {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: sys.to_string(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: user_prompt.to_string(),
    });
    messages
}

/// A deterministic test double: echoes a derivative of the prompt back,
/// with token counts proportional to text length so cost math is
/// exercisable without a network call.
pub struct EchoProvider {
    models: Vec<ModelInfo>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            models: vec![
                ModelInfo {
                    id: "echo-cloud".to_string(),
                    context_window: 128_000,
                    price_in_per_1k: Decimal::new(3, 3),
                    price_out_per_1k: Decimal::new(15, 3),
                },
                ModelInfo {
                    id: "echo-local".to_string(),
                    context_window: 32_000,
                    price_in_per_1k: Decimal::ZERO,
                    price_out_per_1k: Decimal::ZERO,
                },
            ],
        }
    }

    pub fn with_models(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for EchoProvider {
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let start = std::time::Instant::now();
        let tokens_in = (prompt.len() as u64 / 4).max(1);
        let mut content = format!("echo: {prompt}");
        let mut finish_reason = FinishReason::Stop;
        let max_chars = opts.max_tokens as usize * 4;
        if content.len() > max_chars {
            content.truncate(max_chars);
            finish_reason = FinishReason::Length;
        }
        let tokens_out = (content.len() as u64 / 4).max(1);
        Ok(GenerateResult {
            content,
            model: opts.model.clone(),
            tokens_in,
            tokens_out,
            finish_reason,
            duration: start.elapsed(),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<BoxStream<'static, StreamChunk>, ProviderError> {
        let chunks = vec![
            StreamChunk {
                content: format!("echo: {prompt}"),
                done: false,
            },
            StreamChunk {
                content: String::new(),
                done: true,
            },
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            latency_ms: Some(0),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_fenced_json_block() {
        let text = "here you go:\n```json\n{\"a\":1}\n```\nthanks";
        let block = extract_fenced_block(text, Some("json")).unwrap();
        assert_eq!(block, "{\"a\":1}");
    }

    #[test]
    fn extract_json_falls_back_to_raw_parse() {
        let v = extract_json("{\"a\":1}").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn assemble_messages_includes_system_prompt() {
        let messages = assemble_messages(Some("be terse"), "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
    }

    #[tokio::test]
    async fn echo_provider_generates_deterministic_output() {
        let provider = EchoProvider::new();
        let opts = GenerateOptions::default();
        let result = provider.generate("hi", &opts).await.unwrap();
        assert_eq!(result.content, "echo: hi");
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn estimate_cost_matches_spec_formula() {
        let provider = EchoProvider::new();
        let cost = provider.estimate_cost(2000, 2000, Some("echo-cloud"));
        assert_eq!(cost, Decimal::new(36000, 6));
    }

    #[test]
    fn generate_options_rejects_out_of_range_temperature() {
        let opts = GenerateOptions {
            temperature: 3.0,
            ..Default::default()
        };
        assert!(opts.validated().is_err());
    }
}
