use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::traits::{ChatMessage, ChatResponse, ChatStreamEvent, Embedder, LlmClient, LlmError, LlmErrorKind, TokenUsage};
use crate::config::Config;
use crate::error::{PropMatchError, Result};

/// Request/response counters for the HTTP-backed adapters, diagnostic
/// only and never consulted for ranking correctness.
#[derive(Default)]
pub struct ApiMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_latency_ms: u64,
}

impl ApiMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Reference embedding adapter over a vLLM-style OpenAI-compatible
/// embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
    metrics: Arc<ApiMetrics>,
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn from_config(config: &Config, url: String) -> Self {
        HttpEmbedder {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.llm_timeout_secs))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            url,
            model: "text-embedding-3-small".to_string(),
            dimension: config.embedding_dimension,
            api_key: config.llm_api_key.clone(),
            metrics: Arc::new(ApiMetrics::default()),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut request = self.client.post(format!("{}/v1/embeddings", self.url)).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            PropMatchError::from(e)
        })?;
        if !response.status().is_success() {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            return Err(PropMatchError::UpstreamUnavailable(format!(
                "embedding provider returned {}",
                response.status()
            )));
        }
        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PropMatchError::UpstreamUnavailable("embedding provider returned no data".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponseWire {
    choices: Vec<ChatChoiceWire>,
    usage: Option<UsageWire>,
}

#[derive(serde::Deserialize)]
struct ChatChoiceWire {
    message: WireMessageOwned,
}

#[derive(serde::Deserialize)]
struct WireMessageOwned {
    content: String,
}

#[derive(serde::Deserialize)]
struct UsageWire {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Reference LLM adapter. `chat` is implemented against a single model
/// string; the model cascade itself lives in the ranker, which calls
/// `chat` with successive model names and inspects `LlmErrorKind`.
pub struct HttpLlmClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    metrics: Arc<ApiMetrics>,
}

impl HttpLlmClient {
    pub fn from_config(config: &Config, url: String) -> Self {
        HttpLlmClient {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.llm_timeout_secs))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            url,
            api_key: config.llm_api_key.clone(),
            metrics: Arc::new(ApiMetrics::default()),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> std::result::Result<ChatResponse, LlmError> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let wire_messages: Vec<WireMessage> =
            messages.iter().map(|m| WireMessage { role: &m.role, content: &m.content }).collect();
        let mut request = self.client.post(format!("{}/v1/chat/completions", self.url)).json(&ChatRequest {
            model,
            messages: wire_messages,
            temperature,
            max_tokens,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            LlmError { kind: LlmErrorKind::Other, message: e.to_string() }
        })?;
        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 400 {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            return Err(LlmError { kind: LlmErrorKind::ModelUnavailable, message: format!("model {model} unavailable") });
        }
        if !status.is_success() {
            self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
            return Err(LlmError { kind: LlmErrorKind::Other, message: format!("llm provider returned {status}") });
        }
        let parsed: ChatResponseWire = response.json().await.map_err(|e| LlmError {
            kind: LlmErrorKind::Other,
            message: e.to_string(),
        })?;
        let text = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        let usage = parsed
            .usage
            .map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens })
            .unwrap_or_default();
        Ok(ChatResponse { text, usage, model_used: model.to_string() })
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError> {
        // The reference provider used here does not expose a true
        // streaming transport; we synthesize a single-chunk stream from
        // the non-streaming call so callers above this adapter can stay
        // written against the streaming contract.
        let response = self.chat(model, messages, temperature, max_tokens).await?;
        Ok(vec![
            ChatStreamEvent::Chunk { content: response.text },
            ChatStreamEvent::End { usage: response.usage, model_used: response.model_used },
        ])
    }
}
