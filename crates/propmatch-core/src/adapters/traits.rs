use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::domain::Listing;
use crate::error::Result;

/// C1. Fetches listings by key from whatever remote table owns them.
/// Implementations never mutate listings; this system has no write path.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn get_by_key(&self, key: i64) -> Result<Option<Listing>>;

    /// Preserves the order of found keys; missing keys are omitted rather
    /// than represented as `None`, per the external interface contract.
    async fn get_batch(&self, keys: &[i64]) -> Result<Vec<Listing>>;

    /// Best-effort uniform sample, used to build the BM25 corpus.
    async fn get_sample(&self, n: usize) -> Result<Vec<Listing>>;
}

/// C2. Maps free text to a fixed-dimension vector. Implementations are
/// expected to return unit (or near-unit) vectors; callers treat the
/// dimension as fixed for the lifetime of the process.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Typed filter translated from query filters into the vector index's
/// `$eq`/`$gte`/`$lte` grammar.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub price_gte: Option<i64>,
    pub price_lte: Option<i64>,
    pub property_type_eq: Option<String>,
    pub bedrooms_eq: Option<u32>,
    pub city_eq: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub listing_key: i64,
    pub score: f64,
    pub metadata: Value,
}

/// C3. Approximate-nearest-neighbor index over listing embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: i64, vector: Vec<f32>, metadata: Value) -> Result<()>;

    /// Returns matches sorted by score descending, score in [0, 1].
    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<VectorFilter>) -> Result<Vec<VectorMatch>>;
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model_used: String,
}

/// Distinguishes the one error class that triggers the model cascade
/// from everything else, which propagates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmErrorKind {
    ModelUnavailable,
    Other,
}

#[derive(Debug)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for LlmError {}

#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    Chunk { content: String },
    End { usage: TokenUsage, model_used: String },
}

/// C4. Chat-completion with model-cascade fallback and token accounting.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> std::result::Result<ChatResponse, LlmError>;

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError>;

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// C5. Key/value store with TTL, set membership, capped lists, and atomic
/// counters. Security state and the explanation cache both sit behind
/// this one adapter so callers never see whether the backing store is a
/// remote cache or the in-memory fallback.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    async fn list_push_capped(&self, key: &str, value: String, cap: usize) -> Result<()>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Increments `key` by one, creating it with the given TTL if absent,
    /// and returns the post-increment value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    fn time_now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}
