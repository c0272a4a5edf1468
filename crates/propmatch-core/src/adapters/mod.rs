mod http;
mod memory;
mod traits;

pub use http::{ApiMetrics, HttpEmbedder, HttpLlmClient, MetricsSnapshot};
pub use memory::{InMemoryCache, InMemoryListingStore, InMemoryVectorIndex};
pub use traits::{
    Cache, ChatMessage, ChatResponse, ChatStreamEvent, Embedder, ListingStore, LlmClient, LlmError, LlmErrorKind,
    TokenUsage, VectorFilter, VectorIndex, VectorMatch,
};
