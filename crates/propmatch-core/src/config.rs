use serde::{Deserialize, Serialize};
use std::env;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_search_rate() -> u32 {
    env_or("PROPMATCH_SEARCH_RATE_PER_MIN", 5)
}
fn default_explanation_rate() -> u32 {
    env_or("PROPMATCH_EXPLANATION_RATE_PER_MIN", 5)
}
fn default_general_rate() -> u32 {
    env_or("PROPMATCH_GENERAL_RATE_PER_MIN", 100)
}
fn default_strict_rate() -> u32 {
    env_or("PROPMATCH_STRICT_RATE_PER_MIN", 3)
}
fn default_ddos_burst_threshold() -> u32 {
    env_or("PROPMATCH_DDOS_BURST_THRESHOLD", 50)
}
fn default_ip_hour_cap() -> u32 {
    env_or("PROPMATCH_IP_HOUR_CAP", 500)
}
fn default_ip_day_cap() -> u32 {
    env_or("PROPMATCH_IP_DAY_CAP", 2000)
}
fn default_payload_max_bytes() -> usize {
    env_or("PROPMATCH_PAYLOAD_MAX_BYTES", 1_048_576)
}
fn default_query_max_chars() -> usize {
    env_or("PROPMATCH_QUERY_MAX_CHARS", 500)
}
fn default_vector_top_k_multiplier() -> u32 {
    env_or("PROPMATCH_VECTOR_TOP_K_MULTIPLIER", 6)
}
fn default_vector_top_k_cap() -> u32 {
    env_or("PROPMATCH_VECTOR_TOP_K_CAP", 60)
}
fn default_llm_batch_size() -> usize {
    env_or("PROPMATCH_LLM_BATCH_SIZE", 12)
}
fn default_llm_temperature() -> f64 {
    env_or("PROPMATCH_LLM_TEMPERATURE", 0.1)
}
fn default_llm_primary() -> String {
    env_string_or("PROPMATCH_LLM_PRIMARY", "gpt-4o-mini")
}
fn default_llm_fallback() -> String {
    env_string_or("PROPMATCH_LLM_FALLBACK", "gpt-4o-mini-fallback")
}
fn default_llm_tertiary() -> String {
    env_string_or("PROPMATCH_LLM_TERTIARY", "gpt-3.5-turbo")
}
fn default_bm25_k1() -> f64 {
    env_or("PROPMATCH_BM25_K1", 1.5)
}
fn default_bm25_b() -> f64 {
    env_or("PROPMATCH_BM25_B", 0.75)
}
fn default_bm25_sample_size() -> usize {
    env_or("PROPMATCH_BM25_SAMPLE_SIZE", 1000)
}
fn default_explanation_ttl_seconds() -> u64 {
    env_or("PROPMATCH_EXPLANATION_TTL_SECONDS", 604_800)
}
fn default_embedding_dimension() -> usize {
    env_or("PROPMATCH_EMBEDDING_DIMENSION", 1536)
}
fn default_llm_concurrency() -> usize {
    env_or("PROPMATCH_LLM_CONCURRENCY", 4)
}
fn default_llm_api_key() -> Option<String> {
    env::var("PROPMATCH_LLM_API_KEY").ok()
}
fn default_llm_timeout_secs() -> u64 {
    env_or("PROPMATCH_LLM_TIMEOUT_SECS", 30)
}

/// Runtime configuration, loaded from YAML with environment-variable
/// overrides for every field, mirroring the table in the external
/// interfaces section of the specification this crate implements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search_rate_per_min: u32,
    pub explanation_rate_per_min: u32,
    pub general_rate_per_min: u32,
    pub strict_rate_per_min: u32,

    pub ddos_burst_threshold: u32,
    pub ip_hour_cap: u32,
    pub ip_day_cap: u32,

    pub payload_max_bytes: usize,
    pub query_max_chars: usize,

    pub vector_top_k_multiplier: u32,
    pub vector_top_k_cap: u32,

    pub llm_batch_size: usize,
    pub llm_temperature: f64,
    pub llm_primary: String,
    pub llm_fallback: String,
    pub llm_tertiary: String,
    pub llm_concurrency: usize,
    pub llm_api_key: Option<String>,
    pub llm_timeout_secs: u64,

    pub bm25_k1: f64,
    pub bm25_b: f64,
    pub bm25_sample_size: usize,

    pub explanation_ttl_seconds: u64,
    pub embedding_dimension: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            search_rate_per_min: default_search_rate(),
            explanation_rate_per_min: default_explanation_rate(),
            general_rate_per_min: default_general_rate(),
            strict_rate_per_min: default_strict_rate(),
            ddos_burst_threshold: default_ddos_burst_threshold(),
            ip_hour_cap: default_ip_hour_cap(),
            ip_day_cap: default_ip_day_cap(),
            payload_max_bytes: default_payload_max_bytes(),
            query_max_chars: default_query_max_chars(),
            vector_top_k_multiplier: default_vector_top_k_multiplier(),
            vector_top_k_cap: default_vector_top_k_cap(),
            llm_batch_size: default_llm_batch_size(),
            llm_temperature: default_llm_temperature(),
            llm_primary: default_llm_primary(),
            llm_fallback: default_llm_fallback(),
            llm_tertiary: default_llm_tertiary(),
            llm_concurrency: default_llm_concurrency(),
            llm_api_key: default_llm_api_key(),
            llm_timeout_secs: default_llm_timeout_secs(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            bm25_sample_size: default_bm25_sample_size(),
            explanation_ttl_seconds: default_explanation_ttl_seconds(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(s: &str) -> crate::error::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn to_yaml_string(&self) -> crate::error::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn vector_top_k(&self, page_size: u32) -> u32 {
        (page_size * self.vector_top_k_multiplier).min(self.vector_top_k_cap)
    }
}
