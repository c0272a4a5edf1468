use md5::{Digest, Md5};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{Cache, ChatMessage, ChatStreamEvent, ListingStore, LlmClient};
use crate::domain::{ExplanationPoint, ExplanationRecord, Listing};
use crate::error::{PropMatchError, Result};

const MAX_QUERY_CHARS: usize = 500;

/// `MD5(lowercased-trimmed-text + ":" + listing_key)`. Idempotent under
/// trim/lowercase: `cache_key(q, k) == cache_key(trim(lower(q)), k)`.
pub fn cache_key(query_text: &str, listing_key: i64) -> String {
    let normalized = query_text.trim().to_lowercase();
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b":");
    hasher.update(listing_key.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn storage_key(query_text: &str, listing_key: i64) -> String {
    format!("{}{}", crate::EXPLANATION_CACHE_PREFIX, cache_key(query_text, listing_key))
}

fn validate_query_text(query_text: &str) -> Result<()> {
    let trimmed = query_text.trim();
    if trimmed.is_empty() {
        return Err(PropMatchError::InvalidInput("query text is empty".into()));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(PropMatchError::InvalidInput("query text too long".into()));
    }
    Ok(())
}

fn poi_context(listing: &Listing) -> String {
    if listing.points_of_interest.is_empty() {
        return "none on record".to_string();
    }
    let mut by_category: BTreeMap<&str, Vec<&crate::domain::PointOfInterest>> = BTreeMap::new();
    for poi in &listing.points_of_interest {
        by_category.entry(poi.category.as_str()).or_default().push(poi);
    }
    let mut lines = Vec::new();
    for (category, mut pois) in by_category {
        pois.sort_by(|a, b| a.distance_km.partial_cmp(&b.distance_km).unwrap_or(std::cmp::Ordering::Equal));
        pois.truncate(3);
        let names = pois.iter().map(|p| format!("{} ({:.1}km)", p.name, p.distance_km)).collect::<Vec<_>>().join(", ");
        lines.push(format!("{category}: {names}"));
    }
    lines.join("; ")
}

fn build_prompt(query_text: &str, listing: &Listing) -> String {
    let features: Vec<&str> = listing.features.iter().map(String::as_str).collect();
    format!(
        "Explain why this property matches (or doesn't match) the search query.\n\
         Query: \"{query_text}\"\n\n\
         Listing: {} | {} | {}, {} | R{} | {} bed, {:.1} bath | {}m²\n\
         Features: {}\n\
         Points of interest: {}\n\n\
         Respond with strict JSON only, no commentary, no code fences:\n\
         {{\"positive_points\": [{{\"point\": <headline>, \"details\": <detail>}}, ...],\n\
          \"negative_points\": [{{\"point\": <headline>, \"details\": <detail>}}, ...],\n\
          \"overall_summary\": <string>}}",
        listing.title,
        listing.property_type,
        listing.location.neighborhood,
        listing.location.city,
        listing.price,
        listing.bedrooms,
        listing.bathrooms,
        listing.floor_area,
        features.join(", "),
        poi_context(listing),
    )
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[derive(Deserialize)]
struct RawPoint {
    point: String,
    details: String,
}

#[derive(Deserialize)]
struct RawExplanation {
    #[serde(default)]
    positive_points: Vec<RawPoint>,
    #[serde(default)]
    negative_points: Vec<RawPoint>,
    overall_summary: String,
}

fn parse_explanation(
    text: &str,
    query_text: &str,
    listing: &Listing,
) -> Result<ExplanationRecord> {
    let stripped = strip_code_fences(text);
    let raw: RawExplanation = serde_json::from_str(stripped)
        .map_err(|e| PropMatchError::UpstreamUnavailable(format!("malformed explanation response: {e}")))?;

    Ok(ExplanationRecord {
        search_text: query_text.trim().to_lowercase(),
        listing_key: listing.listing_key,
        property_title: listing.title.clone(),
        match_score: 0.0,
        positive_points: raw.positive_points.into_iter().map(|p| ExplanationPoint { headline: p.point, detail: p.details }).collect(),
        negative_points: raw.negative_points.into_iter().map(|p| ExplanationPoint { headline: p.point, detail: p.details }).collect(),
        summary: raw.overall_summary,
        cached: false,
    })
}

#[derive(Debug, Clone)]
pub enum ExplanationEvent {
    Cached,
    Start,
    Chunk { content: String },
    Complete { explanation: ExplanationRecord },
    Error { message: String },
}

/// C9. Generates structured, cached explanations for a (query, listing)
/// pair, streaming partial output while persisting only a complete,
/// validated result.
pub struct ExplanationEngine {
    listing_store: Arc<dyn ListingStore>,
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    model: String,
}

impl ExplanationEngine {
    pub fn new(listing_store: Arc<dyn ListingStore>, llm: Arc<dyn LlmClient>, cache: Arc<dyn Cache>, ttl_seconds: u64, model: String) -> Self {
        ExplanationEngine { listing_store, llm, cache, ttl: Duration::from_secs(ttl_seconds), model }
    }

    async fn load_listing(&self, listing_key: i64) -> Result<Listing> {
        self.listing_store
            .get_by_key(listing_key)
            .await?
            .ok_or_else(|| PropMatchError::NotFound(format!("listing {listing_key}")))
    }

    async fn cached_record(&self, query_text: &str, listing_key: i64) -> Result<Option<ExplanationRecord>> {
        let key = storage_key(query_text, listing_key);
        match self.cache.get(&key).await? {
            Some(raw) => {
                let mut record: ExplanationRecord = serde_json::from_str(&raw)?;
                record.cached = true;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn write_cache(&self, query_text: &str, listing_key: i64, record: &ExplanationRecord) -> Result<()> {
        let key = storage_key(query_text, listing_key);
        let mut to_store = record.clone();
        to_store.cached = false;
        let serialized = serde_json::to_string(&to_store)?;
        // Cache failures never fail the request; they just disable
        // caching for it.
        if let Err(error) = self.cache.set_with_ttl(&key, serialized, self.ttl).await {
            tracing::warn!(%error, "explanation cache write failed, continuing uncached");
        }
        Ok(())
    }

    /// Non-streaming contract: validate, check cache, call the LLM on a
    /// miss, write through on success.
    pub async fn generate(&self, query_text: &str, listing_key: i64) -> Result<ExplanationRecord> {
        validate_query_text(query_text)?;

        if let Some(record) = self.cached_record(query_text, listing_key).await? {
            return Ok(record);
        }

        let listing = self.load_listing(listing_key).await?;
        let prompt = build_prompt(query_text, &listing);
        let messages = vec![
            ChatMessage::system("You write factual, concise explanations of property search matches."),
            ChatMessage::user(prompt),
        ];

        let response = self
            .llm
            .chat(&self.model, &messages, 0.2, 500)
            .await
            .map_err(|e| PropMatchError::UpstreamUnavailable(e.message))?;

        let record = parse_explanation(&response.text, query_text, &listing)?;
        self.write_cache(query_text, listing_key, &record).await?;
        Ok(record)
    }

    /// Streaming contract. Cache hits emit `Cached` then `Complete`.
    /// Misses emit `Start`, then `Chunk`s as the LLM streams, then
    /// `Complete` with the parsed record written through to cache. Any
    /// failure emits a single `Error` event and caches nothing.
    pub async fn stream(&self, query_text: &str, listing_key: i64) -> Vec<ExplanationEvent> {
        if let Err(e) = validate_query_text(query_text) {
            return vec![ExplanationEvent::Error { message: e.to_string() }];
        }

        match self.cached_record(query_text, listing_key).await {
            Ok(Some(record)) => return vec![ExplanationEvent::Cached, ExplanationEvent::Complete { explanation: record }],
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "explanation cache lookup failed, proceeding as a miss");
            }
        }

        let listing = match self.load_listing(listing_key).await {
            Ok(l) => l,
            Err(e) => return vec![ExplanationEvent::Error { message: e.to_string() }],
        };

        let prompt = build_prompt(query_text, &listing);
        let messages = vec![
            ChatMessage::system("You write factual, concise explanations of property search matches."),
            ChatMessage::user(prompt),
        ];

        let mut events = vec![ExplanationEvent::Start];
        let stream_events = match self.llm.stream_chat(&self.model, &messages, 0.2, 500).await {
            Ok(evts) => evts,
            Err(e) => {
                events.push(ExplanationEvent::Error { message: e.message });
                return events;
            }
        };

        let mut accumulated = String::new();
        for event in stream_events {
            match event {
                ChatStreamEvent::Chunk { content } => {
                    accumulated.push_str(&content);
                    events.push(ExplanationEvent::Chunk { content });
                }
                ChatStreamEvent::End { .. } => {}
            }
        }

        match parse_explanation(&accumulated, query_text, &listing) {
            Ok(record) => {
                if let Err(e) = self.write_cache(query_text, listing_key, &record).await {
                    tracing::warn!(error = %e, "explanation cache write failed after streaming");
                }
                events.push(ExplanationEvent::Complete { explanation: record });
            }
            Err(e) => {
                events.push(ExplanationEvent::Error { message: e.to_string() });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ChatResponse, InMemoryCache, InMemoryListingStore, LlmError, LlmErrorKind, TokenUsage};
    use crate::domain::{ListingStatus, Location, PropertyType};
    use async_trait::async_trait;

    fn listing() -> Listing {
        Listing {
            listing_key: 115918507,
            title: "Family home near schools".into(),
            description: "d".into(),
            price: 2_500_000,
            property_type: PropertyType::House,
            status: ListingStatus::ForSale,
            bedrooms: 4,
            bathrooms: 2.0,
            floor_area: 200,
            location: Location {
                address: "a".into(),
                neighborhood: "Claremont".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: Default::default(),
            images: vec![],
            points_of_interest: vec![],
        }
    }

    struct ScriptedLlm;
    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> std::result::Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                text: r#"{"positive_points":[{"point":"Near schools","details":"Walking distance to two schools"}],"negative_points":[],"overall_summary":"A strong match for families."}"#.to_string(),
                usage: TokenUsage::default(),
                model_used: model.to_string(),
            })
        }
        async fn stream_chat(
            &self,
            model: &str,
            messages: &[ChatMessage],
            temperature: f64,
            max_tokens: u32,
        ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError> {
            let response = self.chat(model, messages, temperature, max_tokens).await?;
            Ok(vec![
                ChatStreamEvent::Chunk { content: response.text },
                ChatStreamEvent::End { usage: response.usage, model_used: response.model_used },
            ])
        }
    }

    struct FailingLlm;
    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> std::result::Result<ChatResponse, LlmError> {
            Err(LlmError { kind: LlmErrorKind::Other, message: "provider down".into() })
        }
        async fn stream_chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError> {
            Err(LlmError { kind: LlmErrorKind::Other, message: "provider down".into() })
        }
    }

    fn engine(llm: Arc<dyn LlmClient>) -> ExplanationEngine {
        let store = Arc::new(InMemoryListingStore::new(vec![listing()]));
        let cache = Arc::new(InMemoryCache::default());
        ExplanationEngine::new(store, llm, cache, 604_800, "gpt-4o-mini".to_string())
    }

    #[test]
    fn cache_key_is_idempotent_under_trim_and_case() {
        let a = cache_key("Family Home Near Schools", 115918507);
        let b = cache_key("  family home near schools  ", 115918507);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scenario_s4_second_request_is_cached_and_byte_identical_aside_from_flag() {
        let e = engine(Arc::new(ScriptedLlm));
        let first = e.generate("family home near schools", 115918507).await.unwrap();
        assert!(!first.cached);

        let second = e.generate("family home near schools", 115918507).await.unwrap();
        assert!(second.cached);

        assert_eq!(first.summary, second.summary);
        assert_eq!(first.positive_points.len(), second.positive_points.len());
        assert_eq!(first.negative_points.len(), second.negative_points.len());
        assert_eq!(first.property_title, second.property_title);
        assert_eq!(first.listing_key, second.listing_key);
    }

    #[tokio::test]
    async fn streaming_failure_emits_single_error_and_no_cache_write() {
        let e = engine(Arc::new(FailingLlm));
        let events = e.stream("family home near schools", 115918507).await;
        assert!(matches!(events.last(), Some(ExplanationEvent::Error { .. })));
        assert!(!events.iter().any(|ev| matches!(ev, ExplanationEvent::Complete { .. })));

        let second_attempt_cache_hit = e.cached_record("family home near schools", 115918507).await.unwrap();
        assert!(second_attempt_cache_hit.is_none());
    }

    #[tokio::test]
    async fn streaming_cache_hit_emits_cached_then_complete() {
        let e = engine(Arc::new(ScriptedLlm));
        e.generate("family home near schools", 115918507).await.unwrap();
        let events = e.stream("family home near schools", 115918507).await;
        assert!(matches!(events[0], ExplanationEvent::Cached));
        assert!(matches!(events[1], ExplanationEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn rejects_empty_query_text() {
        let e = engine(Arc::new(ScriptedLlm));
        let result = e.generate("   ", 115918507).await;
        assert!(result.is_err());
    }
}
