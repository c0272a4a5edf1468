use std::collections::HashMap;
use std::sync::Arc;

use super::fusion::fuse;
use super::prompt::{build_batch_prompt, debias_multiple_of_five, parse_llm_scores};
use crate::adapters::{ChatMessage, Embedder, ListingStore, LlmClient, LlmErrorKind, VectorFilter, VectorIndex};
use crate::bm25::{synthetic_document, tokenize, Bm25Corpus};
use crate::config::Config;
use crate::constraints;
use crate::domain::{Listing, Query, RankedListing, RankingDiagnostics, ScoreDiagnostics};
use crate::error::{PropMatchError, Result};

/// Runs the three-stage hybrid pipeline (vector retrieval, BM25
/// re-scoring, LLM re-ranking), applies the constraint overlay, and
/// paginates. Owns the process's single `Bm25Corpus` for its lifetime.
pub struct HybridRanker {
    listing_store: Arc<dyn ListingStore>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
    corpus: Bm25Corpus,
    config: Config,
}

impl HybridRanker {
    pub fn new(
        listing_store: Arc<dyn ListingStore>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmClient>,
        config: Config,
    ) -> Self {
        let corpus = Bm25Corpus::new(config.bm25_k1, config.bm25_b);
        HybridRanker { listing_store, embedder, vector_index, llm, corpus, config }
    }

    /// Explicit rebuild, for callers that want to refresh the corpus on
    /// a schedule rather than relying on lazy build-on-first-use.
    pub async fn rebuild_corpus(&self) -> Result<()> {
        let sample = self.listing_store.get_sample(self.config.bm25_sample_size).await?;
        self.corpus.rebuild(&sample);
        Ok(())
    }

    async fn ensure_corpus_built(&self) {
        if self.corpus.is_built() {
            return;
        }
        match self.listing_store.get_sample(self.config.bm25_sample_size).await {
            Ok(sample) => self.corpus.build(&sample),
            Err(error) => {
                tracing::warn!(%error, "bm25 corpus build failed, lexical stage contributes 0 this request");
            }
        }
    }

    fn retrieval_text(query: &Query) -> String {
        let mut parts = vec![query.text.clone()];
        if let Some(pt) = query.filters.property_type {
            parts.push(format!("property type {pt}"));
        }
        if let Some(b) = query.filters.bedrooms {
            parts.push(format!("{b} bedrooms"));
        }
        if let Some(ref city) = query.filters.city {
            parts.push(format!("in city {city}"));
        }
        parts.join(" ")
    }

    fn vector_filter(query: &Query) -> Option<VectorFilter> {
        let f = &query.filters;
        if f.min_price.is_none() && f.max_price.is_none() && f.property_type.is_none() && f.bedrooms.is_none() && f.city.is_none()
        {
            return None;
        }
        Some(VectorFilter {
            price_gte: f.min_price,
            price_lte: f.max_price,
            property_type_eq: f.property_type.map(|t| t.to_string()),
            bedrooms_eq: f.bedrooms,
            city_eq: f.city.clone(),
        })
    }

    pub async fn rank(&self, query: &Query) -> Result<(Vec<RankedListing>, RankingDiagnostics)> {
        let mut diagnostics = RankingDiagnostics::default();

        // 1. Candidate retrieval.
        let retrieval_text = Self::retrieval_text(query);
        let embedding = self
            .embedder
            .embed(&retrieval_text)
            .await
            .map_err(|e| PropMatchError::UpstreamUnavailable(format!("embedding failed: {e}")))?;

        let top_k = self.config.vector_top_k(query.page_size) as usize;
        let matches = self
            .vector_index
            .query(&embedding, top_k, Self::vector_filter(query))
            .await
            .map_err(|e| PropMatchError::UpstreamUnavailable(format!("vector index failed: {e}")))?;

        diagnostics.candidates_retrieved = matches.len();
        if matches.is_empty() {
            return Ok((Vec::new(), diagnostics));
        }

        // 2. Listing hydration — partial failure is tolerated, not fatal.
        let keys: Vec<i64> = matches.iter().map(|m| m.listing_key).collect();
        let hydrated = self.listing_store.get_batch(&keys).await.unwrap_or_default();
        let by_key: HashMap<i64, Listing> = hydrated.into_iter().map(|l| (l.listing_key, l)).collect();
        diagnostics.candidates_hydrated = by_key.len();

        let candidates: Vec<(Listing, f64)> = matches
            .into_iter()
            .filter_map(|m| by_key.get(&m.listing_key).cloned().map(|l| (l, m.score)))
            .collect();
        if candidates.is_empty() {
            return Ok((Vec::new(), diagnostics));
        }

        // 3. Lexical scoring.
        self.ensure_corpus_built().await;
        let query_tokens = tokenize(&query.text);
        let bm25_raws: Vec<f64> = candidates
            .iter()
            .map(|(listing, _)| {
                let doc_tokens = tokenize(&synthetic_document(listing));
                self.corpus.score_document(&query_tokens, &doc_tokens)
            })
            .collect();
        let bm25_max = bm25_raws.iter().cloned().fold(0.0_f64, f64::max);

        // 4. Hybrid base score, sorted and capped to page_size * 2.
        let mut scored: Vec<(Listing, ScoreDiagnostics)> = candidates
            .into_iter()
            .zip(bm25_raws)
            .map(|((listing, similarity), bm25_raw)| {
                let vector_100 = similarity * 100.0;
                let bm25_contribution = if bm25_max > 0.0 { (20.0 * bm25_raw / bm25_max).min(20.0) } else { 0.0 };
                let hybrid_base = (vector_100 + 0.5 * bm25_contribution).clamp(10.0, 100.0);
                let diagnostics = ScoreDiagnostics {
                    vector_raw: similarity,
                    vector_normalized: vector_100,
                    bm25_raw,
                    bm25_contribution,
                    hybrid_base,
                    llm_score: None,
                    final_score: hybrid_base,
                    method_label: "hybrid_base".to_string(),
                };
                (listing, diagnostics)
            })
            .collect();
        scored.sort_by(|a, b| b.1.hybrid_base.partial_cmp(&a.1.hybrid_base).unwrap_or(std::cmp::Ordering::Equal));
        let keep = ((query.page_size as usize) * 2).max(1);
        scored.truncate(keep);

        // 5-7. LLM re-ranking: batches of <= llm_batch_size, model cascade per batch.
        let batch_size = self.config.llm_batch_size.max(1);
        let total_items = scored.len();
        let mut degraded = false;

        for (batch_idx, chunk) in (0..total_items).collect::<Vec<_>>().chunks(batch_size).enumerate() {
            if degraded {
                break;
            }
            let batch_start = batch_idx * batch_size;
            let batch: Vec<(usize, &Listing)> = chunk.iter().map(|&i| (i - batch_start, &scored[i].0)).collect();
            let prompt = build_batch_prompt(&query.text, &batch);
            let messages =
                vec![ChatMessage::system("You score real-estate listing relevance."), ChatMessage::user(prompt)];
            let max_tokens = 60 * chunk.len() as u32 + 50;

            let models = [self.config.llm_primary.as_str(), self.config.llm_fallback.as_str(), self.config.llm_tertiary.as_str()];
            let mut response_text: Option<String> = None;

            for model in models {
                match self.llm.chat(model, &messages, self.config.llm_temperature, max_tokens).await {
                    Ok(response) => {
                        diagnostics.prompt_tokens += response.usage.prompt_tokens;
                        diagnostics.completion_tokens += response.usage.completion_tokens;
                        diagnostics.total_tokens += response.usage.total_tokens;
                        diagnostics.model_used = Some(response.model_used);
                        response_text = Some(response.text);
                        break;
                    }
                    Err(e) if e.kind == LlmErrorKind::ModelUnavailable => {
                        tracing::info!(model, "model unavailable, trying next in cascade");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e.message, "llm re-ranking failed, degrading remaining batches to hybrid-base");
                        degraded = true;
                        break;
                    }
                }
            }

            if let Some(text) = response_text {
                for (local_idx, llm_score) in parse_llm_scores(&text) {
                    if let Some(&global_idx) = chunk.get(local_idx) {
                        scored[global_idx].1.llm_score = Some(debias_multiple_of_five(llm_score, local_idx));
                    }
                }
            }
        }
        diagnostics.degraded = degraded;

        // 8. Final fusion. Listings the LLM never scored keep hybrid_base.
        for (_, diag) in scored.iter_mut() {
            match diag.llm_score {
                Some(llm_score) => {
                    let (final_score, label) = fuse(llm_score, diag.hybrid_base);
                    diag.final_score = final_score;
                    diag.method_label = label.to_string();
                }
                None => {
                    diag.final_score = diag.hybrid_base;
                    diag.method_label = "hybrid_base_no_llm".to_string();
                }
            }
        }

        // 9. Constraint overlay.
        for (listing, diag) in scored.iter_mut() {
            diag.final_score = constraints::adjust(listing, &query.text, diag.final_score);
        }

        // 10. Sort, paginate, emit.
        scored.sort_by(|a, b| {
            b.1.final_score
                .partial_cmp(&a.1.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.listing_key.cmp(&b.0.listing_key))
        });
        diagnostics.total_ranked = scored.len();

        let start = ((query.page.saturating_sub(1)) * query.page_size) as usize;
        let end = (start + query.page_size as usize).min(scored.len());
        let page_slice = if start >= scored.len() { &scored[0..0] } else { &scored[start..end] };

        let ranked = page_slice
            .iter()
            .map(|(listing, diag)| RankedListing { listing: listing.clone(), score: diag.final_score, diagnostics: diag.clone() })
            .collect();

        Ok((ranked, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ChatResponse, InMemoryListingStore, InMemoryVectorIndex, LlmError, TokenUsage};
    use crate::domain::{ListingStatus, Location, PointOfInterest, PropertyType, QueryFilters, SortOption};
    use async_trait::async_trait;

    struct FixedEmbedder;
    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    struct ScriptedLlm {
        response: String,
    }
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
                text: self.response.clone(),
                usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
                model_used: model.to_string(),
            })
        }
        async fn stream_chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> std::result::Result<Vec<crate::adapters::ChatStreamEvent>, LlmError> {
            unimplemented!()
        }
    }

    fn listing(key: i64, bedrooms: u32, price: i64, neighborhood: &str, ptype: PropertyType) -> Listing {
        Listing {
            listing_key: key,
            title: format!("Listing {key}"),
            description: "A lovely home".into(),
            price,
            property_type: ptype,
            status: ListingStatus::ForSale,
            bedrooms,
            bathrooms: 2.0,
            floor_area: 180,
            location: Location {
                address: "1 Main Rd".into(),
                neighborhood: neighborhood.into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: Default::default(),
            images: vec![],
            points_of_interest: vec![],
        }
    }

    async fn build_ranker(
        listings: Vec<Listing>,
        llm_response: &str,
    ) -> HybridRanker {
        let store = Arc::new(InMemoryListingStore::new(listings.clone()));
        let vector_index = Arc::new(InMemoryVectorIndex::default());
        for l in &listings {
            vector_index
                .upsert(l.listing_key, vec![1.0, 0.0], serde_json::json!({"price": l.price}))
                .await
                .unwrap();
        }
        let llm = Arc::new(ScriptedLlm { response: llm_response.to_string() });
        HybridRanker::new(store, Arc::new(FixedEmbedder), vector_index, llm, Config::default())
    }

    #[tokio::test]
    async fn scenario_s1_bedroom_and_price_constraint() {
        let l1 = listing(1, 3, 3_800_000, "Rondebosch", PropertyType::House);
        let l2 = listing(2, 4, 5_200_000, "Rondebosch", PropertyType::House);
        let ranker = build_ranker(vec![l1, l2], r#"[{"id":0,"score":88},{"id":1,"score":82}]"#).await;

        let mut query = Query::new("3 bedroom house under 4 million in Rondebosch");
        query.filters = QueryFilters::default();
        query.page = 1;
        query.page_size = 20;
        query.sort = SortOption::default();

        let (ranked, _diag) = ranker.rank(&query).await.unwrap();
        assert_eq!(ranked.len(), 2);
        let l1_rank = ranked.iter().find(|r| r.listing.listing_key == 1).unwrap();
        let l2_rank = ranked.iter().find(|r| r.listing.listing_key == 2).unwrap();
        assert!(l1_rank.score > l2_rank.score);
        assert!(l1_rank.score >= 75.0);
    }

    #[tokio::test]
    async fn scenario_s2_uct_walking_distance() {
        let mut l3 = listing(3, 2, 2_000_000, "Observatory", PropertyType::Apartment);
        l3.points_of_interest.push(PointOfInterest { name: "University of Cape Town".into(), category: "education".into(), distance_km: 0.8 });
        let mut l4 = listing(4, 2, 2_000_000, "Observatory", PropertyType::Apartment);
        l4.points_of_interest.push(PointOfInterest { name: "University of Cape Town".into(), category: "education".into(), distance_km: 2.4 });

        let ranker = build_ranker(vec![l3, l4], r#"[{"id":0,"score":70},{"id":1,"score":70}]"#).await;
        let query = Query::new("walking distance to UCT");
        let (ranked, _diag) = ranker.rank(&query).await.unwrap();

        let l3_rank = ranked.iter().find(|r| r.listing.listing_key == 3).unwrap();
        let l4_rank = ranked.iter().find(|r| r.listing.listing_key == 4).unwrap();
        assert!(l3_rank.score >= l4_rank.score);
    }

    #[tokio::test]
    async fn empty_candidate_set_returns_empty_not_error() {
        let ranker = build_ranker(vec![], "[]").await;
        let query = Query::new("anything");
        let (ranked, diag) = ranker.rank(&query).await.unwrap();
        assert!(ranked.is_empty());
        assert_eq!(diag.candidates_retrieved, 0);
    }

    #[tokio::test]
    async fn listing_missing_from_llm_response_keeps_hybrid_base() {
        let l1 = listing(1, 3, 2_000_000, "Rondebosch", PropertyType::House);
        let l2 = listing(2, 3, 2_000_000, "Rondebosch", PropertyType::House);
        let store = Arc::new(InMemoryListingStore::new(vec![l1.clone(), l2.clone()]));
        let vector_index = Arc::new(InMemoryVectorIndex::default());
        // l1's vector exactly matches the query embedding so it sorts
        // first deterministically; l2 gets a lower, but still positive,
        // similarity. Only id 0 (l1, the higher-ranked slot) is scored
        // by the LLM; l2 must keep its hybrid_base.
        vector_index.upsert(1, vec![1.0, 0.0], serde_json::json!({"price": l1.price})).await.unwrap();
        vector_index.upsert(2, vec![0.2, 0.98], serde_json::json!({"price": l2.price})).await.unwrap();
        let llm = Arc::new(ScriptedLlm { response: r#"[{"id":0,"score":80}]"#.to_string() });
        let ranker = HybridRanker::new(store, Arc::new(FixedEmbedder), vector_index, llm, Config::default());

        let query = Query::new("house");
        let (ranked, _) = ranker.rank(&query).await.unwrap();
        let l1_rank = ranked.iter().find(|r| r.listing.listing_key == 1).unwrap();
        let l2_rank = ranked.iter().find(|r| r.listing.listing_key == 2).unwrap();
        assert!(l1_rank.diagnostics.llm_score.is_some());
        assert_eq!(l2_rank.diagnostics.method_label, "hybrid_base_no_llm".to_string());
        assert_eq!(l2_rank.diagnostics.final_score, constraints::adjust(&l2, "house", l2_rank.diagnostics.hybrid_base));
    }

    #[tokio::test]
    async fn page_beyond_total_pages_returns_empty_page() {
        let l1 = listing(1, 3, 2_000_000, "Rondebosch", PropertyType::House);
        let ranker = build_ranker(vec![l1], r#"[{"id":0,"score":80}]"#).await;
        let mut query = Query::new("house");
        query.page = 99;
        let (ranked, diag) = ranker.rank(&query).await.unwrap();
        assert!(ranked.is_empty());
        // The slice returned for the requested page is empty, but the
        // diagnostics must still report the true ranked total so pagination
        // metadata built from it stays correct.
        assert_eq!(diag.total_ranked, 1);
    }

    #[tokio::test]
    async fn diagnostics_report_full_ranked_total_not_page_size() {
        let listings: Vec<Listing> = (1..=25).map(|i| listing(i, 3, 2_000_000, "Rondebosch", PropertyType::House)).collect();
        let scores: Vec<String> = (0..25).map(|i| format!(r#"{{"id":{i},"score":75}}"#)).collect();
        let llm_response = format!("[{}]", scores.join(","));
        let store = Arc::new(InMemoryListingStore::new(listings.clone()));
        let vector_index = Arc::new(InMemoryVectorIndex::default());
        for l in &listings {
            vector_index.upsert(l.listing_key, vec![1.0, 0.0], serde_json::json!({"price": l.price})).await.unwrap();
        }
        let llm = Arc::new(ScriptedLlm { response: llm_response });
        let mut config = Config::default();
        config.llm_batch_size = 25;
        let ranker = HybridRanker::new(store, Arc::new(FixedEmbedder), vector_index, llm, config);

        // page_size=15 keeps all 25 candidates through the page_size*2
        // truncation in step 4 (stage cap of 30), so total_ranked == 25
        // while the returned page is still limited to page_size.
        let mut query = Query::new("house");
        query.page = 1;
        query.page_size = 15;
        let (ranked, diag) = ranker.rank(&query).await.unwrap();
        assert_eq!(ranked.len(), 15);
        assert_eq!(diag.total_ranked, 25);
    }
}
