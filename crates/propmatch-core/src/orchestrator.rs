use std::sync::Arc;

use crate::domain::{ExplanationRecord, PaginationMeta, Query, RankedListing, RankingDiagnostics};
use crate::error::{PropMatchError, Result};
use crate::explanation::{ExplanationEngine, ExplanationEvent};
use crate::ranker::HybridRanker;
use crate::security::{SecurityGate, Tier};

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub results: Vec<RankedListing>,
    pub pagination: PaginationMeta,
    pub diagnostics: RankingDiagnostics,
}

fn validate_query(query: &Query, max_chars: usize) -> Result<()> {
    let trimmed = query.text.trim();
    if trimmed.is_empty() {
        return Err(PropMatchError::InvalidInput("query text is empty".into()));
    }
    if trimmed.chars().count() > max_chars {
        return Err(PropMatchError::InvalidInput("query text too long".into()));
    }
    if query.page < 1 {
        return Err(PropMatchError::InvalidInput("page must be >= 1".into()));
    }
    if query.page_size < 1 || query.page_size > 100 {
        return Err(PropMatchError::InvalidInput("page_size must be in [1, 100]".into()));
    }
    Ok(())
}

/// C11. Thin coordination layer: validates input, runs it past the
/// Security Gate, routes to the Hybrid Ranker or the Explanation
/// Engine, and shapes the response. Holds no ranking or scoring logic
/// of its own.
pub struct RequestOrchestrator {
    ranker: Arc<HybridRanker>,
    explanation_engine: Arc<ExplanationEngine>,
    gate: Arc<SecurityGate>,
    query_max_chars: usize,
}

impl RequestOrchestrator {
    pub fn new(ranker: Arc<HybridRanker>, explanation_engine: Arc<ExplanationEngine>, gate: Arc<SecurityGate>, query_max_chars: usize) -> Self {
        RequestOrchestrator { ranker, explanation_engine, gate, query_max_chars }
    }

    pub async fn search(&self, ip: &str, agent: &str, query: Query) -> Result<SearchResponse> {
        validate_query(&query, self.query_max_chars)?;
        self.gate.admit(ip, "/search", agent, Tier::Search, query.text.len(), &query.text).await?;

        let (results, diagnostics) = self.ranker.rank(&query).await?;
        let pagination = PaginationMeta::compute(diagnostics.total_ranked, query.page, query.page_size);
        Ok(SearchResponse { results, pagination, diagnostics })
    }

    pub async fn explain(&self, ip: &str, agent: &str, query_text: &str, listing_key: i64) -> Result<ExplanationRecord> {
        self.gate.admit(ip, "/explain", agent, Tier::Explanation, query_text.len(), query_text).await?;
        self.explanation_engine.generate(query_text, listing_key).await
    }

    pub async fn explain_stream(&self, ip: &str, agent: &str, query_text: &str, listing_key: i64) -> Vec<ExplanationEvent> {
        if let Err(e) = self.gate.admit(ip, "/explain/stream", agent, Tier::Explanation, query_text.len(), query_text).await {
            return vec![ExplanationEvent::Error { message: e.to_string() }];
        }
        self.explanation_engine.stream(query_text, listing_key).await
    }
}
