use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Residential property category. Parsed at the text boundary (query
/// filters, synthetic BM25 documents) and carried as a tagged variant
/// everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    House,
    Apartment,
    Townhouse,
    Villa,
    Condo,
}

impl PropertyType {
    /// Types treated as interchangeable by the constraint enforcer's
    /// synonym rule (apartment<->flat, house<->villa).
    pub fn synonym_set(self) -> &'static [PropertyType] {
        match self {
            PropertyType::Apartment | PropertyType::Condo => &[PropertyType::Apartment, PropertyType::Condo],
            PropertyType::House | PropertyType::Villa => &[PropertyType::House, PropertyType::Villa],
            PropertyType::Townhouse => &[PropertyType::Townhouse],
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyType::House => "house",
            PropertyType::Apartment => "apartment",
            PropertyType::Townhouse => "townhouse",
            PropertyType::Villa => "villa",
            PropertyType::Condo => "condo",
        };
        f.write_str(s)
    }
}

impl FromStr for PropertyType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "house" => Ok(PropertyType::House),
            "apartment" | "flat" => Ok(PropertyType::Apartment),
            "townhouse" => Ok(PropertyType::Townhouse),
            "villa" => Ok(PropertyType::Villa),
            "condo" | "condominium" => Ok(PropertyType::Condo),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    ForSale,
    ForRent,
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListingStatus::ForSale => "for_sale",
            ListingStatus::ForRent => "for_rent",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub neighborhood: String,
    pub city: String,
    pub province: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub name: String,
    pub category: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_key: i64,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub property_type: PropertyType,
    pub status: ListingStatus,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub floor_area: i64,
    pub location: Location,
    pub features: HashSet<String>,
    pub images: Vec<String>,
    pub points_of_interest: Vec<PointOfInterest>,
}

impl Listing {
    /// Price per square metre, used in the LLM prompt's market context.
    /// Zero floor area never occurs in valid listings but we guard anyway
    /// since this feeds user-facing text.
    pub fn price_per_sqm(&self) -> f64 {
        if self.floor_area <= 0 {
            0.0
        } else {
            self.price as f64 / self.floor_area as f64
        }
    }

    pub fn price_bucket(&self) -> &'static str {
        match self.price {
            p if p < 1_500_000 => "affordable budget",
            p if p < 5_000_000 => "mid range",
            _ => "luxury premium",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Relevance,
    Price,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SortOption {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortOption {
    fn default() -> Self {
        SortOption {
            field: SortField::Relevance,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    pub property_type: Option<PropertyType>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub min_area: Option<i64>,
    pub max_area: Option<i64>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub filters: QueryFilters,
    pub page: u32,
    pub page_size: u32,
    pub sort: SortOption,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Query {
            text: text.into(),
            filters: QueryFilters::default(),
            page: 1,
            page_size: 20,
            sort: SortOption::default(),
        }
    }
}

/// Per-listing breakdown of how `final_score` was produced, kept
/// alongside the ranked result for observability and for the S1/S2/S6
/// scenario assertions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDiagnostics {
    pub vector_raw: f64,
    pub vector_normalized: f64,
    pub bm25_raw: f64,
    pub bm25_contribution: f64,
    pub hybrid_base: f64,
    pub llm_score: Option<f64>,
    pub final_score: f64,
    pub method_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedListing {
    pub listing: Listing,
    pub score: f64,
    pub diagnostics: ScoreDiagnostics,
}

/// Request-scoped diagnostics for a completed ranking call, surfaced by
/// the orchestrator as degraded/error metadata rather than failing the
/// request outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingDiagnostics {
    pub candidates_retrieved: usize,
    pub candidates_hydrated: usize,
    /// Count of ranked listings before pagination is applied; the
    /// pagination total, not the length of the returned page.
    pub total_ranked: usize,
    pub degraded: bool,
    pub model_used: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationPoint {
    pub headline: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationRecord {
    pub search_text: String,
    pub listing_key: i64,
    pub property_title: String,
    pub match_score: f64,
    pub positive_points: Vec<ExplanationPoint>,
    pub negative_points: Vec<ExplanationPoint>,
    pub summary: String,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    RateLimit,
    Ddos,
    PromptInjection,
    SqlInjection,
    SuspiciousAgent,
    LargePayload,
    BlockedIpAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: i64,
    pub ip: String,
    pub attack_kind: AttackKind,
    pub threat: ThreatLevel,
    pub endpoint: String,
    pub agent: String,
    pub payload_size: Option<usize>,
    pub extras: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub total_results: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PaginationMeta {
    pub fn compute(total_results: usize, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            ((total_results as f64) / (page_size as f64)).ceil() as u32
        };
        PaginationMeta {
            total_results,
            page,
            page_size,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}
