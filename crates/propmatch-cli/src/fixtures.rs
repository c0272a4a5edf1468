//! Local fixture data and adapters for the demo harness.
//!
//! The CLI never calls a real embedding service or LLM provider -- it
//! ships a small, fixed Cape Town listing set plus deterministic
//! stand-ins for `Embedder` and `LlmClient` so the full pipeline (vector
//! retrieval, BM25, fusion, constraints) runs end to end offline.

use std::collections::HashSet;

use async_trait::async_trait;
use propmatch_core::adapters::{ChatMessage, ChatResponse, ChatStreamEvent, Embedder, LlmError, LlmErrorKind, TokenUsage};
use propmatch_core::domain::{Listing, ListingStatus, Location, PointOfInterest, PropertyType};
use propmatch_core::error::Result;

pub fn seed_listings() -> Vec<Listing> {
    vec![
        Listing {
            listing_key: 1,
            title: "Modern 3 bed family home in Rondebosch".into(),
            description: "Spacious family home with a garden, close to schools and the Rondebosch train station."
                .into(),
            price: 3_200_000,
            property_type: PropertyType::House,
            status: ListingStatus::ForSale,
            bedrooms: 3,
            bathrooms: 2.0,
            floor_area: 180,
            location: Location {
                address: "12 Belmont Road".into(),
                neighborhood: "Rondebosch".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: ["garden", "garage", "pet friendly"].into_iter().map(String::from).collect(),
            images: vec![],
            points_of_interest: vec![
                PointOfInterest { name: "University of Cape Town".into(), category: "university".into(), distance_km: 1.8 },
                PointOfInterest { name: "Rondebosch Station".into(), category: "transport".into(), distance_km: 0.4 },
            ],
        },
        Listing {
            listing_key: 2,
            title: "2 bed apartment near UCT, walk to campus".into(),
            description: "Bright second-floor apartment a short walk from UCT upper campus, ideal for staff or students."
                .into(),
            price: 1_650_000,
            property_type: PropertyType::Apartment,
            status: ListingStatus::ForSale,
            bedrooms: 2,
            bathrooms: 1.0,
            floor_area: 75,
            location: Location {
                address: "4 Main Road".into(),
                neighborhood: "Rosebank".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: ["balcony", "security"].into_iter().map(String::from).collect(),
            images: vec![],
            points_of_interest: vec![PointOfInterest {
                name: "University of Cape Town".into(),
                category: "university".into(),
                distance_km: 0.6,
            }],
        },
        Listing {
            listing_key: 3,
            title: "Luxury waterfront penthouse in Green Point".into(),
            description: "Sea-facing penthouse with private pool, minutes from the V&A Waterfront.".into(),
            price: 12_500_000,
            property_type: PropertyType::Apartment,
            status: ListingStatus::ForSale,
            bedrooms: 4,
            bathrooms: 3.5,
            floor_area: 320,
            location: Location {
                address: "100 Beach Road".into(),
                neighborhood: "Green Point".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: ["pool", "sea view", "concierge"].into_iter().map(String::from).collect(),
            images: vec![],
            points_of_interest: vec![PointOfInterest {
                name: "V&A Waterfront".into(),
                category: "landmark".into(),
                distance_km: 1.1,
            }],
        },
        Listing {
            listing_key: 4,
            title: "Affordable 1 bed starter flat in Observatory".into(),
            description: "Cosy one-bedroom flat in the heart of Observatory's cafe strip.".into(),
            price: 980_000,
            property_type: PropertyType::Apartment,
            status: ListingStatus::ForSale,
            bedrooms: 1,
            bathrooms: 1.0,
            floor_area: 45,
            location: Location {
                address: "33 Lower Main Road".into(),
                neighborhood: "Observatory".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: ["pet friendly"].into_iter().map(String::from).collect(),
            images: vec![],
            points_of_interest: vec![PointOfInterest {
                name: "University of Cape Town".into(),
                category: "university".into(),
                distance_km: 3.2,
            }],
        },
        Listing {
            listing_key: 5,
            title: "Townhouse in Claremont close to CBD".into(),
            description: "Secure townhouse complex in Claremont with quick access to the Cape Town CBD.".into(),
            price: 4_400_000,
            property_type: PropertyType::Townhouse,
            status: ListingStatus::ForSale,
            bedrooms: 3,
            bathrooms: 2.5,
            floor_area: 160,
            location: Location {
                address: "8 Palmboom Road".into(),
                neighborhood: "Claremont".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: ["garden", "garage"].into_iter().map(String::from).collect(),
            images: vec![],
            points_of_interest: vec![PointOfInterest { name: "Cape Town CBD".into(), category: "cbd".into(), distance_km: 8.0 }],
        },
    ]
}

fn char_bag(text: &str) -> HashSet<&str> {
    text.split_whitespace().collect()
}

/// Turns a listing (or a query) into a small fixed-dimension vector by
/// hashing its vocabulary into buckets. Not a real embedding model --
/// just enough structure that semantically similar text lands nearby,
/// which is all the demo pipeline needs.
pub fn bag_of_words_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for word in char_bag(&text.to_ascii_lowercase()) {
        let mut hash: u64 = 1469598103934665603;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        v[(hash as usize) % dims] += 1.0;
    }
    v
}

pub fn listing_text(listing: &Listing) -> String {
    format!(
        "{} {} {} {} {} bedrooms {}",
        listing.title,
        listing.description,
        listing.property_type,
        listing.location.neighborhood,
        listing.bedrooms,
        listing.features.iter().cloned().collect::<Vec<_>>().join(" ")
    )
}

pub struct FixtureEmbedder {
    pub dims: usize,
}

#[async_trait]
impl Embedder for FixtureEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_of_words_vector(text, self.dims))
    }

    fn dimension(&self) -> usize {
        self.dims
    }
}

/// Scripted LLM stand-in. Emits a neutral score band for every listing
/// it's shown so the fusion and constraint stages run on real input
/// without a network dependency.
pub struct FixtureLlmClient;

#[async_trait]
impl propmatch_core::adapters::LlmClient for FixtureLlmClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> std::result::Result<ChatResponse, LlmError> {
        let batch_size = messages.last().map(|m| m.content.matches("] ID: ").count().max(1)).unwrap_or(1);
        let entries: Vec<String> = (0..batch_size).map(|i| format!("{{\"id\": {i}, \"score\": 72}}")).collect();
        Ok(ChatResponse {
            text: format!("[{}]", entries.join(",")),
            usage: TokenUsage { prompt_tokens: 120, completion_tokens: 40, total_tokens: 160 },
            model_used: model.to_string(),
        })
    }

    async fn stream_chat(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError> {
        let chunks = [
            "This property matches your search ",
            "because of its location and layout. ",
            "It's a solid fit for the stated budget.",
        ];
        let mut events: Vec<ChatStreamEvent> = chunks.iter().map(|c| ChatStreamEvent::Chunk { content: c.to_string() }).collect();
        events.push(ChatStreamEvent::End {
            usage: TokenUsage { prompt_tokens: 80, completion_tokens: 30, total_tokens: 110 },
            model_used: model.to_string(),
        });
        Ok(events)
    }
}

/// Always-fails LLM, used by the `--simulate-llm-down` flag to exercise
/// the degraded/model-cascade path from the command line.
pub struct FailingLlmClient;

#[async_trait]
impl propmatch_core::adapters::LlmClient for FailingLlmClient {
    async fn chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> std::result::Result<ChatResponse, LlmError> {
        Err(LlmError { kind: LlmErrorKind::ModelUnavailable, message: "simulated outage".into() })
    }

    async fn stream_chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> std::result::Result<Vec<ChatStreamEvent>, LlmError> {
        Err(LlmError { kind: LlmErrorKind::ModelUnavailable, message: "simulated outage".into() })
    }
}
