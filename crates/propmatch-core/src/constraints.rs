use lazy_static::lazy_static;
use regex::Regex;

use crate::domain::{Listing, PropertyType};

lazy_static! {
    static ref PRICE_CAP_RE: Regex =
        Regex::new(r"(?i)(?:under|below|less than)\s+r?\s*(\d+(?:\.\d+)?)\s*million").unwrap();
    static ref PRICE_FLOOR_RE: Regex =
        Regex::new(r"(?i)(?:over|above|more than)\s+r?\s*(\d+(?:\.\d+)?)\s*million").unwrap();
    static ref BEDROOM_RE: Regex = Regex::new(r"(?i)(\d+)\s*(?:bed|bedroom)s?").unwrap();
    static ref WALKING_RE: Regex = Regex::new(r"(?i)walking distance").unwrap();
    static ref UCT_RE: Regex = Regex::new(r"(?i)\buct\b|university of cape town").unwrap();
    static ref WATERFRONT_RE: Regex = Regex::new(r"(?i)waterfront|v&a").unwrap();
    static ref CBD_RE: Regex = Regex::new(r"(?i)\bcbd\b|city bowl|city cent(?:re|er)").unwrap();
}

/// Closed list of non-Cape-Town locations that make a query
/// unsatisfiable against this corpus.
const IMPOSSIBLE_LOCATIONS: &[&str] = &[
    "johannesburg", "pretoria", "durban", "bloemfontein", "port elizabeth", "gqeberha",
    "east london", "kimberley", "polokwane", "nelspruit", "mbombela",
    "london", "new york", "paris", "dubai", "sydney",
];

const CBD_NEIGHBORHOODS: &[&str] = &["city centre", "foreshore", "city bowl"];

fn property_type_token(text: &str) -> Option<PropertyType> {
    for (pattern, ptype) in [
        ("apartment", PropertyType::Apartment),
        ("flat", PropertyType::Apartment),
        ("townhouse", PropertyType::Townhouse),
        ("villa", PropertyType::Villa),
        ("house", PropertyType::House),
    ] {
        if text.to_lowercase().contains(pattern) {
            return Some(ptype);
        }
    }
    None
}

/// Everything the constraint enforcer extracts from a sanitized query
/// string before it touches any listing.
#[derive(Debug, Clone, Default)]
pub struct ParsedConstraints {
    pub price_cap: Option<i64>,
    pub price_floor: Option<i64>,
    pub bedroom_count: Option<u32>,
    pub property_type: Option<PropertyType>,
    pub impossible_location: bool,
    pub uct_intent: bool,
    pub waterfront_intent: bool,
    pub cbd_intent: bool,
    pub walking_qualifier: bool,
}

pub fn parse_query_constraints(text: &str) -> ParsedConstraints {
    let lower = text.to_lowercase();

    let price_cap = PRICE_CAP_RE
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|millions| (millions * 1_000_000.0) as i64);

    let price_floor = PRICE_FLOOR_RE
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|millions| (millions * 1_000_000.0) as i64);

    let bedroom_count = BEDROOM_RE.captures(&lower).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<u32>().ok());

    let impossible_location = IMPOSSIBLE_LOCATIONS.iter().any(|loc| lower.contains(loc));

    ParsedConstraints {
        price_cap,
        price_floor,
        bedroom_count,
        property_type: property_type_token(&lower),
        impossible_location,
        uct_intent: UCT_RE.is_match(&lower),
        waterfront_intent: WATERFRONT_RE.is_match(&lower),
        cbd_intent: CBD_RE.is_match(&lower),
        walking_qualifier: WALKING_RE.is_match(&lower),
    }
}

fn min_distance_matching<'a>(listing: &'a Listing, predicate: impl Fn(&str) -> bool) -> Option<f64> {
    listing
        .points_of_interest
        .iter()
        .filter(|p| predicate(&p.name.to_lowercase()))
        .map(|p| p.distance_km)
        .fold(None, |acc, d| Some(acc.map_or(d, |a: f64| a.min(d))))
}

/// Pure multiplicative penalty/bonus function: `adjust(listing, query_text,
/// base_score) -> score`. Deterministic given the same inputs, and meant to
/// run exactly once per ranked listing, against the fused `hybrid_base`/
/// `llm` score (pipeline step 9).
///
/// Not idempotent under arbitrary re-application: the violations it finds
/// come only from `listing`/`query_text`, never from the running score, so
/// feeding its own output back in as `base_score` reapplies the same
/// multiplier rather than leaving an already-adjusted score alone. The one
/// exception is the clamp boundary -- once a penalty has driven the score
/// to the floor of 15, or a bonus has driven it to the ceiling of 100, a
/// further application is a no-op, because the clamp pins it there
/// regardless of the multiplier.
pub fn adjust(listing: &Listing, query_text: &str, base_score: f64) -> f64 {
    let parsed = parse_query_constraints(query_text);
    let mut score = base_score;

    if let Some(cap) = parsed.price_cap {
        if listing.price > cap {
            score *= 0.3;
        }
    }
    if let Some(floor) = parsed.price_floor {
        if listing.price < floor {
            score *= 0.3;
        }
    }
    if parsed.impossible_location {
        score *= 0.2;
    }
    if let Some(n) = parsed.bedroom_count {
        if listing.bedrooms != n {
            score *= 0.7;
        }
    }
    if let Some(ptype) = parsed.property_type {
        if !ptype.synonym_set().contains(&listing.property_type) {
            score *= 0.85;
        }
    }

    if parsed.uct_intent {
        if let Some(d) = min_distance_matching(listing, |n| n.contains("uct") || n.contains("university of cape town")) {
            score *= if parsed.walking_qualifier {
                if d <= 1.0 {
                    1.4
                } else if d <= 1.5 {
                    1.25
                } else if d <= 2.0 {
                    1.1
                } else {
                    0.7
                }
            } else if d <= 2.0 {
                1.2
            } else if d <= 4.0 {
                1.1
            } else {
                1.0
            };
        }
    }

    if parsed.waterfront_intent {
        if let Some(d) = min_distance_matching(listing, |n| n.contains("waterfront") || n.contains("v&a")) {
            if d <= 2.0 {
                score *= 1.15;
            }
        }
    }

    if parsed.cbd_intent && CBD_NEIGHBORHOODS.iter().any(|n| listing.location.neighborhood.to_lowercase() == *n) {
        score *= 1.1;
    }

    (score.clamp(15.0, 100.0) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ListingStatus, Location, PointOfInterest};

    fn base_listing() -> Listing {
        Listing {
            listing_key: 1,
            title: "t".into(),
            description: "d".into(),
            price: 3_800_000,
            property_type: PropertyType::House,
            status: ListingStatus::ForSale,
            bedrooms: 3,
            bathrooms: 2.0,
            floor_area: 180,
            location: Location {
                address: "a".into(),
                neighborhood: "Rondebosch".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: Default::default(),
            images: vec![],
            points_of_interest: vec![],
        }
    }

    #[test]
    fn price_cap_applies_030_penalty() {
        let mut listing = base_listing();
        listing.price = 5_200_000;
        let score = adjust(&listing, "3 bedroom house under 4 million in Rondebosch", 90.0);
        // bedroom matches (3==3) so only the price penalty applies: 90*0.3=27
        assert_eq!(score, 27.0);
    }

    #[test]
    fn bedroom_mismatch_applies_07_penalty() {
        let listing = base_listing();
        let score = adjust(&listing, "4 bedroom house under 10 million", 80.0);
        assert_eq!(score, (80.0 * 0.7 * 10.0).round() / 10.0);
    }

    #[test]
    fn combined_price_and_bedroom_violation() {
        let mut listing = base_listing();
        listing.bedrooms = 4;
        listing.price = 5_200_000;
        let score = adjust(&listing, "3 bedroom house under 4 million in Rondebosch", 90.0);
        assert_eq!(score, (90.0 * 0.3 * 0.7 * 10.0).round() / 10.0);
    }

    #[test]
    fn uct_walking_distance_close_gets_14x() {
        let mut listing = base_listing();
        listing.points_of_interest.push(PointOfInterest {
            name: "University of Cape Town".into(),
            category: "education".into(),
            distance_km: 0.8,
        });
        let score = adjust(&listing, "walking distance to UCT", 50.0);
        assert_eq!(score, (50.0 * 1.4 * 10.0).round() / 10.0);
    }

    #[test]
    fn uct_walking_distance_far_gets_07x() {
        let mut listing = base_listing();
        listing.points_of_interest.push(PointOfInterest {
            name: "University of Cape Town".into(),
            category: "education".into(),
            distance_km: 2.4,
        });
        let score = adjust(&listing, "walking distance to UCT", 50.0);
        assert_eq!(score, (50.0 * 0.7 * 10.0).round() / 10.0);
    }

    #[test]
    fn impossible_location_applies_02_penalty() {
        let listing = base_listing();
        let score = adjust(&listing, "house in Johannesburg", 90.0);
        assert_eq!(score, (90.0 * 0.2 * 10.0).round() / 10.0);
    }

    #[test]
    fn pure_function_is_deterministic_given_same_inputs() {
        let listing = base_listing();
        let a = adjust(&listing, "3 bedroom house under 4 million", 70.0);
        let b = adjust(&listing, "3 bedroom house under 4 million", 70.0);
        assert_eq!(a, b);
    }

    #[test]
    fn clamps_to_floor_of_15() {
        let mut listing = base_listing();
        listing.price = 50_000_000;
        listing.bedrooms = 1;
        let score = adjust(&listing, "3 bedroom house under 1 million", 20.0);
        assert!(score >= 15.0);
    }

    #[test]
    fn repeated_application_compounds_the_same_penalty() {
        let mut listing = base_listing();
        listing.price = 5_200_000;
        let query = "3 bedroom house under 4 million";
        let once = adjust(&listing, query, 90.0);
        let twice = adjust(&listing, query, once);
        // 90*0.3=27, then 27*0.3=8.1 clamped up to the 15 floor: the same
        // query-derived penalty reapplies rather than leaving `once` alone.
        assert_eq!(once, 27.0);
        assert_eq!(twice, 15.0);
        assert_ne!(twice, once);
    }

    #[test]
    fn stable_once_clamped_to_the_floor() {
        let mut listing = base_listing();
        listing.price = 50_000_000;
        listing.bedrooms = 1;
        let query = "3 bedroom house under 1 million";
        let floored = adjust(&listing, query, 20.0);
        assert_eq!(floored, 15.0);
        assert_eq!(adjust(&listing, query, floored), floored);
    }

    #[test]
    fn stable_once_clamped_to_the_ceiling() {
        let mut listing = base_listing();
        listing.points_of_interest.push(PointOfInterest {
            name: "University of Cape Town".into(),
            category: "education".into(),
            distance_km: 0.8,
        });
        let query = "walking distance to UCT";
        let ceilinged = adjust(&listing, query, 95.0);
        assert_eq!(ceilinged, 100.0);
        assert_eq!(adjust(&listing, query, ceilinged), ceilinged);
    }

    use proptest::prelude::*;

    proptest! {
        /// Price-cap law: for any "under X million" query and any listing
        /// priced over that cap, `final <= 0.3 * pre_constraint_score`.
        /// `pre` is kept at 50.0..100.0 so `0.3*pre` never dips below the
        /// 15 floor, where the clamp would push `final` back above the bound.
        #[test]
        fn price_cap_law(millions in 1i64..20, pre in 50.0f64..100.0) {
            let mut listing = base_listing();
            listing.price = millions * 1_000_000 + 100_000;
            let query = format!("house under {millions} million");
            let score = adjust(&listing, &query, pre);
            prop_assert!(score <= pre * 0.3 + 0.05);
        }

        /// Bedroom-mismatch law: for any query naming bedroom count N and a
        /// listing with a different bedroom count, `final <= 0.7 * pre`.
        #[test]
        fn bedroom_mismatch_law(n in 1u32..6, pre in 70.0f64..100.0) {
            let mut listing = base_listing();
            listing.bedrooms = n + 1;
            let query = format!("{n} bedroom house");
            let score = adjust(&listing, &query, pre);
            prop_assert!(score <= pre * 0.7 + 0.05);
        }

        /// UCT-distance law: beyond 2.0km under a "walking distance to UCT"
        /// query, the multiplier is exactly 0.7, not merely a penalty.
        #[test]
        fn uct_walking_distance_far_law(distance_km in 2.01f64..20.0, pre in 25.0f64..100.0) {
            let mut listing = base_listing();
            listing.points_of_interest.push(PointOfInterest {
                name: "University of Cape Town".into(),
                category: "education".into(),
                distance_km,
            });
            let score = adjust(&listing, "walking distance to UCT", pre);
            let expected = (pre * 0.7 * 10.0).round() / 10.0;
            prop_assert!((score - expected).abs() < 1e-9);
        }
    }
}
