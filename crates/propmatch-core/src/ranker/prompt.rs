use serde::Deserialize;

use crate::domain::Listing;

/// Characterizes a listing's size for the prompt's area-category line.
fn area_category(floor_area: i64) -> &'static str {
    match floor_area {
        a if a < 60 => "compact, efficient layout",
        a if a < 120 => "comfortable family-sized",
        a if a < 250 => "spacious, generous proportions",
        _ => "expansive, estate-scale",
    }
}

fn walkability_label(listing: &Listing) -> &'static str {
    let close_pois = listing.points_of_interest.iter().filter(|p| p.distance_km <= 1.5).count();
    match close_pois {
        0 => "car-dependent",
        1..=2 => "moderately walkable",
        _ => "highly walkable",
    }
}

fn poi_summary(listing: &Listing) -> String {
    if listing.points_of_interest.is_empty() {
        return "no notable points of interest on record".to_string();
    }
    let mut by_category: std::collections::BTreeMap<&str, Vec<&crate::domain::PointOfInterest>> =
        std::collections::BTreeMap::new();
    for poi in &listing.points_of_interest {
        by_category.entry(poi.category.as_str()).or_default().push(poi);
    }
    let mut lines = Vec::new();
    for (category, mut pois) in by_category {
        pois.sort_by(|a, b| a.distance_km.partial_cmp(&b.distance_km).unwrap_or(std::cmp::Ordering::Equal));
        let band = pois[0].distance_km;
        let band_label = if band <= 1.0 {
            "walking distance"
        } else if band <= 3.0 {
            "short drive"
        } else {
            "further afield"
        };
        lines.push(format!(
            "{category}: {} ({band_label}, {:.1}km)",
            pois[0].name,
            band
        ));
    }
    lines.join("; ")
}

/// A bounded, human-readable summary of one listing for the LLM prompt.
/// Kept separate from the listing's own data so its shape can evolve
/// without touching the domain model.
pub fn listing_summary(listing: &Listing) -> String {
    format!(
        "{} | {} bed, {:.1} bath | R{} (R{:.0}/m², {}) | {} ({}) | {} | {}",
        listing.property_type,
        listing.bedrooms,
        listing.bathrooms,
        listing.price,
        listing.price_per_sqm(),
        listing.price_bucket(),
        area_category(listing.floor_area),
        listing.floor_area,
        poi_summary(listing),
        walkability_label(listing),
    )
}

/// Builds the batch prompt: user query, one bounded summary per listing
/// indexed from zero, scoring-band calibration, the "no multiples of
/// five" instruction, and a strict JSON output format.
pub fn build_batch_prompt(query_text: &str, batch: &[(usize, &Listing)]) -> String {
    let mut listings_block = String::new();
    for (idx, listing) in batch {
        listings_block.push_str(&format!("[{idx}] ID: {} | {}\n", listing.listing_key, listing_summary(listing)));
    }

    format!(
        "You are scoring real-estate listings against a user's search query.\n\
         Query: \"{query_text}\"\n\n\
         Listings:\n{listings_block}\n\
         Score each listing from 15 to 100 using these bands:\n\
         15-29 unsuitable, 30-59 poor, 60-74 adequate, 75-84 good, 85-94 very good, 95-100 excellent.\n\
         Do not output scores that are exact multiples of 5.\n\
         Respond with strict JSON only, no commentary, no code fences:\n\
         [{{\"id\": <index>, \"score\": <number>}}, ...]"
    )
}

#[derive(Debug, Deserialize)]
struct RawScoreEntry {
    id: Option<usize>,
    score: Option<f64>,
}

/// Extracts the first `[ ... ]` substring from the model's response and
/// parses it, ignoring entries with missing fields rather than failing
/// the whole batch over one malformed element.
pub fn parse_llm_scores(response_text: &str) -> Vec<(usize, f64)> {
    let Some(start) = response_text.find('[') else { return Vec::new() };
    let Some(end) = response_text.rfind(']') else { return Vec::new() };
    if end < start {
        return Vec::new();
    }
    let slice = &response_text[start..=end];
    let Ok(entries) = serde_json::from_str::<Vec<RawScoreEntry>>(slice) else { return Vec::new() };
    entries
        .into_iter()
        .filter_map(|e| match (e.id, e.score) {
            (Some(id), Some(score)) => Some((id, score)),
            _ => None,
        })
        .collect()
}

/// Breaks synthetic clumping on scores that land exactly on a multiple
/// of 5 (other than the three band boundaries explicitly allowed), by
/// adding a small deterministic offset derived from the listing's
/// position within its batch.
pub fn debias_multiple_of_five(score: f64, batch_position: usize) -> f64 {
    let rounded = score.round();
    let is_multiple_of_five = (rounded % 5.0).abs() < f64::EPSILON;
    let is_allowed_boundary = rounded == 15.0 || rounded == 25.0 || rounded == 35.0;
    if is_multiple_of_five && !is_allowed_boundary {
        // Deterministic offset in [-2, +3], cycling with batch position.
        let offsets = [-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
        score + offsets[batch_position % offsets.len()]
    } else {
        score
    }
}
