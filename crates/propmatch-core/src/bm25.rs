use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::Listing;

/// Lowercase, strip non-alphanumerics, drop tokens shorter than 2
/// characters. Shared by corpus construction and synthetic-document
/// composition so scoring always sees the same token stream it was
/// indexed with.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// The synthetic document a listing contributes to the lexical index:
/// type, bed/bath counts, location, features, top POI names, and a
/// price-bucket tag, all folded into one token stream.
pub fn synthetic_document(listing: &Listing) -> String {
    let mut parts = vec![
        listing.property_type.to_string(),
        format!("{} bedroom", listing.bedrooms),
        format!("{} bathroom", listing.bathrooms as u32),
        listing.location.neighborhood.clone(),
        listing.location.city.clone(),
        listing.location.province.clone(),
    ];
    parts.extend(listing.features.iter().cloned());
    let mut pois: Vec<&str> = listing.points_of_interest.iter().map(|p| p.name.as_str()).collect();
    pois.truncate(10);
    parts.extend(pois.into_iter().map(str::to_string));
    parts.push(listing.price_bucket().to_string());
    parts.join(" ")
}

#[derive(Default)]
struct BuiltState {
    /// term -> number of documents containing it.
    doc_freq: HashMap<String, u32>,
    /// listing_key -> token length of its synthetic document.
    doc_len: HashMap<i64, usize>,
    /// listing_key -> term -> count within that document.
    term_freq: HashMap<i64, HashMap<String, u32>>,
    avg_doc_len: f64,
    num_docs: usize,
}

/// Offline-built lexical index over a sample of listings. Built lazily
/// on first use; `rebuild` is the only way to refresh it, and it is
/// idempotent: rebuilding from the same sample yields the same state.
///
/// Concurrency: builds are serialized by the write lock; readers observe
/// either the pre-build or post-build snapshot in full, never a partial
/// one, because the entire state swaps in a single write.
pub struct Bm25Corpus {
    k1: f64,
    b: f64,
    state: RwLock<Option<BuiltState>>,
}

impl Bm25Corpus {
    pub fn new(k1: f64, b: f64) -> Self {
        Bm25Corpus { k1, b, state: RwLock::new(None) }
    }

    pub fn is_built(&self) -> bool {
        self.state.read().unwrap().is_some()
    }

    pub fn build(&self, listings: &[Listing]) {
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut doc_len: HashMap<i64, usize> = HashMap::new();
        let mut term_freq: HashMap<i64, HashMap<String, u32>> = HashMap::new();
        let mut total_len: usize = 0;

        for listing in listings {
            let tokens = tokenize(&synthetic_document(listing));
            doc_len.insert(listing.listing_key, tokens.len());
            total_len += tokens.len();

            let mut counts: HashMap<String, u32> = HashMap::new();
            for tok in &tokens {
                *counts.entry(tok.clone()).or_insert(0) += 1;
            }
            for term in counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freq.insert(listing.listing_key, counts);
        }

        let num_docs = listings.len();
        let avg_doc_len = if num_docs == 0 { 0.0 } else { total_len as f64 / num_docs as f64 };

        *self.state.write().unwrap() = Some(BuiltState { doc_freq, doc_len, term_freq, avg_doc_len, num_docs });
    }

    /// Same as `build`, named distinctly to make the "explicit rebuild"
    /// operation visible at call sites.
    pub fn rebuild(&self, listings: &[Listing]) {
        self.build(listings);
    }

    fn idf(state: &BuiltState, term: &str) -> f64 {
        match state.doc_freq.get(term) {
            None => 0.0,
            Some(&df) => {
                let d = state.num_docs as f64;
                let df = df as f64;
                ((d - df + 0.5) / (df + 0.5)).ln()
            }
        }
    }

    /// `bm25_raw` for one listing against the query tokens. Unknown
    /// terms contribute 0; a zero-length document scores 0; the result
    /// is always non-negative because terms with negative IDF (very
    /// common terms) are floored at 0 rather than allowed to subtract.
    pub fn score(&self, listing_key: i64, query_tokens: &[String]) -> f64 {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else { return 0.0 };
        let Some(&len) = state.doc_len.get(&listing_key) else { return 0.0 };
        if len == 0 {
            return 0.0;
        }
        let Some(counts) = state.term_freq.get(&listing_key) else { return 0.0 };

        let mut score = 0.0;
        for term in query_tokens {
            let tf = *counts.get(term).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = Self::idf(state, term).max(0.0);
            let denom = tf + self.k1 * (1.0 - self.b + self.b * (len as f64 / state.avg_doc_len.max(1.0)));
            score += idf * (tf * (self.k1 + 1.0)) / denom;
        }
        score.max(0.0)
    }

    /// Same scoring formula as `score`, but against an arbitrary token
    /// stream rather than a pre-indexed listing. Candidates retrieved by
    /// the vector index need not be part of the sample the corpus was
    /// built from; this lets the ranker score any listing's synthetic
    /// document against the corpus-wide document frequencies and average
    /// length once the corpus exists.
    pub fn score_document(&self, query_tokens: &[String], doc_tokens: &[String]) -> f64 {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else { return 0.0 };
        let len = doc_tokens.len();
        if len == 0 {
            return 0.0;
        }
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for tok in doc_tokens {
            *counts.entry(tok.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in query_tokens {
            let tf = *counts.get(term.as_str()).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = Self::idf(state, term).max(0.0);
            let denom = tf + self.k1 * (1.0 - self.b + self.b * (len as f64 / state.avg_doc_len.max(1.0)));
            score += idf * (tf * (self.k1 + 1.0)) / denom;
        }
        score.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ListingStatus, Location, PropertyType};

    fn listing(key: i64, text_features: &[&str]) -> Listing {
        Listing {
            listing_key: key,
            title: "title".into(),
            description: "description".into(),
            price: 2_000_000,
            property_type: PropertyType::House,
            status: ListingStatus::ForSale,
            bedrooms: 3,
            bathrooms: 2.0,
            floor_area: 150,
            location: Location {
                address: "1 Main Rd".into(),
                neighborhood: "Rondebosch".into(),
                city: "Cape Town".into(),
                province: "Western Cape".into(),
                country: "South Africa".into(),
            },
            features: text_features.iter().map(|s| s.to_string()).collect(),
            images: vec![],
            points_of_interest: vec![],
        }
    }

    #[test]
    fn unknown_term_contributes_zero() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        corpus.build(&[listing(1, &["pool"]), listing(2, &["garden"])]);
        let score = corpus.score(1, &["spaceship".to_string()]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_is_non_negative_and_finite() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        corpus.build(&[listing(1, &["pool", "garden", "garage"])]);
        let score = corpus.score(1, &["pool".to_string(), "garden".to_string()]);
        assert!(score.is_finite());
        assert!(score >= 0.0);
    }

    #[test]
    fn single_document_corpus_has_finite_idf() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        corpus.build(&[listing(1, &["pool"])]);
        let score = corpus.score(1, &["pool".to_string()]);
        assert!(score.is_finite());
    }

    #[test]
    fn missing_listing_scores_zero() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        corpus.build(&[listing(1, &["pool"])]);
        assert_eq!(corpus.score(999, &["pool".to_string()]), 0.0);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        let listings = vec![listing(1, &["pool", "garden"]), listing(2, &["garage"])];
        corpus.build(&listings);
        let first = corpus.score(1, &["pool".to_string()]);
        corpus.rebuild(&listings);
        let second = corpus.score(1, &["pool".to_string()]);
        assert_eq!(first, second);
    }

    #[test]
    fn score_document_works_for_listings_outside_the_sample() {
        let corpus = Bm25Corpus::new(1.5, 0.75);
        corpus.build(&[listing(1, &["pool", "garden"]), listing(2, &["garage"])]);
        let doc_tokens = tokenize(&synthetic_document(&listing(3, &["pool"])));
        let score = corpus.score_document(&["pool".to_string()], &doc_tokens);
        assert!(score > 0.0);
    }

    #[test]
    fn tokenize_drops_short_tokens_and_lowercases() {
        let tokens = tokenize("A 3-Bed House, Rondebosch!");
        assert!(!tokens.contains(&"a".to_string()));
        assert!(tokens.contains(&"bed".to_string()));
        assert!(tokens.contains(&"rondebosch".to_string()));
    }
}
