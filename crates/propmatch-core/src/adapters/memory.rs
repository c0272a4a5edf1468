use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use super::traits::{Cache, ListingStore, VectorFilter, VectorIndex, VectorMatch};
use crate::domain::Listing;
use crate::error::Result;

/// Fixture-backed listing store for tests and the CLI demo. Real
/// deployments implement `ListingStore` against whatever remote table
/// actually owns the corpus.
pub struct InMemoryListingStore {
    listings: HashMap<i64, Listing>,
}

impl InMemoryListingStore {
    pub fn new(listings: Vec<Listing>) -> Self {
        InMemoryListingStore {
            listings: listings.into_iter().map(|l| (l.listing_key, l)).collect(),
        }
    }
}

#[async_trait]
impl ListingStore for InMemoryListingStore {
    async fn get_by_key(&self, key: i64) -> Result<Option<Listing>> {
        Ok(self.listings.get(&key).cloned())
    }

    async fn get_batch(&self, keys: &[i64]) -> Result<Vec<Listing>> {
        Ok(keys.iter().filter_map(|k| self.listings.get(k).cloned()).collect())
    }

    async fn get_sample(&self, n: usize) -> Result<Vec<Listing>> {
        // Deterministic over stable listing keys, per the spec's
        // recommendation to prefer a seeded sample for reproducibility.
        let mut keys: Vec<&i64> = self.listings.keys().collect();
        keys.sort();
        Ok(keys.into_iter().take(n).map(|k| self.listings[k].clone()).collect())
    }
}

/// Brute-force cosine-similarity index. Fine for the corpus sizes this
/// crate targets; a production deployment swaps in a real ANN adapter
/// behind the same trait.
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<i64, (Vec<f32>, Value)>>,
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        InMemoryVectorIndex { entries: RwLock::new(HashMap::new()) }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        ((dot / (na * nb)) as f64).clamp(-1.0, 1.0)
    }
}

fn matches_filter(metadata: &Value, filter: &VectorFilter) -> bool {
    if let Some(gte) = filter.price_gte {
        if metadata.get("price").and_then(Value::as_i64).map(|p| p < gte).unwrap_or(false) {
            return false;
        }
    }
    if let Some(lte) = filter.price_lte {
        if metadata.get("price").and_then(Value::as_i64).map(|p| p > lte).unwrap_or(false) {
            return false;
        }
    }
    if let Some(ref t) = filter.property_type_eq {
        if metadata.get("property_type").and_then(Value::as_str).map(|v| v != t).unwrap_or(false) {
            return false;
        }
    }
    if let Some(b) = filter.bedrooms_eq {
        if metadata.get("bedrooms").and_then(Value::as_u64).map(|v| v != b as u64).unwrap_or(false) {
            return false;
        }
    }
    if let Some(ref c) = filter.city_eq {
        if metadata
            .get("city")
            .and_then(Value::as_str)
            .map(|v| !v.eq_ignore_ascii_case(c))
            .unwrap_or(false)
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: i64, vector: Vec<f32>, metadata: Value) -> Result<()> {
        self.entries.write().unwrap().insert(id, (vector, metadata));
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<VectorFilter>) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, (_, metadata))| filter.as_ref().map(|f| matches_filter(metadata, f)).unwrap_or(true))
            .map(|(id, (vec, metadata))| VectorMatch {
                listing_key: *id,
                score: (cosine(vector, vec) + 1.0) / 2.0,
                metadata: metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

struct CacheEntry {
    value: String,
    expires_at: Option<SystemTime>,
}

impl CacheEntry {
    fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

/// In-process cache used as the fallback when a remote cache is
/// unavailable, and directly as the cache for tests and the CLI demo.
/// Modeled on the teacher's TTL cache: a single `RwLock<HashMap<..>>`
/// guarding entries that record their own expiry instant.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
    counters: RwLock<HashMap<String, (u64, Option<SystemTime>)>>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        InMemoryCache {
            entries: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = SystemTime::now();
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).filter(|e| e.is_live(now)).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Some(SystemTime::now() + ttl);
        self.entries.write().unwrap().insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn keys_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let now = SystemTime::now();
        let entries = self.entries.read().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets.write().unwrap().entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(s) = self.sets.write().unwrap().get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.sets.read().unwrap().get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn list_push_capped(&self, key: &str, value: String, cap: usize) -> Result<()> {
        let mut lists = self.lists.write().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        list.push(value);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(0..excess);
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let lists = self.lists.read().unwrap();
        let Some(list) = lists.get(key) else { return Ok(Vec::new()) };
        let len = list.len() as isize;
        let norm = |i: isize| -> usize {
            let v = if i < 0 { (len + i).max(0) } else { i.min(len) };
            v as usize
        };
        let (s, e) = (norm(start), norm(stop + 1));
        if s >= e || s >= list.len() {
            Ok(Vec::new())
        } else {
            Ok(list[s..e.min(list.len())].to_vec())
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut counters = self.counters.write().unwrap();
        let now = SystemTime::now();
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        let expired = entry.1.map(|exp| now >= exp).unwrap_or(false);
        if expired {
            *entry = (0, None);
        }
        entry.0 += 1;
        if entry.1.is_none() {
            entry.1 = Some(now + ttl);
        }
        Ok(entry.0)
    }
}
