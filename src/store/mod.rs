//! Restaurant store boundary.
//!
//! The pipeline only ever asks the store four things: rank restaurants by
//! description similarity, fetch the enrichment columns for a set of ids,
//! list reviews, and look a restaurant up by name. Every request is typed so
//! no backend has to splice user text into a query string.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::llm::{CanEmbed, LlmProfile};
use crate::restaurant::{desc_nulls_last, Details, Restaurant};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Locality constraint of a similarity search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocalityFilter {
    #[default]
    Any,
    /// City equals the name or neighborhood starts with it.
    Within(String),
    /// Negation of [`LocalityFilter::Within`].
    Excluding(String),
}

impl LocalityFilter {
    /// Case-insensitive city equality or neighborhood prefix.
    pub fn matches(&self, city: &str, neighborhood: &str) -> bool {
        match self {
            LocalityFilter::Any => true,
            LocalityFilter::Within(name) => in_locality(name, city, neighborhood),
            LocalityFilter::Excluding(name) => !in_locality(name, city, neighborhood),
        }
    }
}

fn in_locality(name: &str, city: &str, neighborhood: &str) -> bool {
    let name = name.trim().to_lowercase();
    city.to_lowercase() == name || neighborhood.to_lowercase().starts_with(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query_text: String,
    /// Exact (case-insensitive) cuisine match when set.
    pub cuisine: Option<String>,
    pub locality: LocalityFilter,
    /// Rows must score strictly above this.
    pub min_similarity: f64,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            cuisine: None,
            locality: LocalityFilter::Any,
            min_similarity: 0.3,
            limit: 20,
        }
    }

    pub fn cuisine_matches(&self, cuisine: &str) -> bool {
        match &self.cuisine {
            Some(c) => c.trim().eq_ignore_ascii_case(cuisine.trim()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub text: String,
    /// 1 to 5.
    pub rating: f64,
    /// ISO date, newest first when listed.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Reviews shorter than this are considered noise.
pub const MIN_REVIEW_CHARS: usize = 10;

/// Storage record: a full restaurant row plus its searchable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRestaurant {
    #[serde(flatten)]
    pub restaurant: Restaurant,
    #[serde(default)]
    pub description: String,
    /// Precomputed description embedding; computed on load when absent.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

impl StoredRestaurant {
    /// Text embedded for similarity search.
    pub fn search_text(&self) -> String {
        if self.description.trim().is_empty() {
            format!(
                "{} {} {}",
                self.restaurant.name, self.restaurant.cuisine, self.restaurant.neighborhood
            )
        } else {
            self.description.clone()
        }
    }
}

#[async_trait]
pub trait RestaurantStore: Send + Sync {
    /// Rows above the similarity threshold, most similar first, at most
    /// `limit`. Only core flag columns are populated.
    async fn similarity_search(&self, req: &SearchRequest) -> anyhow::Result<Vec<Restaurant>>;

    /// Enrichment columns keyed by restaurant id. Unknown ids are omitted.
    async fn attributes(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Details>>;

    /// Newest reviews first, skipping near-empty ones.
    async fn reviews(&self, id: &str, limit: usize) -> anyhow::Result<Vec<Review>>;

    /// Fuzzy name lookup, best match first.
    async fn find_by_name(&self, name: &str, limit: usize) -> anyhow::Result<Vec<Restaurant>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + 1e-8)
}

/// Rank of a name match: exact, then prefix, then substring.
fn name_rank(candidate: &str, wanted: &str) -> Option<u8> {
    let candidate = candidate.to_lowercase();
    if candidate == wanted {
        Some(1)
    } else if candidate.starts_with(wanted) {
        Some(2)
    } else if candidate.contains(wanted) {
        Some(3)
    } else {
        None
    }
}

/// Name search shared by the backends.
pub fn rank_by_name<'a>(
    rows: impl IntoIterator<Item = &'a Restaurant>,
    name: &str,
    limit: usize,
) -> Vec<Restaurant> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<(u8, &Restaurant)> = rows
        .into_iter()
        .filter_map(|r| name_rank(&r.name, &wanted).map(|rank| (rank, r)))
        .collect();
    hits.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb)
            .then_with(|| desc_nulls_last(a.overall_score, b.overall_score))
    });
    hits.into_iter()
        .take(limit)
        .map(|(_, r)| r.clone())
        .collect()
}

/// Newest-first, non-trivial reviews.
pub fn select_reviews(mut reviews: Vec<Review>, limit: usize) -> Vec<Review> {
    reviews.retain(|r| r.text.trim().chars().count() > MIN_REVIEW_CHARS);
    reviews.sort_by(|a, b| b.date.cmp(&a.date));
    reviews.truncate(limit);
    reviews
}

/// Open the store named by `path`: SQLite for `.db`/`.sqlite`, JSONL otherwise.
pub async fn open(
    path: &Path,
    embed: Arc<dyn CanEmbed>,
    profile: LlmProfile,
) -> anyhow::Result<Arc<dyn RestaurantStore>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if matches!(ext, "db" | "sqlite" | "sqlite3") {
        Ok(Arc::new(SqliteStore::open(path, embed, profile)?))
    } else {
        Ok(Arc::new(InMemoryStore::load(path, embed, profile).await?))
    }
}
