use super::{
    cosine_similarity, rank_by_name, select_reviews, Review, RestaurantStore, SearchRequest,
    StoredRestaurant,
};
use crate::llm::{CanEmbed, LlmProfile};
use crate::restaurant::{Details, Restaurant};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Store holding every record in memory, loaded from a JSONL file.
pub struct InMemoryStore {
    records: Vec<StoredRestaurant>,
    embed: Arc<dyn CanEmbed>,
    profile: LlmProfile,
}

impl InMemoryStore {
    /// Build a store, embedding any record that lacks a vector.
    pub async fn new(
        mut records: Vec<StoredRestaurant>,
        embed: Arc<dyn CanEmbed>,
        profile: LlmProfile,
    ) -> anyhow::Result<Self> {
        for rec in records.iter_mut().filter(|r| r.embedding.is_none()) {
            let vector = embed
                .embed(&profile, &rec.search_text())
                .await
                .with_context(|| format!("embedding {}", rec.restaurant.id))?;
            rec.embedding = Some(vector);
        }
        Ok(Self {
            records,
            embed,
            profile,
        })
    }

    /// Load one [`StoredRestaurant`] per non-blank line.
    pub async fn load(
        path: &Path,
        embed: Arc<dyn CanEmbed>,
        profile: LlmProfile,
    ) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let records = parse_jsonl(&text)?;
        info!(path = %path.display(), count = records.len(), "loaded restaurants");
        Self::new(records, embed, profile).await
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoredRestaurant] {
        &self.records
    }
}

pub fn parse_jsonl(text: &str) -> anyhow::Result<Vec<StoredRestaurant>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

#[async_trait]
impl RestaurantStore for InMemoryStore {
    async fn similarity_search(&self, req: &SearchRequest) -> anyhow::Result<Vec<Restaurant>> {
        let query = self.embed.embed(&self.profile, &req.query_text).await?;
        let mut scored: Vec<(f64, &StoredRestaurant)> = self
            .records
            .iter()
            .filter(|rec| req.cuisine_matches(&rec.restaurant.cuisine))
            .filter(|rec| {
                req.locality
                    .matches(&rec.restaurant.city, &rec.restaurant.neighborhood)
            })
            .filter_map(|rec| {
                let v = rec.embedding.as_ref()?;
                Some((cosine_similarity(&query, v) as f64, rec))
            })
            .filter(|(score, _)| *score > req.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        debug!(matches = scored.len(), limit = req.limit, "similarity search");
        Ok(scored
            .into_iter()
            .take(req.limit)
            .map(|(score, rec)| {
                let (mut row, _) = rec.restaurant.split_details();
                row.similarity = Some(score);
                row
            })
            .collect())
    }

    async fn attributes(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Details>> {
        Ok(self
            .records
            .iter()
            .filter(|rec| ids.contains(&rec.restaurant.id))
            .map(|rec| {
                let (_, details) = rec.restaurant.split_details();
                (rec.restaurant.id.clone(), details)
            })
            .collect())
    }

    async fn reviews(&self, id: &str, limit: usize) -> anyhow::Result<Vec<Review>> {
        let reviews = self
            .records
            .iter()
            .find(|rec| rec.restaurant.id == id)
            .map(|rec| rec.reviews.clone())
            .unwrap_or_default();
        Ok(select_reviews(reviews, limit))
    }

    async fn find_by_name(&self, name: &str, limit: usize) -> anyhow::Result<Vec<Restaurant>> {
        Ok(rank_by_name(
            self.records.iter().map(|rec| &rec.restaurant),
            name,
            limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_embed::MockEmbed;
    use crate::restaurant::Attribute;
    use crate::store::LocalityFilter;
    use std::io::Write;

    const DATA: &str = r#"
{"id":"r1","name":"Taqueria Uno","cuisine":"Mexican","city":"Cambridge","neighborhood":"Central Square","price_level":1,"overall_score":81.0,"flags":{"vegetarian":true,"takeout":true},"address":"1 Mass Ave","description":"tacos burritos salsa"}
{"id":"r2","name":"Trattoria Due","cuisine":"Italian","city":"Boston","neighborhood":"North End","price_level":3,"overall_score":90.0,"description":"pasta pizza wine"}

{"id":"r3","name":"Taco Tres","cuisine":"Mexican","city":"Boston","neighborhood":"Fenway","price_level":2,"overall_score":70.0,"description":"tacos tortas"}
"#;

    async fn store() -> InMemoryStore {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DATA.as_bytes()).unwrap();
        InMemoryStore::load(file.path(), Arc::new(MockEmbed), LlmProfile::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn loads_and_embeds_records() {
        let store = store().await;
        assert_eq!(store.len(), 3);
        assert!(store.records().iter().all(|r| r.embedding.is_some()));
    }

    #[tokio::test]
    async fn search_applies_cuisine_and_locality() {
        let store = store().await;
        let mut req = SearchRequest::new("tacos");
        req.cuisine = Some("mexican".into());
        req.min_similarity = 0.0;
        let rows = store.similarity_search(&req).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.similarity.is_some()));
        // enrichment columns are not part of the search result
        assert!(rows.iter().all(|r| r.address.is_none()));
        assert!(rows.iter().all(|r| r.flag(Attribute::Takeout).is_none()));

        req.locality = LocalityFilter::Excluding("cambridge".into());
        let rows = store.similarity_search(&req).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "r3");

        req.limit = 0;
        assert!(store.similarity_search(&req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attributes_return_enrichment_columns() {
        let store = store().await;
        let details = store
            .attributes(&["r1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details["r1"].address.as_deref(), Some("1 Mass Ave"));
        assert_eq!(details["r1"].flags.get(&Attribute::Takeout), Some(&true));
    }

    #[test]
    fn bad_line_reports_line_number() {
        let err = parse_jsonl("{\"id\":\"a\",\"name\":\"A\"}\n{oops").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
