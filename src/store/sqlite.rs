use super::{
    cosine_similarity, select_reviews, LocalityFilter, Review, RestaurantStore, SearchRequest,
    StoredRestaurant,
};
use crate::geo::Coordinates;
use crate::llm::{CanEmbed, LlmProfile};
use crate::restaurant::{desc_nulls_last, Attribute, Details, Restaurant};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS restaurants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cuisine TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    neighborhood TEXT NOT NULL DEFAULT '',
    price_level INTEGER,
    overall_score REAL,
    safety_score REAL,
    tier TEXT,
    health_risk TEXT,
    nearest_stop_m REAL,
    flags TEXT NOT NULL DEFAULT '{}',
    address TEXT,
    phone TEXT,
    rating REAL,
    url TEXT,
    latitude REAL,
    longitude REAL,
    description TEXT NOT NULL DEFAULT '',
    embedding TEXT
);
CREATE TABLE IF NOT EXISTS reviews (
    restaurant_id TEXT NOT NULL REFERENCES restaurants(id),
    text TEXT NOT NULL,
    rating REAL NOT NULL,
    review_date TEXT,
    author TEXT
);
CREATE INDEX IF NOT EXISTS idx_reviews_restaurant ON reviews(restaurant_id);
";

const CORE_COLUMNS: &str = "id, name, cuisine, city, neighborhood, price_level, overall_score, \
     safety_score, tier, health_risk, nearest_stop_m, flags";

/// SQLite-backed store. Every user-supplied value is bound as a parameter.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    embed: Arc<dyn CanEmbed>,
    profile: LlmProfile,
}

/// Escape `LIKE` wildcards; patterns are used with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_flags(text: &str) -> BTreeMap<Attribute, bool> {
    serde_json::from_str(text).unwrap_or_default()
}

fn core_row(row: &Row<'_>) -> rusqlite::Result<Restaurant> {
    let flags: String = row.get(11)?;
    let mut flags = parse_flags(&flags);
    flags.retain(|a, _| a.is_core());
    Ok(Restaurant {
        id: row.get(0)?,
        name: row.get(1)?,
        cuisine: row.get(2)?,
        city: row.get(3)?,
        neighborhood: row.get(4)?,
        price_level: row.get(5)?,
        overall_score: row.get(6)?,
        safety_score: row.get(7)?,
        tier: row.get(8)?,
        health_risk: row.get(9)?,
        nearest_stop_m: row.get(10)?,
        flags,
        ..Default::default()
    })
}

impl SqliteStore {
    pub fn open(
        path: impl AsRef<Path>,
        embed: Arc<dyn CanEmbed>,
        profile: LlmProfile,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite store {}", path.display()))?;
        Self::with_connection(conn, embed, profile)
    }

    pub fn in_memory(embed: Arc<dyn CanEmbed>, profile: LlmProfile) -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embed, profile)
    }

    fn with_connection(
        conn: Connection,
        embed: Arc<dyn CanEmbed>,
        profile: LlmProfile,
    ) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embed,
            profile,
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection poisoned"))
    }

    /// Insert or replace a record and its reviews, embedding it if needed.
    pub async fn insert(&self, rec: &StoredRestaurant) -> anyhow::Result<()> {
        let embedding = match &rec.embedding {
            Some(v) => v.clone(),
            None => self.embed.embed(&self.profile, &rec.search_text()).await?,
        };
        let r = &rec.restaurant;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO restaurants (id, name, cuisine, city, neighborhood, \
             price_level, overall_score, safety_score, tier, health_risk, nearest_stop_m, flags, \
             address, phone, rating, url, latitude, longitude, description, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
             ?18, ?19, ?20)",
            params![
                r.id,
                r.name,
                r.cuisine,
                r.city,
                r.neighborhood,
                r.price_level,
                r.overall_score,
                r.safety_score,
                r.tier,
                r.health_risk,
                r.nearest_stop_m,
                serde_json::to_string(&r.flags)?,
                r.address,
                r.phone,
                r.rating,
                r.url,
                r.location.map(|c| c.latitude),
                r.location.map(|c| c.longitude),
                rec.description,
                serde_json::to_string(&embedding)?,
            ],
        )?;
        conn.execute(
            "DELETE FROM reviews WHERE restaurant_id = ?1",
            params![r.id],
        )?;
        for review in &rec.reviews {
            conn.execute(
                "INSERT INTO reviews (restaurant_id, text, rating, review_date, author) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.id, review.text, review.rating, review.date, review.author],
            )?;
        }
        Ok(())
    }

    /// Import every record of a JSONL file.
    pub async fn import_jsonl(&self, path: &Path) -> anyhow::Result<usize> {
        let text = tokio::fs::read_to_string(path).await?;
        let records = super::memory::parse_jsonl(&text)?;
        for rec in &records {
            self.insert(rec).await?;
        }
        info!(path = %path.display(), count = records.len(), "imported restaurants");
        Ok(records.len())
    }
}

#[async_trait]
impl RestaurantStore for SqliteStore {
    async fn similarity_search(&self, req: &SearchRequest) -> anyhow::Result<Vec<Restaurant>> {
        let query = self.embed.embed(&self.profile, &req.query_text).await?;
        let (mode, place) = match &req.locality {
            LocalityFilter::Any => ("any", String::new()),
            LocalityFilter::Within(n) => ("within", n.trim().to_string()),
            LocalityFilter::Excluding(n) => ("excluding", n.trim().to_string()),
        };
        let sql = format!(
            "SELECT {CORE_COLUMNS}, embedding FROM restaurants
             WHERE embedding IS NOT NULL
               AND (?1 IS NULL OR lower(cuisine) = lower(?1))
               AND (?2 = 'any'
                    OR (lower(city) = lower(?3)
                        OR lower(neighborhood) LIKE lower(?4) || '%' ESCAPE '\\')
                       = (?2 = 'within'))"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                req.cuisine.as_deref().map(str::trim),
                mode,
                place,
                escape_like(&place)
            ],
            |row| {
                let restaurant = core_row(row)?;
                let embedding: String = row.get(12)?;
                Ok((restaurant, embedding))
            },
        )?;
        let mut scored = Vec::new();
        for row in rows {
            let (mut restaurant, embedding) = row?;
            let vector: Vec<f32> = serde_json::from_str(&embedding)?;
            let score = cosine_similarity(&query, &vector) as f64;
            if score > req.min_similarity {
                restaurant.similarity = Some(score);
                scored.push(restaurant);
            }
        }
        scored.sort_by(|a, b| desc_nulls_last(a.similarity, b.similarity));
        scored.truncate(req.limit);
        debug!(matches = scored.len(), "sqlite similarity search");
        Ok(scored)
    }

    async fn attributes(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Details>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT flags, address, phone, rating, url, latitude, longitude
             FROM restaurants WHERE id = ?1",
        )?;
        let mut out = HashMap::new();
        for id in ids {
            let details = stmt
                .query_row(params![id], |row| {
                    let flags: String = row.get(0)?;
                    let mut flags = parse_flags(&flags);
                    flags.retain(|a, _| !a.is_core());
                    let lat: Option<f64> = row.get(5)?;
                    let lon: Option<f64> = row.get(6)?;
                    Ok(Details {
                        address: row.get(1)?,
                        phone: row.get(2)?,
                        rating: row.get(3)?,
                        url: row.get(4)?,
                        location: lat.zip(lon).map(|(a, o)| Coordinates::new(a, o)),
                        flags,
                    })
                })
                .optional()?;
            if let Some(details) = details {
                out.insert(id.clone(), details);
            }
        }
        Ok(out)
    }

    async fn reviews(&self, id: &str, limit: usize) -> anyhow::Result<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT text, rating, review_date, author FROM reviews
             WHERE restaurant_id = ?1 AND length(text) > ?2
             ORDER BY review_date DESC",
        )?;
        let rows = stmt.query_map(params![id, super::MIN_REVIEW_CHARS as i64], |row| {
            Ok(Review {
                text: row.get(0)?,
                rating: row.get(1)?,
                date: row.get(2)?,
                author: row.get(3)?,
            })
        })?;
        let reviews = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(select_reviews(reviews, limit))
    }

    async fn find_by_name(&self, name: &str, limit: usize) -> anyhow::Result<Vec<Restaurant>> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {CORE_COLUMNS} FROM restaurants
             WHERE lower(name) LIKE '%' || lower(?1) || '%' ESCAPE '\\'
             ORDER BY CASE
                 WHEN lower(name) = lower(?2) THEN 1
                 WHEN lower(name) LIKE lower(?1) || '%' ESCAPE '\\' THEN 2
                 ELSE 3
             END, overall_score IS NULL, overall_score DESC
             LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![escape_like(wanted), wanted, limit as i64],
            core_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
