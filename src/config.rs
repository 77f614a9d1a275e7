use crate::geo::Coordinates;
use crate::llm::LlmProfile;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, usually read from `localeats.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub validator: ValidatorSettings,
    pub geo: GeoSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `"ollama"` or `"mock"`.
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            base_url: "http://localhost:11434".into(),
            model: "mistral-large".into(),
            embedding_model: "nomic-embed-text".into(),
        }
    }
}

impl LlmSettings {
    pub fn profile(&self) -> LlmProfile {
        LlmProfile {
            provider: self.provider.clone(),
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_iterations: usize,
    pub quality_threshold: i32,
    /// Rows requested from the similarity search.
    pub retrieve_limit: usize,
    pub min_similarity: f64,
    pub default_radius_miles: f64,
    /// Rows rendered into the writer prompt.
    pub top_n_written: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            quality_threshold: 8,
            retrieve_limit: 20,
            min_similarity: 0.3,
            default_radius_miles: 1.5,
            top_n_written: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    pub min_length: usize,
    pub max_length: usize,
    /// Places outside the covered metro region.
    pub disallowed_locations: Vec<String>,
    /// Disallowed places that double as cuisine names ("cambodia" → Cambodian).
    pub cuisine_demonyms: Vec<String>,
    /// Words that turn a demonym mention into a cuisine request.
    pub food_words: Vec<String>,
    /// Fallback vocabulary when the intent check cannot reach the model.
    pub restaurant_keywords: Vec<String>,
    pub region_name: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 500,
            disallowed_locations: strings(&[
                "alaska",
                "seattle",
                "portland oregon",
                "new york city",
                "new york",
                "nyc",
                "chicago",
                "los angeles",
                "san francisco",
                "miami",
                "texas",
                "california",
                "florida",
                "washington state",
                "austin",
                "denver",
                "cambodia",
                "thailand",
                "vietnam",
                "china",
                "japan",
                "korea",
                "france",
                "italy",
                "spain",
                "mexico",
                "canada",
            ]),
            cuisine_demonyms: strings(&[
                "cambodia", "thailand", "vietnam", "china", "japan", "korea", "france", "italy",
                "spain", "mexico",
            ]),
            food_words: strings(&[
                "restaurant",
                "restaurants",
                "food",
                "cuisine",
                "place",
                "places",
                "spot",
                "spots",
            ]),
            restaurant_keywords: strings(&[
                "food",
                "foosd",
                "fo0d",
                "fod",
                "restaurant",
                "resturant",
                "restarant",
                "eat",
                "eating",
                "dining",
                "dinner",
                "lunch",
                "breakfast",
                "cuisine",
                "mexican",
                "meican",
                "italian",
                "chinese",
                "thai",
                "indian",
                "pizza",
                "burger",
                "sushi",
                "cafe",
                "caffe",
                "coffee",
                "cofee",
                "cofe",
                "vegan",
                "vegetarian",
                "place",
                "spot",
                "friendly",
                "near",
                "around",
            ]),
            region_name: "Boston/Cambridge/Somerville".into(),
        }
    }
}

/// Latitude/longitude box a geocoded point must fall in.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Bounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Bounds {
    pub fn contains(&self, c: Coordinates) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&c.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&c.longitude)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoSettings {
    /// Shortcut targets for "closest to ..." follow-ups. Tables are matched
    /// by substring; the longest key wins, then the earliest.
    pub landmarks: IndexMap<String, Coordinates>,
    /// Neighborhood table used by the offline geocoder.
    pub neighborhoods: IndexMap<String, Coordinates>,
    /// Coarse points used when the model geocoder is unavailable.
    pub metro_fallback: IndexMap<String, Coordinates>,
    /// Named places a user can pick as their own location.
    pub quick_locations: IndexMap<String, Coordinates>,
    pub metro_bounds: Bounds,
}

fn table(items: &[(&str, f64, f64)]) -> IndexMap<String, Coordinates> {
    items
        .iter()
        .map(|(name, lat, lon)| (name.to_string(), Coordinates::new(*lat, *lon)))
        .collect()
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            landmarks: table(&[
                ("harvard", 42.3736, -71.1197),
                ("mit", 42.3601, -71.0942),
                ("downtown", 42.3601, -71.0589),
            ]),
            neighborhoods: table(&[
                ("jamaica plain", 42.3099, -71.1111),
                ("centre street", 42.3099, -71.1111),
                ("center street", 42.3099, -71.1111),
                ("roxbury", 42.3317, -71.0828),
                ("dorchester", 42.2876, -71.0662),
                ("south end", 42.3417, -71.0719),
                ("north end", 42.3647, -71.0542),
                ("back bay", 42.3503, -71.0810),
                ("allston", 42.3528, -71.1319),
                ("brighton", 42.3486, -71.1656),
                ("charlestown", 42.3782, -71.0602),
                ("cambridge", 42.3736, -71.1097),
                ("somerville", 42.3876, -71.0995),
                ("fenway", 42.3467, -71.0972),
                ("harvard", 42.3736, -71.1197),
                ("mit", 42.3601, -71.0942),
                ("downtown", 42.3601, -71.0589),
            ]),
            metro_fallback: table(&[
                ("boston", 42.3601, -71.0589),
                ("cambridge", 42.3736, -71.1097),
                ("somerville", 42.3876, -71.0995),
            ]),
            quick_locations: table(&[
                ("MIT", 42.3601, -71.0942),
                ("Harvard Square", 42.3736, -71.1197),
                ("Downtown Boston", 42.3601, -71.0589),
                ("Fenway Park", 42.3467, -71.0972),
                ("Jamaica Plain", 42.3099, -71.1111),
            ]),
            metro_bounds: Bounds {
                min_latitude: 42.20,
                max_latitude: 42.45,
                min_longitude: -71.25,
                max_longitude: -70.95,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Restaurant data: `.jsonl` for the in-memory store, `.db`/`.sqlite` for SQLite.
    pub path: Option<PathBuf>,
}

/// Load [`Settings`] from a TOML file.
///
/// # Examples
///
/// ```no_run
/// use localeats::config::load;
/// # tokio_test::block_on(async {
/// let cfg = load("localeats.toml").await.unwrap();
/// assert!(cfg.pipeline.max_iterations >= 1);
/// # });
/// ```
pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&text)?)
}
