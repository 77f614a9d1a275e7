use crate::config::{Bounds, GeoSettings};
use crate::llm::{complete, CanChat, LlmProfile};
use crate::utils::strip_code_fence;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mean Earth radius used by [`haversine_m`].
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const METERS_PER_MILE: f64 = 1609.34;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        haversine_m(*self, *other)
    }
}

/// Great-circle distance in meters.
///
/// ```
/// use localeats::geo::{haversine_m, Coordinates};
/// let mit = Coordinates::new(42.3601, -71.0942);
/// let harvard = Coordinates::new(42.3736, -71.1197);
/// assert_eq!(haversine_m(mit, mit), 0.0);
/// let d = haversine_m(mit, harvard);
/// assert!((2400.0..2700.0).contains(&d));
/// ```
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A named point, the result of geocoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub coordinates: Coordinates,
}

/// Place-name resolution boundary. Implementations return `None` for
/// anything outside the supported metro region.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, name: &str) -> Option<Place>;
}

/// Most specific table entry named inside `name`: the longest matching key,
/// the earliest one on a tie.
pub(crate) fn best_match<'a>(
    table: &'a IndexMap<String, Coordinates>,
    name: &str,
) -> Option<(&'a String, Coordinates)> {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let mut best: Option<(&String, Coordinates)> = None;
    for (key, c) in table {
        if key.is_empty() || !lower.contains(&key.to_lowercase()) {
            continue;
        }
        if best.map_or(true, |(k, _)| key.len() > k.len()) {
            best = Some((key, *c));
        }
    }
    best
}

fn lookup(table: &IndexMap<String, Coordinates>, name: &str) -> Option<Place> {
    best_match(table, name).map(|(_, coordinates)| Place {
        name: name.trim().to_string(),
        coordinates,
    })
}

/// Offline geocoder over the configured neighborhood table.
#[derive(Debug, Clone)]
pub struct TableGeocoder {
    neighborhoods: IndexMap<String, Coordinates>,
}

impl TableGeocoder {
    pub fn new(neighborhoods: impl IntoIterator<Item = (String, Coordinates)>) -> Self {
        Self {
            neighborhoods: neighborhoods.into_iter().collect(),
        }
    }

    pub fn from_settings(geo: &GeoSettings) -> Self {
        Self::new(geo.neighborhoods.clone())
    }
}

#[async_trait]
impl Geocoder for TableGeocoder {
    async fn geocode(&self, name: &str) -> Option<Place> {
        lookup(&self.neighborhoods, name)
    }
}

#[derive(Debug, Deserialize)]
struct ModelPlace {
    #[serde(default)]
    is_valid_boston_location: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    normalized_name: Option<String>,
}

/// Geocoder that asks the language model for coordinates.
///
/// The model's answer is only trusted when it claims the place is local and
/// the coordinates land inside the metro bounds. When the model cannot be
/// reached or answers with something unparsable, a handful of coarse metro
/// points are used instead.
pub struct LlmGeocoder {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    bounds: Bounds,
    fallback: IndexMap<String, Coordinates>,
}

impl LlmGeocoder {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile, geo: &GeoSettings) -> Self {
        Self {
            chat,
            profile,
            bounds: geo.metro_bounds,
            fallback: geo.metro_fallback.clone(),
        }
    }

    fn prompt(name: &str) -> String {
        format!(
            r#"You are a Boston area geography expert.

Location name: "{name}"

If this is a valid Boston/Cambridge/Somerville area location, provide coordinates.

Respond in EXACT JSON:
{{
    "is_valid_boston_location": true|false,
    "latitude": 42.xxxx,
    "longitude": -71.xxxx,
    "normalized_name": "Proper Name",
    "neighborhood": "Neighborhood Name"
}}

Examples:
"roxbury" → {{"is_valid_boston_location": true, "latitude": 42.3299, "longitude": -71.0892, "normalized_name": "Roxbury", "neighborhood": "Roxbury"}}
"fenway park" → {{"is_valid_boston_location": true, "latitude": 42.3467, "longitude": -71.0972, "normalized_name": "Fenway Park", "neighborhood": "Fenway"}}
"new york" → {{"is_valid_boston_location": false}}

JSON only:"#
        )
    }
}

#[async_trait]
impl Geocoder for LlmGeocoder {
    async fn geocode(&self, name: &str) -> Option<Place> {
        if name.trim().is_empty() {
            return None;
        }
        let Some(raw) = complete(&*self.chat, &self.profile, &Self::prompt(name), 0.1).await
        else {
            return lookup(&self.fallback, name);
        };
        let parsed: ModelPlace = match serde_json::from_str(strip_code_fence(&raw)) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "unparsable geocode answer");
                return lookup(&self.fallback, name);
            }
        };
        if !parsed.is_valid_boston_location {
            warn!(location = %name, "location is outside the covered area");
            return None;
        }
        let coordinates = Coordinates::new(parsed.latitude?, parsed.longitude?);
        if !self.bounds.contains(coordinates) {
            warn!(location = %name, ?coordinates, "geocoded point outside metro bounds");
            return None;
        }
        Some(Place {
            name: parsed.normalized_name.unwrap_or_else(|| name.to_string()),
            coordinates,
        })
    }
}
