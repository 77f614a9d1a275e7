//! Conversational refinement over a result set that has already been
//! produced. Nothing here talks to the store.

use crate::config::GeoSettings;
use crate::filters::{normalize, FilterSet};
use crate::geo::{best_match, haversine_m, Coordinates, Geocoder, Place};
use crate::llm::{complete, CanChat, LlmProfile};
use crate::message::Stage;
use crate::orchestrator::PipelineResult;
use crate::restaurant::{asc_nulls_last, desc_nulls_last, Attribute, CandidateSet, Distance};
use crate::status::Reporter;
use crate::utils::parse_model_json;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Distance given to rows without coordinates so they sort last.
pub const MISSING_DISTANCE_M: f64 = 999_999.0;

/// Immutable copy of the last answer a follow-up refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSnapshot {
    pub query: String,
    pub results: CandidateSet,
}

impl ResultSnapshot {
    pub fn new(query: impl Into<String>, results: CandidateSet) -> Self {
        Self {
            query: query.into(),
            results,
        }
    }
}

impl From<&PipelineResult> for ResultSnapshot {
    fn from(result: &PipelineResult) -> Self {
        Self::new(result.query.clone(), result.researched.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    FindClosest,
    FindCheapest,
    FindSafest,
    FilterByAttribute,
    #[default]
    NewSearch,
}

impl IntentType {
    fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "find_closest" => IntentType::FindClosest,
            "find_cheapest" => IntentType::FindCheapest,
            "find_safest" => IntentType::FindSafest,
            "filter_by_attribute" => IntentType::FilterByAttribute,
            _ => IntentType::NewSearch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Distance,
    Price,
    Safety,
    Rating,
}

impl SortKey {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "distance" => Some(SortKey::Distance),
            "price" => Some(SortKey::Price),
            "safety" => Some(SortKey::Safety),
            "rating" => Some(SortKey::Rating),
            _ => None,
        }
    }
}

/// What a follow-up question asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Intent {
    pub intent_type: IntentType,
    pub target_location: Option<String>,
    pub cuisine_preference: Option<String>,
    pub sort_by: Option<SortKey>,
    pub filter_criteria: FilterSet,
    pub interpreted_intent: String,
    pub requires_new_search: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIntent {
    intent_type: Option<String>,
    target_location: Option<String>,
    cuisine_preference: Option<String>,
    sort_by: Option<String>,
    filter_criteria: Option<Value>,
    interpreted_intent: Option<String>,
    requires_new_search: Option<bool>,
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}

impl Intent {
    /// The intent used whenever the model gives nothing usable.
    pub fn fallback(text: &str) -> Self {
        Self {
            interpreted_intent: text.to_string(),
            ..Default::default()
        }
    }

    /// Parse classifier output. Never fails.
    pub fn parse(raw: &str, text: &str) -> Self {
        let raw: RawIntent = match parse_model_json(raw) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "could not parse follow-up intent");
                return Self::fallback(text);
            }
        };
        Self {
            intent_type: raw
                .intent_type
                .as_deref()
                .map(IntentType::parse)
                .unwrap_or_default(),
            target_location: non_empty(raw.target_location),
            cuisine_preference: non_empty(raw.cuisine_preference),
            sort_by: raw.sort_by.as_deref().and_then(SortKey::parse),
            filter_criteria: normalize(raw.filter_criteria.as_ref()),
            interpreted_intent: non_empty(raw.interpreted_intent)
                .unwrap_or_else(|| text.to_string()),
            requires_new_search: raw.requires_new_search.unwrap_or(false),
        }
    }
}

/// Answer to one follow-up question, tagged by the action taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FollowupResult {
    ShowClosest {
        results: CandidateSet,
        /// Name of the point distances were measured from.
        location: String,
    },
    ShowCheapest {
        results: CandidateSet,
    },
    ShowSafest {
        results: CandidateSet,
    },
    ShowFiltered {
        results: CandidateSet,
    },
    Error {
        message: String,
    },
    TriggerNewSearch {
        message: String,
    },
    Unknown {
        message: String,
    },
}

impl FollowupResult {
    pub fn results(&self) -> Option<&CandidateSet> {
        match self {
            FollowupResult::ShowClosest { results, .. }
            | FollowupResult::ShowCheapest { results }
            | FollowupResult::ShowSafest { results }
            | FollowupResult::ShowFiltered { results } => Some(results),
            _ => None,
        }
    }

    /// Reference point of a "closest" answer.
    pub fn location(&self) -> Option<&str> {
        match self {
            FollowupResult::ShowClosest { location, .. } => Some(location),
            _ => None,
        }
    }
}

fn schema() -> String {
    Attribute::ALL.iter().fold(String::new(), |mut out, attr| {
        let _ = writeln!(out, "- {attr} (boolean) - {}", attr.describe());
        out
    })
}

/// Classifies follow-up questions and answers them from a snapshot.
pub struct Followup {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    geocoder: Arc<dyn Geocoder>,
    landmarks: IndexMap<String, Coordinates>,
    reporter: Reporter,
}

impl Followup {
    pub fn new(
        chat: Arc<dyn CanChat>,
        profile: LlmProfile,
        geocoder: Arc<dyn Geocoder>,
        geo: &GeoSettings,
    ) -> Self {
        Self {
            chat,
            profile,
            geocoder,
            landmarks: geo.landmarks.clone(),
            reporter: Reporter::silent(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    fn prompt(text: &str, snapshot: Option<&ResultSnapshot>) -> String {
        let context = snapshot
            .map(|s| {
                format!(
                    "\nAvailable previous search results: {} restaurants (for \"{}\")\n",
                    s.results.len(),
                    s.query
                )
            })
            .unwrap_or_default();
        let schema = schema();
        format!(
            r#"You are an intent classifier for follow-up questions about Boston restaurant results.

Available restaurant attributes you can filter by:
{schema}{context}
User Query: "{text}"

Respond in EXACT JSON format:
{{
    "intent_type": "find_closest" | "find_cheapest" | "find_safest" | "filter_by_attribute" | "new_search",
    "target_location": "Harvard" | null,
    "cuisine_preference": "Mexican" | null,
    "filter_criteria": {{
        "dietary": ["vegetarian", "vegan"],
        "meal_time": ["breakfast", "lunch", "dinner"],
        "accessibility": ["wheelchair", "groups", "children"],
        "service_type": ["outdoor", "takeout", "delivery", "reservations"],
        "special_needs": ["coffee_shop", "pet_friendly", "live_music"]
    }},
    "sort_by": "distance" | "price" | "safety" | "rating",
    "interpreted_intent": "clear explanation",
    "requires_new_search": true | false
}}

Examples:
"which one is closest to MIT?" → {{"intent_type": "find_closest", "target_location": "MIT"}}
"what's the cheapest?" → {{"intent_type": "find_cheapest", "sort_by": "price"}}
"any of those good for groups?" → {{"intent_type": "filter_by_attribute", "filter_criteria": {{"accessibility": ["groups"]}}}}
"show me sushi instead" → {{"intent_type": "new_search", "requires_new_search": true}}

JSON only."#
        )
    }

    /// One model call. Missing or malformed output yields
    /// [`Intent::fallback`].
    pub async fn classify(&self, text: &str, snapshot: Option<&ResultSnapshot>) -> Intent {
        self.reporter
            .running(Stage::Followup, "Understanding follow-up...");
        let intent = match complete(&*self.chat, &self.profile, &Self::prompt(text, snapshot), 0.3)
            .await
        {
            Some(raw) => Intent::parse(&raw, text),
            None => Intent::fallback(text),
        };
        debug!(?intent, "follow-up classified");
        self.reporter
            .success(Stage::Followup, intent.interpreted_intent.clone());
        intent
    }

    /// Landmark shortcut, then geocoding, then the caller's own location.
    async fn target(&self, name: Option<&str>, reference: Option<&Place>) -> Option<Place> {
        if let Some(name) = name {
            if let Some((key, coordinates)) = best_match(&self.landmarks, name) {
                return Some(Place {
                    name: key.clone(),
                    coordinates,
                });
            }
            if let Some(place) = self.geocoder.geocode(name).await {
                return Some(place);
            }
            warn!(location = %name, "follow-up target not found, trying user location");
        }
        reference.cloned()
    }

    /// Answer `intent` from `snapshot` without any further retrieval.
    pub async fn execute(
        &self,
        intent: &Intent,
        snapshot: &ResultSnapshot,
        reference: Option<&Place>,
    ) -> FollowupResult {
        let mut set = snapshot.results.clone();
        let sort_by = intent.sort_by;
        match intent.intent_type {
            IntentType::FindClosest => {
                let Some(target) = self
                    .target(intent.target_location.as_deref(), reference)
                    .await
                else {
                    return FollowupResult::Error {
                        message: "No location specified".into(),
                    };
                };
                let origin = target.coordinates;
                set.for_each_mut(|r| {
                    r.distance = r
                        .location
                        .map(|loc| Distance::from_meters(haversine_m(origin, loc)));
                });
                let key = |d: Option<Distance>| d.map_or(MISSING_DISTANCE_M, |d| d.meters);
                set.sort_by(|a, b| key(a.distance).total_cmp(&key(b.distance)));
                FollowupResult::ShowClosest {
                    results: set.top(3),
                    location: target.name,
                }
            }
            IntentType::FindCheapest => by_price(set),
            _ if sort_by == Some(SortKey::Price) => by_price(set),
            IntentType::FindSafest => by_safety(set),
            _ if sort_by == Some(SortKey::Safety) => by_safety(set),
            IntentType::FilterByAttribute => {
                set.sort_by(|a, b| desc_nulls_last(a.overall_score, b.overall_score));
                FollowupResult::ShowFiltered {
                    results: set.top(5),
                }
            }
            _ if intent.requires_new_search => FollowupResult::TriggerNewSearch {
                message: "Please run a new search".into(),
            },
            _ => FollowupResult::Unknown {
                message: "Try: 'which is closest?', 'cheapest?', 'good for groups?'".into(),
            },
        }
    }

    /// Classify `text` and answer it from `snapshot`.
    pub async fn run_followup(
        &self,
        text: &str,
        snapshot: &ResultSnapshot,
        reference: Option<&Place>,
    ) -> FollowupResult {
        let intent = self.classify(text, Some(snapshot)).await;
        self.execute(&intent, snapshot, reference).await
    }
}

fn by_price(mut set: CandidateSet) -> FollowupResult {
    set.sort_by(|a, b| {
        asc_nulls_last(
            a.price_level.map(f64::from),
            b.price_level.map(f64::from),
        )
    });
    FollowupResult::ShowCheapest {
        results: set.top(5),
    }
}

fn by_safety(mut set: CandidateSet) -> FollowupResult {
    set.sort_by(|a, b| desc_nulls_last(a.safety_score, b.safety_score));
    FollowupResult::ShowSafest {
        results: set.top(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::TableGeocoder;
    use crate::llm::mock_chat::{FailingChat, MockChat};
    use crate::restaurant::Restaurant;

    fn snapshot() -> ResultSnapshot {
        let row = |id: &str, price: Option<u8>, safety: Option<f64>, at: Option<(f64, f64)>| {
            Restaurant {
                id: id.into(),
                name: id.into(),
                price_level: price,
                safety_score: safety,
                overall_score: safety.map(|s| 100.0 - s),
                location: at.map(|(a, o)| Coordinates::new(a, o)),
                ..Default::default()
            }
        };
        ResultSnapshot::new(
            "tacos",
            CandidateSet::new(vec![
                row("harvard_sq", Some(3), Some(70.0), Some((42.3734, -71.1189))),
                row("kendall", Some(2), Some(90.0), Some((42.3625, -71.0862))),
                row("nowhere", None, None, None),
                row("downtown", Some(1), Some(50.0), Some((42.3555, -71.0605))),
            ]),
        )
    }

    fn followup(reply: &str) -> Followup {
        let geo = GeoSettings::default();
        Followup::new(
            Arc::new(MockChat::new(reply)),
            LlmProfile::default(),
            Arc::new(TableGeocoder::from_settings(&geo)),
            &geo,
        )
    }

    fn ids(result: &FollowupResult) -> Vec<String> {
        result
            .results()
            .map(|s| s.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn closest_to_landmark() {
        let f = followup("");
        let intent = Intent {
            intent_type: IntentType::FindClosest,
            target_location: Some("near MIT please".into()),
            ..Default::default()
        };
        let out = f.execute(&intent, &snapshot(), None).await;
        assert_eq!(ids(&out), vec!["kendall", "harvard_sq", "downtown"]);
        assert_eq!(out.location(), Some("mit"));
    }

    #[tokio::test]
    async fn closest_prefers_the_most_specific_landmark() {
        let mut geo = GeoSettings::default();
        geo.landmarks.insert("harvard square".into(), Coordinates::new(42.3555, -71.0605));
        let f = Followup::new(
            Arc::new(MockChat::default()),
            LlmProfile::default(),
            Arc::new(TableGeocoder::from_settings(&geo)),
            &geo,
        );
        let intent = Intent {
            intent_type: IntentType::FindClosest,
            target_location: Some("Harvard Square".into()),
            ..Default::default()
        };
        let out = f.execute(&intent, &snapshot(), None).await;
        assert_eq!(out.location(), Some("harvard square"));
        assert_eq!(ids(&out)[0], "downtown");
    }

    #[tokio::test]
    async fn answers_serialize_with_their_action() {
        let f = followup("");
        let cheapest = Intent {
            intent_type: IntentType::FindCheapest,
            ..Default::default()
        };
        let json = serde_json::to_value(f.execute(&cheapest, &snapshot(), None).await).unwrap();
        assert_eq!(json["action"], "show_cheapest");
        assert!(json["results"].is_object());

        let closest = Intent {
            intent_type: IntentType::FindClosest,
            target_location: Some("mit".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(f.execute(&closest, &snapshot(), None).await).unwrap();
        assert_eq!(json["action"], "show_closest");
        assert_eq!(json["location"], "mit");

        let json = serde_json::to_value(f.execute(&Intent::default(), &snapshot(), None).await)
            .unwrap();
        assert_eq!(json["action"], "unknown");
    }

    #[tokio::test]
    async fn closest_uses_reference_point_or_errors() {
        let f = followup("");
        let intent = Intent {
            intent_type: IntentType::FindClosest,
            ..Default::default()
        };
        assert_eq!(
            f.execute(&intent, &snapshot(), None).await,
            FollowupResult::Error {
                message: "No location specified".into()
            }
        );
        let here = Place {
            name: "home".into(),
            coordinates: Coordinates::new(42.3555, -71.0605),
        };
        let out = f.execute(&intent, &snapshot(), Some(&here)).await;
        assert_eq!(ids(&out)[0], "downtown");
    }

    #[tokio::test]
    async fn cheapest_and_safest_put_unknowns_last() {
        let f = followup("");
        let cheapest = Intent {
            intent_type: IntentType::FindCheapest,
            ..Default::default()
        };
        assert_eq!(
            ids(&f.execute(&cheapest, &snapshot(), None).await),
            vec!["downtown", "kendall", "harvard_sq", "nowhere"]
        );
        let by_safety = Intent {
            intent_type: IntentType::FilterByAttribute,
            sort_by: Some(SortKey::Safety),
            ..Default::default()
        };
        assert_eq!(
            ids(&f.execute(&by_safety, &snapshot(), None).await),
            vec!["kendall", "harvard_sq", "downtown", "nowhere"]
        );
    }

    #[tokio::test]
    async fn routing_signals() {
        let f = followup("");
        let new_search = Intent {
            requires_new_search: true,
            ..Default::default()
        };
        assert!(matches!(
            f.execute(&new_search, &snapshot(), None).await,
            FollowupResult::TriggerNewSearch { .. }
        ));
        assert!(matches!(
            f.execute(&Intent::default(), &snapshot(), None).await,
            FollowupResult::Unknown { .. }
        ));
    }

    #[tokio::test]
    async fn classify_parses_and_degrades() {
        let f = followup(
            "```json\n{\"intent_type\": \"find_closest\", \"target_location\": \"Harvard\", \"filter_criteria\": {\"special\": \"Live_Music\"}}\n```",
        );
        let intent = f.classify("closest to harvard?", None).await;
        assert_eq!(intent.intent_type, IntentType::FindClosest);
        assert_eq!(intent.target_location.as_deref(), Some("Harvard"));
        assert!(intent.filter_criteria.special_needs.contains("live_music"));

        let f = followup("not json");
        let intent = f.classify("hmm", None).await;
        assert_eq!(intent.intent_type, IntentType::NewSearch);
        assert!(!intent.requires_new_search);

        let geo = GeoSettings::default();
        let f = Followup::new(
            Arc::new(FailingChat),
            LlmProfile::default(),
            Arc::new(TableGeocoder::from_settings(&geo)),
            &geo,
        );
        assert_eq!(f.classify("hmm", None).await, Intent::fallback("hmm"));
    }

    #[test]
    fn prompt_lists_every_attribute() {
        let prompt = Followup::prompt("cheapest?", Some(&snapshot()));
        for attr in Attribute::ALL {
            assert!(prompt.contains(&attr.to_string()));
        }
        assert!(prompt.contains("4 restaurants"));
    }
}
