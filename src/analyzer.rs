use crate::filters::{normalize, FilterSet};
use crate::llm::{complete, CanChat, LlmProfile};
use crate::message::Stage;
use crate::status::Reporter;
use crate::utils::parse_model_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    IncludeStrict,
    IncludeNearby,
    Exclude,
    #[default]
    None,
}

impl LocationMode {
    fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "include_strict" => LocationMode::IncludeStrict,
            "include_nearby" => LocationMode::IncludeNearby,
            "exclude" => LocationMode::Exclude,
            _ => LocationMode::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSpec {
    pub name: Option<String>,
    pub mode: LocationMode,
    /// Only meaningful for [`LocationMode::IncludeNearby`].
    pub radius_miles: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// 1 to 4.
    pub max_price_level: Option<u8>,
    /// Informational only, nothing filters on it.
    pub max_dollars: Option<f64>,
}

/// Structured interpretation of a free-text query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub cuisine: Option<String>,
    pub location: LocationSpec,
    pub budget: Budget,
    pub open_now: Option<bool>,
    pub filters: FilterSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSpec {
    cuisine: Option<String>,
    location: Option<RawLocation>,
    budget: Option<RawBudget>,
    open_now: Option<bool>,
    filters: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLocation {
    name: Option<String>,
    mode: Option<String>,
    radius_miles: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBudget {
    max_price_level: Option<f64>,
    max_dollars: Option<f64>,
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}

impl QuerySpec {
    fn from_raw(raw: RawSpec, default_radius: f64) -> Self {
        let location = raw.location.unwrap_or_default();
        let name = non_empty(location.name);
        let mode = match (&name, location.mode) {
            (Some(_), Some(mode)) => LocationMode::parse(&mode),
            _ => LocationMode::None,
        };
        let radius_miles = match mode {
            LocationMode::IncludeNearby => location
                .radius_miles
                .filter(|r| *r > 0.0)
                .or(Some(default_radius)),
            _ => location.radius_miles,
        };
        let budget = raw.budget.unwrap_or_default();
        let max_price_level = budget
            .max_price_level
            .filter(|p| (1.0..=4.0).contains(p))
            .map(|p| p.round() as u8);
        QuerySpec {
            cuisine: non_empty(raw.cuisine),
            location: LocationSpec {
                name,
                mode,
                radius_miles,
            },
            budget: Budget {
                max_price_level,
                max_dollars: budget.max_dollars,
            },
            open_now: raw.open_now,
            filters: normalize(raw.filters.as_ref()),
        }
    }

    /// Parse model output, falling back to the empty spec on any problem.
    pub fn parse(text: &str, default_radius: f64) -> Self {
        match parse_model_json::<RawSpec>(text) {
            Ok(raw) => Self::from_raw(raw, default_radius),
            Err(e) => {
                warn!(error = %e, "could not parse analyzer output, using defaults");
                QuerySpec::default()
            }
        }
    }
}

/// One model call that turns free text into a [`QuerySpec`].
pub struct Analyzer {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    default_radius: f64,
    reporter: Reporter,
}

impl Analyzer {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile, default_radius: f64) -> Self {
        Self {
            chat,
            profile,
            default_radius,
            reporter: Reporter::silent(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    fn prompt(query: &str) -> String {
        format!(
            r#"You are a query analyst for a Boston restaurant system.

Analyze ONLY the current query below. Do NOT assume filters from context.

Query: "{query}"

Extract structured information. Respond with ONLY valid JSON:

{{
  "cuisine": "Mexican" | "Italian" | "Pizza" | null,
  "location": {{
    "name": "fenway" | "mit" | "harvard" | "roxbury" | null,
    "mode": "include_strict" | "include_nearby" | "exclude" | "none",
    "radius_miles": 1.5 | null
  }},
  "budget": {{
    "max_price_level": 1 | 2 | 3 | 4 | null,
    "max_dollars": number | null
  }},
  "open_now": true | false | null,
  "filters": {{
    "dietary": ["vegetarian", "vegan"],
    "meal_time": ["breakfast", "lunch", "dinner"],
    "accessibility": ["wheelchair", "groups", "children"],
    "service_type": ["outdoor", "takeout", "delivery", "reservations"],
    "special_needs": ["pet_friendly", "coffee_shop", "live_music"]
  }}
}}

RULES:

1) LOCATION MODE (detect from prepositions):
   - "IN fenway" | "AT fenway" → mode: "include_strict"
   - "NEAR fenway" | "AROUND fenway" | "BY fenway" → mode: "include_nearby", radius_miles: 1.5
   - "NOT IN fenway" | "EXCLUDING fenway" → mode: "exclude"
   - No location mentioned → mode: "none"

2) CUISINE: extract the cuisine type if mentioned, null otherwise.

3) BUDGET:
   - "cheap" → max_price_level: 2
   - "$" → 1, "$$" → 2, "$$$" → 3, "$$$$" → 4
   - "under $20" → max_dollars: 20
   - "expensive" | "costly" → max_price_level: 4

4) OPEN NOW: "open now" | "currently open" → true, otherwise null.

5) FILTERS (only if mentioned in THIS query):
   - "vegetarian" | "vegan" → dietary
   - "breakfast" | "lunch" | "dinner" → meal_time
   - "wheelchair" | "accessible" → accessibility: ["wheelchair"]
   - "groups" | "group" → accessibility: ["groups"]
   - "kids" | "children" | "family" → accessibility: ["children"]
   - "outdoor" | "patio" → service_type: ["outdoor"]
   - "takeout" | "to-go" → service_type: ["takeout"]
   - "delivery" → service_type: ["delivery"]
   - "reservations" → service_type: ["reservations"]
   - "pet friendly" | "dog friendly" → special_needs: ["pet_friendly"]
   - "cafe" | "coffee shop" → special_needs: ["coffee_shop"]
   - "live music" → special_needs: ["live_music"]

Examples:

"cheap vegetarian mexican near MIT"
→ {{"cuisine": "Mexican", "budget": {{"max_price_level": 2}}, "location": {{"name": "mit", "mode": "include_nearby", "radius_miles": 1.5}}, "filters": {{"dietary": ["vegetarian"]}}}}

"italian NOT in downtown"
→ {{"cuisine": "Italian", "location": {{"name": "downtown", "mode": "exclude"}}, "filters": {{}}}}

JSON only. No other text."#
        )
    }

    /// Never fails: a missing or unparsable answer yields the empty spec.
    pub async fn analyze(&self, query: &str) -> QuerySpec {
        self.reporter.running(Stage::Analyzer, "Understanding query...");
        let spec = match complete(&*self.chat, &self.profile, &Self::prompt(query), 0.2).await {
            Some(raw) => QuerySpec::parse(&raw, self.default_radius),
            None => QuerySpec::default(),
        };
        debug!(?spec, "query analyzed");
        let mut detail = Vec::new();
        if let Some(c) = &spec.cuisine {
            detail.push(format!("cuisine: {c}"));
        }
        if let Some(name) = &spec.location.name {
            detail.push(format!("location: {name} ({:?})", spec.location.mode));
        }
        detail.extend(spec.filters.summary());
        self.reporter.success(Stage::Analyzer, detail.join(" | "));
        spec
    }
}
