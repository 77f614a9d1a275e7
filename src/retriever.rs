use crate::analyzer::{LocationMode, QuerySpec};
use crate::geo::{haversine_m, Coordinates, METERS_PER_MILE};
use crate::message::{AgentMessage, Stage};
use crate::restaurant::{asc_nulls_last, Attribute, CandidateSet, Distance};
use crate::status::Reporter;
use crate::store::{LocalityFilter, RestaurantStore, SearchRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where to search, as opposed to where distances are measured from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchArea {
    pub name: Option<String>,
    pub mode: LocationMode,
    pub radius_miles: f64,
    /// Geocoded center, needed for the nearby radius filter.
    pub center: Option<Coordinates>,
}

impl SearchArea {
    /// Area described by the analyzer, without a center point.
    pub fn from_spec(spec: &QuerySpec, default_radius: f64) -> Self {
        Self {
            name: spec.location.name.clone(),
            mode: spec.location.mode,
            radius_miles: spec.location.radius_miles.unwrap_or(default_radius),
            center: None,
        }
    }

    pub fn locality(&self) -> LocalityFilter {
        match (&self.name, self.mode) {
            (Some(name), LocationMode::IncludeStrict) => LocalityFilter::Within(name.clone()),
            (Some(name), LocationMode::Exclude) => LocalityFilter::Excluding(name.clone()),
            _ => LocalityFilter::Any,
        }
    }
}

pub struct Retriever {
    store: Arc<dyn RestaurantStore>,
    min_similarity: f64,
    default_radius: f64,
    reporter: Reporter,
}

impl Retriever {
    pub fn new(store: Arc<dyn RestaurantStore>) -> Self {
        Self {
            store,
            min_similarity: 0.3,
            default_radius: 1.5,
            reporter: Reporter::silent(),
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_default_radius(mut self, radius_miles: f64) -> Self {
        self.default_radius = radius_miles;
        self
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Similarity search, enrichment, optional radius filter and distances.
    ///
    /// An explicit `area` wins over the analyzer's location.
    pub async fn retrieve(
        &self,
        query: &str,
        spec: &QuerySpec,
        reference_point: Option<Coordinates>,
        area: Option<&SearchArea>,
        limit: usize,
    ) -> AgentMessage<CandidateSet> {
        self.reporter.running(Stage::Retriever, "Performing search...");
        let area = area
            .cloned()
            .unwrap_or_else(|| SearchArea::from_spec(spec, self.default_radius));
        let req = SearchRequest {
            query_text: query.to_string(),
            cuisine: spec.cuisine.clone(),
            locality: area.locality(),
            min_similarity: self.min_similarity,
            limit,
        };
        debug!(?req, "retrieving candidates");

        let mut rows = match self.store.similarity_search(&req).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "similarity search failed");
                self.reporter.failed(Stage::Retriever, "Search failed");
                return AgentMessage::failed(Stage::Retriever).with("error", e.to_string());
            }
        };
        rows.truncate(limit);
        if rows.is_empty() {
            self.reporter.failed(Stage::Retriever, "No restaurants found");
            return AgentMessage::failed(Stage::Retriever).with("error", "no_results");
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut enrichment_error = None;
        match self.store.attributes(&ids).await {
            Ok(mut details) => {
                for row in rows.iter_mut() {
                    if let Some(d) = details.remove(&row.id) {
                        row.enrich(d);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "enrichment failed, continuing without it");
                enrichment_error = Some(e.to_string());
            }
        }
        let mut set = CandidateSet::new(rows);

        if let (LocationMode::IncludeNearby, Some(center)) = (area.mode, area.center) {
            let max_m = area.radius_miles * METERS_PER_MILE;
            set.retain(|r| match r.location {
                Some(loc) => haversine_m(center, loc) <= max_m,
                None => true,
            });
            debug!(radius = area.radius_miles, remaining = set.len(), "nearby filter");
            if set.is_empty() {
                self.reporter.failed(
                    Stage::Retriever,
                    format!("Nothing within {} miles", area.radius_miles),
                );
                return AgentMessage::failed(Stage::Retriever).with("error", "none_within_radius");
            }
        }

        if let Some(origin) = reference_point {
            set.for_each_mut(|r| {
                r.distance = r
                    .location
                    .map(|loc| Distance::from_meters(haversine_m(origin, loc)));
            });
            set.sort_by(|a, b| {
                asc_nulls_last(a.distance.map(|d| d.meters), b.distance.map(|d| d.meters))
            });
        }

        self.reporter.success(
            Stage::Retriever,
            format!("Retrieved {} restaurants", set.len()),
        );
        let count = set.len();
        let full = set.has_column(Attribute::AllowsDogs);
        let mut msg = AgentMessage::success(Stage::Retriever, set, 0.9)
            .with("num_results", count)
            .with("cuisine_filter", spec.cuisine.clone())
            .with("location_mode", serde_json::to_value(area.mode).unwrap_or_default())
            .with("has_full_attributes", full);
        if let Some(err) = enrichment_error {
            msg = msg.with("enrichment_error", err);
        }
        msg
    }
}
