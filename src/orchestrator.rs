//! Pipeline driver.
//!
//! `validate → analyze → retrieve → filter/rank → (write ⇄ review)`. Every
//! stage reports through an [`AgentMessage`]; this module is the only place
//! that turns those envelopes into a terminal outcome.

use crate::analyzer::{Analyzer, LocationMode, QuerySpec};
use crate::config::Settings;
use crate::filters::FilterSet;
use crate::geo::{Geocoder, Place};
use crate::llm::CanChat;
use crate::message::Stage;
use crate::researcher::{MaxPrice, ResearchCriteria, Researcher};
use crate::restaurant::{CandidateSet, Restaurant};
use crate::retriever::{Retriever, SearchArea};
use crate::reviewer::{score_of, Reviewer};
use crate::status::Reporter;
use crate::store::RestaurantStore;
use crate::validator::Validator;
use crate::writer::{Writer, WriterOutput};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Terminal failures of [`Orchestrator::run_pipeline`]. Each carries text
/// the user can act on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("query rejected: {reason}")]
    InputRejected {
        code: String,
        reason: String,
        suggestion: String,
    },
    #[error("no restaurants found")]
    NoCandidates { suggestion: String },
    #[error("no restaurants match your criteria")]
    OverConstrained {
        summary: Vec<String>,
        suggestions: Vec<String>,
    },
    #[error("no recommendation could be written")]
    NoNarrative { suggestion: String },
}

impl PipelineError {
    pub fn suggestion(&self) -> String {
        match self {
            PipelineError::InputRejected { suggestion, .. }
            | PipelineError::NoCandidates { suggestion }
            | PipelineError::NoNarrative { suggestion } => suggestion.clone(),
            PipelineError::OverConstrained { suggestions, .. } => suggestions.join("; "),
        }
    }
}

/// Caller-side knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub query: String,
    /// Where distances are measured from.
    pub reference_point: Option<Place>,
    /// Where to search. Derived from the query when absent.
    pub search_area: Option<SearchArea>,
    pub max_price: MaxPrice,
    pub min_safety: f64,
    pub max_iterations: usize,
    pub quality_threshold: i32,
    pub filters: FilterSet,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            reference_point: None,
            search_area: None,
            max_price: MaxPrice::Any,
            min_safety: 0.0,
            max_iterations: 2,
            quality_threshold: 8,
            filters: FilterSet::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub query: String,
    pub narrative: String,
    /// Rows the narrative was asked to recommend.
    pub cited: Vec<Restaurant>,
    /// Post-filter, ranked set.
    pub researched: CandidateSet,
    /// Set as returned by the retriever.
    pub retrieved: CandidateSet,
    pub quality_score: i32,
    pub iterations: usize,
    pub feedback: String,
    pub spec: QuerySpec,
}

/// Merge caller criteria with what the analyzer found in the query.
///
/// The analyzer's price level only applies when the caller left the
/// ceiling at "any"; filters are unioned slot by slot.
pub fn criteria_for(req: &PipelineRequest, spec: &QuerySpec) -> ResearchCriteria {
    let max_price = match (req.max_price, spec.budget.max_price_level) {
        (MaxPrice::Any, Some(level)) => MaxPrice::Level(level),
        (price, _) => price,
    };
    ResearchCriteria {
        max_price,
        min_safety: req.min_safety,
        filters: req.filters.clone().merge(&spec.filters),
        open_now: spec.open_now,
    }
}

const RELAX_SUGGESTIONS: [&str; 3] = [
    "Try a different cuisine",
    "Remove some filters",
    "Search in a broader area",
];

pub struct Orchestrator {
    validator: Validator,
    analyzer: Analyzer,
    retriever: Retriever,
    researcher: Researcher,
    writer: Writer,
    reviewer: Reviewer,
    geocoder: Arc<dyn Geocoder>,
    retrieve_limit: usize,
    default_radius: f64,
    reporter: Reporter,
}

impl Orchestrator {
    pub fn new(
        chat: Arc<dyn CanChat>,
        store: Arc<dyn RestaurantStore>,
        geocoder: Arc<dyn Geocoder>,
        settings: &Settings,
    ) -> Self {
        let profile = settings.llm.profile();
        let pipeline = &settings.pipeline;
        Self {
            validator: Validator::new(
                chat.clone(),
                profile.clone(),
                settings.validator.clone(),
            ),
            analyzer: Analyzer::new(chat.clone(), profile.clone(), pipeline.default_radius_miles),
            retriever: Retriever::new(store)
                .with_min_similarity(pipeline.min_similarity)
                .with_default_radius(pipeline.default_radius_miles),
            researcher: Researcher::new(),
            writer: Writer::new(chat.clone(), profile.clone()).with_top_n(pipeline.top_n_written),
            reviewer: Reviewer::new(chat, profile),
            geocoder,
            retrieve_limit: pipeline.retrieve_limit,
            default_radius: pipeline.default_radius_miles,
            reporter: Reporter::silent(),
        }
    }

    /// Route every stage's status events to `reporter`.
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.validator = self.validator.with_reporter(reporter.clone());
        self.analyzer = self.analyzer.with_reporter(reporter.clone());
        self.retriever = self.retriever.with_reporter(reporter.clone());
        self.researcher = self.researcher.with_reporter(reporter.clone());
        self.writer = self.writer.with_reporter(reporter.clone());
        self.reviewer = self.reviewer.with_reporter(reporter.clone());
        self.reporter = reporter;
        self
    }

    /// Search area implied by the query. Nearby searches are geocoded so the
    /// radius filter has a center; a failed geocode keeps the name only.
    async fn resolve_area(&self, spec: &QuerySpec) -> Option<SearchArea> {
        let name = spec.location.name.as_ref()?;
        if spec.location.mode == LocationMode::None {
            return None;
        }
        let mut area = SearchArea::from_spec(spec, self.default_radius);
        if spec.location.mode == LocationMode::IncludeNearby {
            area.center = self.geocoder.geocode(name).await.map(|p| p.coordinates);
            if area.center.is_none() {
                warn!(location = %name, "could not geocode search area");
            }
        }
        Some(area)
    }

    pub async fn run_pipeline(
        &self,
        req: &PipelineRequest,
    ) -> Result<PipelineResult, PipelineError> {
        let query = req.query.as_str();
        info!(%query, "pipeline started");

        let validated = self.validator.validate(query).await;
        if !validated.is_successful() {
            return Err(PipelineError::InputRejected {
                code: validated.meta_str("error").unwrap_or("invalid_input").into(),
                reason: validated.meta_str("reason").unwrap_or("Invalid input").into(),
                suggestion: validated
                    .meta_str("suggestion")
                    .unwrap_or("Try rephrasing your request")
                    .into(),
            });
        }

        let spec = self.analyzer.analyze(query).await;
        let area = match &req.search_area {
            Some(area) => Some(area.clone()),
            None => self.resolve_area(&spec).await,
        };
        let origin = req.reference_point.as_ref().map(|p| p.coordinates);

        let retrieved = self
            .retriever
            .retrieve(query, &spec, origin, area.as_ref(), self.retrieve_limit)
            .await;
        let Some(retrieved_set) = retrieved.data().cloned() else {
            return Err(PipelineError::NoCandidates {
                suggestion: "Try a broader search, a different cuisine, or a known example \
                     like 'cheap Mexican food'"
                    .into(),
            });
        };

        let criteria = criteria_for(req, &spec);
        debug!(?criteria, "research criteria");
        let researched = self.researcher.filter_and_rank(retrieved, &criteria);
        let Some(researched_set) = researched.data().cloned() else {
            let mut summary = Vec::new();
            if let Some(c) = &spec.cuisine {
                summary.push(format!("cuisine: {c}"));
            }
            summary.extend(criteria.summary());
            return Err(PipelineError::OverConstrained {
                summary,
                suggestions: RELAX_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
            });
        };

        let mut best_score = -1;
        let mut best: Option<(WriterOutput, String)> = None;
        let mut iterations = 0;
        for i in 1..=req.max_iterations {
            iterations = i;
            let written = self
                .writer
                .write(&researched, query, req.reference_point.as_ref())
                .await;
            if !written.is_successful() {
                warn!(iteration = i, "writer produced nothing");
                continue;
            }
            let review = self.reviewer.review(&written, query, i).await;
            let score = score_of(&review);
            let feedback = review
                .payload
                .as_ref()
                .map(|r| r.feedback.clone())
                .unwrap_or_default();
            info!(iteration = i, score, %feedback, "iteration reviewed");
            if score > best_score {
                best_score = score;
                best = written.payload.map(|w| (w, feedback));
            }
            if score >= req.quality_threshold {
                self.reporter
                    .success(Stage::Orchestrator, format!("Passed ({score}/10)"));
                break;
            }
        }

        let Some((output, feedback)) = best else {
            self.reporter
                .failed(Stage::Orchestrator, "No recommendation produced");
            return Err(PipelineError::NoNarrative {
                suggestion: "The language model did not answer; try again in a moment".into(),
            });
        };
        Ok(PipelineResult {
            query: query.to_string(),
            narrative: output.text,
            cited: output.cited,
            researched: researched_set,
            retrieved: retrieved_set,
            quality_score: best_score,
            iterations,
            feedback,
            spec,
        })
    }
}
