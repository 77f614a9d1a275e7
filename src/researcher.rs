use crate::filters::FilterSet;
use crate::message::{AgentMessage, Stage, Status};
use crate::restaurant::{desc_nulls_last, Attribute, CandidateSet};
use crate::status::Reporter;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Price ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxPrice {
    #[default]
    Any,
    /// Tier 1 to 4.
    Level(u8),
}

impl FromStr for MaxPrice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" | "" => Ok(MaxPrice::Any),
            other => match other.trim_start_matches('$') {
                "" => Ok(MaxPrice::Level(other.len().min(4) as u8)),
                digits => match digits.parse::<u8>() {
                    Ok(n @ 1..=4) => Ok(MaxPrice::Level(n)),
                    _ => Err(format!("price must be 'any', 1-4 or $..$$$$, got '{s}'")),
                },
            },
        }
    }
}

impl fmt::Display for MaxPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxPrice::Any => f.write_str("any"),
            MaxPrice::Level(n) => f.write_str(&"$".repeat(*n as usize)),
        }
    }
}

/// Hard filters applied after retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchCriteria {
    pub max_price: MaxPrice,
    /// Ignored unless positive.
    pub min_safety: f64,
    pub filters: FilterSet,
    pub open_now: Option<bool>,
}

impl ResearchCriteria {
    /// Active constraints, one line each.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let MaxPrice::Level(_) = self.max_price {
            lines.push(format!("max price: {}", self.max_price));
        }
        if self.min_safety > 0.0 {
            lines.push(format!("min safety: {}", self.min_safety));
        }
        lines.extend(self.filters.summary());
        if self.open_now == Some(true) {
            lines.push("open now".into());
        }
        lines
    }

    /// Flag columns a row must have set, in application order.
    pub fn required_attributes(&self) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = FLAG_TOKENS
            .iter()
            .filter(|(slot, tokens, _)| FilterSet::any(slot.of(&self.filters), tokens))
            .map(|(_, _, attr)| *attr)
            .collect();
        if self.open_now == Some(true) {
            out.push(Attribute::OpenNow);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Dietary,
    MealTime,
    Accessibility,
    ServiceType,
    SpecialNeeds,
}

impl Slot {
    fn of(self, f: &FilterSet) -> &BTreeSet<String> {
        match self {
            Slot::Dietary => &f.dietary,
            Slot::MealTime => &f.meal_time,
            Slot::Accessibility => &f.accessibility,
            Slot::ServiceType => &f.service_type,
            Slot::SpecialNeeds => &f.special_needs,
        }
    }
}

/// Filter tokens and the flag column each group requires.
const FLAG_TOKENS: &[(Slot, &[&str], Attribute)] = &[
    (Slot::Dietary, &["vegetarian", "vegan"], Attribute::Vegetarian),
    (Slot::MealTime, &["breakfast"], Attribute::ServesBreakfast),
    (Slot::MealTime, &["lunch"], Attribute::ServesLunch),
    (Slot::MealTime, &["dinner"], Attribute::ServesDinner),
    (Slot::Accessibility, &["wheelchair"], Attribute::WheelchairAccessible),
    (Slot::Accessibility, &["groups", "group"], Attribute::GoodForGroups),
    (
        Slot::Accessibility,
        &["children", "kids", "family"],
        Attribute::GoodForChildren,
    ),
    (Slot::ServiceType, &["outdoor"], Attribute::OutdoorSeating),
    (Slot::ServiceType, &["takeout"], Attribute::Takeout),
    (Slot::ServiceType, &["delivery"], Attribute::Delivery),
    (
        Slot::ServiceType,
        &["reservations", "reservable"],
        Attribute::Reservable,
    ),
    (Slot::SpecialNeeds, &["coffee_shop", "cafe"], Attribute::ServesCoffee),
    (Slot::SpecialNeeds, &["pet_friendly", "dogs"], Attribute::AllowsDogs),
    (Slot::SpecialNeeds, &["live_music"], Attribute::LiveMusic),
];

/// Applies hard filters and ranks what is left.
#[derive(Debug, Clone, Default)]
pub struct Researcher {
    reporter: Reporter,
}

impl Researcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Narrow `candidates` by `criteria` and sort by overall score.
    ///
    /// A failed input is returned untouched. An empty result is reported as
    /// [`Status::Partial`] with `filters_too_strict` set, never as a failure.
    pub fn filter_and_rank(
        &self,
        candidates: AgentMessage<CandidateSet>,
        criteria: &ResearchCriteria,
    ) -> AgentMessage<CandidateSet> {
        let Some(input) = candidates.data() else {
            return candidates;
        };
        self.reporter.running(Stage::Researcher, "Applying filters...");
        let before = input.len();
        let mut set = input.clone();

        // rows with an unknown tier or score cannot satisfy a hard limit
        if let MaxPrice::Level(max) = criteria.max_price {
            set.retain(|r| r.price_level.is_some_and(|p| p <= max));
        }
        if criteria.min_safety > 0.0 {
            set.retain(|r| r.safety_score.is_some_and(|s| s >= criteria.min_safety));
        }
        for attr in criteria.required_attributes() {
            if !set.has_column(attr) {
                debug!(%attr, "column absent, filter skipped");
                continue;
            }
            set.retain(|r| r.flag(attr) == Some(true));
            debug!(%attr, remaining = set.len(), "flag filter");
        }

        if set.is_empty() {
            self.reporter
                .warning(Stage::Researcher, "No restaurants match all filters");
            return AgentMessage::new(Stage::Researcher, Status::Partial, None, 0.0)
                .with("filters_too_strict", true)
                .with("input_count", before)
                .with("active_filters", criteria.summary());
        }

        set.sort_by(|a, b| desc_nulls_last(a.overall_score, b.overall_score));
        let count = set.len();
        self.reporter.success(
            Stage::Researcher,
            format!("{count} of {before} restaurants match"),
        );
        AgentMessage::success(Stage::Researcher, set, 0.9)
            .with("input_count", before)
            .with("num_results", count)
    }
}
