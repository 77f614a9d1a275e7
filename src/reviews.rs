use crate::llm::{complete, CanChat, LlmProfile};
use crate::store::{RestaurantStore, Review};
use crate::utils::parse_model_json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// How many reviews feed one summary.
pub const REVIEWS_PER_SUMMARY: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub summary: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub num_reviews: usize,
}

impl ReviewSummary {
    fn none() -> Self {
        Self {
            summary: "No reviews available yet".into(),
            ..Default::default()
        }
    }

    fn average_only(reviews: &[Review]) -> Self {
        let avg = reviews.iter().map(|r| r.rating).sum::<f64>() / reviews.len() as f64;
        Self {
            summary: format!(
                "Based on {} reviews with average rating {avg:.1}/5",
                reviews.len()
            ),
            num_reviews: reviews.len(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSummary {
    summary: Option<String>,
    pros: Vec<String>,
    cons: Vec<String>,
}

/// Condenses a restaurant's recent reviews into pros and cons.
pub struct ReviewSummarizer {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    store: Arc<dyn RestaurantStore>,
}

impl ReviewSummarizer {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile, store: Arc<dyn RestaurantStore>) -> Self {
        Self {
            chat,
            profile,
            store,
        }
    }

    fn prompt(name: &str, reviews: &[Review]) -> String {
        let listed = reviews
            .iter()
            .map(|r| format!("Rating {}/5: {}", r.rating, r.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            r#"Analyze these customer reviews for {name} and provide insights.

Reviews:
{listed}

Your task:
1. Write a 2-3 sentence summary highlighting key themes
2. Extract 2-3 main PROS (what customers love)
3. Extract 1-2 main CONS (what could be better)

Focus on: food quality, service, atmosphere, value, authenticity.

Respond in EXACT JSON format:
{{
    "summary": "2-3 sentence overview",
    "pros": ["specific pro 1", "specific pro 2"],
    "cons": ["specific con 1"]
}}

JSON only."#
        )
    }

    /// Summarize the newest reviews of `id`. Store and model failures
    /// degrade to a count-and-average line.
    pub async fn summarize(&self, id: &str, name: &str) -> ReviewSummary {
        let reviews = match self.store.reviews(id, REVIEWS_PER_SUMMARY).await {
            Ok(reviews) => reviews,
            Err(e) => {
                warn!(error = %e, %id, "could not load reviews");
                Vec::new()
            }
        };
        if reviews.is_empty() {
            return ReviewSummary::none();
        }

        let Some(raw) = complete(&*self.chat, &self.profile, &Self::prompt(name, &reviews), 0.3).await
        else {
            return ReviewSummary::average_only(&reviews);
        };
        match parse_model_json::<RawSummary>(&raw) {
            Ok(RawSummary {
                summary: Some(summary),
                pros,
                cons,
            }) if !summary.trim().is_empty() => ReviewSummary {
                summary: summary.trim().to_string(),
                pros,
                cons,
                num_reviews: reviews.len(),
            },
            Ok(_) => ReviewSummary::average_only(&reviews),
            Err(e) => {
                warn!(error = %e, "could not parse review summary");
                ReviewSummary::average_only(&reviews)
            }
        }
    }
}
