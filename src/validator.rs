use crate::config::ValidatorSettings;
use crate::llm::{complete, CanChat, LlmProfile};
use crate::message::{AgentMessage, Stage};
use crate::status::Reporter;
use crate::utils::{contains_phrase, words_only};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why a query was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Query too short")]
    QueryTooShort,
    #[error("Query too long (limit {max} characters)")]
    QueryTooLong { max: usize },
    #[error("Geographic restriction: {location} is outside {region}")]
    GeographicRestriction { location: String, region: String },
    #[error("Not a restaurant query")]
    NotFoodRelated,
    #[error("No restaurant keywords")]
    NoRestaurantKeywords,
}

impl Rejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::QueryTooShort => "query_too_short",
            Rejection::QueryTooLong { .. } => "query_too_long",
            Rejection::GeographicRestriction { .. } => "geographic_restriction",
            Rejection::NotFoodRelated => "not_food_related",
            Rejection::NoRestaurantKeywords => "no_restaurant_keywords",
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            Rejection::QueryTooShort => "Please describe what you're looking for".into(),
            Rejection::QueryTooLong { max } => format!("Keep under {max} characters"),
            Rejection::GeographicRestriction { region, .. } => {
                format!("LocalEats only covers {region}")
            }
            Rejection::NotFoodRelated => "LocalEats helps you find restaurants. Try: \
                 'cheap Mexican food' or 'coffee shop near MIT'"
                .into(),
            Rejection::NoRestaurantKeywords => {
                "Try: 'Italian restaurant', 'coffee shop', or 'cheap Mexican food'".into()
            }
        }
    }
}

/// Two-gate query validator: cheap structural checks, then one intent check
/// against the model with a keyword fallback.
pub struct Validator {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    settings: ValidatorSettings,
    reporter: Reporter,
}

impl Validator {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile, settings: ValidatorSettings) -> Self {
        Self {
            chat,
            profile,
            settings,
            reporter: Reporter::silent(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Length and geography checks. No I/O.
    pub fn structural(&self, query: &str) -> Result<(), Rejection> {
        if query.trim().chars().count() < self.settings.min_length {
            return Err(Rejection::QueryTooShort);
        }
        if query.chars().count() > self.settings.max_length {
            return Err(Rejection::QueryTooLong {
                max: self.settings.max_length,
            });
        }
        let text = normalized(query);
        for location in &self.settings.disallowed_locations {
            let location = location.to_lowercase();
            if !contains_phrase(&text, &location) {
                continue;
            }
            let is_demonym = self.settings.cuisine_demonyms.contains(&location);
            let mentions_food = self
                .settings
                .food_words
                .iter()
                .any(|w| contains_phrase(&text, &w.to_lowercase()));
            if is_demonym && mentions_food {
                debug!(%location, "location reads as a cuisine");
                continue;
            }
            return Err(Rejection::GeographicRestriction {
                location,
                region: self.settings.region_name.clone(),
            });
        }
        Ok(())
    }

    fn intent_prompt(query: &str) -> String {
        format!(
            r#"Is this query about finding, recommending, or discussing RESTAURANTS or FOOD?

Query: "{query}"

Answer with ONLY "YES" or "NO".

Examples:
"cheap mexican food" → YES
"pizza near MIT" → YES
"vegetarian restaurants" → YES
"president of cambodia" → NO
"best hotels in boston" → NO
"weather in boston" → NO
"how to cook pasta" → NO (about cooking, not finding restaurants)

Answer (YES or NO only):"#
        )
    }

    fn has_keyword(&self, query: &str) -> bool {
        let text = normalized(query);
        self.settings.restaurant_keywords.iter().any(|kw| {
            let kw = kw.to_lowercase();
            // short keywords like "eat" would match inside unrelated words
            if kw.chars().count() <= 3 {
                contains_phrase(&text, &kw)
            } else {
                text.contains(&kw)
            }
        })
    }

    /// Run both gates.
    pub async fn check(&self, query: &str) -> Result<(), Rejection> {
        self.structural(query)?;
        match complete(&*self.chat, &self.profile, &Self::intent_prompt(query), 0.1).await {
            Some(answer) => {
                let answer = answer.trim().to_uppercase();
                if answer.contains("NO") || answer.contains("NOT") {
                    return Err(Rejection::NotFoodRelated);
                }
            }
            None => {
                debug!("intent check unavailable, using keyword fallback");
                if !self.has_keyword(query) {
                    return Err(Rejection::NoRestaurantKeywords);
                }
            }
        }
        Ok(())
    }

    /// Envelope form of [`Validator::check`]. On success the payload is the
    /// query, unchanged.
    pub async fn validate(&self, query: &str) -> AgentMessage<String> {
        self.reporter.running(Stage::Validator, "Validating query...");
        match self.check(query).await {
            Ok(()) => {
                self.reporter.success(Stage::Validator, "Query validated");
                AgentMessage::success(Stage::Validator, query.to_string(), 0.95)
                    .with("original_query", query)
            }
            Err(rejection) => {
                self.reporter.failed(Stage::Validator, rejection.to_string());
                AgentMessage::failed(Stage::Validator)
                    .with("error", rejection.code())
                    .with("reason", rejection.to_string())
                    .with("suggestion", rejection.suggestion())
            }
        }
    }
}

fn normalized(query: &str) -> String {
    words_only(query)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_chat::{FailingChat, MockChat};
    use tracing_test::traced_test;

    fn validator(chat: impl CanChat + 'static) -> Validator {
        Validator::new(
            Arc::new(chat),
            LlmProfile::default(),
            ValidatorSettings::default(),
        )
    }

    #[test]
    fn structural_bounds() {
        let v = validator(MockChat::new("YES"));
        assert_eq!(v.structural(" a "), Err(Rejection::QueryTooShort));
        assert_eq!(
            v.structural(&"x".repeat(501)).unwrap_err().code(),
            "query_too_long"
        );
        assert!(v.structural(&"x".repeat(500)).is_ok());
    }

    #[test]
    fn geography_uses_whole_words() {
        let v = validator(MockChat::new("YES"));
        assert_eq!(
            v.structural("cambodia").unwrap_err().code(),
            "geographic_restriction"
        );
        assert!(v.structural("cambodian restaurant").is_ok());
        assert!(v.structural("cambodia food").is_ok());
        assert!(v.structural("tacos like in Austin!").is_err());
        assert!(v.structural("Austinian diner").is_ok());
        assert!(v.structural("pizza in NYC").is_err());
    }

    #[test]
    fn cuisine_context_needs_whole_words() {
        let v = validator(MockChat::new("YES"));
        assert!(v.structural("cambodia restaurants").is_ok());
        assert!(v.structural("Cambodia: best spots?").is_ok());
        assert_eq!(
            v.structural("cambodia spotify playlist").unwrap_err().code(),
            "geographic_restriction"
        );
        assert_eq!(
            v.structural("replace my cambodia trip").unwrap_err().code(),
            "geographic_restriction"
        );
    }

    #[tokio::test]
    async fn model_no_rejects() {
        let v = validator(MockChat::new("NO."));
        assert_eq!(
            v.check("best hotels in boston").await,
            Err(Rejection::NotFoodRelated)
        );
        let v = validator(MockChat::new(" yes\n"));
        assert!(v.check("pizza near MIT").await.is_ok());
    }

    #[traced_test]
    #[tokio::test]
    async fn keyword_fallback_when_model_is_down() {
        let v = validator(FailingChat);
        assert!(v.check("pizza near MIT").await.is_ok());
        assert_eq!(
            v.check("weather forecast tomorrow").await,
            Err(Rejection::NoRestaurantKeywords)
        );
        // "eat" only counts as a whole word
        assert!(v.check("great weather").await.is_err());
        assert!(v.check("where to eat").await.is_ok());
        assert!(logs_contain("using keyword fallback"));
    }

    #[tokio::test]
    async fn envelope_carries_code_and_suggestion() {
        let v = validator(MockChat::new("YES"));
        let ok = v.validate("vegan brunch").await;
        assert_eq!(ok.data().map(String::as_str), Some("vegan brunch"));
        assert_eq!(ok.confidence, 0.95);

        let bad = v.validate("x").await;
        assert!(!bad.is_successful());
        assert_eq!(bad.meta_str("error"), Some("query_too_short"));
        assert!(bad.meta_str("suggestion").is_some());
    }
}
