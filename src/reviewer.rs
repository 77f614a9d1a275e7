use crate::llm::{complete, CanChat, LlmProfile};
use crate::message::{AgentMessage, Stage, Status};
use crate::status::Reporter;
use crate::writer::WriterOutput;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

/// Score used when nothing in the evaluation parses.
pub const DEFAULT_SCORE: u8 = 7;
/// Reviewer-side approval line.
pub const APPROVAL_SCORE: u8 = 8;

static OVERALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)OVERALL\s*[:\-]\s*(\d{1,2})").expect("valid regex"));
static SCORE_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSCORE\s*[:\-]\s*(\d{1,2})").expect("valid regex"));
static OUT_OF_TEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*/\s*10").expect("valid regex"));
static BARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(10|[1-9])\b").expect("valid regex"));
static FEEDBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)FEEDBACK\s*:\s*(.*)").expect("valid regex"));

/// Extract a 1..=10 score from free-form evaluation text.
///
/// Tries an `OVERALL:` line, a `Score:` label, `N/10`, then the first bare
/// 1..=10 integer. Anything else scores [`DEFAULT_SCORE`].
///
/// ```
/// use localeats::reviewer::parse_score;
/// assert_eq!(parse_score("OVERALL: 9"), 9);
/// assert_eq!(parse_score("Score: 11"), 10);
/// assert_eq!(parse_score("no numbers here"), 7);
/// ```
pub fn parse_score(text: &str) -> u8 {
    let text = text.trim();
    [&*OVERALL_RE, &*SCORE_LABEL_RE, &*OUT_OF_TEN_RE, &*BARE_RE]
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .map(|n| n.clamp(1, 10))
        .unwrap_or(DEFAULT_SCORE)
}

/// Text after `FEEDBACK:`, or empty.
pub fn parse_feedback(text: &str) -> String {
    FEEDBACK_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Anything the reviewer can read prose out of.
pub trait AsNarrative {
    fn narrative(&self) -> &str;
}

impl AsNarrative for WriterOutput {
    fn narrative(&self) -> &str {
        &self.text
    }
}

impl AsNarrative for String {
    fn narrative(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewResult {
    /// 1 to 10.
    pub score: u8,
    pub feedback: String,
    pub raw_text: String,
}

/// Scores a narrative against a fixed five-part rubric.
pub struct Reviewer {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    reporter: Reporter,
}

impl Reviewer {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile) -> Self {
        Self {
            chat,
            profile,
            reporter: Reporter::silent(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    fn prompt(query: &str, recommendation: &str) -> String {
        let query = match query.trim() {
            "" => "N/A (not provided)",
            q => q,
        };
        format!(
            "You are a strict QA reviewer for restaurant recommendations.

USER QUERY:
{query}

RECOMMENDATION:
{recommendation}

Score each dimension from 1 to 10:
- RELEVANCE (matches query + filters)
- SPECIFICITY (uses concrete restaurant details)
- CLARITY (easy to read)
- HONESTY (mentions tradeoffs/uncertainty)
- ACTIONABILITY (helps user decide)

Return in this format ONLY:

RELEVANCE: x
SPECIFICITY: x
CLARITY: x
HONESTY: x
ACTIONABILITY: x
OVERALL: x
FEEDBACK: <one short paragraph of improvements>
"
        )
    }

    /// Review one writer attempt.
    ///
    /// Success and partial results both carry a [`ReviewResult`]; only a
    /// missing narrative fails.
    pub async fn review<T: AsNarrative>(
        &self,
        written: &AgentMessage<T>,
        query: &str,
        iteration: usize,
    ) -> AgentMessage<ReviewResult> {
        self.reporter.running(
            Stage::Reviewer,
            format!("Evaluating (iteration {iteration})..."),
        );
        let text = written
            .data()
            .map(|w| w.narrative().trim())
            .unwrap_or_default();
        if text.is_empty() {
            self.reporter.failed(Stage::Reviewer, "Writer output missing");
            return AgentMessage::failed(Stage::Reviewer)
                .with("error", "empty recommendation text")
                .with("score", 0);
        }

        let raw = complete(&*self.chat, &self.profile, &Self::prompt(query, text), 0.2)
            .await
            .unwrap_or_default();
        let result = ReviewResult {
            score: parse_score(&raw),
            feedback: parse_feedback(&raw),
            raw_text: raw,
        };
        let score = result.score;
        let (status, confidence) = if score >= APPROVAL_SCORE {
            self.reporter
                .success(Stage::Reviewer, format!("Approved ({score}/10)"));
            (Status::Success, 0.9)
        } else {
            self.reporter
                .warning(Stage::Reviewer, format!("Below threshold ({score}/10)"));
            (Status::Partial, 0.7)
        };
        AgentMessage::new(Stage::Reviewer, status, Some(result), confidence)
            .with("iteration", iteration)
            .with("score", score)
    }
}

/// Score carried by a review message, zero when it has none.
pub fn score_of(review: &AgentMessage<ReviewResult>) -> i32 {
    review.payload.as_ref().map_or(0, |r| r.score as i32)
}
