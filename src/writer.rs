use crate::geo::Place;
use crate::llm::{complete, CanChat, LlmProfile};
use crate::message::{AgentMessage, Stage};
use crate::restaurant::{CandidateSet, Restaurant};
use crate::status::Reporter;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Narrative produced by the [`Writer`].
#[derive(Debug, Clone, Serialize)]
pub struct WriterOutput {
    pub text: String,
    /// The top three rows, the ones the prose is asked to recommend.
    pub cited: Vec<Restaurant>,
    /// Full ranked set the narrative was written from.
    pub ranked: CandidateSet,
}

/// Render one shortlist entry for the prompt.
pub fn render_block(index: usize, r: &Restaurant) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{index}. **{}** ({})", r.name, r.cuisine);
    let _ = writeln!(out, "   - Location: {}", r.locality());
    let _ = writeln!(
        out,
        "   - Address: {}",
        r.address.as_deref().unwrap_or(r.locality())
    );
    let _ = writeln!(out, "   - Phone: {}", r.phone.as_deref().unwrap_or("N/A"));
    let _ = writeln!(out, "   - Price: {}", r.price_symbols());
    if let Some(d) = r.distance {
        let _ = writeln!(
            out,
            "   - {:.1} miles from you (~{} min drive)",
            d.miles,
            (d.miles * 20.0) as u32
        );
    }
    if let Some(m) = r.nearest_stop_m {
        let _ = writeln!(
            out,
            "   - Nearest T: {m:.0}m walk (~{} min)",
            (m / 80.0) as u32
        );
    }
    let score = |s: Option<f64>| s.map_or("N/A".to_string(), |v| format!("{v:.1}/100"));
    let _ = writeln!(
        out,
        "   - Overall: {} | Safety: {}",
        score(r.overall_score),
        score(r.safety_score)
    );
    let rating = r.rating.map_or("N/A".to_string(), |v| format!("{v:.1}"));
    let _ = writeln!(
        out,
        "   - Rating: {rating} | Tier: {}",
        r.tier.as_deref().unwrap_or("N/A")
    );
    out
}

/// Turns the ranked shortlist into prose.
pub struct Writer {
    chat: Arc<dyn CanChat>,
    profile: LlmProfile,
    top_n: usize,
    reporter: Reporter,
}

impl Writer {
    pub fn new(chat: Arc<dyn CanChat>, profile: LlmProfile) -> Self {
        Self {
            chat,
            profile,
            top_n: 5,
            reporter: Reporter::silent(),
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn prompt(&self, ranked: &CandidateSet, query: &str, user: Option<&Place>) -> String {
        let summary: String = ranked
            .iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, r)| format!("\n{}", render_block(i + 1, r)))
            .collect();
        let location = user
            .map(|p| {
                format!(
                    "\n\nUSER LOCATION: {}. MENTION distances prominently!",
                    p.name
                )
            })
            .unwrap_or_default();
        format!(
            "You are LocalEats AI for Boston restaurants.

User: {query}{location}

Restaurants:
{summary}
RULES:
1. ONLY recommend from the list above
2. Write 3-4 warm paragraphs
3. Recommend top 3 restaurants
4. Highlight distance (if provided), safety, transit, value
5. Be honest about tradeoffs

Write naturally and enthusiastically."
        )
    }

    /// One narrative attempt. Fails on a non-successful input or an empty
    /// model answer; retrying is up to the caller.
    pub async fn write(
        &self,
        ranked: &AgentMessage<CandidateSet>,
        query: &str,
        user: Option<&Place>,
    ) -> AgentMessage<WriterOutput> {
        let Some(set) = ranked.data() else {
            return AgentMessage::failed(Stage::Writer).with("error", "no ranked candidates");
        };
        self.reporter
            .running(Stage::Writer, "Generating recommendations...");
        let prompt = self.prompt(set, query, user);
        let Some(text) = complete(&*self.chat, &self.profile, &prompt, 0.7).await else {
            self.reporter.failed(Stage::Writer, "No output");
            return AgentMessage::failed(Stage::Writer).with("error", "empty model response");
        };
        self.reporter.success(Stage::Writer, "Done");
        let output = WriterOutput {
            text: text.trim().to_string(),
            cited: set.iter().take(3).cloned().collect(),
            ranked: set.clone(),
        };
        AgentMessage::success(Stage::Writer, output, 0.85)
    }
}
