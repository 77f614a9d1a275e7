//! Hosted text-completion boundary.
//!
//! Every pipeline stage talks to the model through [`complete`], which turns
//! transport failures and empty replies into `None` so callers only have to
//! handle one failure shape.

pub mod mock_chat;
pub mod mock_embed;
pub mod ollama;

use async_trait::async_trait;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace, warn};

/// Streamed completion fragments.
pub type TokenStream = Box<dyn Stream<Item = String> + Unpin + Send>;

/// Which model to call and where.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmProfile {
    /// Provider name such as "ollama" or "mock".
    pub provider: String,
    /// Chat model identifier like "mistral-large" or "llama3".
    pub model: String,
    /// Embedding model identifier.
    pub embedding_model: String,
}

impl Default for LlmProfile {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            model: "mock".into(),
            embedding_model: "mock".into(),
        }
    }
}

/// Interface for models capable of completing a prompt.
#[async_trait]
pub trait CanChat: Send + Sync {
    /// Streams the completion of `prompt` sampled at `temperature`.
    async fn chat_stream(
        &self,
        profile: &LlmProfile,
        prompt: &str,
        temperature: f32,
    ) -> anyhow::Result<TokenStream>;
}

/// Interface for models capable of producing embeddings.
#[async_trait]
pub trait CanEmbed: Send + Sync {
    /// Returns an embedding vector for the supplied text.
    async fn embed(&self, profile: &LlmProfile, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Run one completion and collect it into a string.
///
/// Returns `None` when the call fails or the model answers with nothing but
/// whitespace. Exactly one attempt is made.
///
/// ```
/// use localeats::llm::{complete, mock_chat::MockChat, LlmProfile};
/// # tokio_test::block_on(async {
/// let chat = MockChat::new("YES");
/// let out = complete(&chat, &LlmProfile::default(), "is this food?", 0.1).await;
/// assert_eq!(out.as_deref(), Some("YES"));
/// # });
/// ```
pub async fn complete(
    chat: &dyn CanChat,
    profile: &LlmProfile,
    prompt: &str,
    temperature: f32,
) -> Option<String> {
    trace!(target: "llm", model = %profile.model, temperature, %prompt, "completion prompt");
    let mut stream = match chat.chat_stream(profile, prompt, temperature).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(target: "llm", model = %profile.model, error = %e, "completion failed");
            return None;
        }
    };
    let mut out = String::new();
    while let Some(token) = stream.next().await {
        out.push_str(&token);
    }
    debug!(target: "llm", response = %out, "completion response");
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_chat::{FailingChat, MockChat};

    #[tokio::test]
    async fn failure_becomes_none() {
        let out = complete(&FailingChat, &LlmProfile::default(), "hi", 0.5).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn blank_reply_becomes_none() {
        let out = complete(&MockChat::new("  \n"), &LlmProfile::default(), "hi", 0.5).await;
        assert!(out.is_none());
    }
}
