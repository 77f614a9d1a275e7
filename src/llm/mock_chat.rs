use super::{CanChat, LlmProfile, TokenStream};
use async_trait::async_trait;
use tokio_stream::iter;
use tracing::{debug, trace};

/// Mock chat client returning a fixed response.
#[derive(Debug, Clone)]
pub struct MockChat {
    reply: String,
}

impl MockChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new("mock response")
    }
}

#[async_trait]
impl CanChat for MockChat {
    async fn chat_stream(
        &self,
        _profile: &LlmProfile,
        prompt: &str,
        _temperature: f32,
    ) -> anyhow::Result<TokenStream> {
        trace!(target: "llm", "MockChat prompt: '{}'", prompt);
        debug!(target: "llm", response = %self.reply, "MockChat full response");
        // split on whitespace boundaries so callers see a multi-token stream
        let tokens: Vec<String> = self
            .reply
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect();
        Ok(Box::new(iter(tokens)))
    }
}

/// Chat client whose every call fails, standing in for an unreachable service.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingChat;

#[async_trait]
impl CanChat for FailingChat {
    async fn chat_stream(
        &self,
        _profile: &LlmProfile,
        _prompt: &str,
        _temperature: f32,
    ) -> anyhow::Result<TokenStream> {
        anyhow::bail!("model service unavailable")
    }
}
