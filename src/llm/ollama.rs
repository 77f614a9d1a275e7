use super::{CanChat, CanEmbed, LlmProfile, TokenStream};
use anyhow::Context;
use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace};

/// Chat client that calls an Ollama instance via HTTP.
#[derive(Clone, Debug)]
pub struct OllamaChat {
    /// Base URL for the Ollama server, e.g. `http://localhost:11434`.
    pub base_url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct Chunk {
    message: Option<Message>,
    #[allow(dead_code)]
    done: Option<bool>,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl CanChat for OllamaChat {
    async fn chat_stream(
        &self,
        profile: &LlmProfile,
        prompt: &str,
        temperature: f32,
    ) -> anyhow::Result<TokenStream> {
        let url = self.url("/api/chat");
        let body = serde_json::json!({
            "model": profile.model,
            "messages": [{"role": "user", "content": prompt}],
            "options": {"temperature": temperature},
            "stream": true
        });
        trace!(target: "llm", %url, body = %body, "Ollama prompt");
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .context("ollama chat request rejected")?;
        let mut bytes = resp.bytes_stream();
        let out = stream! {
            let mut full = String::new();
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        debug!(target: "llm", error = %e, "stream error");
                        break;
                    }
                };
                pending.extend_from_slice(&chunk);
                // chunks may split a line or a multi-byte character
                while let Some(line) = take_line(&mut pending) {
                    if let Some(text) = parse_line(&line) {
                        full.push_str(&text);
                        yield text;
                    }
                }
            }
            if let Some(text) = parse_line(&String::from_utf8_lossy(&pending)) {
                full.push_str(&text);
                yield text;
            }
            debug!(target: "llm", response = %full, "Ollama full response");
        };
        Ok(Box::new(Box::pin(out)))
    }
}

/// Remove and decode the first complete line, if any.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let idx = pending.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = pending.drain(..=idx).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let chunk: Chunk = serde_json::from_str(line).ok()?;
    let msg = chunk.message?;
    trace!(target: "llm", token = %msg.content, "stream token");
    Some(msg.content)
}

/// Embedding client for Ollama's `/api/embeddings` endpoint.
#[derive(Clone, Debug)]
pub struct OllamaEmbed {
    inner: OllamaChat,
}

impl OllamaEmbed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: OllamaChat::new(base_url),
        }
    }
}

#[async_trait]
impl CanEmbed for OllamaEmbed {
    async fn embed(&self, profile: &LlmProfile, text: &str) -> anyhow::Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": profile.embedding_model,
            "prompt": text,
        });
        let resp: EmbeddingResponse = self
            .inner
            .client
            .post(self.inner.url("/api/embeddings"))
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .context("ollama embedding request rejected")?
            .json()
            .await?;
        Ok(resp.embedding)
    }
}
