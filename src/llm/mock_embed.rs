use super::{CanEmbed, LlmProfile};
use async_trait::async_trait;

/// Bag-of-letters embedder useful for tests and offline demos.
///
/// Texts sharing letters land close together under cosine similarity, which
/// is enough to exercise ranking without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockEmbed;

pub const DIMENSIONS: usize = 26;

/// Embedding used by [`MockEmbed`], exposed so fixtures can precompute vectors.
pub fn letter_histogram(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    for c in text.chars().filter(char::is_ascii_alphabetic) {
        let idx = (c.to_ascii_lowercase() as u8 - b'a') as usize;
        v[idx] += 1.0;
    }
    v
}

#[async_trait]
impl CanEmbed for MockEmbed {
    async fn embed(&self, _profile: &LlmProfile, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(letter_histogram(text))
    }
}
