//! Deterministic stand-ins for the model-backed services.
use async_trait::async_trait;
use mcp_common::embedding::TextEmbedder;
use mcp_common::error::CommonError;
use mcp_common::rerank::PassageScorer;

/// Bag-of-words embedder: each lowercase word is hashed into one of `dim` buckets and
/// the vector is L2-normalized. Identical texts embed identically.
pub struct HashEmbedder {
    pub dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 64 }
    }
}

impl HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % self.dim as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        Ok(self.embed(query))
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Scores a passage by whether it contains any of the given words.
pub struct KeywordScorer {
    pub words: Vec<&'static str>,
}

#[async_trait]
impl PassageScorer for KeywordScorer {
    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>, CommonError> {
        Ok(passages
            .iter()
            .map(|p| {
                let lower = p.to_lowercase();
                let hits = self.words.iter().filter(|w| lower.contains(*w)).count();
                hits as f32 / self.words.len().max(1) as f32
            })
            .collect())
    }
}

pub struct FailingScorer;

#[async_trait]
impl PassageScorer for FailingScorer {
    async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, CommonError> {
        Err(CommonError::Rerank("model not loaded".to_string()))
    }
}
