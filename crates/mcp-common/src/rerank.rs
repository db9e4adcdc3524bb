/// Cross-encoder reranking around fastembed's `TextRerank`.
///
/// Like the embedder, the model is synchronous and CPU-bound, so scoring runs on a
/// blocking thread. Raw logits are squashed through the logistic function so every
/// score lands in `[0, 1]` regardless of the underlying model.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CommonError;

/// Scores how relevant each passage is to a query.
#[async_trait]
pub trait PassageScorer: Send + Sync {
    /// Returns one score in `[0, 1]` per passage, in the order the passages were given.
    /// Passages are never modified.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, CommonError>;
}

pub struct CrossEncoder {
    model: Arc<fastembed::TextRerank>,
}

impl CrossEncoder {
    /// Initialize the reranking model (bge-reranker-v2-m3). Downloads on first run.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options =
                fastembed::RerankInitOptions::new(fastembed::RerankerModel::BGERerankerV2M3)
                    .with_show_download_progress(true);
            fastembed::TextRerank::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Rerank(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Rerank(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl PassageScorer for CrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, CommonError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = passages.to_vec();
        let count = documents.len();

        let results = tokio::task::spawn_blocking(move || {
            model.rerank(query, documents, false, Some(8))
        })
        .await
        .map_err(|e| CommonError::Rerank(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Rerank(format!("scoring failed: {e}")))?;

        // fastembed returns results sorted by score; put them back in input order.
        let mut scores = vec![None; count];
        for result in results {
            let slot = scores.get_mut(result.index).ok_or_else(|| {
                CommonError::Rerank(format!("result index {} out of range", result.index))
            })?;
            *slot = Some(logistic(result.score));
        }

        debug!(passages = count, "scored passages");
        scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.ok_or_else(|| CommonError::Rerank(format!("no score for passage {i}"))))
            .collect()
    }
}

/// Map an unbounded logit onto `(0, 1)`.
pub fn logistic(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic_range() {
        assert!((logistic(0.0) - 0.5).abs() < f32::EPSILON);
        assert!(logistic(8.0) > 0.99);
        assert!(logistic(-8.0) < 0.01);
        for x in [-1e6_f32, -3.5, 0.25, 12.0, 1e6] {
            let y = logistic(x);
            assert!((0.0..=1.0).contains(&y), "logistic({x}) = {y}");
        }
    }

    #[test]
    fn test_logistic_is_monotonic() {
        assert!(logistic(1.0) > logistic(0.5));
        assert!(logistic(-0.5) > logistic(-1.0));
    }
}
