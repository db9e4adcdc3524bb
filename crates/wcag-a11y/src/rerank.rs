/// Second-stage ranking of retrieved passages with a cross-encoder.
use std::sync::Arc;
use std::time::Duration;

use mcp_common::rerank::PassageScorer;
use tracing::debug;

use crate::error::{bounded, AppError};
use crate::index::Passage;

/// A retrieved passage with its rerank score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub passage: Passage,
    pub score: f32,
}

pub struct Reranker {
    scorer: Arc<dyn PassageScorer>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PassageScorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    /// Score every candidate against the query and order them best first.
    pub async fn rank(
        &self,
        query: &str,
        candidates: Vec<Passage>,
    ) -> Result<Vec<Scored>, AppError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let scores = bounded(self.timeout, "rerank", self.scorer.score(query, &texts)).await?;
        if scores.len() != candidates.len() {
            return Err(AppError::Upstream(format!(
                "reranker returned {} scores for {} passages",
                scores.len(),
                candidates.len()
            )));
        }
        debug!(candidates = candidates.len(), "reranked candidates");
        Ok(order_by_score(candidates, scores))
    }
}

/// Sort descending by score. Equal scores keep retrieval order.
pub fn order_by_score(candidates: Vec<Passage>, scores: Vec<f32>) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .zip(scores)
        .map(|(passage, score)| Scored {
            passage,
            score: if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) },
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingScorer, KeywordScorer};

    fn passage(id: &str, text: &str) -> Passage {
        Passage {
            chunk_id: id.to_string(),
            chunk_type: "success_criterion".to_string(),
            title: id.to_string(),
            text: text.to_string(),
            score: 0.5,
        }
    }

    #[test]
    fn test_ties_keep_retrieval_order() {
        let ranked = order_by_score(
            vec![passage("a", ""), passage("b", ""), passage("c", ""), passage("d", "")],
            vec![0.2, 0.9, 0.2, 0.9],
        );
        let ids: Vec<&str> = ranked.iter().map(|s| s.passage.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_rank_orders_without_touching_content() {
        let reranker = Reranker::new(
            Arc::new(KeywordScorer { words: vec!["keyboard", "focus"] }),
            Duration::from_secs(5),
        );
        let candidates = vec![
            passage("contrast", "Contrast minimum for text"),
            passage("keyboard", "All functionality is operable through a keyboard"),
            passage("focus", "Keyboard focus is visible"),
        ];
        let ranked = reranker.rank("query", candidates.clone()).await.unwrap();
        let ids: Vec<&str> = ranked.iter().map(|s| s.passage.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["focus", "keyboard", "contrast"]);
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[2].passage, candidates[0]);
    }

    #[tokio::test]
    async fn test_scorer_failure_propagates() {
        let reranker = Reranker::new(Arc::new(FailingScorer), Duration::from_secs(5));
        let err = reranker
            .rank("q", vec![passage("a", "text")])
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        assert!(reranker.rank("q", Vec::new()).await.unwrap().is_empty());
    }
}
