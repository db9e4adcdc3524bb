/// End-to-end applicability analysis for a markup snippet.
///
/// snippet → cleaned markup → accessibility snapshot → composed query → top-k retrieval
/// → rerank → ranked requirements. Free-text search runs the same retrieval and rerank
/// without a snapshot. Nothing is cached between requests.
use std::sync::Arc;

use async_trait::async_trait;
use mcp_common::mcp_api::{AnalyzeWcagResponse, RankedRequirement};
use tracing::info;

use crate::error::AppError;
use crate::index::Passage;
use crate::rerank::{Reranker, Scored};
use crate::snapshot::{
    applicability_signals, clean_code_snippet, normalize, AxSnapshot, SnapshotSource,
};

/// First-stage candidate lookup for one specification version.
#[async_trait]
pub trait CandidateRetriever: Send + Sync {
    async fn retrieve(
        &self,
        version: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>, AppError>;
}

pub struct Analyzer {
    snapshots: Arc<dyn SnapshotSource>,
    retriever: Arc<dyn CandidateRetriever>,
    reranker: Reranker,
    top_k: usize,
}

impl Analyzer {
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        retriever: Arc<dyn CandidateRetriever>,
        reranker: Reranker,
        top_k: usize,
    ) -> Self {
        Self {
            snapshots,
            retriever,
            reranker,
            top_k,
        }
    }

    /// Normalized accessibility snapshot of a snippet. Blank input fails before any
    /// rendering is attempted.
    pub async fn snapshot(&self, code: &str) -> Result<AxSnapshot, AppError> {
        let markup = clean_code_snippet(code)?;
        let raw = self.snapshots.compute(&markup).await?;
        Ok(normalize(&raw))
    }

    /// Requirements of `version` that apply to the snippet, most relevant first.
    ///
    /// An empty ranking is a successful answer; every failure along the way is an error.
    pub async fn analyze(
        &self,
        code: &str,
        version: &str,
    ) -> Result<AnalyzeWcagResponse, AppError> {
        let snapshot = self.snapshot(code).await?;
        let query = compose_query(version, code.trim(), &snapshot)?;

        let candidates = self.retriever.retrieve(version, &query, self.top_k).await?;
        let retrieved = candidates.len();
        let ranked = self.reranker.rank(&query, candidates).await?;

        info!(
            version,
            nodes = snapshot.nodes.len(),
            retrieved,
            "analysis complete"
        );

        Ok(AnalyzeWcagResponse {
            spec_version: version.to_string(),
            ranked: ranked.into_iter().map(to_requirement).collect(),
            signals: applicability_signals(&snapshot),
        })
    }

    /// Requirements of `version` matching a free-text query, most relevant first.
    pub async fn search(
        &self,
        query: &str,
        version: &str,
        k: usize,
    ) -> Result<Vec<RankedRequirement>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("empty search query".to_string()));
        }
        let candidates = self.retriever.retrieve(version, query, k).await?;
        let ranked = self.reranker.rank(query, candidates).await?;
        info!(version, results = ranked.len(), "search complete");
        Ok(ranked.into_iter().map(to_requirement).collect())
    }
}

fn to_requirement(scored: Scored) -> RankedRequirement {
    RankedRequirement {
        chunk_id: scored.passage.chunk_id,
        title: scored.passage.title,
        score: scored.score,
    }
}

/// The retrieval and rerank query: task framing, the snippet itself, and the snapshot
/// as JSON with its fields described.
pub fn compose_query(version: &str, code: &str, snapshot: &AxSnapshot) -> Result<String, AppError> {
    let data = serde_json::to_string_pretty(&snapshot.nodes)
        .map_err(|e| AppError::Integrity(format!("failed to render snapshot: {e}")))?;
    Ok(format!(
        "You are an accessibility expert for WCAG {version}.\n\
         \n\
         Identify which WCAG {version} success criteria are RELEVANT to the code below, \
         based on the kinds of elements present and their computed accessibility properties.\n\
         Do not decide whether the code passes or fails any criterion. Do not suggest fixes. \
         Only identify the criteria and techniques that apply and should be considered \
         during development or testing.\n\
         \n\
         INPUT 1: CODE SNIPPET\n\
         {code}\n\
         \n\
         INPUT 2: COMPUTED ACCESSIBILITY SNAPSHOT\n\
         One item per accessible element, as exposed by the browser accessibility tree.\n\
         Schema:\n\
         - node_id: element id within this snapshot\n\
         - role: semantic role (e.g. textbox, button, link)\n\
         - name: accessible name (may be empty)\n\
         - focusable: whether the element can receive focus\n\
         - editable: whether user input is allowed\n\
         - readonly: whether the element is read-only\n\
         - required: whether input is required\n\
         - labels: associated label text, if any\n\
         Data:\n\
         {data}\n"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::snapshot::RawAxTree;
    use crate::test_support::KeywordScorer;

    struct CountingSource {
        calls: AtomicUsize,
        tree: serde_json::Value,
    }

    #[async_trait]
    impl SnapshotSource for CountingSource {
        async fn compute(&self, _markup: &str) -> Result<RawAxTree, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_value(self.tree.clone()).unwrap())
        }
    }

    struct StaticRetriever {
        version: &'static str,
        passages: Vec<Passage>,
    }

    #[async_trait]
    impl CandidateRetriever for StaticRetriever {
        async fn retrieve(
            &self,
            version: &str,
            _query: &str,
            k: usize,
        ) -> Result<Vec<Passage>, AppError> {
            if version != self.version {
                return Err(AppError::NotFound(format!("no retrieval index for WCAG {version}")));
            }
            Ok(self.passages.iter().take(k).cloned().collect())
        }
    }

    fn passage(id: &str, title: &str, text: &str) -> Passage {
        Passage {
            chunk_id: id.to_string(),
            chunk_type: "success_criterion".to_string(),
            title: title.to_string(),
            text: text.to_string(),
            score: 0.4,
        }
    }

    fn analyzer(source: Arc<CountingSource>) -> Analyzer {
        let retriever = StaticRetriever {
            version: "2.2",
            passages: vec![
                passage(
                    "success_criterion_contrast-minimum",
                    "1.4.3 Contrast (Minimum) (Level AA)",
                    "contrast of text",
                ),
                passage(
                    "success_criterion_labels-or-instructions",
                    "3.3.2 Labels or Instructions (Level A)",
                    "labels or instructions are provided when content requires user input",
                ),
                passage(
                    "success_criterion_keyboard",
                    "2.1.1 Keyboard (Level A)",
                    "operable through a keyboard interface",
                ),
            ],
        };
        Analyzer::new(
            source,
            Arc::new(retriever),
            Reranker::new(
                Arc::new(KeywordScorer { words: vec!["labels", "input"] }),
                Duration::from_secs(5),
            ),
            20,
        )
    }

    fn form_tree() -> serde_json::Value {
        serde_json::json!({
            "nodes": [
                { "nodeId": "1", "ignored": true },
                { "nodeId": "2", "role": { "value": "textbox" }, "name": { "value": "Email" },
                  "properties": [ { "name": "focusable", "value": { "value": true } } ] }
            ]
        })
    }

    #[tokio::test]
    async fn test_empty_code_fails_before_snapshot() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), tree: form_tree() });
        let analyzer = analyzer(source.clone());
        let err = analyzer.analyze("   ", "2.2").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_ranks_reranked_candidates() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), tree: form_tree() });
        let analyzer = analyzer(source.clone());
        let response = analyzer
            .analyze("<label>Email <input class=\"wide\" type=\"email\"></label>", "2.2")
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.spec_version, "2.2");
        assert_eq!(response.ranked.len(), 3);
        assert_eq!(response.ranked[0].chunk_id, "success_criterion_labels-or-instructions");
        assert_eq!(response.ranked[0].title, "3.3.2 Labels or Instructions (Level A)");
        assert_eq!(response.ranked[1].chunk_id, "success_criterion_contrast-minimum");
        assert!(response.ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(response.signals.roles, vec!["textbox"]);
        assert_eq!(response.signals.categories, vec!["forms", "keyboard"]);
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), tree: form_tree() });
        let err = analyzer(source).analyze("<p>Hi</p>", "1.0").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_search_ranks_without_snapshot() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), tree: form_tree() });
        let analyzer = analyzer(source.clone());
        let results = analyzer
            .search("  which criteria cover form labels?  ", "2.2", 2)
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "success_criterion_labels-or-instructions");
        assert_eq!(results[1].chunk_id, "success_criterion_contrast-minimum");
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), tree: form_tree() });
        let err = analyzer(source).search(" \n", "2.2", 5).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_query_carries_instructions_code_and_snapshot() {
        let raw: RawAxTree = serde_json::from_value(form_tree()).unwrap();
        let query = compose_query("2.1", "<input type=\"email\">", &normalize(&raw)).unwrap();
        assert!(query.contains("WCAG 2.1"));
        assert!(query.contains("Do not decide whether the code passes or fails"));
        assert!(query.contains("<input type=\"email\">"));
        assert!(query.contains("- labels: associated label text"));
        assert!(query.contains("\"role\": \"textbox\""));
        assert!(!query.contains("\"node_id\": \"1\""));
    }
}
