use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SPEC_VERSION: &str = "2.2";
pub const DEFAULT_SEARCH_RESULTS: usize = 5;
pub const MAX_SEARCH_RESULTS: usize = 50;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalyzeWcagParams {
    /// HTML or JSX markup to analyze.
    pub code: String,
    /// WCAG version to match against, e.g. "2.1" or "2.2" (default: "2.2").
    pub spec_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchWcagParams {
    /// Free-text question or topic, e.g. "custom button without a role".
    pub query: String,
    /// WCAG version (default: "2.2").
    pub spec_version: Option<String>,
    /// Number of results (default: 5, max: 50).
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AccessibilityDataParams {
    /// HTML or JSX markup to render and inspect.
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetChunkParams {
    /// Chunk identifier such as "success_criterion_resize-text".
    pub chunk_id: String,
    /// WCAG version (default: "2.2").
    pub spec_version: Option<String>,
}

/// Filters for `get_related_chunks`. A chunk is returned when it matches any of them.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetRelatedChunksParams {
    /// Id of the parent principle or guideline, e.g. "distinguishable".
    pub parent_id: Option<String>,
    /// One of "principle", "guideline", "success_criterion" or "definition".
    pub chunk_type: Option<String>,
    /// Success criterion id whose related criteria are wanted, e.g. "resize-text".
    pub related_to: Option<String>,
    /// WCAG version (default: "2.2").
    pub spec_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WcagDataType {
    /// The specification document exactly as published.
    #[default]
    Raw,
    /// The flattened chunk corpus built from it.
    Processed,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetWcagDataParams {
    /// WCAG version (default: "2.2").
    pub spec_version: Option<String>,
    /// Which form of the data to return (default: raw).
    pub data_type: Option<WcagDataType>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetBenefitsParams {
    /// Success criterion id such as "resize-text".
    pub success_criterion_id: String,
    /// WCAG version (default: "2.2").
    pub spec_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RebuildIndexParams {
    /// WCAG version to rebuild, e.g. "2.2".
    pub spec_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RankedRequirement {
    pub chunk_id: String,
    pub title: String,
    /// Relevance in [0, 1]; higher is more relevant.
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ApplicabilitySignals {
    pub roles: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeWcagResponse {
    pub spec_version: String,
    /// Most relevant first. Empty when nothing relevant was found.
    pub ranked: Vec<RankedRequirement>,
    pub signals: ApplicabilitySignals,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchWcagResponse {
    pub spec_version: String,
    pub query: String,
    /// Most relevant first.
    pub results: Vec<RankedRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccessibleNode {
    pub node_id: String,
    pub role: Option<String>,
    pub name: String,
    pub focusable: bool,
    pub editable: bool,
    pub readonly: bool,
    pub required: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccessibilityDataResponse {
    /// Non-ignored accessible nodes in document order.
    pub nodes: Vec<AccessibleNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkResponse {
    pub spec_version: String,
    pub chunk: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelatedChunksResponse {
    pub spec_version: String,
    pub count: usize,
    /// Matching chunks in corpus order.
    pub chunks: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WcagDataResponse {
    pub spec_version: String,
    pub data_type: WcagDataType,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BenefitsResponse {
    pub success_criterion_id: String,
    pub spec_version: String,
    pub benefits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RebuildIndexResponse {
    pub spec_version: String,
    /// False when the persisted index already matched the current corpus.
    pub rebuilt: bool,
    pub chunk_count: usize,
    pub digest: String,
}
