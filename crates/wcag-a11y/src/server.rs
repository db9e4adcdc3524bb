/// MCP server for WCAG applicability analysis.
///
/// Exposes eight tools:
/// - `analyze_wcag`: Rank the success criteria relevant to a markup snippet
/// - `search_wcag`: Free-text search over a version's corpus
/// - `get_accessibility_data`: Normalized accessibility snapshot of a snippet
/// - `get_chunk`: Look up one corpus chunk by id
/// - `get_related_chunks`: Chunks under a parent, of a type, or related to a criterion
/// - `get_wcag_data`: The raw specification or the processed corpus for a version
/// - `get_benefits`: Who benefits from a success criterion
/// - `rebuild_index`: Rebuild a version's corpus and index if its source changed
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::analyze::Analyzer;
use crate::benefits::Benefits;
use crate::cache::ChunkCache;
use crate::config::Config;
use crate::error::{AppError, ErrorKind};
use crate::chunker::ChunkType;
use crate::update::{ChunkFilter, LoadedVersion, UpdateService};
use mcp_common::mcp_api::{
    AccessibilityDataParams, AccessibilityDataResponse, AnalyzeWcagParams, AnalyzeWcagResponse,
    BenefitsResponse, ChunkResponse, DEFAULT_SEARCH_RESULTS, DEFAULT_SPEC_VERSION,
    GetBenefitsParams, GetChunkParams, GetRelatedChunksParams, GetWcagDataParams,
    MAX_SEARCH_RESULTS, RebuildIndexParams, RebuildIndexResponse, RelatedChunksResponse,
    SearchWcagParams, SearchWcagResponse, WcagDataResponse, WcagDataType,
};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").expect("valid regex"));

/// Loaded versions, replaced wholesale per version after a rebuild.
pub struct AppState {
    pub versions: HashMap<String, Arc<LoadedVersion>>,
}

#[derive(Clone)]
pub struct WcagA11yServer {
    state: Arc<RwLock<AppState>>,
    analyzer: Arc<Analyzer>,
    update_service: Arc<UpdateService>,
    cache: Arc<ChunkCache>,
    benefits: Arc<Benefits>,
    config: Arc<Config>,
    tool_router: ToolRouter<WcagA11yServer>,
}

impl WcagA11yServer {
    pub fn new(
        loaded: Vec<LoadedVersion>,
        analyzer: Arc<Analyzer>,
        update_service: Arc<UpdateService>,
        cache: Arc<ChunkCache>,
        benefits: Arc<Benefits>,
        config: Arc<Config>,
    ) -> Self {
        let versions = loaded
            .into_iter()
            .map(|v| (v.spec.version.clone(), Arc::new(v)))
            .collect();

        Self {
            state: Arc::new(RwLock::new(AppState { versions })),
            analyzer,
            update_service,
            cache,
            benefits,
            config,
            tool_router: Self::tool_router(),
        }
    }

    async fn loaded(&self, version: &str) -> Result<Arc<LoadedVersion>, AppError> {
        self.state
            .read()
            .await
            .versions
            .get(version)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("WCAG {version} is not loaded")))
    }
}

#[tool_router]
impl WcagA11yServer {
    #[tool(description = "Identify which WCAG success criteria apply to an HTML/JSX snippet. Renders the snippet, reads its accessibility tree, retrieves candidate requirements and reranks them. Returns requirements ranked by relevance; does not judge pass/fail.")]
    async fn analyze_wcag(
        &self,
        Parameters(params): Parameters<AnalyzeWcagParams>,
    ) -> Result<Json<AnalyzeWcagResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let response = self
            .analyzer
            .analyze(&params.code, &version)
            .await
            .map_err(tool_error)?;
        Ok(Json(response))
    }

    #[tool(description = "Search WCAG requirements with a free-text question or topic. Retrieves candidate chunks by semantic similarity and reranks them. Returns the most relevant first.")]
    async fn search_wcag(
        &self,
        Parameters(params): Parameters<SearchWcagParams>,
    ) -> Result<Json<SearchWcagResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let k = params
            .top_k
            .unwrap_or(DEFAULT_SEARCH_RESULTS)
            .clamp(1, MAX_SEARCH_RESULTS);
        let results = self
            .analyzer
            .search(&params.query, &version, k)
            .await
            .map_err(tool_error)?;
        Ok(Json(SearchWcagResponse {
            spec_version: version,
            query: params.query.trim().to_string(),
            results,
        }))
    }

    #[tool(description = "Render an HTML/JSX snippet and return its accessible nodes (role, name, focus/edit/readonly/required state, labels). Ignored nodes are left out.")]
    async fn get_accessibility_data(
        &self,
        Parameters(params): Parameters<AccessibilityDataParams>,
    ) -> Result<Json<AccessibilityDataResponse>, String> {
        let snapshot = self.analyzer.snapshot(&params.code).await.map_err(tool_error)?;
        Ok(Json(AccessibilityDataResponse {
            nodes: snapshot.nodes,
        }))
    }

    #[tool(description = "Get one WCAG corpus chunk by id, e.g. 'success_criterion_resize-text', 'guideline_distinguishable', 'principle_perceivable' or 'definition_dfn-assistive-technologies'.")]
    async fn get_chunk(
        &self,
        Parameters(params): Parameters<GetChunkParams>,
    ) -> Result<Json<ChunkResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let chunk_id = params.chunk_id.trim().to_string();
        if chunk_id.is_empty() {
            return Err(tool_error(AppError::Validation("chunk_id must not be empty".to_string())));
        }

        let chunk = match self.cache.get_chunk(&version, &chunk_id).await {
            Some(cached) => cached,
            None => {
                let loaded = self.loaded(&version).await.map_err(tool_error)?;
                loaded.chunk(&chunk_id).cloned().ok_or_else(|| {
                    tool_error(AppError::NotFound(format!("chunk '{chunk_id}' in WCAG {version}")))
                })?
            }
        };

        let chunk = serde_json::to_value(&chunk)
            .map_err(|e| tool_error(AppError::Integrity(format!("chunk not serializable: {e}"))))?;
        Ok(Json(ChunkResponse {
            spec_version: version,
            chunk,
        }))
    }

    #[tool(description = "List corpus chunks that sit under a parent principle or guideline, have a given chunk type, or are success criteria related to a given criterion. Filters are alternatives; at least one is required.")]
    async fn get_related_chunks(
        &self,
        Parameters(params): Parameters<GetRelatedChunksParams>,
    ) -> Result<Json<RelatedChunksResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let chunk_type = match non_blank(params.chunk_type.as_deref()) {
            Some(name) => Some(ChunkType::from_name(name).ok_or_else(|| {
                tool_error(AppError::Validation(format!("'{name}' is not a chunk type")))
            })?),
            None => None,
        };
        let filter = ChunkFilter {
            parent_id: non_blank(params.parent_id.as_deref()),
            chunk_type,
            related_to: non_blank(params.related_to.as_deref()),
        };

        let loaded = self.loaded(&version).await.map_err(tool_error)?;
        let chunks = loaded
            .related_chunks(&filter)
            .map_err(tool_error)?
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| tool_error(AppError::Integrity(format!("chunk not serializable: {e}"))))?;
        Ok(Json(RelatedChunksResponse {
            spec_version: version,
            count: chunks.len(),
            chunks,
        }))
    }

    #[tool(description = "Get WCAG data for a version: the published specification JSON ('raw', default) or the flattened chunk corpus ('processed').")]
    async fn get_wcag_data(
        &self,
        Parameters(params): Parameters<GetWcagDataParams>,
    ) -> Result<Json<WcagDataResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let data_type = params.data_type.unwrap_or_default();
        let path = match data_type {
            WcagDataType::Raw => self.config.raw_spec_path(&version),
            WcagDataType::Processed => self.config.processed_corpus_path(&version),
        };
        let document = read_document(&path, &version).await.map_err(tool_error)?;
        Ok(Json(WcagDataResponse {
            spec_version: version,
            data_type,
            document,
        }))
    }

    #[tool(description = "List who benefits from a WCAG success criterion, from its Understanding page. Takes the criterion id, e.g. 'target-size-minimum'.")]
    async fn get_benefits(
        &self,
        Parameters(params): Parameters<GetBenefitsParams>,
    ) -> Result<Json<BenefitsResponse>, String> {
        let version = resolve_version(params.spec_version).map_err(tool_error)?;
        let criterion_id = params.success_criterion_id.trim().to_string();

        let loaded = self.loaded(&version).await.map_err(tool_error)?;
        if loaded.spec.success_criterion(&criterion_id).is_none() {
            return Err(tool_error(AppError::NotFound(format!(
                "success criterion '{criterion_id}' in WCAG {version}"
            ))));
        }

        let benefits = self
            .benefits
            .get(&version, &criterion_id)
            .await
            .map_err(tool_error)?;
        Ok(Json(BenefitsResponse {
            success_criterion_id: criterion_id,
            spec_version: version,
            benefits,
        }))
    }

    #[tool(description = "Rebuild the corpus and retrieval index for a WCAG version from its source JSON. Only re-embeds when the corpus changed.")]
    async fn rebuild_index(
        &self,
        Parameters(params): Parameters<RebuildIndexParams>,
    ) -> Result<Json<RebuildIndexResponse>, String> {
        let version = resolve_version(Some(params.spec_version)).map_err(tool_error)?;
        info!(version = %version, "rebuild_index tool invoked");

        let (result, loaded) = self
            .update_service
            .update(&version)
            .await
            .map_err(tool_error)?;

        let mut state = self.state.write().await;
        state.versions.insert(version.clone(), Arc::new(loaded));
        drop(state);

        Ok(Json(RebuildIndexResponse {
            spec_version: version,
            rebuilt: result.rebuilt,
            chunk_count: result.chunk_count,
            digest: result.digest,
        }))
    }
}

/// Requested version, or the default. Anything but dotted digits is rejected.
fn resolve_version(requested: Option<String>) -> Result<String, AppError> {
    let version = requested
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SPEC_VERSION.to_string());
    if !VERSION_RE.is_match(&version) {
        return Err(AppError::Validation(format!("'{version}' is not a WCAG version")));
    }
    Ok(version)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn read_document(path: &Path, version: &str) -> Result<serde_json::Value, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("WCAG {version} data ({})", path.display()))
        } else {
            AppError::Io(e)
        }
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Integrity(format!("{} is not valid JSON: {e}", path.display())))
}

/// Error text for tool callers, always led by the failure kind.
fn tool_error(e: AppError) -> String {
    match e {
        AppError::Common(_) | AppError::Io(_) => {
            let label = match e.kind() {
                ErrorKind::Validation => "validation error",
                ErrorKind::NotFound => "not found",
                ErrorKind::Upstream => "upstream error",
                ErrorKind::Integrity => "integrity error",
                ErrorKind::Config => "config error",
            };
            format!("{label}: {e}")
        }
        other => other.to_string(),
    }
}

#[tool_handler]
impl ServerHandler for WcagA11yServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "wcag-a11y".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "WCAG applicability MCP server. Use analyze_wcag to find which WCAG \
                 success criteria are relevant to an HTML/JSX snippet, search_wcag for \
                 free-text questions, get_accessibility_data to inspect a snippet's \
                 accessibility tree, get_chunk, get_related_chunks and get_wcag_data to \
                 read the guidelines, get_benefits for who a criterion helps, and \
                 rebuild_index after the source data changes."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_common::error::CommonError;

    #[test]
    fn tools_publish_output_schemas() {
        let tools = WcagA11yServer::tool_router().list_all();
        for name in [
            "analyze_wcag",
            "search_wcag",
            "get_accessibility_data",
            "get_chunk",
            "get_related_chunks",
            "get_wcag_data",
            "get_benefits",
            "rebuild_index",
        ] {
            let tool = tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing tool: {name}"));
            assert!(
                tool.output_schema.is_some(),
                "tool {name} should publish output_schema"
            );
        }
    }

    #[test]
    fn test_resolve_version() {
        assert_eq!(resolve_version(None).unwrap(), "2.2");
        assert_eq!(resolve_version(Some(" 2.1 ".to_string())).unwrap(), "2.1");
        assert_eq!(resolve_version(Some(String::new())).unwrap(), "2.2");
        assert!(matches!(
            resolve_version(Some("../2.2".to_string())),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_tool_errors_lead_with_kind() {
        assert_eq!(
            tool_error(AppError::Validation("empty code snippet".to_string())),
            "validation error: empty code snippet"
        );
        assert!(tool_error(AppError::from(CommonError::Rerank("oom".to_string())))
            .starts_with("upstream error: "));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  distinguishable ")), Some("distinguishable"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }

    #[tokio::test]
    async fn test_read_document_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_document(&dir.path().join("wcag-2.2.json"), "2.2").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
