/// Corpus and index lifecycle for each WCAG version.
///
/// Loads the published JSON, builds the chunk corpus, writes it to `processed/`, and
/// rebuilds the retrieval index only when the corpus digest changed or the live table
/// is gone. Runs at startup and on demand through the `rebuild_index` tool.
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cache::ChunkCache;
use crate::chunker::{build_corpus, corpus_digest, Chunk, ChunkBody, ChunkType};
use crate::config::Config;
use crate::error::AppError;
use crate::index::RetrievalIndex;
use crate::model::WcagSpec;
use crate::related::RelatedPolicy;
use crate::storage::write_json_atomic;

/// Result of an update operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub version: String,
    /// Whether the index was rebuilt (false if it already matched the corpus).
    pub rebuilt: bool,
    pub chunk_count: usize,
    pub digest: String,
}

/// Which chunks `LoadedVersion::related_chunks` returns. Filters are alternatives.
#[derive(Debug, Default)]
pub struct ChunkFilter<'a> {
    pub parent_id: Option<&'a str>,
    pub chunk_type: Option<ChunkType>,
    /// Success criterion id; selects the criteria listed as related to it.
    pub related_to: Option<&'a str>,
}

/// A version's model and corpus as served from memory.
#[derive(Debug)]
pub struct LoadedVersion {
    pub spec: WcagSpec,
    pub chunks: Vec<Chunk>,
    pub digest: String,
}

impl LoadedVersion {
    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }

    /// Chunks matching any filter, in corpus order.
    pub fn related_chunks(&self, filter: &ChunkFilter<'_>) -> Result<Vec<&Chunk>, AppError> {
        if filter.parent_id.is_none() && filter.chunk_type.is_none() && filter.related_to.is_none()
        {
            return Err(AppError::Validation(
                "give at least one of parent_id, chunk_type or related_to".to_string(),
            ));
        }

        let related_nums: HashSet<&str> = match filter.related_to {
            Some(id) => {
                let chunk_id = ChunkType::SuccessCriterion.chunk_id(id);
                let chunk = self.chunk(&chunk_id).ok_or_else(|| {
                    AppError::NotFound(format!(
                        "success criterion '{id}' in WCAG {}",
                        self.spec.version
                    ))
                })?;
                match &chunk.body {
                    ChunkBody::SuccessCriterion {
                        related_requirements,
                        ..
                    } => related_requirements.iter().map(String::as_str).collect(),
                    _ => HashSet::new(),
                }
            }
            None => HashSet::new(),
        };

        Ok(self
            .chunks
            .iter()
            .filter(|c| {
                let by_parent = filter
                    .parent_id
                    .is_some_and(|id| c.parent.as_ref().is_some_and(|p| p.parent_id == id));
                let by_type = filter.chunk_type == Some(c.chunk_type());
                let by_relation = c.chunk_type() == ChunkType::SuccessCriterion
                    && related_nums.contains(c.num.as_str());
                by_parent || by_type || by_relation
            })
            .collect())
    }
}

pub struct UpdateService {
    config: Config,
    index: Arc<RetrievalIndex>,
    cache: Arc<ChunkCache>,
    rebuild_lock: Mutex<()>,
}

impl UpdateService {
    pub fn new(config: Config, index: Arc<RetrievalIndex>, cache: Arc<ChunkCache>) -> Self {
        Self {
            config,
            index,
            cache,
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Parse the raw specification, build its corpus and persist the processed copy.
    pub async fn prepare(&self, version: &str) -> Result<LoadedVersion, AppError> {
        let raw_path = self.config.raw_spec_path(version);
        let spec = WcagSpec::load(&raw_path, version)?;
        let policy = RelatedPolicy::with_limit(self.config.related_limit);
        let chunks = build_corpus(&spec, &policy)?;
        let digest = corpus_digest(&chunks)?;

        let processed_path = self.config.processed_corpus_path(version);
        write_json_atomic(&processed_path, &chunks).await?;
        info!(
            version,
            criteria = spec.criterion_count(),
            chunks = chunks.len(),
            path = %processed_path.display(),
            "corpus built"
        );

        Ok(LoadedVersion {
            spec,
            chunks,
            digest,
        })
    }

    /// Whether the persisted index is missing or was built from a different corpus.
    pub async fn needs_rebuild(&self, version: &str, digest: &str) -> Result<bool, AppError> {
        match self.index.load(version).await {
            Ok(entry) if entry.digest == digest => {
                if self.index.exists(version).await? {
                    Ok(false)
                } else {
                    info!(version, "index table missing, rebuild needed");
                    Ok(true)
                }
            }
            Ok(_) => Ok(true),
            Err(AppError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Bring one version's corpus, index and cache up to date.
    pub async fn update(&self, version: &str) -> Result<(UpdateResult, LoadedVersion), AppError> {
        let _guard = self.rebuild_lock.lock().await;

        let loaded = self.prepare(version).await?;
        let rebuilt = if self.needs_rebuild(version, &loaded.digest).await? {
            self.index.build(version, &loaded.chunks).await?;
            true
        } else {
            info!(version, "index up to date, skipping rebuild");
            false
        };

        self.cache
            .repopulate(version, &loaded.digest, &loaded.chunks)
            .await;

        let result = UpdateResult {
            version: version.to_string(),
            rebuilt,
            chunk_count: loaded.chunks.len(),
            digest: loaded.digest.clone(),
        };
        Ok((result, loaded))
    }

    /// Update every configured version. A failing version is logged and skipped.
    pub async fn update_all(&self) -> Vec<LoadedVersion> {
        let mut loaded = Vec::new();
        for version in &self.config.versions {
            match self.update(version).await {
                Ok((result, data)) => {
                    info!(
                        version,
                        rebuilt = result.rebuilt,
                        chunks = result.chunk_count,
                        "version ready"
                    );
                    loaded.push(data);
                }
                Err(AppError::NotFound(msg)) => {
                    warn!(version, reason = %msg, "skipping version without source data");
                }
                Err(e) => {
                    error!(version, error = %e, "failed to prepare version");
                }
            }
        }
        loaded
    }
}
