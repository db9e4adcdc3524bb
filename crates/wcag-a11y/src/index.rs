/// Versioned retrieval index over LanceDB.
///
/// Every build goes to a fresh table named after the version and corpus digest. A JSON
/// manifest next to the LanceDB data points each version at its live table. Swapping
/// the manifest entry and dropping the previous table happen under the write lock, and
/// queries hold the read lock, so no query sees a half-built or dropped table.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use mcp_common::embedding::TextEmbedder;
use mcp_common::error::CommonError;
use mcp_common::vectordb::VectorDb;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::analyze::CandidateRetriever;
use crate::chunker::{corpus_digest, validate_corpus, Chunk};
use crate::error::{bounded, AppError};
use crate::storage::{read_json, write_json_atomic};

pub const MANIFEST_FILE: &str = "index-manifest.json";

/// Where a version's live index is and what it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub table: String,
    pub digest: String,
    pub chunk_count: usize,
    /// Unix seconds.
    pub built_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    versions: BTreeMap<String, IndexEntry>,
}

/// One retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub chunk_id: String,
    pub chunk_type: String,
    pub title: String,
    pub text: String,
    /// `1 - distance`, clamped to `[0, 1]`.
    pub score: f32,
}

pub struct RetrievalIndex {
    vectordb: Arc<VectorDb>,
    embedder: Arc<dyn TextEmbedder>,
    manifest_path: PathBuf,
    manifest: RwLock<Manifest>,
    model_timeout: Duration,
}

impl RetrievalIndex {
    /// Open the index, reading the manifest from `lancedb_path` if one exists.
    pub async fn open(
        vectordb: Arc<VectorDb>,
        embedder: Arc<dyn TextEmbedder>,
        lancedb_path: &Path,
        model_timeout: Duration,
    ) -> Result<Self, AppError> {
        let manifest_path = lancedb_path.join(MANIFEST_FILE);
        let manifest: Manifest = read_json(&manifest_path).await?.unwrap_or_default();
        info!(
            path = %manifest_path.display(),
            versions = manifest.versions.len(),
            "index manifest loaded"
        );
        Ok(Self {
            vectordb,
            embedder,
            manifest_path,
            manifest: RwLock::new(manifest),
            model_timeout,
        })
    }

    /// Whether the version has a manifest entry whose table is present.
    pub async fn exists(&self, version: &str) -> Result<bool, AppError> {
        let manifest = self.manifest.read().await;
        match manifest.versions.get(version) {
            Some(entry) => Ok(self.vectordb.table_exists(&entry.table).await?),
            None => Ok(false),
        }
    }

    pub async fn load(&self, version: &str) -> Result<IndexEntry, AppError> {
        self.manifest
            .read()
            .await
            .versions
            .get(version)
            .cloned()
            .ok_or_else(|| index_not_found(version))
    }

    /// Embed and persist a corpus, then make it the live index for `version`.
    ///
    /// Nothing changes for readers unless every step succeeds; a failed build leaves the
    /// previous index and manifest in place and removes its staged table.
    pub async fn build(&self, version: &str, chunks: &[Chunk]) -> Result<IndexEntry, AppError> {
        if chunks.is_empty() {
            return Err(AppError::Validation(format!(
                "refusing to index an empty WCAG {version} corpus"
            )));
        }
        validate_corpus(chunks)?;
        let digest = corpus_digest(chunks)?;
        let table = table_name(version, &digest);

        if let Some(current) = self.manifest.read().await.versions.get(version) {
            if current.table == table && self.vectordb.table_exists(&table).await? {
                info!(version, table = %table, "index already matches corpus");
                return Ok(current.clone());
            }
        }

        // A table with this name but no manifest entry is left over from a failed build.
        self.vectordb.drop_table(&table).await?;

        if let Err(e) = self.stage(&table, chunks).await {
            if let Err(drop_err) = self.vectordb.drop_table(&table).await {
                warn!(table = %table, error = %drop_err, "failed to drop staged table");
            }
            return Err(e);
        }

        let entry = IndexEntry {
            table: table.clone(),
            digest,
            chunk_count: chunks.len(),
            built_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let mut manifest = self.manifest.write().await;
        let previous = manifest.versions.insert(version.to_string(), entry.clone());
        if let Err(e) = write_json_atomic(&self.manifest_path, &*manifest).await {
            match previous {
                Some(prev) => manifest.versions.insert(version.to_string(), prev),
                None => manifest.versions.remove(version),
            };
            drop(manifest);
            if let Err(drop_err) = self.vectordb.drop_table(&table).await {
                warn!(table = %table, error = %drop_err, "failed to drop staged table");
            }
            return Err(e);
        }

        if let Some(prev) = previous.filter(|p| p.table != table) {
            if let Err(e) = self.vectordb.drop_table(&prev.table).await {
                warn!(table = %prev.table, error = %e, "failed to drop retired index table");
            }
        }
        drop(manifest);

        info!(version, table = %entry.table, chunks = entry.chunk_count, "index built");
        Ok(entry)
    }

    async fn stage(&self, table: &str, chunks: &[Chunk]) -> Result<(), AppError> {
        let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
        info!(table, count = texts.len(), "embedding corpus");
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let dim = self.embedder.dimensions();
        if embeddings.len() != chunks.len() || embeddings.iter().any(|e| e.len() != dim) {
            return Err(AppError::Upstream(format!(
                "embedder returned {} vectors for {} chunks (expected {dim} dimensions each)",
                embeddings.len(),
                chunks.len()
            )));
        }

        let batch = build_record_batch(chunks, &texts, &embeddings, dim)?;
        self.vectordb
            .create_table(table, batch.schema(), vec![batch])
            .await?;
        Ok(())
    }

    /// Nearest chunks to `text`, most similar first.
    pub async fn query(
        &self,
        version: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<Passage>, AppError> {
        let embedding = bounded(
            self.model_timeout,
            "query embedding",
            self.embedder.embed_query(text),
        )
        .await?;

        let manifest = self.manifest.read().await;
        let entry = manifest
            .versions
            .get(version)
            .ok_or_else(|| index_not_found(version))?;
        let batches = self.vectordb.search(&entry.table, &embedding, k).await?;
        drop(manifest);

        let mut passages = extract_passages(&batches);
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(k);
        Ok(passages)
    }
}

#[async_trait]
impl CandidateRetriever for RetrievalIndex {
    async fn retrieve(
        &self,
        version: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Passage>, AppError> {
        self.query(version, query, k).await
    }
}

fn index_not_found(version: &str) -> AppError {
    AppError::NotFound(format!("no retrieval index for WCAG {version}"))
}

/// `wcag_<version>_<digest prefix>`, with the dots of the version replaced.
pub fn table_name(version: &str, digest: &str) -> String {
    let prefix = digest.get(..12).unwrap_or(digest);
    format!("wcag_{}_{prefix}", version.replace('.', "_"))
}

fn build_record_batch(
    chunks: &[Chunk],
    texts: &[String],
    embeddings: &[Vec<f32>],
    dim: usize,
) -> Result<RecordBatch, AppError> {
    let dim = i32::try_from(dim)
        .map_err(|_| AppError::Upstream(format!("embedding dimension {dim} is too large")))?;

    let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    let types: Vec<&str> = chunks.iter().map(|c| c.chunk_type().as_str()).collect();
    let titles: Vec<String> = chunks.iter().map(Chunk::display_title).collect();
    let text_strs: Vec<&str> = texts.iter().map(|t| t.as_str()).collect();

    let id_array: ArrayRef = Arc::new(StringArray::from(ids));
    let type_array: ArrayRef = Arc::new(StringArray::from(types));
    let title_array: ArrayRef = Arc::new(StringArray::from(titles));
    let text_array: ArrayRef = Arc::new(StringArray::from(text_strs));

    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let flat_values: Vec<f32> = embeddings.iter().flat_map(|e| e.iter().copied()).collect();
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            item_field.clone(),
            dim,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CommonError::VectorDb(format!("failed to build embedding array: {e}")))?,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("embedding", DataType::FixedSizeList(item_field, dim), false),
    ]));

    RecordBatch::try_new(
        schema,
        vec![id_array, type_array, title_array, text_array, embedding_array],
    )
    .map_err(|e| CommonError::VectorDb(format!("failed to build record batch: {e}")).into())
}

/// Expected columns: chunk_id, chunk_type, title, text (Utf8) and `_distance` (Float32).
fn extract_passages(batches: &[RecordBatch]) -> Vec<Passage> {
    let mut passages = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        let id_col = get_string_column(batch, &schema, "chunk_id");
        let type_col = get_string_column(batch, &schema, "chunk_type");
        let title_col = get_string_column(batch, &schema, "title");
        let text_col = get_string_column(batch, &schema, "text");
        let distance_col = get_float_column(batch, &schema, "_distance");

        let (Some(id_col), Some(type_col), Some(title_col), Some(text_col)) =
            (id_col, type_col, title_col, text_col)
        else {
            warn!("search result batch missing expected columns");
            continue;
        };

        for row in 0..batch.num_rows() {
            let distance = distance_col.map(|c| c.value(row)).unwrap_or(0.0);
            passages.push(Passage {
                chunk_id: id_col.value(row).to_string(),
                chunk_type: type_col.value(row).to_string(),
                title: title_col.value(row).to_string(),
                text: text_col.value(row).to_string(),
                score: (1.0_f32 - distance).clamp(0.0, 1.0),
            });
        }
    }

    passages
}

fn get_string_column<'a>(
    batch: &'a RecordBatch,
    schema: &Schema,
    name: &str,
) -> Option<&'a StringArray> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn get_float_column<'a>(
    batch: &'a RecordBatch,
    schema: &Schema,
    name: &str,
) -> Option<&'a Float32Array> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<Float32Array>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::build_corpus;
    use crate::model::fixtures::SMALL_SPEC;
    use crate::model::WcagSpec;
    use crate::related::RelatedPolicy;
    use crate::test_support::HashEmbedder;

    fn corpus() -> Vec<Chunk> {
        let spec = WcagSpec::from_json("2.2", SMALL_SPEC).unwrap();
        build_corpus(&spec, &RelatedPolicy::default()).unwrap()
    }

    async fn open(dir: &Path) -> RetrievalIndex {
        let db = VectorDb::connect(&dir.to_string_lossy()).await.unwrap();
        RetrievalIndex::open(
            Arc::new(db),
            Arc::new(HashEmbedder::default()),
            dir,
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_table_name() {
        assert_eq!(
            table_name("2.2", "0123456789abcdef0123"),
            "wcag_2_2_0123456789ab"
        );
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path()).await;
        assert!(!index.exists("2.2").await.unwrap());
        assert!(matches!(index.load("2.2").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            index.query("2.2", "anything", 5).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_build_load_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = corpus();
        let entry = {
            let index = open(dir.path()).await;
            let entry = index.build("2.2", &chunks).await.unwrap();
            assert_eq!(entry.chunk_count, chunks.len());
            assert!(index.exists("2.2").await.unwrap());
            entry
        };

        // A fresh handle sees the persisted manifest.
        let index = open(dir.path()).await;
        assert_eq!(index.load("2.2").await.unwrap(), entry);

        let target = &chunks[2];
        let passages = index.query("2.2", &target.embedding_text(), 3).await.unwrap();
        assert!(passages.len() <= 3);
        assert!(
            passages.iter().any(|p| p.chunk_id == target.chunk_id),
            "{passages:?}"
        );
        assert_eq!(passages[0].chunk_id, target.chunk_id);
        assert_eq!(passages[0].title, "1.4.4 Resize Text (Level AA)");
        assert!(passages.iter().all(|p| (0.0..=1.0).contains(&p.score)));
    }

    #[tokio::test]
    async fn test_rebuild_swaps_table_and_drops_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path()).await;
        let chunks = corpus();
        let first = index.build("2.2", &chunks).await.unwrap();

        let same = index.build("2.2", &chunks).await.unwrap();
        assert_eq!(same, first);

        let mut changed = chunks.clone();
        changed[0].description.push_str(" Updated.");
        let second = index.build("2.2", &changed).await.unwrap();
        assert_ne!(second.table, first.table);
        assert_eq!(index.load("2.2").await.unwrap(), second);

        let db = VectorDb::connect(&dir.path().to_string_lossy()).await.unwrap();
        assert!(!db.table_exists(&first.table).await.unwrap());
        assert!(db.table_exists(&second.table).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_build_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path()).await;
        let chunks = corpus();
        let first = index.build("2.2", &chunks).await.unwrap();

        let mut broken = chunks.clone();
        broken[1].parent.as_mut().unwrap().parent_id = "nowhere".to_string();
        broken[1].description.push_str(" Changed.");
        let err = index.build("2.2", &broken).await.unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
        assert_eq!(index.load("2.2").await.unwrap(), first);

        assert!(matches!(
            index.build("2.2", &[]).await,
            Err(AppError::Validation(_))
        ));
    }
}
