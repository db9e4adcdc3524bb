/// LanceDB vector database wrapper.
///
/// Provides a typed interface over LanceDB for storing and searching vector embeddings.
/// Callers own their table schemas; the only column this wrapper relies on is the
/// `_distance` column LanceDB adds to vector search results.
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::Schema;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{info, warn};

use crate::error::CommonError;

pub struct VectorDb {
    db: lancedb::Connection,
}

impl VectorDb {
    /// Connect to a LanceDB database at the given filesystem path.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("connection failed: {e}")))?;
        Ok(Self { db })
    }

    /// Names of all tables currently in the database.
    pub async fn table_names(&self) -> Result<Vec<String>, CommonError> {
        self.db
            .table_names()
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("listing tables failed: {e}")))
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool, CommonError> {
        Ok(self.table_names().await?.iter().any(|t| t == table_name))
    }

    /// Create a new table with the given schema and data.
    ///
    /// Fails if the table already exists; callers stage new data under a fresh name and
    /// retire the old table themselves.
    pub async fn create_table(
        &self,
        table_name: &str,
        schema: Arc<Schema>,
        batches: Vec<RecordBatch>,
    ) -> Result<(), CommonError> {
        let batch_iter = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
        self.db
            .create_table(table_name, Box::new(batch_iter))
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("create table failed: {e}")))?;

        info!(table = table_name, "vector table created");
        Ok(())
    }

    /// Drop a table. Missing tables are not an error.
    pub async fn drop_table(&self, table_name: &str) -> Result<(), CommonError> {
        if !self.table_exists(table_name).await? {
            return Ok(());
        }
        self.db
            .drop_table(table_name)
            .await
            .map_err(|e| CommonError::VectorDb(format!("drop table failed: {e}")))?;
        info!(table = table_name, "vector table dropped");
        Ok(())
    }

    /// Search for the nearest vectors to the given query embedding.
    ///
    /// Returns up to `limit` results as RecordBatches, including a `_distance` column
    /// added by LanceDB.
    pub async fn search(
        &self,
        table_name: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RecordBatch>, CommonError> {
        let table = self
            .db
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("open table failed: {e}")))?;

        let results = table
            .vector_search(query_embedding)
            .map_err(|e| CommonError::VectorDb(format!("vector search setup failed: {e}")))?
            .limit(limit)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("vector search failed: {e}")))?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting search results failed: {e}")))?;

        if batches.is_empty() {
            warn!(table = table_name, "vector search returned no batches");
        }
        Ok(batches)
    }
}
