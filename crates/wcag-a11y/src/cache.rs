/// Redis cache of built chunks.
///
/// Lookups degrade to `None` when Redis is absent or unreachable; callers then use the
/// in-memory corpus.
///
/// Key schema:
/// - `wcag:v1:{version}:chunk:{chunk_id}`: JSON-serialized Chunk, no TTL
/// - `wcag:v1:{version}:digest`: corpus digest the chunks belong to, no TTL
use mcp_common::redis::RedisCache;
use tracing::debug;

use crate::chunker::Chunk;

const KEY_PREFIX: &str = "wcag:v1:";

pub struct ChunkCache {
    redis: RedisCache,
}

impl ChunkCache {
    pub fn new(redis: RedisCache) -> Self {
        Self { redis }
    }

    pub async fn get_chunk(&self, version: &str, chunk_id: &str) -> Option<Chunk> {
        self.redis.get_json(&chunk_key(version, chunk_id)).await
    }

    pub async fn digest(&self, version: &str) -> Option<String> {
        self.redis.get(&digest_key(version)).await
    }

    /// Replace everything cached for `version` with `chunks`.
    pub async fn repopulate(&self, version: &str, digest: &str, chunks: &[Chunk]) {
        if self.digest(version).await.as_deref() == Some(digest) {
            debug!(version, "chunk cache already current");
            return;
        }
        self.redis.delete_by_prefix(&version_prefix(version)).await;
        let mut stored = 0usize;
        for chunk in chunks {
            if self.redis.set_json(&chunk_key(version, &chunk.chunk_id), chunk).await {
                stored += 1;
            }
        }
        if stored == chunks.len() {
            self.redis.set(&digest_key(version), digest).await;
        }
        debug!(version, stored, "chunk cache repopulated");
    }
}

fn version_prefix(version: &str) -> String {
    format!("{KEY_PREFIX}{version}:")
}

fn chunk_key(version: &str, chunk_id: &str) -> String {
    format!("{}chunk:{chunk_id}", version_prefix(version))
}

fn digest_key(version: &str) -> String {
    format!("{}digest", version_prefix(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(
            chunk_key("2.2", "success_criterion_resize-text"),
            "wcag:v1:2.2:chunk:success_criterion_resize-text"
        );
        assert_eq!(digest_key("2.1"), "wcag:v1:2.1:digest");
        assert!(chunk_key("2.1", "x").starts_with(&version_prefix("2.1")));
    }

    #[tokio::test]
    async fn test_disabled_cache_misses() {
        let cache = ChunkCache::new(RedisCache::disabled());
        cache.repopulate("2.2", "abc", &[]).await;
        assert!(cache.get_chunk("2.2", "principle_perceivable").await.is_none());
        assert!(cache.digest("2.2").await.is_none());
    }
}
