//! Hybrid retrieval over every content pool
//!
//! Both query variants are embedded, then each variant is searched in each
//! pool concurrently. Per pool, results are merged by identifier with the
//! HyDE variant winning on duplicates.

use super::{HybridQuery, RetrievedChunk, RewrittenQueries, SearchFilters, VectorStore};
use crate::config::{PoolConfig, RetrievalConfig};
use crate::errors::{AppError, Result};
use crate::llm::EmbeddingModel;
use crate::workers::WorkerPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Merged candidates of one pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolResults {
    pub pool: PoolConfig,
    pub chunks: Vec<RetrievedChunk>,
}

impl PoolResults {
    /// Chunk texts in merge order
    pub fn texts(&self) -> Vec<String> {
        self.chunks
            .iter()
            .filter_map(|c| c.text(&self.pool.text_field))
            .map(str::to_string)
            .collect()
    }
}

/// Hybrid retriever
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingModel>,
    pools: Vec<PoolConfig>,
    alpha: f32,
    limit: usize,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingModel>, config: &RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            pools: config.pools.clone(),
            alpha: config.alpha,
            limit: config.limit,
        }
    }

    /// Search every pool with both query variants
    #[instrument(skip_all, fields(pools = self.pools.len()))]
    pub async fn retrieve(
        &self,
        queries: &RewrittenQueries,
        filters: &SearchFilters,
        workers: &WorkerPool,
    ) -> Result<Vec<PoolResults>> {
        let start = Instant::now();
        let texts = [queries.direct.clone(), queries.hyde.clone()];

        let embeddings = workers
            .run_all(texts.clone().into_iter().map(|text| {
                let embedder = self.embedder.clone();
                async move { embedder.embed(&text).await }
            }))
            .await?
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Retrieval {
                message: format!("Query embedding failed: {}", e),
            })?;

        // Pool-major order: [pool0/direct, pool0/hyde, pool1/direct, ...]
        let searches: Vec<HybridQuery> = self
            .pools
            .iter()
            .flat_map(|pool| {
                texts.iter().zip(&embeddings).map(move |(text, vector)| HybridQuery {
                    collection: pool.collection.clone(),
                    text: text.clone(),
                    vector: vector.clone(),
                    alpha: self.alpha,
                    limit: self.limit,
                    filters: filters.clone(),
                    return_fields: return_fields(pool),
                })
            })
            .collect();

        let hits = workers
            .run_all(searches.into_iter().map(|query| {
                let store = self.store.clone();
                async move { store.hybrid_search(&query).await }
            }))
            .await?;

        let mut hits = hits.into_iter();
        let mut results = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            let (Some(direct), Some(hyde)) = (hits.next(), hits.next()) else {
                break;
            };
            let direct = direct?.into_iter().map(|h| h.into_chunk(&pool.name)).collect();
            let hyde = hyde?.into_iter().map(|h| h.into_chunk(&pool.name)).collect();
            results.push(PoolResults {
                pool: pool.clone(),
                chunks: merge_by_id(direct, hyde),
            });
        }

        info!(
            chunks = results.iter().map(|r| r.chunks.len()).sum::<usize>(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieved lecture content"
        );
        Ok(results)
    }
}

fn return_fields(pool: &PoolConfig) -> Vec<String> {
    let mut fields = pool.return_fields.clone();
    if !fields.contains(&pool.text_field) {
        fields.push(pool.text_field.clone());
    }
    fields
}

/// Merge two result lists by chunk id.
///
/// Chunks keep first-seen order; on a duplicate id the chunk from
/// `overriding` replaces the one from `primary`.
pub fn merge_by_id(primary: Vec<RetrievedChunk>, overriding: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut merged: Vec<RetrievedChunk> = Vec::with_capacity(primary.len() + overriding.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for chunk in primary.into_iter().chain(overriding) {
        match index.get(&chunk.id) {
            Some(&position) => merged[position] = chunk,
            None => {
                index.insert(chunk.id.clone(), merged.len());
                merged.push(chunk);
            }
        }
    }

    merged
}
