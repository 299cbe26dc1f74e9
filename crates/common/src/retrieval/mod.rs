//! Lecture content retrieval
//!
//! Provides:
//! - Query rewriting (direct and hypothetical-document variants)
//! - Hybrid keyword/vector search across content pools
//! - Cross-encoder reranking of the merged candidates

mod hybrid;
mod rerank;
mod rewriter;
mod weaviate;

pub use hybrid::{merge_by_id, HybridRetriever, PoolResults};
pub use rerank::{CohereReranker, RerankHit, RerankModel, Reranker};
pub use rewriter::{QueryRewriter, RewrittenQueries};
pub use weaviate::WeaviateStore;

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A chunk of lecture content returned by the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Stable content-store identifier
    pub id: String,

    /// Pool the chunk was found in
    pub pool: String,

    /// Hybrid search score
    pub score: f32,

    /// Stored properties
    pub properties: Map<String, Value>,
}

impl RetrievedChunk {
    /// String property by name
    pub fn text(&self, field: &str) -> Option<&str> {
        self.properties.get(field).and_then(Value::as_str)
    }
}

/// Scope restrictions applied to every search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture_id: Option<i64>,

    /// Platform instance the content belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.course_id.is_none() && self.lecture_id.is_none() && self.base_url.is_none()
    }
}

/// One hybrid keyword/vector search
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    pub collection: String,
    pub text: String,
    pub vector: Vec<f32>,
    /// 0 = pure keyword, 1 = pure vector
    pub alpha: f32,
    pub limit: usize,
    pub filters: SearchFilters,
    pub return_fields: Vec<String>,
}

/// A raw search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub properties: Map<String, Value>,
}

impl SearchHit {
    pub fn into_chunk(self, pool: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: self.id,
            pool: pool.to_string(),
            score: self.score,
            properties: self.properties,
        }
    }
}

/// Vector store supporting hybrid search
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Run one hybrid search; failures surface as `AppError::Retrieval`
    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchHit>>;
}

/// Exercise the student is currently working on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExerciseContext {
    pub title: String,

    #[serde(default)]
    pub problem_statement: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programming_language: Option<String>,
}
