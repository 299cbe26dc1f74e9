//! Cross-encoder reranking
//!
//! The candidate list is padded or truncated to a fixed length before the
//! call; padding never reaches the output.

use crate::config::RerankConfig;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Relevance of one document
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f64,
}

/// Cross-encoder rerank endpoint
#[async_trait::async_trait]
pub trait RerankModel: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>>;
}

/// Cohere-compatible `/rerank` client
pub struct CohereReranker {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

impl CohereReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait::async_trait]
impl RerankModel for CohereReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankHit>> {
        let mut request = self.client.post(format!("{}/rerank", self.url)).json(&RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::Rerank {
            message: format!("Rerank request failed: {}", e),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Rerank {
                message: format!("Rerank endpoint returned {}: {}", status.as_u16(), body),
            });
        }

        let body: RerankResponse = response.json().await.map_err(|e| AppError::Rerank {
            message: format!("Invalid rerank response: {}", e),
        })?;
        Ok(body.results)
    }
}

/// Keeps the most relevant texts for a query
pub struct Reranker {
    model: Arc<dyn RerankModel>,
    max_candidates: usize,
    top_n: usize,
}

impl Reranker {
    pub fn new(model: Arc<dyn RerankModel>, config: &RerankConfig) -> Self {
        Self {
            model,
            max_candidates: config.max_candidates.max(1),
            top_n: config.top_n,
        }
    }

    /// Top texts by descending relevance
    #[instrument(skip_all, fields(candidates = texts.len()))]
    pub async fn rerank(&self, query: &str, mut texts: Vec<String>) -> Result<Vec<String>> {
        if texts.is_empty() || self.top_n == 0 {
            return Ok(Vec::new());
        }

        texts.truncate(self.max_candidates);
        let real = texts.len();
        texts.resize(self.max_candidates, String::new());

        // Score every slot so padding cannot crowd out real candidates
        let mut hits = self.model.rerank(query, &texts, self.max_candidates).await?;
        hits.retain(|h| h.index < real);
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(self.top_n);

        debug!(kept = hits.len(), "Reranked candidates");
        Ok(hits.into_iter().map(|h| std::mem::take(&mut texts[h.index])).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Scores documents by length, padding included
    struct LengthModel {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl RerankModel for LengthModel {
        async fn rerank(&self, _query: &str, documents: &[String], _top_n: usize) -> Result<Vec<RerankHit>> {
            self.seen.lock().unwrap().push(documents.len());
            Ok(documents
                .iter()
                .enumerate()
                .map(|(index, d)| RerankHit {
                    index,
                    relevance_score: d.len() as f64,
                })
                .collect())
        }
    }

    fn config(max_candidates: usize, top_n: usize) -> RerankConfig {
        RerankConfig {
            max_candidates,
            top_n,
            ..Default::default()
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_short_list_is_padded_and_padding_dropped() {
        let model = Arc::new(LengthModel { seen: Mutex::new(Vec::new()) });
        let reranker = Reranker::new(model.clone(), &config(30, 5));

        let kept = reranker.rerank("q", texts(&["bb", "a", "ccc"])).await.unwrap();
        assert_eq!(kept, texts(&["ccc", "bb", "a"]));
        assert_eq!(*model.seen.lock().unwrap(), vec![30]);
    }

    #[tokio::test]
    async fn test_long_list_is_truncated_and_top_n_kept() {
        let model = Arc::new(LengthModel { seen: Mutex::new(Vec::new()) });
        let reranker = Reranker::new(model.clone(), &config(3, 2));

        let kept = reranker
            .rerank("q", texts(&["a", "bb", "ccc", "dddddd"]))
            .await
            .unwrap();
        assert_eq!(kept, texts(&["ccc", "bb"]));
        assert_eq!(*model.seen.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_the_call() {
        let model = Arc::new(LengthModel { seen: Mutex::new(Vec::new()) });
        let reranker = Reranker::new(model.clone(), &config(30, 5));

        assert!(reranker.rerank("q", Vec::new()).await.unwrap().is_empty());
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cohere_client_round_trip() {
        let app = Router::new().route(
            "/rerank",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "rerank-multilingual-v3.0");
                assert_eq!(body["documents"].as_array().map(Vec::len), Some(2));
                Json(json!({"results": [
                    {"index": 1, "relevance_score": 0.9},
                    {"index": 0, "relevance_score": 0.1}
                ]}))
            }),
        );
        let client = CohereReranker::new(&RerankConfig {
            url: serve(app).await,
            ..Default::default()
        })
        .unwrap();

        let hits = client.rerank("q", &texts(&["x", "y"]), 2).await.unwrap();
        assert_eq!(hits[0], RerankHit { index: 1, relevance_score: 0.9 });
    }

    #[tokio::test]
    async fn test_endpoint_failure_is_rerank_error() {
        let app = Router::new().route("/rerank", post(|| async { (StatusCode::BAD_GATEWAY, "nope") }));
        let client = CohereReranker::new(&RerankConfig {
            url: serve(app).await,
            ..Default::default()
        })
        .unwrap();

        let err = client.rerank("q", &texts(&["x"]), 1).await.unwrap_err();
        assert!(matches!(err, AppError::Rerank { .. }));
    }
}
