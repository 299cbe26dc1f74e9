//! Weaviate GraphQL adapter
//!
//! Issues `Get { Collection(hybrid: ...) }` queries; filters are combined
//! with `And`.

use super::{HybridQuery, SearchFilters, SearchHit, VectorStore};
use crate::config::RetrievalConfig;
use crate::errors::{AppError, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// Weaviate client
pub struct WeaviateStore {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

impl WeaviateStore {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
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
        })
    }

    async fn execute(&self, query: String) -> Result<Value> {
        let mut request = self
            .client
            .post(format!("{}/v1/graphql", self.url))
            .json(&json!({ "query": query }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| retrieval(format!("Vector store unreachable: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(retrieval(format!("Vector store returned {}: {}", status.as_u16(), body)));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| retrieval(format!("Invalid vector store response: {}", e)))?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(retrieval(messages.join("; ")));
        }

        body.data.ok_or_else(|| retrieval("Vector store response without data"))
    }
}

#[async_trait::async_trait]
impl VectorStore for WeaviateStore {
    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let data = self.execute(build_query(query)).await?;

        let hits = match data.pointer(&format!("/Get/{}", query.collection)) {
            Some(Value::Array(objects)) => objects.iter().filter_map(parse_hit).collect(),
            _ => Vec::new(),
        };

        let elapsed = start.elapsed().as_secs_f64();
        debug!(
            collection = %query.collection,
            hits = hits.len(),
            elapsed_ms = elapsed * 1000.0,
            "Hybrid search completed"
        );
        metrics::histogram!(
            "tutorforge_search_duration_seconds",
            "collection" => query.collection.clone()
        )
        .record(elapsed);

        Ok(hits)
    }
}

fn retrieval(message: impl Into<String>) -> AppError {
    AppError::Retrieval {
        message: message.into(),
    }
}

/// Render the GraphQL hybrid query
fn build_query(query: &HybridQuery) -> String {
    // JSON string literals are valid GraphQL string literals
    let text = Value::String(query.text.clone()).to_string();
    let vector = json!(query.vector).to_string();

    let mut arguments = format!(
        "hybrid: {{query: {}, vector: {}, alpha: {}}}, limit: {}",
        text, vector, query.alpha, query.limit
    );
    if let Some(filter) = build_filter(&query.filters) {
        arguments.push_str(", where: ");
        arguments.push_str(&filter);
    }

    format!(
        "{{ Get {{ {}({}) {{ {} _additional {{ id score }} }} }} }}",
        query.collection,
        arguments,
        query.return_fields.join(" ")
    )
}

fn build_filter(filters: &SearchFilters) -> Option<String> {
    let mut operands = Vec::new();
    if let Some(course_id) = filters.course_id {
        operands.push(format!(
            "{{path: [\"course_id\"], operator: Equal, valueInt: {}}}",
            course_id
        ));
    }
    if let Some(lecture_id) = filters.lecture_id {
        operands.push(format!(
            "{{path: [\"lecture_id\"], operator: Equal, valueInt: {}}}",
            lecture_id
        ));
    }
    if let Some(base_url) = &filters.base_url {
        operands.push(format!(
            "{{path: [\"base_url\"], operator: Equal, valueText: {}}}",
            Value::String(base_url.clone())
        ));
    }

    match operands.len() {
        0 => None,
        1 => operands.pop(),
        _ => Some(format!("{{operator: And, operands: [{}]}}", operands.join(", "))),
    }
}

fn parse_hit(object: &Value) -> Option<SearchHit> {
    let mut properties: Map<String, Value> = object.as_object()?.clone();
    let additional = properties.remove("_additional")?;

    let id = additional.get("id")?.as_str()?.to_string();
    // Weaviate reports hybrid scores as strings
    let score = match additional.get("score") {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
        _ => 0.0,
    };

    Some(SearchHit { id, score, properties })
}
