//! Configuration management for TutorForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.yaml, config/{APP_ENV}.yaml)
//! - Default values

use crate::llm::{CapabilitySet, ModelKind};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Vector store and content pools
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Cross-encoder reranking
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Per-run pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Registered language models
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for in-flight runs
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on every further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Vector store base URL (Weaviate REST/GraphQL endpoint)
    #[serde(default = "default_vector_store_url")]
    pub url: String,

    /// Optional API key for the vector store
    pub api_key: Option<String>,

    /// Hybrid blend factor: 0 = pure keyword, 1 = pure vector
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Results requested per search
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Per-search timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Content pools searched for every query variant
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
}

/// One independently searchable content pool
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PoolConfig {
    /// Logical pool name used in logs and results
    pub name: String,

    /// Vector store collection (class) name
    pub collection: String,

    /// Property holding the chunk text
    pub text_field: String,

    /// Properties returned with every hit
    #[serde(default)]
    pub return_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank endpoint base URL (Cohere-compatible)
    #[serde(default = "default_rerank_url")]
    pub url: String,

    /// API key for the rerank endpoint
    pub api_key: Option<String>,

    /// Rerank model name
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Candidate list is padded or truncated to this length
    #[serde(default = "default_rerank_max_candidates")]
    pub max_candidates: usize,

    /// Texts kept after reranking
    #[serde(default = "default_rerank_top_n")]
    pub top_n: usize,

    /// Request timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Worker permits per pipeline invocation
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Conversation turns fed to the query rewriter
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Language of the indexed course material
    #[serde(default = "default_content_language")]
    pub content_language: String,

    /// Status callback timeout in seconds
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// Follow-up suggestions requested per answer
    #[serde(default = "default_suggestion_count")]
    pub suggestion_count: usize,
}

/// A model entry in the registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Unique model id
    pub id: String,

    /// Human readable name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Provider connection info
    pub provider: ProviderConfig,

    /// Declared capabilities used for selection
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider adapter: openai, mock
    #[serde(rename = "type", default = "default_provider_type")]
    pub kind: String,

    /// API base URL
    pub base_url: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Provider-side model name
    pub model: String,

    /// Interfaces this registration exposes
    #[serde(default = "default_model_kinds")]
    pub kinds: Vec<ModelKind>,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "tutorforge".to_string() }
fn default_max_attempts() -> u32 { 5 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_vector_store_url() -> String { "http://localhost:8001".to_string() }
fn default_alpha() -> f32 { 0.7 }
fn default_search_limit() -> usize { 10 }
fn default_search_timeout() -> u64 { 20 }
fn default_rerank_url() -> String { "https://api.cohere.com/v2".to_string() }
fn default_rerank_model() -> String { "rerank-multilingual-v3.0".to_string() }
fn default_rerank_max_candidates() -> usize { 30 }
fn default_rerank_top_n() -> usize { 5 }
fn default_rerank_timeout() -> u64 { 20 }
fn default_max_workers() -> usize { 4 }
fn default_history_turns() -> usize { 4 }
fn default_content_language() -> String { "English".to_string() }
fn default_callback_timeout() -> u64 { 30 }
fn default_suggestion_count() -> usize { 3 }
fn default_provider_type() -> String { "openai".to_string() }
fn default_model_kinds() -> Vec<ModelKind> { vec![ModelKind::Chat] }
fn default_provider_timeout() -> u64 { 60 }

fn default_pools() -> Vec<PoolConfig> {
    vec![
        PoolConfig {
            name: "lecture_slides".to_string(),
            collection: "LectureUnitPageChunk".to_string(),
            text_field: "page_text_content".to_string(),
            return_fields: vec![
                "course_id".to_string(),
                "lecture_id".to_string(),
                "lecture_unit_id".to_string(),
                "page_number".to_string(),
                "page_text_content".to_string(),
            ],
        },
        PoolConfig {
            name: "lecture_transcripts".to_string(),
            collection: "LectureTranscription".to_string(),
            text_field: "segment_text".to_string(),
            return_fields: vec![
                "course_id".to_string(),
                "lecture_id".to_string(),
                "lecture_unit_id".to_string(),
                "segment_start_time".to_string(),
                "segment_text".to_string(),
            ],
        },
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: default_vector_store_url(),
            api_key: None,
            alpha: default_alpha(),
            limit: default_search_limit(),
            timeout_secs: default_search_timeout(),
            pools: default_pools(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            url: default_rerank_url(),
            api_key: None,
            model: default_rerank_model(),
            max_candidates: default_rerank_max_candidates(),
            top_n: default_rerank_top_n(),
            timeout_secs: default_rerank_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            history_turns: default_history_turns(),
            content_language: default_content_language(),
            callback_timeout_secs: default_callback_timeout(),
            suggestion_count: default_suggestion_count(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            retry: RetryConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            pipeline: PipelineConfig::default(),
            models: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
