//! Language model abstraction
//!
//! Provides:
//! - Narrow provider interfaces (chat, completion, embedding)
//! - Capability declarations and requirement-based scoring
//! - A model registry with best/worst selection
//! - Retrying wrappers around provider handles

pub mod capabilities;
mod mock;
mod openai;
mod registry;
pub mod retry;
mod scorer;

pub use capabilities::{Capability, CapabilityField, CapabilitySet, RequirementSet};
pub use mock::MockModel;
pub use openai::OpenAiModel;
pub use registry::{ModelRegistration, ModelRegistry, ModelSelector, SelectionMode};
pub use retry::RetryPolicy;
pub use scorer::{rank_normalize, CapabilityScorer};

use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for raw provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Interface a registration exposes; used as the selection filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Chat,
    Completion,
    Embedding,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Chat => write!(f, "chat"),
            ModelKind::Completion => write!(f, "completion"),
            ModelKind::Embedding => write!(f, "embedding"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Generation arguments shared by chat and completion calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionArgs {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl CompletionArgs {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }
}

/// Token accounting for one provider call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Pipeline step that spent the tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl TokenUsage {
    pub fn for_step(mut self, step: &str) -> Self {
        self.step = Some(step.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Chat-capable model
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], args: &CompletionArgs) -> ProviderResult<ChatResponse>;

    fn model_name(&self) -> &str;
}

/// Prompt-completion model
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, args: &CompletionArgs) -> ProviderResult<CompletionResponse>;

    fn model_name(&self) -> &str;
}

/// Embedding model
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    fn model_name(&self) -> &str;
}
