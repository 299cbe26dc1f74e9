//! Mock provider for local development
//!
//! Deterministic: the same input always produces the same reply and the
//! same embedding, so retrieval against a seeded store stays stable.

use super::{
    ChatMessage, ChatModel, ChatResponse, CompletionArgs, CompletionModel, CompletionResponse,
    EmbeddingModel, ProviderResult, ResponseFormat, Role, TokenUsage,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Mock model exposing chat, completion and embedding
pub struct MockModel {
    name: String,
    dimension: usize,
}

impl MockModel {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }

    fn reply(&self, input: &str, format: ResponseFormat) -> String {
        match format {
            ResponseFormat::Json => r#"{"suggestions":[]}"#.to_string(),
            ResponseFormat::Text => format!("Mock response to: {}", input.trim()),
        }
    }

    fn usage(&self, input: &str, output: &str) -> TokenUsage {
        // Rough 4-chars-per-token estimate
        TokenUsage {
            model: self.name.clone(),
            prompt_tokens: (input.len() / 4) as u32,
            completion_tokens: (output.len() / 4) as u32,
            step: None,
        }
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn chat(&self, messages: &[ChatMessage], args: &CompletionArgs) -> ProviderResult<ChatResponse> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = self.reply(last_user, args.response_format);
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();

        Ok(ChatResponse {
            usage: self.usage(&prompt, &content),
            message: ChatMessage::assistant(content),
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CompletionModel for MockModel {
    async fn complete(&self, prompt: &str, args: &CompletionArgs) -> ProviderResult<CompletionResponse> {
        let text = self.reply(prompt, args.response_format);
        Ok(CompletionResponse {
            usage: self.usage(prompt, &text),
            text,
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl EmbeddingModel for MockModel {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        // xorshift keeps the vector reproducible per input
        let vector = (0..self.dimension)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 2000) as f32 / 1000.0 - 1.0
            })
            .collect();
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
