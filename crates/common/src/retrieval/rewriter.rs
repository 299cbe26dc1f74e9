//! Conversation-aware query rewriting
//!
//! Produces two search strings per student message: a direct rewrite
//! and a hypothetical lecture passage (HyDE). Both calls run concurrently.

use super::ExerciseContext;
use crate::errors::{AppError, Result};
use crate::llm::{ChatMessage, ChatModel, CompletionArgs, TokenUsage};
use crate::prompts;
use crate::workers::WorkerPool;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Search strings derived from the student's message
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQueries {
    pub direct: String,
    pub hyde: String,
    pub usage: Vec<TokenUsage>,
}

/// Query rewriter backed by a chat model
pub struct QueryRewriter {
    chat: Arc<dyn ChatModel>,
    history_turns: usize,
    content_language: String,
}

impl QueryRewriter {
    pub fn new(chat: Arc<dyn ChatModel>, history_turns: usize, content_language: impl Into<String>) -> Self {
        Self {
            chat,
            history_turns,
            content_language: content_language.into(),
        }
    }

    /// Rewrite the latest message using the tail of the conversation.
    ///
    /// Provider failures are reported as retrieval errors so the caller can
    /// continue without lecture content.
    #[instrument(skip_all, fields(model = %self.chat.model_name()))]
    pub async fn rewrite(
        &self,
        history: &[ChatMessage],
        latest: &str,
        exercise: Option<&ExerciseContext>,
        workers: &WorkerPool,
    ) -> Result<RewrittenQueries> {
        let recent = &history[history.len().saturating_sub(self.history_turns)..];
        let user = prompts::rewrite_user(recent, latest);

        let variants = [
            ("query_rewriting_direct", prompts::REWRITE_DIRECT_SYSTEM),
            ("query_rewriting_hyde", prompts::REWRITE_HYDE_SYSTEM),
        ];
        let tasks = variants.into_iter().map(|(step, system)| {
            let chat = self.chat.clone();
            let messages = vec![
                prompts::rewrite_system(system, &self.content_language, exercise),
                user.clone(),
            ];
            async move {
                let response = chat.chat(&messages, &CompletionArgs::with_temperature(0.0)).await?;
                Ok::<_, AppError>((response.message.content.trim().to_string(), response.usage.for_step(step)))
            }
        });

        let mut outputs = workers.run_all(tasks).await?.into_iter();
        let mut next = || -> Result<(String, TokenUsage)> {
            match outputs.next() {
                Some(Ok(output)) => Ok(output),
                Some(Err(AppError::Provider(e))) => Err(AppError::Retrieval {
                    message: format!("Query rewriting failed: {}", e),
                }),
                Some(Err(e)) => Err(e),
                None => Err(AppError::Internal {
                    message: "Query rewriting produced no output".to_string(),
                }),
            }
        };
        let (direct, direct_usage) = next()?;
        let (hyde, hyde_usage) = next()?;

        debug!(direct = %direct, hyde_len = hyde.len(), "Rewrote query");
        Ok(RewrittenQueries {
            direct,
            hyde,
            usage: vec![direct_usage, hyde_usage],
        })
    }
}
