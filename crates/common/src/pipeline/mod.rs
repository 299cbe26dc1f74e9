//! Tutor chat pipeline
//!
//! One run answers one student message:
//! 1. Preparing: pick the chat and embedding models
//! 2. Retrieving: rewrite, hybrid search and rerank lecture content
//! 3. Generating: answer grounded on the retrieved content
//! 4. Suggesting: follow-up questions from a cheap structured-output model
//!
//! Retrieval problems degrade the answer instead of failing the run.

use crate::config::{AppConfig, PipelineConfig, RerankConfig, RetrievalConfig};
use crate::errors::{AppError, Result};
use crate::llm::{
    ChatMessage, ChatModel, CompletionArgs, EmbeddingModel, ModelRegistry, ModelSelector, RequirementSet,
    SelectionMode, TokenUsage,
};
use crate::prompts;
use crate::retrieval::{
    ExerciseContext, HybridRetriever, QueryRewriter, RerankModel, Reranker, SearchFilters, VectorStore,
};
use crate::status::{PipelineRunStatus, RunOutput, Stage, StageTracker, StatusSink};
use crate::workers::WorkerPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Input of one tutor chat run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Latest student message
    pub message: String,

    /// Earlier turns, oldest first
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    /// Course scope for retrieval
    #[serde(default)]
    pub scope: SearchFilters,

    #[serde(default)]
    pub exercise: Option<ExerciseContext>,

    /// Requirements for the answering model
    #[serde(default)]
    pub requirements: RequirementSet,
}

#[derive(Deserialize)]
struct SuggestionList {
    suggestions: Vec<String>,
}

/// Tutor chat pipeline, shared by all runs
pub struct TutorChatPipeline {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn VectorStore>,
    rerank_model: Arc<dyn RerankModel>,
    retrieval: RetrievalConfig,
    rerank: RerankConfig,
    settings: PipelineConfig,
}

impl TutorChatPipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn VectorStore>,
        rerank_model: Arc<dyn RerankModel>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            store,
            rerank_model,
            retrieval: config.retrieval.clone(),
            rerank: config.rerank.clone(),
            settings: config.pipeline.clone(),
        }
    }

    /// Stage layout of a run
    pub fn stages() -> Vec<Stage> {
        vec![
            Stage::new("Preparing", 10),
            Stage::new("Retrieving lecture content", 40),
            Stage::new("Generating response", 40),
            Stage::new("Generating suggestions", 10),
        ]
    }

    /// Execute a run to a terminal snapshot.
    ///
    /// Failures are reported through the stages, not the return value.
    /// Cancellation interrupts model and store calls; a snapshot already
    /// being delivered always completes.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        request: PipelineRequest,
        sink: Arc<dyn StatusSink>,
        cancel: CancellationToken,
    ) -> Result<PipelineRunStatus> {
        let start = Instant::now();
        let mut tracker = StageTracker::new(Self::stages(), sink)?;
        let workers = WorkerPool::new(self.settings.max_workers, cancel.child_token());

        let outcome = self.execute(&request, &mut tracker, &workers).await;

        let label = match outcome {
            Ok(()) => "completed",
            Err(e) => {
                let label = match e {
                    AppError::Cancelled => "cancelled",
                    _ => "failed",
                };
                let transition = match e {
                    AppError::Cancelled => tracker.cancel().await,
                    e => tracker.error(&e.to_string()).await,
                };
                if let Err(e) = transition {
                    warn!(error = %e, "Run already terminal");
                }
                label
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        info!(outcome = label, elapsed_ms = elapsed * 1000.0, "Pipeline run finished");
        metrics::counter!("tutorforge_pipeline_runs_total", "outcome" => label).increment(1);
        metrics::histogram!("tutorforge_pipeline_duration_seconds").record(elapsed);

        Ok(tracker.into_status())
    }

    async fn execute(&self, request: &PipelineRequest, tracker: &mut StageTracker, workers: &WorkerPool) -> Result<()> {
        let mut tokens = Vec::new();

        if workers.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        tracker.in_progress(Some("Selecting models")).await?;
        let chat = ModelSelector::new(self.registry.clone(), request.requirements.clone(), SelectionMode::Best).chat()?;
        let embedder =
            ModelSelector::new(self.registry.clone(), RequirementSet::default(), SelectionMode::Best).embedding()?;
        tracker.done(None, None).await?;

        tracker.in_progress(None).await?;
        let retrieved = workers
            .until_cancelled(self.retrieve(request, chat.clone(), embedder, workers, &mut tokens))
            .await;
        let context = match retrieved {
            Ok(context) => {
                let message = format!("Found {} relevant passages", context.len());
                tracker.done(Some(&message), None).await?;
                context
            }
            Err(e) if e.is_skippable() => {
                warn!(error = %e, "Continuing without lecture content");
                tracker.skip(Some("Lecture content unavailable")).await?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracker.in_progress(None).await?;
        let mut messages = vec![prompts::tutor_system(&context, request.exercise.as_ref())];
        messages.extend(request.history.iter().cloned());
        messages.push(ChatMessage::user(request.message.as_str()));
        let response = workers
            .until_cancelled(async { chat.chat(&messages, &CompletionArgs::default()).await.map_err(AppError::from) })
            .await?;
        tokens.push(response.usage.for_step("response"));
        let answer = response.message.content;
        tracker.done(None, None).await?;

        tracker.in_progress(None).await?;
        let suggestions = match workers.until_cancelled(self.suggest(&request.message, &answer)).await {
            Ok((suggestions, usage)) => {
                tokens.push(usage);
                suggestions
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Generating suggestions failed");
                Vec::new()
            }
        };
        tracker
            .done(
                None,
                Some(RunOutput {
                    result: answer,
                    suggestions,
                    tokens,
                }),
            )
            .await
    }

    async fn retrieve(
        &self,
        request: &PipelineRequest,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        workers: &WorkerPool,
        tokens: &mut Vec<TokenUsage>,
    ) -> Result<Vec<String>> {
        let rewriter = QueryRewriter::new(chat, self.settings.history_turns, self.settings.content_language.as_str());
        let queries = rewriter
            .rewrite(&request.history, &request.message, request.exercise.as_ref(), workers)
            .await?;
        tokens.extend(queries.usage.iter().cloned());

        let retriever = HybridRetriever::new(self.store.clone(), embedder, &self.retrieval);
        let pools = retriever.retrieve(&queries, &request.scope, workers).await?;

        let reranker = Arc::new(Reranker::new(self.rerank_model.clone(), &self.rerank));
        let reranked = workers
            .run_all(pools.iter().map(|pool| {
                let reranker = reranker.clone();
                let query = request.message.clone();
                let texts = pool.texts();
                async move { reranker.rerank(&query, texts).await }
            }))
            .await?;

        let mut context = Vec::new();
        for (pool, texts) in pools.iter().zip(reranked) {
            match texts {
                Ok(texts) => context.extend(texts),
                Err(e) => warn!(pool = %pool.pool.name, error = %e, "Reranking failed, dropping pool"),
            }
        }
        Ok(context)
    }

    async fn suggest(&self, question: &str, answer: &str) -> Result<(Vec<String>, TokenUsage)> {
        let requirements = RequirementSet {
            structured_output: Some(true),
            ..Default::default()
        };
        let chat = ModelSelector::new(self.registry.clone(), requirements, SelectionMode::Worst).chat()?;

        let count = self.settings.suggestion_count;
        let response = chat
            .chat(&prompts::suggestions(question, answer, count), &CompletionArgs::default().json())
            .await?;
        let parsed: SuggestionList = serde_json::from_str(&response.message.content)?;

        Ok((
            parsed.suggestions.into_iter().take(count).collect(),
            response.usage.for_step("suggestions"),
        ))
    }
}
