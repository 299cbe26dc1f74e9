//! TutorForge Common Library
//!
//! Shared code for the TutorForge services including:
//! - Capability-based language model selection
//! - Hybrid retrieval of lecture content
//! - Staged execution status tracking
//! - The tutor chat pipeline
//! - Error types, configuration and metrics

pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod status;
pub mod workers;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::{ModelRegistry, ModelSelector, SelectionMode};
pub use pipeline::{PipelineRequest, TutorChatPipeline};
pub use status::{PipelineRunStatus, StageTracker, StatusSink};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process doubles and throwaway HTTP servers

    use crate::errors::{AppError, Result};
    use crate::llm::{ChatMessage, ChatModel, ChatResponse, CompletionArgs, ProviderResult, TokenUsage};
    use crate::retrieval::{HybridQuery, SearchHit, VectorStore};
    use crate::status::{PipelineRunStatus, StatusSink};
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serve `app` on an ephemeral port and return its base URL
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    type ChatScript = Box<dyn Fn(&[ChatMessage]) -> ProviderResult<String> + Send + Sync>;

    /// Chat model answering from a closure
    pub struct ScriptedChat {
        script: ChatScript,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedChat {
        pub fn new(script: impl Fn(&[ChatMessage]) -> ProviderResult<String> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, messages: &[ChatMessage], _args: &CompletionArgs) -> ProviderResult<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let content = (self.script)(messages)?;
            Ok(ChatResponse {
                message: ChatMessage::assistant(content),
                usage: TokenUsage {
                    model: "scripted".to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    step: None,
                },
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    type StoreScript = Box<dyn Fn(&HybridQuery) -> Result<Vec<SearchHit>> + Send + Sync>;

    /// Vector store answering from a closure and recording every query
    pub struct ScriptedStore {
        script: StoreScript,
        delay: Option<Duration>,
        queries: Mutex<Vec<HybridQuery>>,
    }

    impl ScriptedStore {
        pub fn new(script: impl Fn(&HybridQuery) -> Result<Vec<SearchHit>> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                delay: None,
                queries: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn queries(&self) -> Vec<HybridQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl VectorStore for ScriptedStore {
        async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<SearchHit>> {
            self.queries.lock().unwrap().push(query.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.script)(query)
        }
    }

    /// Status sink keeping every snapshot it was sent
    #[derive(Default)]
    pub struct RecordingSink {
        snapshots: Mutex<Vec<PipelineRunStatus>>,
        fail: bool,
        finish_delay: Option<Duration>,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        /// Hold back terminal snapshots, as a slow callback endpoint would
        pub fn with_finish_delay(mut self, delay: Duration) -> Self {
            self.finish_delay = Some(delay);
            self
        }

        pub fn count(&self) -> usize {
            self.snapshots.lock().unwrap().len()
        }

        pub fn last(&self) -> Option<PipelineRunStatus> {
            self.snapshots.lock().unwrap().last().cloned()
        }
    }

    #[async_trait::async_trait]
    impl StatusSink for RecordingSink {
        async fn send(&self, status: &PipelineRunStatus) -> Result<()> {
            if let Some(delay) = self.finish_delay.filter(|_| status.is_finished()) {
                tokio::time::sleep(delay).await;
            }
            self.snapshots.lock().unwrap().push(status.clone());
            if self.fail {
                return Err(AppError::StatusDelivery {
                    message: "callback unreachable".to_string(),
                });
            }
            Ok(())
        }
    }
}
