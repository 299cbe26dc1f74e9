//! OpenAI-compatible provider adapter
//!
//! Speaks the `/chat/completions`, `/completions` and `/embeddings`
//! endpoints, which are also served by Azure OpenAI, vLLM, Ollama and most
//! self-hosted gateways.

use super::{
    ChatMessage, ChatModel, ChatResponse, CompletionArgs, CompletionModel, CompletionResponse,
    EmbeddingModel, ProviderResult, ResponseFormat, Role, TokenUsage,
};
use crate::errors::{AppError, ProviderError, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible model client
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    options: GenerationOptions<'a>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(flatten)]
    options: GenerationOptions<'a>,
}

#[derive(Serialize)]
struct GenerationOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatBody>,
}

#[derive(Serialize)]
struct ResponseFormatBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

impl<'a> From<&'a CompletionArgs> for GenerationOptions<'a> {
    fn from(args: &'a CompletionArgs) -> Self {
        Self {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            stop: &args.stop,
            response_format: match args.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::Json => Some(ResponseFormatBody { kind: "json_object" }),
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TextCompletion {
    choices: Vec<TextChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct TextChoice {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiModel {
    /// Create a new client for one provider-side model
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> ProviderResult<R> {
        let url = format!("{}/{}", self.base_url, path);
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(model = %self.model, status = status.as_u16(), "Provider returned error status");
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout { timeout_ms }
            } else {
                ProviderError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                }
            }
        })
    }

    fn usage(&self, usage: Option<Usage>) -> TokenUsage {
        let usage = usage.unwrap_or_default();
        TokenUsage {
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            step: None,
        }
    }
}

fn check_finish_reason(reason: Option<&str>) -> ProviderResult<()> {
    match reason {
        Some("content_filter") => Err(ProviderError::ContentPolicy {
            message: "Response withheld by provider content filter".to_string(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn chat(&self, messages: &[ChatMessage], args: &CompletionArgs) -> ProviderResult<ChatResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            options: args.into(),
        };

        let completion: ChatCompletion = self.post("chat/completions", &request).await?;
        let usage = self.usage(completion.usage);

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse {
                message: "Empty choices in chat response".to_string(),
            }
        })?;
        check_finish_reason(choice.finish_reason.as_deref())?;

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
            },
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionModel for OpenAiModel {
    async fn complete(&self, prompt: &str, args: &CompletionArgs) -> ProviderResult<CompletionResponse> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            options: args.into(),
        };

        let completion: TextCompletion = self.post("completions", &request).await?;
        let usage = self.usage(completion.usage);

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse {
                message: "Empty choices in completion response".to_string(),
            }
        })?;
        check_finish_reason(choice.finish_reason.as_deref())?;

        Ok(CompletionResponse {
            text: choice.text,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiModel {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let request = EmbeddingRequest {
            input: [text],
            model: &self.model,
        };

        let response: EmbeddingResponse = self.post("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse {
                message: "Empty embedding response".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{extract::State, http::{HeaderMap, StatusCode}, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn client(base_url: String) -> OpenAiModel {
        OpenAiModel::new(
            "gpt-test".to_string(),
            Some("sk-test".to_string()),
            Some(base_url),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_parses_message_and_usage() {
        let app = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "gpt-test");
                assert_eq!(body["messages"][0]["role"], "user");
                assert_eq!(body["response_format"]["type"], "json_object");
                assert!(body.get("stop").is_none());
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "{}"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 3}
                }))
            }),
        );
        let model = client(serve(app).await);

        let response = model
            .chat(&[ChatMessage::user("hi")], &CompletionArgs::default().json())
            .await
            .unwrap();

        assert_eq!(response.message.content, "{}");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.completion_tokens, 3);
        assert_eq!(response.usage.model, "gpt-test");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let model = client(serve(app).await);

        let err = model
            .chat(&[ChatMessage::user("hi")], &CompletionArgs::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::RateLimited);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_content_filter_finish_reason_is_policy_rejection() {
        let app = Router::new().route(
            "/completions",
            post(|| async {
                Json(json!({"choices": [{"text": "", "finish_reason": "content_filter"}]}))
            }),
        );
        let model = client(serve(app).await);

        let err = model.complete("prompt", &CompletionArgs::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ContentPolicy { .. }));
    }

    #[tokio::test]
    async fn test_retrying_handle_recovers_from_server_errors() {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/embeddings",
                post(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::BAD_GATEWAY, Json(json!({"error": "upstream"})))
                    } else {
                        (StatusCode::OK, Json(json!({"data": [{"embedding": [0.5, 0.25]}]})))
                    }
                }),
            )
            .with_state(hits.clone());
        let model: Arc<dyn EmbeddingModel> = Arc::new(client(serve(app).await));
        let retrying = crate::llm::retry::RetryingEmbedding::new(
            model,
            crate::llm::RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
        );

        let vector = retrying.embed("lecture").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
