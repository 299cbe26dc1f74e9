//! Pipeline run handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use tutorforge_common::{
    errors::{AppError, Result},
    llm::{ChatMessage, RequirementSet},
    retrieval::{ExerciseContext, SearchFilters},
    status::{HttpStatusSink, StatusSink, TracingStatusSink},
    PipelineRequest,
};

/// Tutor chat run request
#[derive(Debug, Deserialize, Validate)]
pub struct RunTutorChatRequest {
    #[validate(length(min = 1, max = 8000))]
    pub message: String,

    #[serde(default)]
    pub history: Vec<ChatMessage>,

    #[serde(default)]
    pub scope: SearchFilters,

    #[serde(default)]
    pub exercise: Option<ExerciseContext>,

    #[serde(default)]
    pub requirements: RequirementSet,

    /// Where status snapshots are posted
    #[validate(nested)]
    pub callback: Option<CallbackSettings>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CallbackSettings {
    #[validate(url)]
    pub url: String,

    /// Bearer token sent with every callback
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
}

#[derive(Serialize)]
pub struct RunCancelled {
    pub run_id: Uuid,
    pub cancelled: bool,
}

/// Start a tutor chat run in the background
pub async fn run_tutor_chat(
    State(state): State<AppState>,
    Json(request): Json<RunTutorChatRequest>,
) -> Result<(StatusCode, Json<RunAccepted>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let sink: Arc<dyn StatusSink> = match &request.callback {
        Some(callback) => Arc::new(HttpStatusSink::new(
            callback.url.clone(),
            callback.token.clone(),
            Duration::from_secs(state.config.pipeline.callback_timeout_secs),
        )?),
        None => Arc::new(TracingStatusSink),
    };

    let run_id = Uuid::new_v4();
    let cancel = state.shutdown.child_token();
    state.runs.write().await.insert(run_id, cancel.clone());

    let pipeline_request = PipelineRequest {
        message: request.message,
        history: request.history,
        scope: request.scope,
        exercise: request.exercise,
        requirements: request.requirements,
    };

    let pipeline = state.pipeline.clone();
    let runs = state.runs.clone();
    let span = tracing::info_span!("pipeline_run", %run_id);
    state.tasks.spawn(
        async move {
            match pipeline.run(pipeline_request, sink, cancel).await {
                Ok(status) => info!(failed = status.is_failed(), "Run finished"),
                Err(e) => warn!(error = %e, "Run could not start"),
            }
            runs.write().await.remove(&run_id);
        }
        .instrument(span),
    );

    info!(%run_id, "Accepted tutor chat run");
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

/// Cancel an in-flight run
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunCancelled>)> {
    let token = state
        .runs
        .read()
        .await
        .get(&run_id)
        .cloned()
        .ok_or_else(|| AppError::RunNotFound {
            id: run_id.to_string(),
        })?;

    token.cancel();
    info!(%run_id, "Cancelled run");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunCancelled {
            run_id,
            cancelled: true,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url_is_validated() {
        let request: RunTutorChatRequest = serde_json::from_str(
            r#"{"message": "hi", "callback": {"url": "not a url", "token": "t"}}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request: RunTutorChatRequest = serde_json::from_str(
            r#"{"message": "hi", "callback": {"url": "https://lms.example.org/status/1", "token": "t"}}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_defaults() {
        let request: RunTutorChatRequest = serde_json::from_str(
            r#"{"message": "hi", "scope": {"course_id": 4}, "requirements": {"quality_tier": 4.0}}"#,
        )
        .unwrap();
        assert!(request.history.is_empty());
        assert_eq!(request.scope.course_id, Some(4));
        assert_eq!(request.requirements.quality_tier, Some(4.0));
        assert!(request.callback.is_none());
    }
}
