//! Staged execution status
//!
//! A run is an ordered list of weighted stages. [`StageTracker`] enforces
//! the legal transitions and pushes a full snapshot to a [`StatusSink`]
//! after every one of them.

mod sink;

pub use sink::{HttpStatusSink, StatusSink, TracingStatusSink};

use crate::errors::{AppError, Result};
use crate::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Message attached to stages skipped after an error
pub const SKIPPED_AFTER_ERROR: &str = "Skipped due to previous error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    NotStarted,
    InProgress,
    Done,
    Error,
    Skipped,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Done | StageState::Error | StageState::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageState::NotStarted => "NOT_STARTED",
            StageState::InProgress => "IN_PROGRESS",
            StageState::Done => "DONE",
            StageState::Error => "ERROR",
            StageState::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Share of overall progress, for display
    pub weight: u32,
    pub state: StageState,
    #[serde(default)]
    pub message: Option<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            state: StageState::NotStarted,
            message: None,
        }
    }
}

/// Snapshot delivered to the status callback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunStatus {
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<TokenUsage>>,
}

impl PipelineRunStatus {
    /// Every stage reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.stages.iter().all(|s| s.state.is_terminal())
    }

    /// Some stage ended in ERROR
    pub fn is_failed(&self) -> bool {
        self.stages.iter().any(|s| s.state == StageState::Error)
    }
}

/// Final output attached when the last stage completes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub result: String,
    pub suggestions: Vec<String>,
    pub tokens: Vec<TokenUsage>,
}

/// Drives a run's stages through their legal transitions
pub struct StageTracker {
    status: PipelineRunStatus,
    current: usize,
    sink: Arc<dyn StatusSink>,
}

impl StageTracker {
    pub fn new(stages: Vec<Stage>, sink: Arc<dyn StatusSink>) -> Result<Self> {
        if stages.is_empty() {
            return Err(AppError::Configuration {
                message: "A pipeline run needs at least one stage".to_string(),
            });
        }

        Ok(Self {
            status: PipelineRunStatus {
                stages,
                ..Default::default()
            },
            current: 0,
            sink,
        })
    }

    /// Current snapshot
    pub fn status(&self) -> &PipelineRunStatus {
        &self.status
    }

    pub fn into_status(self) -> PipelineRunStatus {
        self.status
    }

    /// The stage the pointer is on
    pub fn current_stage(&self) -> &Stage {
        &self.status.stages[self.current]
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Mark the current stage IN_PROGRESS, optionally updating its message
    pub async fn in_progress(&mut self, message: Option<&str>) -> Result<()> {
        self.check(
            "in_progress",
            matches!(self.current_stage().state, StageState::NotStarted | StageState::InProgress),
        )?;

        let stage = &mut self.status.stages[self.current];
        stage.state = StageState::InProgress;
        if let Some(message) = message {
            stage.message = Some(message.to_string());
        }
        self.emit().await;
        Ok(())
    }

    /// Complete the current stage and move to the next one.
    ///
    /// `output` is attached only when the completed stage is the last one.
    pub async fn done(&mut self, message: Option<&str>, output: Option<RunOutput>) -> Result<()> {
        self.check("done", self.current_stage().state == StageState::InProgress)?;

        let stage = &mut self.status.stages[self.current];
        stage.state = StageState::Done;
        if let Some(message) = message {
            stage.message = Some(message.to_string());
        }

        if self.is_last() {
            if let Some(output) = output {
                self.status.result = Some(output.result);
                self.status.suggestions = Some(output.suggestions);
                self.status.tokens = Some(output.tokens);
            }
        } else {
            if output.is_some() {
                debug!(stage = %self.current_stage().name, "Ignoring output on intermediate stage");
            }
            self.current += 1;
        }

        self.emit().await;
        Ok(())
    }

    /// Fail the current stage and skip everything after it
    pub async fn error(&mut self, message: &str) -> Result<()> {
        self.check("error", !self.current_stage().state.is_terminal())?;

        let stage = &mut self.status.stages[self.current];
        stage.state = StageState::Error;
        stage.message = Some(message.to_string());

        for stage in &mut self.status.stages[self.current + 1..] {
            if !stage.state.is_terminal() {
                stage.state = StageState::Skipped;
                stage.message = Some(SKIPPED_AFTER_ERROR.to_string());
            }
        }
        self.current = self.status.stages.len() - 1;

        warn!(reason = message, "Pipeline run failed");
        self.emit().await;
        Ok(())
    }

    /// Skip the current stage and move to the next one
    pub async fn skip(&mut self, message: Option<&str>) -> Result<()> {
        self.check(
            "skip",
            matches!(self.current_stage().state, StageState::NotStarted | StageState::InProgress),
        )?;

        let stage = &mut self.status.stages[self.current];
        stage.state = StageState::Skipped;
        if let Some(message) = message {
            stage.message = Some(message.to_string());
        }
        if !self.is_last() {
            self.current += 1;
        }

        self.emit().await;
        Ok(())
    }

    /// Abort the run
    pub async fn cancel(&mut self) -> Result<()> {
        self.error("cancelled").await
    }

    fn is_last(&self) -> bool {
        self.current + 1 == self.status.stages.len()
    }

    fn check(&self, action: &'static str, legal: bool) -> Result<()> {
        if legal {
            return Ok(());
        }
        let stage = self.current_stage();
        Err(AppError::InvalidTransition {
            stage: stage.name.clone(),
            state: stage.state.as_str().to_string(),
            action,
        })
    }

    async fn emit(&self) {
        let stage = self.current_stage();
        debug!(stage = %stage.name, state = stage.state.as_str(), "Stage transition");
        metrics::counter!(
            "tutorforge_stage_transitions_total",
            "state" => stage.state.as_str()
        )
        .increment(1);

        if let Err(e) = self.sink.send(&self.status).await {
            warn!(error = %e, "Failed to deliver status update");
            metrics::counter!("tutorforge_status_delivery_failures_total").increment(1);
        }
    }
}
