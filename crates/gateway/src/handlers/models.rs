//! Model listing handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use tutorforge_common::llm::{CapabilitySet, ModelKind};

/// Registered model as exposed over the API
#[derive(Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kinds: Vec<ModelKind>,
    pub capabilities: CapabilitySet,
}

/// List registered models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSummary>> {
    let models = state
        .registry
        .models()
        .iter()
        .map(|model| ModelSummary {
            id: model.id.clone(),
            name: model.name.clone(),
            description: model.description.clone(),
            kinds: model.kinds(),
            capabilities: model.capabilities.clone(),
        })
        .collect();

    Json(models)
}
