//! Model registry and capability-based selection
//!
//! The registry is built once at startup and shared read-only. A
//! [`ModelSelector`] binds a requirement set and a selection mode, then
//! hands out retrying handles for the interface the caller needs.

use super::capabilities::{CapabilitySet, RequirementSet};
use super::retry::{RetryPolicy, RetryingChat, RetryingCompletion, RetryingEmbedding};
use super::scorer::CapabilityScorer;
use super::{ChatModel, CompletionModel, EmbeddingModel, MockModel, ModelKind, OpenAiModel};
use crate::config::{AppConfig, ModelConfig};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Embedding width of the mock provider
const MOCK_EMBEDDING_DIMENSION: usize = 64;

/// A registered backing model and the interfaces it exposes
#[derive(Clone)]
pub struct ModelRegistration {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capabilities: CapabilitySet,
    chat: Option<Arc<dyn ChatModel>>,
    completion: Option<Arc<dyn CompletionModel>>,
    embedding: Option<Arc<dyn EmbeddingModel>>,
}

impl ModelRegistration {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            capabilities,
            chat: None,
            completion: None,
            embedding: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_chat(mut self, handle: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(handle);
        self
    }

    pub fn with_completion(mut self, handle: Arc<dyn CompletionModel>) -> Self {
        self.completion = Some(handle);
        self
    }

    pub fn with_embedding(mut self, handle: Arc<dyn EmbeddingModel>) -> Self {
        self.embedding = Some(handle);
        self
    }

    /// Whether this registration exposes the requested interface
    pub fn supports(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Chat => self.chat.is_some(),
            ModelKind::Completion => self.completion.is_some(),
            ModelKind::Embedding => self.embedding.is_some(),
        }
    }

    pub fn kinds(&self) -> Vec<ModelKind> {
        [ModelKind::Chat, ModelKind::Completion, ModelKind::Embedding]
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }

    /// Raw chat handle, without retries
    pub fn chat(&self) -> Option<&Arc<dyn ChatModel>> {
        self.chat.as_ref()
    }

    pub fn completion(&self) -> Option<&Arc<dyn CompletionModel>> {
        self.completion.as_ref()
    }

    pub fn embedding(&self) -> Option<&Arc<dyn EmbeddingModel>> {
        self.embedding.as_ref()
    }

    fn from_config(config: &ModelConfig) -> Result<Self> {
        let registration = ModelRegistration::new(&config.id, &config.name, config.capabilities.clone())
            .with_description(&config.description);
        let provider = &config.provider;

        match provider.kind.as_str() {
            "openai" => {
                let model = Arc::new(OpenAiModel::new(
                    provider.model.clone(),
                    provider.api_key.clone(),
                    provider.base_url.clone(),
                    Duration::from_secs(provider.timeout_secs),
                )?);
                Ok(registration.attach(model, &provider.kinds))
            }
            "mock" => {
                let model = Arc::new(MockModel::new(provider.model.clone(), MOCK_EMBEDDING_DIMENSION));
                Ok(registration.attach(model, &provider.kinds))
            }
            other => Err(AppError::Configuration {
                message: format!("Unknown provider type '{}' for model '{}'", other, config.id),
            }),
        }
    }

    fn attach<M>(mut self, model: Arc<M>, kinds: &[ModelKind]) -> Self
    where
        M: ChatModel + CompletionModel + EmbeddingModel + 'static,
    {
        for kind in kinds {
            match kind {
                ModelKind::Chat => self.chat = Some(model.clone()),
                ModelKind::Completion => self.completion = Some(model.clone()),
                ModelKind::Embedding => self.embedding = Some(model.clone()),
            }
        }
        self
    }
}

impl fmt::Debug for ModelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Registered models, read-only after construction
#[derive(Debug)]
pub struct ModelRegistry {
    models: Vec<ModelRegistration>,
    retry: RetryPolicy,
}

impl ModelRegistry {
    /// Create a registry; model ids must be unique
    pub fn new(models: Vec<ModelRegistration>, retry: RetryPolicy) -> Result<Self> {
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.id.as_str()) {
                return Err(AppError::Configuration {
                    message: format!("Duplicate model id '{}'", model.id),
                });
            }
        }

        Ok(Self { models, retry })
    }

    /// Build every configured model
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let models = config
            .models
            .iter()
            .map(ModelRegistration::from_config)
            .collect::<Result<Vec<_>>>()?;

        info!(count = models.len(), "Model registry initialized");
        Self::new(models, RetryPolicy::from_config(&config.retry))
    }

    pub fn get(&self, id: &str) -> Option<&ModelRegistration> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn models(&self) -> &[ModelRegistration] {
        &self.models
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Which end of the ranking to pick from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectionMode {
    /// Highest score
    #[default]
    Best,
    /// Lowest score with cost ranked cheapest-first
    Worst,
}

/// Picks a registered model for a requirement set
#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: Arc<ModelRegistry>,
    requirements: RequirementSet,
    mode: SelectionMode,
}

impl ModelSelector {
    pub fn new(registry: Arc<ModelRegistry>, requirements: RequirementSet, mode: SelectionMode) -> Self {
        Self {
            registry,
            requirements,
            mode,
        }
    }

    /// Candidates passing the hard filters, most preferred first.
    ///
    /// Scores are normalized across every registered model, so adding a
    /// model of another kind can shift scores but never admits or excludes
    /// a candidate.
    pub fn rank(&self, kind: ModelKind) -> Vec<(&ModelRegistration, f64)> {
        let models = self.registry.models();
        let capabilities: Vec<&CapabilitySet> = models.iter().map(|m| &m.capabilities).collect();

        let scorer = match self.mode {
            SelectionMode::Best => CapabilityScorer::new(),
            SelectionMode::Worst => CapabilityScorer::cheapest_first(),
        };
        let scores = scorer.score(&capabilities, &self.requirements);

        let mut ranked: Vec<(&ModelRegistration, f64)> = models
            .iter()
            .zip(scores)
            .filter(|(model, _)| model.supports(kind) && self.requirements.admits(&model.capabilities))
            .collect();

        // Stable sort keeps registration order among equal scores
        match self.mode {
            SelectionMode::Best => ranked.sort_by(|a, b| b.1.total_cmp(&a.1)),
            SelectionMode::Worst => ranked.sort_by(|a, b| a.1.total_cmp(&b.1)),
        }
        ranked
    }

    /// Pick exactly one registration for the requested interface
    pub fn select(&self, kind: ModelKind) -> Result<&ModelRegistration> {
        let ranked = self.rank(kind);
        let (model, score) = ranked.first().copied().ok_or_else(|| AppError::Configuration {
            message: format!(
                "No registered {} model satisfies the requirements {:?}",
                kind, self.requirements
            ),
        })?;

        debug!(candidates = ranked.len(), "Ranked candidate models");
        info!(
            model_id = %model.id,
            kind = %kind,
            mode = ?self.mode,
            score,
            "Selected model"
        );
        metrics::counter!(
            "tutorforge_model_selections_total",
            "model" => model.id.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);

        Ok(model)
    }

    /// Retrying chat handle of the selected model
    pub fn chat(&self) -> Result<Arc<dyn ChatModel>> {
        let model = self.select(ModelKind::Chat)?;
        let handle = model.chat().cloned().ok_or_else(|| missing(model, ModelKind::Chat))?;
        Ok(Arc::new(RetryingChat::new(handle, self.registry.retry_policy().clone())))
    }

    /// Retrying completion handle of the selected model
    pub fn completion(&self) -> Result<Arc<dyn CompletionModel>> {
        let model = self.select(ModelKind::Completion)?;
        let handle = model
            .completion()
            .cloned()
            .ok_or_else(|| missing(model, ModelKind::Completion))?;
        Ok(Arc::new(RetryingCompletion::new(handle, self.registry.retry_policy().clone())))
    }

    /// Retrying embedding handle of the selected model
    pub fn embedding(&self) -> Result<Arc<dyn EmbeddingModel>> {
        let model = self.select(ModelKind::Embedding)?;
        let handle = model
            .embedding()
            .cloned()
            .ok_or_else(|| missing(model, ModelKind::Embedding))?;
        Ok(Arc::new(RetryingEmbedding::new(handle, self.registry.retry_policy().clone())))
    }
}

fn missing(model: &ModelRegistration, kind: ModelKind) -> AppError {
    AppError::Internal {
        message: format!("Model '{}' was selected for {} but has no handle", model.id, kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::llm::capabilities::{Flag, InverseOrdered, Ordered};

    fn chat_model(id: &str, capabilities: CapabilitySet) -> ModelRegistration {
        ModelRegistration::new(id, id, capabilities).with_chat(Arc::new(MockModel::new(id, 4)))
    }

    fn tiered(quality: f64, context: f64) -> CapabilitySet {
        CapabilitySet {
            quality_tier: Ordered(quality),
            context_length: Ordered(context),
            input_cost: InverseOrdered(5.0),
            output_cost: InverseOrdered(15.0),
            ..Default::default()
        }
    }

    fn registry(models: Vec<ModelRegistration>) -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(models, RetryPolicy::default()).unwrap())
    }

    #[test]
    fn test_best_mode_selects_strongest_model() {
        let registry = registry(vec![
            chat_model("gpt-35", tiered(3.5, 8000.0)),
            chat_model("gpt-4", tiered(4.0, 16000.0)),
            chat_model("gpt-45", tiered(4.5, 32000.0)),
        ]);
        let requirements = RequirementSet {
            quality_tier: Some(4.5),
            context_length: Some(16000.0),
            ..Default::default()
        };

        let selector = ModelSelector::new(registry, requirements, SelectionMode::Best);
        let selected = selector.select(ModelKind::Chat).unwrap();
        assert_eq!(selected.id, "gpt-45");
        assert_eq!(selected.capabilities.context_length, Ordered(32000.0));
    }

    #[test]
    fn test_worst_mode_prefers_cheap_model() {
        let cheap = CapabilitySet {
            input_cost: InverseOrdered(0.1),
            output_cost: InverseOrdered(0.2),
            quality_tier: Ordered(3.5),
            ..Default::default()
        };
        let pricey = CapabilitySet {
            input_cost: InverseOrdered(10.0),
            output_cost: InverseOrdered(30.0),
            quality_tier: Ordered(4.5),
            ..Default::default()
        };
        let registry = registry(vec![chat_model("pricey", pricey), chat_model("cheap", cheap)]);

        let selector = ModelSelector::new(registry, RequirementSet::default(), SelectionMode::Worst);
        assert_eq!(selector.select(ModelKind::Chat).unwrap().id, "cheap");
    }

    #[test]
    fn test_worst_mode_never_violates_hard_filters() {
        // The lowest scorer lacks structured output and must be passed over
        let weakest = CapabilitySet {
            input_cost: InverseOrdered(0.01),
            output_cost: InverseOrdered(0.01),
            ..Default::default()
        };
        let structured = CapabilitySet {
            input_cost: InverseOrdered(1.0),
            output_cost: InverseOrdered(2.0),
            structured_output: Flag(true),
            ..Default::default()
        };
        let strongest = CapabilitySet {
            input_cost: InverseOrdered(10.0),
            output_cost: InverseOrdered(20.0),
            structured_output: Flag(true),
            ..Default::default()
        };
        let registry = registry(vec![
            chat_model("weakest", weakest),
            chat_model("structured", structured),
            chat_model("strongest", strongest),
        ]);
        let requirements = RequirementSet {
            structured_output: Some(true),
            ..Default::default()
        };

        let selector = ModelSelector::new(registry, requirements, SelectionMode::Worst);
        let ranked = selector.rank(ModelKind::Chat);
        assert!(ranked.iter().all(|(m, _)| m.capabilities.structured_output.0));
        assert_eq!(selector.select(ModelKind::Chat).unwrap().id, "structured");
    }

    #[test]
    fn test_kind_filter_excludes_models_without_handle() {
        let embedder = ModelRegistration::new("embedder", "embedder", tiered(5.0, 100000.0))
            .with_embedding(Arc::new(MockModel::new("embedder", 4)));
        let registry = registry(vec![embedder, chat_model("chat", tiered(3.5, 4000.0))]);

        let selector = ModelSelector::new(registry, RequirementSet::default(), SelectionMode::Best);
        assert_eq!(selector.select(ModelKind::Chat).unwrap().id, "chat");
        assert_eq!(selector.select(ModelKind::Embedding).unwrap().id, "embedder");
    }

    #[test]
    fn test_no_candidate_is_configuration_error() {
        let registry = registry(vec![chat_model("chat", tiered(4.0, 8000.0))]);
        let selector = ModelSelector::new(registry, RequirementSet::default(), SelectionMode::Best);

        let err = selector.embedding().err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ModelRegistry::new(
            vec![chat_model("a", tiered(4.0, 1.0)), chat_model("a", tiered(4.0, 1.0))],
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = AppConfig::default();
        config.models.push(ModelConfig {
            id: "local".to_string(),
            name: "Local mock".to_string(),
            description: "Development model".to_string(),
            provider: ProviderConfig {
                kind: "mock".to_string(),
                base_url: None,
                api_key: None,
                model: "mock-1".to_string(),
                kinds: vec![ModelKind::Chat, ModelKind::Embedding],
                timeout_secs: 5,
            },
            capabilities: tiered(3.5, 4096.0),
        });

        let registry = ModelRegistry::from_config(&config).unwrap();
        let model = registry.get("local").unwrap();
        assert_eq!(model.kinds(), vec![ModelKind::Chat, ModelKind::Embedding]);
        assert!(registry.get("missing").is_none());

        config.models[0].provider.kind = "unknown".to_string();
        assert!(ModelRegistry::from_config(&config).is_err());
    }
}
