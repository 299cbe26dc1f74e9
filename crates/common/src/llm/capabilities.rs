//! Capability and requirement declarations
//!
//! A registered model declares a [`CapabilitySet`]; a request declares a
//! [`RequirementSet`]. Each capability type knows how well it matches a
//! target value, and the scorer turns those raw matches into a ranking.

use serde::{Deserialize, Serialize};

/// A declared model property that can be compared against a target
pub trait Capability {
    type Target: ?Sized;

    /// Non-negative match score against the requested target
    fn matches(&self, target: &Self::Target) -> f64;
}

/// Higher is better; scores how far the value exceeds the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordered(pub f64);

/// Lower is better; scores how far the value stays below the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InverseOrdered(pub f64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flag(pub bool);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Text(pub String);

impl Capability for Ordered {
    type Target = f64;

    fn matches(&self, target: &f64) -> f64 {
        (self.0 - target + 1.0).max(0.0)
    }
}

impl Capability for InverseOrdered {
    type Target = f64;

    fn matches(&self, target: &f64) -> f64 {
        (target - self.0 + 1.0).max(0.0)
    }
}

impl Capability for Flag {
    type Target = bool;

    fn matches(&self, target: &bool) -> f64 {
        if self.0 == *target { 1.0 } else { 0.0 }
    }
}

impl Capability for Text {
    type Target = str;

    fn matches(&self, target: &str) -> f64 {
        if self.0 == target { 1.0 } else { 0.0 }
    }
}

/// Named capability fields shared by capability and requirement sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityField {
    InputCost,
    OutputCost,
    QualityTier,
    Speed,
    ContextLength,
    Vendor,
    PrivacyCompliance,
    SelfHosted,
    ImageRecognition,
    StructuredOutput,
}

impl CapabilityField {
    pub const ALL: [CapabilityField; 10] = [
        CapabilityField::InputCost,
        CapabilityField::OutputCost,
        CapabilityField::QualityTier,
        CapabilityField::Speed,
        CapabilityField::ContextLength,
        CapabilityField::Vendor,
        CapabilityField::PrivacyCompliance,
        CapabilityField::SelfHosted,
        CapabilityField::ImageRecognition,
        CapabilityField::StructuredOutput,
    ];

    /// Importance weight applied after rank normalization
    pub fn weight(self) -> f64 {
        match self {
            CapabilityField::InputCost | CapabilityField::OutputCost => 0.5,
            CapabilityField::QualityTier => 4.0,
            CapabilityField::Speed => 2.0,
            CapabilityField::ContextLength => 0.1,
            CapabilityField::Vendor => 1.0,
            // Boolean fields act as hard filters, not ranking signals
            CapabilityField::PrivacyCompliance
            | CapabilityField::SelfHosted
            | CapabilityField::ImageRecognition
            | CapabilityField::StructuredOutput => 0.0,
        }
    }

    /// Fields that are inverted when ranking cheapest-first
    pub fn is_cost(self) -> bool {
        matches!(self, CapabilityField::InputCost | CapabilityField::OutputCost)
    }

    /// Target applied even when the requirement leaves the field unset
    pub fn default_target(self) -> Option<Target> {
        match self {
            CapabilityField::InputCost => Some(Target::Number(3000.0)),
            CapabilityField::OutputCost => Some(Target::Number(5000.0)),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityField::InputCost => "input_cost",
            CapabilityField::OutputCost => "output_cost",
            CapabilityField::QualityTier => "quality_tier",
            CapabilityField::Speed => "speed",
            CapabilityField::ContextLength => "context_length",
            CapabilityField::Vendor => "vendor",
            CapabilityField::PrivacyCompliance => "privacy_compliance",
            CapabilityField::SelfHosted => "self_hosted",
            CapabilityField::ImageRecognition => "image_recognition",
            CapabilityField::StructuredOutput => "structured_output",
        }
    }
}

/// Requested value for one capability field
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Number(f64),
    Flag(bool),
    Text(String),
}

/// Declared profile of one backing model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySet {
    pub input_cost: InverseOrdered,
    pub output_cost: InverseOrdered,
    /// GPT-version-equivalent quality tier, e.g. 3.5, 4.0, 4.5
    pub quality_tier: Ordered,
    pub speed: Ordered,
    pub context_length: Ordered,
    pub vendor: Text,
    pub privacy_compliance: Flag,
    pub self_hosted: Flag,
    pub image_recognition: Flag,
    pub structured_output: Flag,
}

impl CapabilitySet {
    /// Raw match of one field against a target.
    ///
    /// A target of the wrong shape for the field scores 0.
    pub fn matches(&self, field: CapabilityField, target: &Target) -> f64 {
        match (field, target) {
            (CapabilityField::InputCost, Target::Number(n)) => self.input_cost.matches(n),
            (CapabilityField::OutputCost, Target::Number(n)) => self.output_cost.matches(n),
            (CapabilityField::QualityTier, Target::Number(n)) => self.quality_tier.matches(n),
            (CapabilityField::Speed, Target::Number(n)) => self.speed.matches(n),
            (CapabilityField::ContextLength, Target::Number(n)) => self.context_length.matches(n),
            (CapabilityField::Vendor, Target::Text(t)) => self.vendor.matches(t.as_str()),
            (CapabilityField::PrivacyCompliance, Target::Flag(b)) => self.privacy_compliance.matches(b),
            (CapabilityField::SelfHosted, Target::Flag(b)) => self.self_hosted.matches(b),
            (CapabilityField::ImageRecognition, Target::Flag(b)) => self.image_recognition.matches(b),
            (CapabilityField::StructuredOutput, Target::Flag(b)) => self.structured_output.matches(b),
            _ => 0.0,
        }
    }

    fn flag(&self, field: CapabilityField) -> Option<bool> {
        match field {
            CapabilityField::PrivacyCompliance => Some(self.privacy_compliance.0),
            CapabilityField::SelfHosted => Some(self.self_hosted.0),
            CapabilityField::ImageRecognition => Some(self.image_recognition.0),
            CapabilityField::StructuredOutput => Some(self.structured_output.0),
            _ => None,
        }
    }
}

/// Caller-declared target profile; unset fields mean "don't care"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_tier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_compliance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_hosted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_recognition: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<bool>,
}

impl RequirementSet {
    /// Explicitly set target for a field, without defaults
    pub fn get(&self, field: CapabilityField) -> Option<Target> {
        match field {
            CapabilityField::InputCost => self.input_cost.map(Target::Number),
            CapabilityField::OutputCost => self.output_cost.map(Target::Number),
            CapabilityField::QualityTier => self.quality_tier.map(Target::Number),
            CapabilityField::Speed => self.speed.map(Target::Number),
            CapabilityField::ContextLength => self.context_length.map(Target::Number),
            CapabilityField::Vendor => self.vendor.clone().map(Target::Text),
            CapabilityField::PrivacyCompliance => self.privacy_compliance.map(Target::Flag),
            CapabilityField::SelfHosted => self.self_hosted.map(Target::Flag),
            CapabilityField::ImageRecognition => self.image_recognition.map(Target::Flag),
            CapabilityField::StructuredOutput => self.structured_output.map(Target::Flag),
        }
    }

    /// Fields that take part in scoring, with always-applied defaults filled in
    pub fn targets(&self) -> Vec<(CapabilityField, Target)> {
        CapabilityField::ALL
            .iter()
            .filter_map(|&field| {
                self.get(field)
                    .or_else(|| field.default_target())
                    .map(|target| (field, target))
            })
            .collect()
    }

    /// Hard filter: every flag requested as `true` must be present on the model
    pub fn admits(&self, capabilities: &CapabilitySet) -> bool {
        CapabilityField::ALL.iter().all(|&field| match self.get(field) {
            Some(Target::Flag(true)) => capabilities.flag(field).unwrap_or(false),
            _ => true,
        })
    }
}
