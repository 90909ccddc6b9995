//! Variant - one arm of an experiment

use serde::{Deserialize, Serialize};

/// Variant represents one arm of an experiment (e.g. control, treatment).
///
/// Variants are owned inline by their parent [`super::Experiment`]; they
/// have no identity outside of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    id: String,
    name: String,
    weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<serde_json::Value>,
}

impl Variant {
    /// Create a new variant.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier, unique within the parent experiment
    /// * `name` - Display name
    /// * `weight` - Traffic allocation as a percentage (0-100)
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            config: None,
        }
    }

    /// Attach an opaque configuration payload handed back to callers on assignment.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Get the variant ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the allocation weight (percent).
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Get the configuration payload, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }
}
