//! Experiment - root entity of the A/B testing schema

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Variant;
use crate::{Error, Result};

/// Default confidence level for hypothesis tests.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Tolerance when checking that variant weights sum to 100.
const ALLOCATION_EPSILON: f64 = 1e-6;

/// Identifier treated as the control arm when present.
pub const CONTROL_VARIANT_ID: &str = "control";

/// Lifecycle status of an experiment.
///
/// ```text
/// draft ──> running ──┬──> completed
///                     └──> stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Defined but not yet receiving traffic.
    Draft,
    /// Live.
    Running,
    /// Finished with a conclusion (and possibly a winner).
    Completed,
    /// Aborted or inconclusive.
    Stopped,
}

impl ExperimentStatus {
    /// Get status name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the experiment has reached an end state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            other => Err(Error::InvalidInput(format!(
                "unknown experiment status '{other}' (expected draft, running, completed or stopped)"
            ))),
        }
    }
}

/// Experiment represents a controlled A/B (or A/B/n) test.
///
/// Owned by the [`super::ExperimentRegistry`]; lifecycle changes go
/// through [`Experiment::start`], [`Experiment::complete`] and
/// [`Experiment::stop`], which reject illegal transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    hypothesis: String,
    variants: Vec<Variant>,
    primary_metric: String,
    #[serde(default)]
    secondary_metrics: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targeting: Option<serde_json::Value>,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    sample_size_required: u64,
    confidence_level: f64,
    minimum_detectable_effect: f64,
    winning_variant: Option<String>,
    conclusion: Option<String>,
}

impl Experiment {
    /// Create a builder for constructing an experiment.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the hypothesis under test.
    #[must_use]
    pub fn hypothesis(&self) -> &str {
        &self.hypothesis
    }

    /// Get the variants in allocation order.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Look up a variant by ID.
    #[must_use]
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id() == variant_id)
    }

    /// Whether a variant with this ID belongs to the experiment.
    #[must_use]
    pub fn has_variant(&self, variant_id: &str) -> bool {
        self.variant(variant_id).is_some()
    }

    /// The control arm: the variant named `control`, otherwise the first variant.
    #[must_use]
    pub fn control_variant(&self) -> Option<&Variant> {
        self.variant(CONTROL_VARIANT_ID)
            .or_else(|| self.variants.first())
    }

    /// Variants compared against control, in allocation order.
    pub fn treatment_variants(&self) -> impl Iterator<Item = &Variant> {
        let control = self.control_variant().map(|v| v.id().to_string());
        self.variants
            .iter()
            .filter(move |v| Some(v.id()) != control.as_deref())
    }

    /// Get the primary metric name.
    #[must_use]
    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    /// Get the secondary metric names.
    #[must_use]
    pub const fn secondary_metrics(&self) -> &BTreeSet<String> {
        &self.secondary_metrics
    }

    /// Primary metric followed by secondary metrics.
    pub fn tracked_metrics(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_metric.as_str())
            .chain(self.secondary_metrics.iter().map(String::as_str))
    }

    /// Get the targeting predicate (opaque to the engine).
    #[must_use]
    pub const fn targeting(&self) -> Option<&serde_json::Value> {
        self.targeting.as_ref()
    }

    /// Get the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the start timestamp, if started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the completion (or stop) timestamp, if ended.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Get the total sample size required for sufficient power.
    #[must_use]
    pub const fn sample_size_required(&self) -> u64 {
        self.sample_size_required
    }

    /// Get the confidence level used for significance (e.g. 0.95).
    #[must_use]
    pub const fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Significance threshold, `1 - confidence_level`.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Get the minimum detectable effect the experiment was planned for.
    #[must_use]
    pub const fn minimum_detectable_effect(&self) -> f64 {
        self.minimum_detectable_effect
    }

    /// Get the winning variant ID, if one was declared.
    #[must_use]
    pub fn winning_variant(&self) -> Option<&str> {
        self.winning_variant.as_deref()
    }

    /// Get the conclusion (or stop reason), if ended.
    #[must_use]
    pub fn conclusion(&self) -> Option<&str> {
        self.conclusion.as_deref()
    }

    /// Sum of all variant weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.variants.iter().map(Variant::weight).sum()
    }

    /// Check structural validity and the allocation invariant.
    ///
    /// # Errors
    ///
    /// - `InvalidExperiment` for empty IDs, missing variants, duplicate
    ///   variant IDs, weights outside 0-100 or a confidence level outside (0, 1)
    /// - `InvalidAllocation` if weights do not sum to 100
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidExperiment(
                "experiment id must not be empty".to_string(),
            ));
        }
        if self.primary_metric.trim().is_empty() {
            return Err(Error::InvalidExperiment(format!(
                "experiment '{}' has no primary metric",
                self.id
            )));
        }
        if self.variants.is_empty() {
            return Err(Error::InvalidExperiment(format!(
                "experiment '{}' has no variants",
                self.id
            )));
        }

        let mut seen = BTreeSet::new();
        for variant in &self.variants {
            if variant.id().trim().is_empty() {
                return Err(Error::InvalidExperiment(format!(
                    "experiment '{}' has a variant with an empty id",
                    self.id
                )));
            }
            if !seen.insert(variant.id()) {
                return Err(Error::InvalidExperiment(format!(
                    "experiment '{}' has duplicate variant id '{}'",
                    self.id,
                    variant.id()
                )));
            }
            if !variant.weight().is_finite() || !(0.0..=100.0).contains(&variant.weight()) {
                return Err(Error::InvalidExperiment(format!(
                    "variant '{}' weight {} is outside 0-100",
                    variant.id(),
                    variant.weight()
                )));
            }
        }

        let total = self.total_weight();
        if (total - 100.0).abs() > ALLOCATION_EPSILON {
            return Err(Error::InvalidAllocation {
                experiment_id: self.id.clone(),
                total,
            });
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::InvalidExperiment(format!(
                "confidence level {} must be in (0, 1)",
                self.confidence_level
            )));
        }

        Ok(())
    }

    /// Transition `draft -> running`, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the experiment is a draft.
    pub fn start(&mut self) -> Result<()> {
        self.transition(ExperimentStatus::Draft, ExperimentStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Transition `running -> completed`.
    ///
    /// # Errors
    ///
    /// - `VariantNotFound` if `winner` is not one of this experiment's variants
    /// - `InvalidTransition` unless the experiment is running
    pub fn complete(&mut self, winner: Option<&str>, conclusion: impl Into<String>) -> Result<()> {
        if let Some(winner) = winner {
            if !self.has_variant(winner) {
                return Err(Error::VariantNotFound {
                    experiment_id: self.id.clone(),
                    variant_id: winner.to_string(),
                });
            }
        }
        self.transition(ExperimentStatus::Running, ExperimentStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.winning_variant = winner.map(str::to_string);
        self.conclusion = Some(conclusion.into());
        Ok(())
    }

    /// Transition `running -> stopped`. No winner is recorded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the experiment is running.
    pub fn stop(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(ExperimentStatus::Running, ExperimentStatus::Stopped)?;
        self.completed_at = Some(Utc::now());
        self.winning_variant = None;
        self.conclusion = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, expected: ExperimentStatus, to: ExperimentStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidTransition {
                experiment_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Normalize the initial status for registration: only draft or running
    /// are accepted, and a running experiment gets its start timestamp.
    pub(crate) fn prepare_for_registration(&mut self) -> Result<()> {
        match self.status {
            ExperimentStatus::Draft => Ok(()),
            ExperimentStatus::Running => {
                self.started_at.get_or_insert_with(Utc::now);
                Ok(())
            }
            status => Err(Error::InvalidExperiment(format!(
                "experiment '{}' cannot be created in status {status}",
                self.id
            ))),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_completed_at(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
    }
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment: Experiment,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment: Experiment {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                hypothesis: String::new(),
                variants: Vec::new(),
                primary_metric: String::new(),
                secondary_metrics: BTreeSet::new(),
                targeting: None,
                status: ExperimentStatus::Draft,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                sample_size_required: 0,
                confidence_level: DEFAULT_CONFIDENCE_LEVEL,
                minimum_detectable_effect: 0.0,
                winning_variant: None,
                conclusion: None,
            },
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.experiment.description = description.into();
        self
    }

    /// Set the hypothesis text.
    #[must_use]
    pub fn hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.experiment.hypothesis = hypothesis.into();
        self
    }

    /// Append a variant. Order is the bucketing order.
    #[must_use]
    pub fn variant(mut self, variant: Variant) -> Self {
        self.experiment.variants.push(variant);
        self
    }

    /// Replace all variants.
    #[must_use]
    pub fn variants(mut self, variants: Vec<Variant>) -> Self {
        self.experiment.variants = variants;
        self
    }

    /// Set the primary metric name.
    #[must_use]
    pub fn primary_metric(mut self, metric: impl Into<String>) -> Self {
        self.experiment.primary_metric = metric.into();
        self
    }

    /// Add a secondary metric name.
    #[must_use]
    pub fn secondary_metric(mut self, metric: impl Into<String>) -> Self {
        self.experiment.secondary_metrics.insert(metric.into());
        self
    }

    /// Set the targeting predicate.
    #[must_use]
    pub fn targeting(mut self, targeting: serde_json::Value) -> Self {
        self.experiment.targeting = Some(targeting);
        self
    }

    /// Set the initial status (draft or running).
    #[must_use]
    pub const fn status(mut self, status: ExperimentStatus) -> Self {
        self.experiment.status = status;
        self
    }

    /// Set the total sample size required for sufficient power.
    #[must_use]
    pub const fn sample_size_required(mut self, sample_size: u64) -> Self {
        self.experiment.sample_size_required = sample_size;
        self
    }

    /// Set the confidence level (default 0.95).
    #[must_use]
    pub const fn confidence_level(mut self, level: f64) -> Self {
        self.experiment.confidence_level = level;
        self
    }

    /// Set the minimum detectable effect.
    #[must_use]
    pub const fn minimum_detectable_effect(mut self, effect: f64) -> Self {
        self.experiment.minimum_detectable_effect = effect;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.experiment.created_at = created_at;
        self
    }

    /// Build the `Experiment`. Validation happens at registration.
    #[must_use]
    pub fn build(self) -> Experiment {
        self.experiment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fifty_fifty() -> Experiment {
        Experiment::builder("exp-1", "Button color")
            .variant(Variant::new("control", "Blue", 50.0))
            .variant(Variant::new("treatment", "Green", 50.0))
            .primary_metric("conversion")
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let exp = fifty_fifty();
        assert_eq!(exp.status(), ExperimentStatus::Draft);
        assert!((exp.confidence_level() - 0.95).abs() < f64::EPSILON);
        assert!((exp.alpha() - 0.05).abs() < 1e-12);
        assert!(exp.started_at().is_none());
        assert!(exp.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sum() {
        let exp = Experiment::builder("exp-2", "Bad")
            .variant(Variant::new("control", "A", 60.0))
            .variant(Variant::new("treatment", "B", 50.0))
            .primary_metric("conversion")
            .build();
        assert!(matches!(
            exp.validate(),
            Err(Error::InvalidAllocation { total, .. }) if (total - 110.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_validate_accepts_fractional_thirds() {
        let exp = Experiment::builder("exp-3", "Thirds")
            .variant(Variant::new("a", "A", 33.3))
            .variant(Variant::new("b", "B", 33.3))
            .variant(Variant::new("c", "C", 33.4))
            .primary_metric("conversion")
            .build();
        assert!(exp.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_variant() {
        let exp = Experiment::builder("exp-4", "Dup")
            .variant(Variant::new("a", "A", 50.0))
            .variant(Variant::new("a", "A again", 50.0))
            .primary_metric("conversion")
            .build();
        assert!(matches!(exp.validate(), Err(Error::InvalidExperiment(_))));
    }

    #[test]
    fn test_lifecycle_start_complete() {
        let mut exp = fifty_fifty();
        exp.start().unwrap();
        assert_eq!(exp.status(), ExperimentStatus::Running);
        assert!(exp.started_at().is_some());

        exp.complete(Some("treatment"), "green wins").unwrap();
        assert_eq!(exp.status(), ExperimentStatus::Completed);
        assert_eq!(exp.winning_variant(), Some("treatment"));
        assert_eq!(exp.conclusion(), Some("green wins"));
        assert!(exp.completed_at().unwrap() >= exp.started_at().unwrap());
    }

    #[test]
    fn test_complete_rejects_foreign_winner_without_transition() {
        let mut exp = fifty_fifty();
        exp.start().unwrap();
        assert!(exp.complete(Some("purple"), "nope").unwrap_err().is_not_found());
        assert_eq!(exp.status(), ExperimentStatus::Running);
        assert!(exp.winning_variant().is_none());
    }

    #[test]
    fn test_no_backwards_transitions() {
        let mut exp = fifty_fifty();
        assert!(matches!(
            exp.stop("too early"),
            Err(Error::InvalidTransition {
                from: ExperimentStatus::Draft,
                to: ExperimentStatus::Stopped,
                ..
            })
        ));
        exp.start().unwrap();
        assert!(exp.start().is_err());
        exp.stop("inconclusive").unwrap();
        assert!(exp.winning_variant().is_none());
        assert!(exp.complete(None, "late").is_err());
    }

    #[test]
    fn test_control_and_treatments() {
        let exp = Experiment::builder("exp-5", "Order")
            .variant(Variant::new("treatment", "T", 50.0))
            .variant(Variant::new("control", "C", 50.0))
            .primary_metric("conversion")
            .build();
        assert_eq!(exp.control_variant().map(Variant::id), Some("control"));
        let treatments: Vec<_> = exp.treatment_variants().map(Variant::id).collect();
        assert_eq!(treatments, vec!["treatment"]);
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("Running".parse::<ExperimentStatus>().unwrap(), ExperimentStatus::Running);
        assert_eq!(ExperimentStatus::Stopped.to_string(), "stopped");
        assert!("paused".parse::<ExperimentStatus>().is_err());
    }

    #[test]
    fn test_prepare_rejects_terminal_status() {
        let mut exp = Experiment::builder("exp-6", "Done")
            .variant(Variant::new("control", "C", 100.0))
            .primary_metric("conversion")
            .status(ExperimentStatus::Completed)
            .build();
        assert!(exp.prepare_for_registration().is_err());
    }
}
