//! Metric Observation - per-subject metric values for experiment variants

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of metric being observed.
///
/// Informative only: storage is identical for every kind, but analysis
/// uses `Binary` to pick the two-proportion z-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// 0/1 outcome (conversion, click).
    Binary,
    /// Continuous value (revenue, latency).
    #[default]
    Numeric,
    /// Non-negative event count.
    Count,
}

impl MetricKind {
    /// Get kind name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Numeric => "numeric",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric Observation represents the current value of one metric for one
/// subject in one variant.
///
/// ## Key
///
/// `(experiment_id, variant_id, subject_id, metric_name)` identifies an
/// observation. The metrics store keeps only the latest write per key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricObservation {
    experiment_id: String,
    variant_id: String,
    subject_id: String,
    metric_name: String,
    value: f64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    kind: MetricKind,
}

impl MetricObservation {
    /// Create a new numeric observation stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Parent experiment
    /// * `variant_id` - Variant the subject was exposed to
    /// * `subject_id` - User or other unit of randomization
    /// * `metric_name` - Metric name (e.g. "conversion", "revenue")
    /// * `value` - Observed value
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        subject_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self::builder(experiment_id, variant_id, subject_id, metric_name, value).build()
    }

    /// Create a builder for constructing an observation with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        subject_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
    ) -> MetricObservationBuilder {
        MetricObservationBuilder::new(experiment_id, variant_id, subject_id, metric_name, value)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the subject ID.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Get the metric name.
    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Get the observed value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp when the observation was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Get the metric kind.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }
}

/// Builder for `MetricObservation`.
#[derive(Debug)]
pub struct MetricObservationBuilder {
    observation: MetricObservation,
}

impl MetricObservationBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        subject_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            observation: MetricObservation {
                experiment_id: experiment_id.into(),
                variant_id: variant_id.into(),
                subject_id: subject_id.into(),
                metric_name: metric_name.into(),
                value,
                timestamp: Utc::now(),
                kind: MetricKind::default(),
            },
        }
    }

    /// Set the metric kind.
    #[must_use]
    pub const fn kind(mut self, kind: MetricKind) -> Self {
        self.observation.kind = kind;
        self
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.observation.timestamp = timestamp;
        self
    }

    /// Build the `MetricObservation`.
    #[must_use]
    pub fn build(self) -> MetricObservation {
        self.observation
    }
}
