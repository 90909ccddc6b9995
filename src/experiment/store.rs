//! Metrics Store - current per-subject observations and on-demand aggregates
//!
//! This module provides the storage layer for experiment metrics, optimized
//! for concurrent writes from many independent subjects.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ExperimentRegistry, MetricObservation};
use crate::{Error, Result};

/// Key of an observation within one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObservationKey {
    variant_id: String,
    subject_id: String,
    metric_name: String,
}

impl ObservationKey {
    fn of(observation: &MetricObservation) -> Self {
        Self {
            variant_id: observation.variant_id().to_string(),
            subject_id: observation.subject_id().to_string(),
            metric_name: observation.metric_name().to_string(),
        }
    }
}

type Partition = Arc<DashMap<ObservationKey, MetricObservation>>;

/// Streaming summary statistics over a set of values.
///
/// Computed with Welford's algorithm, so a constant sample has a variance
/// of exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateStatistics {
    /// Number of values.
    pub count: u64,
    /// Sum of values.
    pub sum: f64,
    /// Arithmetic mean (0 when empty).
    pub mean: f64,
    /// Sample variance with Bessel's correction (0 when fewer than two values).
    pub variance: f64,
    /// Square root of `variance`.
    pub std_dev: f64,
}

impl AggregateStatistics {
    /// Aggregate an iterator of values in one pass.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0_u64;
        let mut sum = 0.0;
        let mut mean = 0.0;
        let mut m2 = 0.0;

        for value in values {
            count += 1;
            sum += value;
            let delta = value - mean;
            #[allow(clippy::cast_precision_loss)]
            let n = count as f64;
            mean += delta / n;
            m2 += delta * (value - mean);
        }

        #[allow(clippy::cast_precision_loss)]
        let variance = if count > 1 {
            (m2 / (count - 1) as f64).max(0.0)
        } else {
            0.0
        };

        Self {
            count,
            sum,
            mean,
            variance,
            std_dev: variance.sqrt(),
        }
    }
}

/// Per-variant summary returned by [`MetricsStore::get_variant_statistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStatistics {
    /// Variant the statistics describe.
    pub variant_id: String,
    /// Number of subjects with a current observation.
    pub count: u64,
    /// Mean observed value.
    pub mean: f64,
    /// Sample standard deviation (exactly 0 for single or constant samples).
    pub standard_deviation: f64,
}

/// Progress of an experiment towards its required sample size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperimentProgress {
    /// Distinct subjects with at least one observation in any variant.
    pub total_sample_size: u64,
    /// Percent of `sample_size_required` reached, capped at 100.
    pub percentage_complete: f64,
    /// Whether the required sample size has been reached.
    pub complete: bool,
}

/// Concurrent store of current metric observations.
///
/// ## Design
///
/// Observations are partitioned per experiment. Each partition is a
/// sharded `DashMap` keyed by `(variant, subject, metric)`, so writes for
/// different subjects proceed in parallel while writes for the same key
/// serialize on its shard lock and the last one wins. The outer map is only
/// locked long enough to clone the partition handle.
#[derive(Debug)]
pub struct MetricsStore {
    registry: Arc<ExperimentRegistry>,
    partitions: DashMap<String, Partition>,
}

impl MetricsStore {
    /// Create an empty store validating against `registry`.
    #[must_use]
    pub fn new(registry: Arc<ExperimentRegistry>) -> Self {
        Self {
            registry,
            partitions: DashMap::new(),
        }
    }

    /// Total number of current observations across all experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Check if the store holds no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.value().is_empty())
    }

    fn partition(&self, experiment_id: &str) -> Option<Partition> {
        self.partitions
            .get(experiment_id)
            .map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, experiment_id: &str) -> Partition {
        if let Some(partition) = self.partition(experiment_id) {
            return partition;
        }
        Arc::clone(
            self.partitions
                .entry(experiment_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn ensure_variant(&self, experiment_id: &str, variant_id: &str) -> Result<()> {
        let known = self
            .registry
            .with_experiment(experiment_id, |e| e.has_variant(variant_id))?;
        if known {
            Ok(())
        } else {
            Err(Error::VariantNotFound {
                experiment_id: experiment_id.to_string(),
                variant_id: variant_id.to_string(),
            })
        }
    }

    /// Record an observation, replacing any earlier one for the same
    /// `(experiment, variant, subject, metric)` key.
    ///
    /// Returns the replaced observation, if any.
    ///
    /// # Errors
    ///
    /// - `ExperimentNotFound` / `VariantNotFound` for unknown references
    /// - `InvalidInput` for non-finite values
    pub fn record(&self, observation: MetricObservation) -> Result<Option<MetricObservation>> {
        if !observation.value().is_finite() {
            return Err(Error::InvalidInput(format!(
                "metric '{}' value must be finite, got {}",
                observation.metric_name(),
                observation.value()
            )));
        }
        self.ensure_variant(observation.experiment_id(), observation.variant_id())?;

        let partition = self.partition_or_create(observation.experiment_id());
        trace!(
            experiment_id = observation.experiment_id(),
            variant_id = observation.variant_id(),
            subject_id = observation.subject_id(),
            metric = observation.metric_name(),
            value = observation.value(),
            "recording metric"
        );
        let experiment_id = observation.experiment_id().to_string();
        let variant_id = observation.variant_id().to_string();
        let key = ObservationKey::of(&observation);
        let replaced = partition.insert(key.clone(), observation);

        // A concurrent delete may have dropped the experiment after the first
        // check; the partition above would then outlive it.
        if let Err(err) = self.ensure_variant(&experiment_id, &variant_id) {
            partition.remove(&key);
            self.partitions
                .remove_if(&experiment_id, |_, p| p.is_empty());
            debug!(
                experiment_id = %experiment_id,
                variant_id = %variant_id,
                "experiment removed while recording, observation discarded"
            );
            return Err(err);
        }
        Ok(replaced)
    }

    /// Current observations for a variant, optionally restricted to one metric.
    ///
    /// Ordered by subject then metric name.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound` for unknown references.
    pub fn get_metrics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<MetricObservation>> {
        self.ensure_variant(experiment_id, variant_id)?;
        let mut metrics = self.collect(experiment_id, |key| {
            key.variant_id == variant_id && metric_name.map_or(true, |m| key.metric_name == m)
        });
        metrics.sort_by(|a, b| {
            a.subject_id()
                .cmp(b.subject_id())
                .then_with(|| a.metric_name().cmp(b.metric_name()))
        });
        Ok(metrics)
    }

    /// Values of one metric for one variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound` for unknown references.
    pub fn values(&self, experiment_id: &str, variant_id: &str, metric_name: &str) -> Result<Vec<f64>> {
        Ok(self
            .get_metrics(experiment_id, variant_id, Some(metric_name))?
            .iter()
            .map(MetricObservation::value)
            .collect())
    }

    /// Count, sum, mean and variance of a metric for a variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound` for unknown references.
    pub fn get_aggregated_metrics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
    ) -> Result<AggregateStatistics> {
        self.ensure_variant(experiment_id, variant_id)?;
        let Some(partition) = self.partition(experiment_id) else {
            return Ok(AggregateStatistics::default());
        };
        let stats = AggregateStatistics::from_values(
            partition
                .iter()
                .filter(|e| e.key().variant_id == variant_id && e.key().metric_name == metric_name)
                .map(|e| e.value().value()),
        );
        Ok(stats)
    }

    /// Count, mean and standard deviation of a metric for a variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound` for unknown references.
    pub fn get_variant_statistics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
    ) -> Result<VariantStatistics> {
        let stats = self.get_aggregated_metrics(experiment_id, variant_id, metric_name)?;
        Ok(VariantStatistics {
            variant_id: variant_id.to_string(),
            count: stats.count,
            mean: stats.mean,
            standard_deviation: stats.std_dev,
        })
    }

    /// Distinct subjects observed so far versus the experiment's required sample size.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` if the experiment is unknown.
    pub fn get_experiment_progress(&self, experiment_id: &str) -> Result<ExperimentProgress> {
        let required = self
            .registry
            .with_experiment(experiment_id, super::Experiment::sample_size_required)?;

        let total = self.partition(experiment_id).map_or(0, |partition| {
            let subjects: FxHashSet<String> = partition
                .iter()
                .map(|e| e.key().subject_id.clone())
                .collect();
            subjects.len() as u64
        });

        #[allow(clippy::cast_precision_loss)]
        let percentage_complete = if required == 0 {
            100.0
        } else {
            (total as f64 / required as f64 * 100.0).min(100.0)
        };

        Ok(ExperimentProgress {
            total_sample_size: total,
            percentage_complete,
            complete: total >= required,
        })
    }

    /// Names of every metric observed for an experiment, sorted.
    #[must_use]
    pub fn metric_names(&self, experiment_id: &str) -> Vec<String> {
        let Some(partition) = self.partition(experiment_id) else {
            return Vec::new();
        };
        let mut names: Vec<String> = partition
            .iter()
            .map(|e| e.key().metric_name.clone())
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    /// All current observations of an experiment (point-in-time per shard).
    #[must_use]
    pub fn experiment_metrics(&self, experiment_id: &str) -> Vec<MetricObservation> {
        self.collect(experiment_id, |_| true)
    }

    /// All current observations across experiments.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<MetricObservation> {
        let partitions: Vec<Partition> = self
            .partitions
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect();
        partitions
            .iter()
            .flat_map(|p| p.iter().map(|e| e.value().clone()).collect::<Vec<_>>())
            .collect()
    }

    fn collect(
        &self,
        experiment_id: &str,
        filter: impl Fn(&ObservationKey) -> bool,
    ) -> Vec<MetricObservation> {
        self.partition(experiment_id).map_or_else(Vec::new, |partition| {
            partition
                .iter()
                .filter(|e| filter(e.key()))
                .map(|e| e.value().clone())
                .collect()
        })
    }

    /// Drop every observation of an experiment. Returns how many were removed.
    pub fn remove_experiment(&self, experiment_id: &str) -> usize {
        let removed = self
            .partitions
            .remove(experiment_id)
            .map_or(0, |(_, p)| p.len());
        debug!(experiment_id, removed, "removed experiment metrics");
        removed
    }
}
