//! Experiment Registry - concurrent ownership of experiment definitions

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{Experiment, ExperimentStatus};
use crate::{Error, Result};

/// Concurrent registry of experiments keyed by ID.
///
/// ## Design
///
/// Backed by a sharded `DashMap`: lookups and lifecycle changes for
/// different experiments never contend, and each mutation holds only the
/// shard lock of the experiment it touches.
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    experiments: DashMap<String, Experiment>,
}

impl ExperimentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Validate and register a new experiment.
    ///
    /// The experiment is stored as a draft unless it was explicitly built
    /// with `ExperimentStatus::Running`.
    ///
    /// # Errors
    ///
    /// - `InvalidAllocation` if variant weights do not sum to 100
    /// - `InvalidExperiment` for other structural problems
    /// - `DuplicateExperiment` if the ID is taken
    pub fn create(&self, mut experiment: Experiment) -> Result<Experiment> {
        experiment.validate()?;
        experiment.prepare_for_registration()?;
        self.insert_new(experiment)
    }

    /// Register an experiment restored from a snapshot, keeping its status.
    ///
    /// # Errors
    ///
    /// Same validation as [`Self::create`], without the status restriction.
    pub(crate) fn restore(&self, experiment: Experiment) -> Result<Experiment> {
        experiment.validate()?;
        self.insert_new(experiment)
    }

    fn insert_new(&self, experiment: Experiment) -> Result<Experiment> {
        match self.experiments.entry(experiment.id().to_string()) {
            Entry::Occupied(entry) => Err(Error::DuplicateExperiment(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!(
                    experiment_id = experiment.id(),
                    status = %experiment.status(),
                    variants = experiment.variants().len(),
                    "registered experiment"
                );
                entry.insert(experiment.clone());
                Ok(experiment)
            }
        }
    }

    /// Get a copy of an experiment by ID.
    #[must_use]
    pub fn get(&self, experiment_id: &str) -> Option<Experiment> {
        self.experiments.get(experiment_id).map(|e| e.value().clone())
    }

    /// Check whether an experiment exists.
    #[must_use]
    pub fn contains(&self, experiment_id: &str) -> bool {
        self.experiments.contains_key(experiment_id)
    }

    /// Run `f` against an experiment without cloning it.
    ///
    /// # Errors
    ///
    /// Returns `ExperimentNotFound` if the ID is unknown.
    pub fn with_experiment<T>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&Experiment) -> T,
    ) -> Result<T> {
        self.experiments
            .get(experiment_id)
            .map(|e| f(e.value()))
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }

    /// List experiments, optionally filtered by status, oldest first.
    #[must_use]
    pub fn list(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|e| status.map_or(true, |s| e.status() == s))
            .map(|e| e.value().clone())
            .collect();

        experiments.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        experiments
    }

    /// Transition `draft -> running`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn start(&self, experiment_id: &str) -> Result<Experiment> {
        let updated = self.update(experiment_id, Experiment::start)?;
        info!(experiment_id, "experiment started");
        Ok(updated)
    }

    /// Transition `running -> completed`, optionally declaring a winner.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, `VariantNotFound` (unknown winner) or
    /// `InvalidTransition`.
    pub fn complete(
        &self,
        experiment_id: &str,
        winning_variant: Option<&str>,
        conclusion: &str,
    ) -> Result<Experiment> {
        let updated = self.update(experiment_id, |e| e.complete(winning_variant, conclusion))?;
        info!(
            experiment_id,
            winner = winning_variant.unwrap_or("none"),
            "experiment completed"
        );
        Ok(updated)
    }

    /// Transition `running -> stopped`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn stop(&self, experiment_id: &str, reason: &str) -> Result<Experiment> {
        let updated = self.update(experiment_id, |e| e.stop(reason))?;
        info!(experiment_id, reason, "experiment stopped");
        Ok(updated)
    }

    fn update(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&mut Experiment) -> Result<()>,
    ) -> Result<Experiment> {
        let mut entry = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        f(entry.value_mut())?;
        Ok(entry.value().clone())
    }

    /// Remove an experiment definition.
    ///
    /// # Errors
    ///
    /// Returns `ExperimentNotFound` if the ID is unknown.
    pub fn remove(&self, experiment_id: &str) -> Result<Experiment> {
        self.experiments
            .remove(experiment_id)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }

    /// IDs of ended experiments whose completion is older than `retention`.
    #[must_use]
    pub fn stale_ids(&self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let cutoff = now - retention;
        let ids: Vec<String> = self
            .experiments
            .iter()
            .filter(|e| e.status().is_terminal())
            .filter(|e| e.completed_at().is_some_and(|at| at < cutoff))
            .map(|e| e.key().clone())
            .collect();
        debug!(candidates = ids.len(), %cutoff, "scanned for stale experiments");
        ids
    }
}
