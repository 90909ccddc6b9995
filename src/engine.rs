//! A/B testing engine facade
//!
//! Wires the registry, assignment engine, metrics store, analyzer and
//! snapshot persistence behind one API.
//!
//! ## Durability
//!
//! Every mutation bumps a generation counter. [`AbTestEngine::flush`]
//! copies both stores, writes the copy with no map lock held, and only then
//! records the generation as flushed. A failed write leaves the engine
//! dirty, so the next flush (explicit or background) retries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use crate::assignment::AssignmentEngine;
use crate::config::EngineConfig;
use crate::experiment::{
    AggregateStatistics, Experiment, ExperimentBuilder, ExperimentProgress, ExperimentRegistry,
    ExperimentStatus, MetricObservation, MetricsStore, Variant, VariantStatistics,
};
use crate::persistence::{EngineSnapshot, ExperimentSnapshot, JsonFileStore, SnapshotStore};
use crate::report::{self, ExperimentReport, MetricSummary, VariantReport};
use crate::stats::{
    calculate_required_sample_size, AnalysisResult, SampleSizeParams, StatisticalAnalyzer,
};
use crate::{Error, Result};

/// A/B testing engine.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and is safe
/// to call concurrently.
///
/// # Example
///
/// ```rust
/// use trueno_ab::experiment::{MetricObservation, Variant};
/// use trueno_ab::AbTestEngine;
///
/// let engine = AbTestEngine::builder().build()?;
/// engine.create_experiment(
///     engine
///         .experiment_builder("onboarding", "Shorter onboarding")
///         .variant(Variant::new("control", "Five steps", 50.0))
///         .variant(Variant::new("treatment", "Three steps", 50.0))
///         .primary_metric("activated")
///         .build(),
/// )?;
/// engine.start_experiment("onboarding")?;
///
/// let variant = engine.assign_variant("onboarding", "user-7")?;
/// engine.record_metric(MetricObservation::new("onboarding", variant.id(), "user-7", "activated", 1.0))?;
/// assert_eq!(engine.get_experiment_progress("onboarding")?.total_sample_size, 1);
/// # Ok::<(), trueno_ab::Error>(())
/// ```
pub struct AbTestEngine {
    config: EngineConfig,
    registry: Arc<ExperimentRegistry>,
    metrics: Arc<MetricsStore>,
    assignment: AssignmentEngine,
    analyzer: StatisticalAnalyzer,
    store: Option<Arc<dyn SnapshotStore>>,
    generation: AtomicU64,
    flushed: AtomicU64,
    flush_lock: Mutex<()>,
}

impl std::fmt::Debug for AbTestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbTestEngine")
            .field("config", &self.config)
            .field("experiments", &self.registry.len())
            .field("observations", &self.metrics.len())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl AbTestEngine {
    /// Create a new engine builder
    #[must_use]
    pub fn builder() -> AbTestEngineBuilder {
        AbTestEngineBuilder::default()
    }

    /// Build an engine from configuration, loading any saved snapshot.
    ///
    /// # Errors
    ///
    /// See [`AbTestEngineBuilder::build`].
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        AbTestEngineBuilder {
            config,
            store: None,
        }
        .build()
    }

    fn empty(config: EngineConfig, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        let registry = Arc::new(ExperimentRegistry::new());
        let metrics = Arc::new(MetricsStore::new(Arc::clone(&registry)));
        Self {
            config,
            assignment: AssignmentEngine::new(Arc::clone(&registry)),
            analyzer: StatisticalAnalyzer::new(Arc::clone(&registry), Arc::clone(&metrics)),
            registry,
            metrics,
            store,
            generation: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    fn restore(&self, snapshot: EngineSnapshot) -> Result<()> {
        snapshot.check_version()?;
        for experiment in snapshot.experiments {
            self.registry.restore(experiment)?;
        }
        let mut skipped = 0_usize;
        for observation in snapshot.metrics {
            match self.metrics.record(observation) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    warn!(error = %err, "skipping observation without a registered experiment");
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if skipped > 0 {
            warn!(skipped, "snapshot contained orphan observations");
        }
        Ok(())
    }

    fn mark_dirty(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying experiment registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    /// Underlying metrics store.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Experiment builder pre-set with the configured default confidence level.
    #[must_use]
    pub fn experiment_builder(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> ExperimentBuilder {
        Experiment::builder(id, name).confidence_level(self.config.default_confidence_level)
    }

    /// Validate and register an experiment.
    ///
    /// # Errors
    ///
    /// `InvalidAllocation`, `InvalidExperiment` or `DuplicateExperiment`.
    pub fn create_experiment(&self, experiment: Experiment) -> Result<Experiment> {
        let created = self.registry.create(experiment)?;
        self.mark_dirty();
        Ok(created)
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<Experiment> {
        self.registry.get(experiment_id)
    }

    /// List experiments, optionally filtered by status.
    #[must_use]
    pub fn list_experiments(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        self.registry.list(status)
    }

    /// Transition `draft -> running`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn start_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let experiment = self.registry.start(experiment_id)?;
        self.mark_dirty();
        Ok(experiment)
    }

    /// Transition `running -> completed`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, `VariantNotFound` or `InvalidTransition`.
    pub fn complete_experiment(
        &self,
        experiment_id: &str,
        winning_variant: Option<&str>,
        conclusion: &str,
    ) -> Result<Experiment> {
        let experiment = self
            .registry
            .complete(experiment_id, winning_variant, conclusion)?;
        self.mark_dirty();
        Ok(experiment)
    }

    /// Transition `running -> stopped`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` or `InvalidTransition`.
    pub fn stop_experiment(&self, experiment_id: &str, reason: &str) -> Result<Experiment> {
        let experiment = self.registry.stop(experiment_id, reason)?;
        self.mark_dirty();
        Ok(experiment)
    }

    /// Remove an experiment and all of its observations.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` if the ID is unknown.
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let experiment = self.registry.remove(experiment_id)?;
        let removed = self.metrics.remove_experiment(experiment_id);
        self.mark_dirty();
        info!(experiment_id, observations = removed, "deleted experiment");
        Ok(experiment)
    }

    /// Remove ended experiments whose completion is older than the
    /// retention window. Returns the removed IDs.
    pub fn cleanup_stale_experiments(&self, now: DateTime<Utc>) -> Vec<String> {
        let candidates = self.registry.stale_ids(now, self.config.retention());
        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if self.registry.remove(&id).is_ok() {
                self.metrics.remove_experiment(&id);
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            self.mark_dirty();
            info!(count = removed.len(), "cleaned up stale experiments");
        }
        removed
    }

    // ---------------------------------------------------------------------
    // Assignment & metrics
    // ---------------------------------------------------------------------

    /// Deterministically assign a subject to a variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` if the experiment is unknown.
    pub fn assign_variant(&self, experiment_id: &str, subject_id: &str) -> Result<Variant> {
        self.assignment.assign_variant(experiment_id, subject_id)
    }

    /// Record an observation (last write per key wins).
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, `VariantNotFound` or `InvalidInput`.
    pub fn record_metric(&self, observation: MetricObservation) -> Result<()> {
        self.metrics.record(observation)?;
        self.mark_dirty();
        Ok(())
    }

    /// Current observations for a variant, optionally for one metric.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound`.
    pub fn get_metrics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: Option<&str>,
    ) -> Result<Vec<MetricObservation>> {
        self.metrics.get_metrics(experiment_id, variant_id, metric_name)
    }

    /// Count, sum, mean and variance of a metric for a variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound`.
    pub fn get_aggregated_metrics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
    ) -> Result<AggregateStatistics> {
        self.metrics
            .get_aggregated_metrics(experiment_id, variant_id, metric_name)
    }

    /// Count, mean and standard deviation of a metric for a variant.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` / `VariantNotFound`.
    pub fn get_variant_statistics(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
    ) -> Result<VariantStatistics> {
        self.metrics
            .get_variant_statistics(experiment_id, variant_id, metric_name)
    }

    /// Distinct subjects observed versus the required sample size.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`.
    pub fn get_experiment_progress(&self, experiment_id: &str) -> Result<ExperimentProgress> {
        self.metrics.get_experiment_progress(experiment_id)
    }

    // ---------------------------------------------------------------------
    // Analysis
    // ---------------------------------------------------------------------

    /// Compare a treatment variant (default: first non-control) against control.
    ///
    /// # Errors
    ///
    /// See [`StatisticalAnalyzer::analyze_experiment`].
    pub fn analyze_experiment(
        &self,
        experiment_id: &str,
        metric_name: &str,
        variant_id: Option<&str>,
    ) -> Result<Option<AnalysisResult>> {
        self.analyzer
            .analyze_experiment(experiment_id, metric_name, variant_id)
    }

    /// Compare every non-control variant against control.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`.
    pub fn analyze_all(&self, experiment_id: &str, metric_name: &str) -> Result<Vec<AnalysisResult>> {
        self.analyzer.analyze_all(experiment_id, metric_name)
    }

    /// Per-arm sample size for a two-proportion test.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for out-of-range parameters.
    pub fn calculate_required_sample_size(&self, params: &SampleSizeParams) -> Result<u64> {
        calculate_required_sample_size(params)
    }

    // ---------------------------------------------------------------------
    // Reporting & interop
    // ---------------------------------------------------------------------

    /// Per-variant summary of every tracked and observed metric.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`.
    pub fn generate_report(&self, experiment_id: &str) -> Result<ExperimentReport> {
        let experiment = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        let progress = self.metrics.get_experiment_progress(experiment_id)?;

        let mut metric_names: Vec<String> =
            experiment.tracked_metrics().map(str::to_string).collect();
        for name in self.metrics.metric_names(experiment_id) {
            if !metric_names.contains(&name) {
                metric_names.push(name);
            }
        }

        let mut variants = Vec::with_capacity(experiment.variants().len());
        for variant in experiment.variants() {
            let mut metrics = Vec::new();
            for metric_name in &metric_names {
                let statistics =
                    self.metrics
                        .get_aggregated_metrics(experiment_id, variant.id(), metric_name)?;
                if statistics.count > 0 {
                    metrics.push(MetricSummary {
                        metric_name: metric_name.clone(),
                        statistics,
                    });
                }
            }
            variants.push(VariantReport {
                variant_id: variant.id().to_string(),
                name: variant.name().to_string(),
                weight: variant.weight(),
                metrics,
            });
        }

        Ok(ExperimentReport {
            experiment_id: experiment.id().to_string(),
            name: experiment.name().to_string(),
            status: experiment.status(),
            primary_metric: experiment.primary_metric().to_string(),
            progress,
            winning_variant: experiment.winning_variant().map(str::to_string),
            conclusion: experiment.conclusion().map(str::to_string),
            variants,
            generated_at: Utc::now(),
        })
    }

    /// Bulleted text listing of experiments for operator tooling.
    #[must_use]
    pub fn render_experiment_list(&self, status: Option<ExperimentStatus>) -> String {
        report::render_experiment_list(&self.registry.list(status))
    }

    /// Self-contained snapshot of one experiment and its observations.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`.
    pub fn export_experiment(&self, experiment_id: &str) -> Result<ExperimentSnapshot> {
        let experiment = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        let mut metrics = self.metrics.experiment_metrics(experiment_id);
        metrics.sort_by(|a, b| {
            (a.variant_id(), a.subject_id(), a.metric_name())
                .cmp(&(b.variant_id(), b.subject_id(), b.metric_name()))
        });
        Ok(ExperimentSnapshot {
            experiment,
            metrics,
        })
    }

    /// Register an exported experiment (keeping its status) and its observations.
    ///
    /// The whole snapshot is validated before anything is registered.
    ///
    /// # Errors
    ///
    /// - `InvalidAllocation` / `InvalidExperiment` for a bad definition
    /// - `DuplicateExperiment` if the ID is taken
    /// - `InvalidInput` for observations of another experiment or non-finite values
    /// - `VariantNotFound` for observations of unknown variants
    pub fn import_experiment(&self, snapshot: ExperimentSnapshot) -> Result<Experiment> {
        let ExperimentSnapshot {
            experiment,
            metrics,
        } = snapshot;
        experiment.validate()?;

        for observation in &metrics {
            if observation.experiment_id() != experiment.id() {
                return Err(Error::InvalidInput(format!(
                    "observation for experiment '{}' inside snapshot of '{}'",
                    observation.experiment_id(),
                    experiment.id()
                )));
            }
            if !experiment.has_variant(observation.variant_id()) {
                return Err(Error::VariantNotFound {
                    experiment_id: experiment.id().to_string(),
                    variant_id: observation.variant_id().to_string(),
                });
            }
            if !observation.value().is_finite() {
                return Err(Error::InvalidInput(format!(
                    "observation for subject '{}' has non-finite value",
                    observation.subject_id()
                )));
            }
        }

        let imported = self.registry.restore(experiment)?;
        let count = metrics.len();
        for observation in metrics {
            self.metrics.record(observation)?;
        }
        self.mark_dirty();
        info!(
            experiment_id = imported.id(),
            observations = count,
            "imported experiment"
        );
        Ok(imported)
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Point-in-time copy of both stores.
    ///
    /// Only observations of the listed experiments' variants are included.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let experiments = self.registry.list(None);
        let by_id: FxHashMap<&str, &Experiment> =
            experiments.iter().map(|e| (e.id(), e)).collect();
        let metrics = self
            .metrics
            .all_metrics()
            .into_iter()
            .filter(|o| {
                by_id
                    .get(o.experiment_id())
                    .is_some_and(|e| e.has_variant(o.variant_id()))
            })
            .collect();
        EngineSnapshot::new(experiments, metrics)
    }

    /// Whether changes exist that have not been durably saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.store.is_some()
            && self.generation.load(Ordering::Acquire) != self.flushed.load(Ordering::Acquire)
    }

    /// Write a snapshot if anything changed since the last successful flush.
    ///
    /// Returns whether a snapshot was written. Reads and writes continue
    /// while the snapshot is on its way to disk.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the engine stays dirty so a later flush
    /// retries.
    pub fn flush(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let generation = self.generation.load(Ordering::Acquire);
        if generation == self.flushed.load(Ordering::Acquire) {
            return Ok(false);
        }

        let snapshot = self.snapshot();
        match store.save(&snapshot) {
            Ok(()) => {
                self.flushed.store(generation, Ordering::Release);
                debug!(
                    generation,
                    experiments = snapshot.experiments.len(),
                    metrics = snapshot.metrics.len(),
                    "flushed snapshot"
                );
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, generation, "snapshot flush failed; will retry");
                Err(e)
            }
        }
    }
}

/// Builder for [`AbTestEngine`].
#[derive(Default)]
pub struct AbTestEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl AbTestEngineBuilder {
    /// Start from an existing configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist snapshots as JSON at `path`.
    #[must_use]
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_path = Some(path.into());
        self
    }

    /// Use a custom snapshot store (takes precedence over `data_path`).
    #[must_use]
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the background flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_secs = interval.as_secs();
        self
    }

    /// Set the background cleanup interval.
    #[must_use]
    pub const fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval_secs = interval.as_secs();
        self
    }

    /// Set how long ended experiments are retained.
    #[must_use]
    pub const fn retention_days(mut self, days: u32) -> Self {
        self.config.retention_days = days;
        self
    }

    /// Set the confidence level applied by [`AbTestEngine::experiment_builder`].
    #[must_use]
    pub const fn default_confidence_level(mut self, level: f64) -> Self {
        self.config.default_confidence_level = level;
        self
    }

    /// Build the engine, restoring any previously saved snapshot.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an invalid configuration
    /// - storage/serialization errors if a saved snapshot cannot be read
    /// - validation errors if the saved snapshot is inconsistent
    pub fn build(self) -> Result<AbTestEngine> {
        self.config.validate()?;
        let store = self.store.or_else(|| {
            self.config
                .data_path
                .clone()
                .map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn SnapshotStore>)
        });

        let saved = match &store {
            Some(store) => store.load()?,
            None => None,
        };

        let engine = AbTestEngine::empty(self.config, store);
        if let Some(snapshot) = saved {
            engine.restore(snapshot)?;
            info!(
                experiments = engine.registry.len(),
                observations = engine.metrics.len(),
                "restored engine state"
            );
        }
        Ok(engine)
    }
}

#[cfg(feature = "tokio")]
pub use maintenance::MaintenanceTask;

#[cfg(feature = "tokio")]
mod maintenance {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;
    use tokio::time::{interval, MissedTickBehavior};
    use tracing::{error, info, warn};

    use super::AbTestEngine;

    /// Handle to the background flush/cleanup loop.
    #[derive(Debug)]
    pub struct MaintenanceTask {
        shutdown: Arc<Notify>,
        handle: JoinHandle<()>,
    }

    impl MaintenanceTask {
        /// Stop the loop and wait for its final flush.
        pub async fn shutdown(self) {
            self.shutdown.notify_one();
            if let Err(e) = self.handle.await {
                error!(error = %e, "maintenance task panicked");
            }
        }
    }

    async fn flush_off_thread(engine: &Arc<AbTestEngine>) {
        let engine = Arc::clone(engine);
        match tokio::task::spawn_blocking(move || engine.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "background flush failed"),
            Err(e) => error!(error = %e, "background flush task panicked"),
        }
    }

    impl AbTestEngine {
        /// Spawn periodic flush and stale-experiment cleanup on the current
        /// tokio runtime.
        #[must_use]
        pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceTask {
            let engine = Arc::clone(self);
            let shutdown = Arc::new(Notify::new());
            let signal = Arc::clone(&shutdown);

            let handle = tokio::spawn(async move {
                let mut flush_tick = interval(engine.config.flush_interval());
                let mut cleanup_tick = interval(engine.config.cleanup_interval());
                flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // First ticks complete immediately
                flush_tick.tick().await;
                cleanup_tick.tick().await;

                info!("maintenance loop started");
                loop {
                    tokio::select! {
                        () = signal.notified() => break,
                        _ = flush_tick.tick() => flush_off_thread(&engine).await,
                        _ = cleanup_tick.tick() => {
                            engine.cleanup_stale_experiments(Utc::now());
                        }
                    }
                }
                flush_off_thread(&engine).await;
                info!("maintenance loop stopped");
            });

            MaintenanceTask { shutdown, handle }
        }
    }
}
