//! Experiment Schema and Stores
//!
//! Data structures for A/B experiments plus the two concurrent stores that
//! own them.
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Variant (N)            [owned inline, ordered]
//!     │
//!     └──< MetricObservation (N)            [one current value per
//!                                            variant × subject × metric]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_ab::experiment::{
//!     Experiment, ExperimentRegistry, MetricObservation, MetricsStore, Variant,
//! };
//!
//! let registry = Arc::new(ExperimentRegistry::new());
//! registry.create(
//!     Experiment::builder("checkout-cta", "Checkout button copy")
//!         .variant(Variant::new("control", "Buy now", 50.0))
//!         .variant(Variant::new("treatment", "Complete purchase", 50.0))
//!         .primary_metric("converted")
//!         .build(),
//! )?;
//! registry.start("checkout-cta")?;
//!
//! let metrics = MetricsStore::new(Arc::clone(&registry));
//! metrics.record(MetricObservation::new("checkout-cta", "control", "user-1", "converted", 1.0))?;
//! # Ok::<(), trueno_ab::Error>(())
//! ```

mod experiment_record;
mod metric_record;
mod registry;
mod store;
mod variant;

pub use experiment_record::{
    Experiment, ExperimentBuilder, ExperimentStatus, CONTROL_VARIANT_ID, DEFAULT_CONFIDENCE_LEVEL,
};
pub use metric_record::{MetricKind, MetricObservation, MetricObservationBuilder};
pub use registry::ExperimentRegistry;
pub use store::{AggregateStatistics, ExperimentProgress, MetricsStore, VariantStatistics};
pub use variant::Variant;
