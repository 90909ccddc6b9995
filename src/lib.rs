//! # Trueno-AB: Embedded A/B Testing Engine
//!
//! **Version**: 0.1.0
//!
//! Trueno-AB assigns subjects to experiment variants, collects per-subject
//! metric observations, and decides with frequentist hypothesis tests
//! whether a variant beats its control.
//!
//! ## Components
//!
//! ```text
//! ExperimentRegistry ──> AssignmentEngine     (hash bucketing)
//!        │
//!        └──────────> MetricsStore ──> StatisticalAnalyzer
//!                          │             (z-test / Welch t-test)
//!                          └──> persistence (JSON snapshots)
//! ```
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke**: Allocations that do not sum to 100 are rejected, never normalized
//! - **Heijunka**: Sharded maps keep concurrent subjects from blocking each other
//! - **Jidoka**: Analysis flags insufficient power instead of hiding results
//! - **Genchi Genbutsu**: Assignment is a pure hash, reproducible after restart
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_ab::experiment::{MetricKind, MetricObservation, Variant};
//! use trueno_ab::AbTestEngine;
//!
//! let engine = AbTestEngine::builder().build()?;
//! engine.create_experiment(
//!     engine
//!         .experiment_builder("pricing-page", "Annual plan highlight")
//!         .variant(Variant::new("control", "Monthly first", 50.0))
//!         .variant(Variant::new("treatment", "Annual first", 50.0))
//!         .primary_metric("upgraded")
//!         .sample_size_required(2_000)
//!         .build(),
//! )?;
//! engine.start_experiment("pricing-page")?;
//!
//! for user in 0..200 {
//!     let subject = format!("user-{user}");
//!     let variant = engine.assign_variant("pricing-page", &subject)?;
//!     let upgraded = if user % 7 == 0 { 1.0 } else { 0.0 };
//!     engine.record_metric(
//!         MetricObservation::builder("pricing-page", variant.id(), subject, "upgraded", upgraded)
//!             .kind(MetricKind::Binary)
//!             .build(),
//!     )?;
//! }
//!
//! if let Some(result) = engine.analyze_experiment("pricing-page", "upgraded", None)? {
//!     assert!(!result.sufficient_power);
//! }
//! # Ok::<(), trueno_ab::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod assignment;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod persistence;
pub mod report;
pub mod stats;

pub use config::EngineConfig;
pub use engine::{AbTestEngine, AbTestEngineBuilder};
pub use error::{Error, Result};
