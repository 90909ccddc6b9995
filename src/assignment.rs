//! Deterministic variant assignment
//!
//! **Problem**: Subjects must see the same variant on every visit, across
//! process restarts, without storing per-subject assignments.
//!
//! **Solution**: Hash `experiment_id:subject_id` with FNV-1a, run the result
//! through a 64-bit finalizer so every input byte reaches the low bits, and
//! reduce modulo 100 to a bucket. Variants own contiguous cumulative bucket
//! ranges in insertion order.
//!
//! ```text
//! weights  70        30
//! buckets  [0 .. 70) [70 .. 100)
//!          control   treatment
//! ```

use std::hash::Hasher;
use std::sync::Arc;

use tracing::debug;

use crate::experiment::{ExperimentRegistry, Variant};
use crate::{Error, Result};

/// Number of allocation buckets (weights are percentages).
pub const BUCKET_COUNT: u64 = 100;

/// Stable bucket in `[0, 100)` for an (experiment, subject) pair.
///
/// Pure function of its inputs: identical across runs, platforms and
/// process restarts.
#[must_use]
pub fn bucket_for(experiment_id: &str, subject_id: &str) -> u8 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(experiment_id.as_bytes());
    hasher.write(b":");
    hasher.write(subject_id.as_bytes());

    #[allow(clippy::cast_possible_truncation)]
    let bucket = (fmix64(hasher.finish()) % BUCKET_COUNT) as u8;
    bucket
}

/// MurmurHash3 64-bit finalizer.
const fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// Pick the variant whose cumulative weight range contains `bucket`.
///
/// Returns `None` only for an empty variant list. If floating-point
/// rounding leaves the top bucket uncovered, the last variant with a
/// positive weight takes it.
#[must_use]
pub fn select_variant(variants: &[Variant], bucket: u8) -> Option<&Variant> {
    let point = f64::from(bucket);
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight();
        if point < cumulative {
            return Some(variant);
        }
    }
    variants
        .iter()
        .rev()
        .find(|v| v.weight() > 0.0)
        .or_else(|| variants.last())
}

/// Assignment engine over the experiment registry.
#[derive(Debug, Clone)]
pub struct AssignmentEngine {
    registry: Arc<ExperimentRegistry>,
}

impl AssignmentEngine {
    /// Create an engine reading allocations from `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ExperimentRegistry>) -> Self {
        Self { registry }
    }

    /// Deterministically assign a subject to a variant.
    ///
    /// # Errors
    ///
    /// - `ExperimentNotFound` if the experiment is unknown
    /// - `InvalidExperiment` if it has no variants (cannot happen for
    ///   registered experiments)
    pub fn assign_variant(&self, experiment_id: &str, subject_id: &str) -> Result<Variant> {
        let bucket = bucket_for(experiment_id, subject_id);
        let variant = self
            .registry
            .with_experiment(experiment_id, |e| select_variant(e.variants(), bucket).cloned())?
            .ok_or_else(|| {
                Error::InvalidExperiment(format!("experiment '{experiment_id}' has no variants"))
            })?;

        debug!(
            experiment_id,
            subject_id,
            bucket,
            variant_id = variant.id(),
            "assigned variant"
        );
        Ok(variant)
    }
}
