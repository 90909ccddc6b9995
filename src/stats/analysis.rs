//! Hypothesis testing of a treatment variant against control

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::distribution::{normal_cdf, normal_quantile, student_t_quantile, student_t_two_sided_p};
use crate::experiment::{
    AggregateStatistics, Experiment, ExperimentRegistry, MetricKind, MetricObservation,
    MetricsStore,
};
use crate::{Error, Result};

/// Which test produced an [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Pooled two-proportion z-test (binary metrics).
    TwoProportionZ,
    /// Welch's unequal-variance t-test (numeric metrics).
    WelchT,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TwoProportionZ => "two-proportion z-test",
            Self::WelchT => "Welch t-test",
        })
    }
}

/// Outcome of a two-sample test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    /// z or t statistic (treatment minus control).
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Welch-Satterthwaite degrees of freedom; `None` for the z-test.
    pub degrees_of_freedom: Option<f64>,
    /// Standard error of the mean difference, used for the interval.
    ///
    /// Unpooled; the z-test falls back to the pooled error when the unpooled
    /// one collapses to 0.
    pub standard_error: f64,
}

impl TestOutcome {
    /// Two-sided critical value at `confidence_level` for this test's distribution.
    #[must_use]
    pub fn critical_value(&self, confidence_level: f64) -> f64 {
        let p = 1.0 - (1.0 - confidence_level) / 2.0;
        self.degrees_of_freedom
            .map_or_else(|| normal_quantile(p), |df| student_t_quantile(p, df))
    }
}

/// Confidence interval around a point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Coverage, e.g. 0.95.
    pub level: f64,
}

impl ConfidenceInterval {
    /// Whether `value` lies inside the interval (inclusive).
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Result of comparing one treatment variant against control on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Analyzed experiment.
    pub experiment_id: String,
    /// Analyzed metric.
    pub metric_name: String,
    /// Control variant ID.
    pub control_variant: String,
    /// Treatment variant ID.
    pub treatment_variant: String,
    /// Test used.
    pub test: TestKind,
    /// Control mean (conversion rate for binary metrics).
    pub control_mean: f64,
    /// Treatment mean.
    pub treatment_mean: f64,
    /// Control sample size.
    pub control_sample_size: u64,
    /// Treatment sample size.
    pub treatment_sample_size: u64,
    /// `treatment_mean - control_mean`.
    pub absolute_difference: f64,
    /// `(treatment - control) / control`; `None` when the control mean is 0.
    pub relative_uplift: Option<f64>,
    /// Interval around `relative_uplift`; `None` when the uplift is undefined,
    /// an arm has fewer than 2 observations, or the standard error is 0.
    pub confidence_interval: Option<ConfidenceInterval>,
    /// z or t statistic.
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Welch degrees of freedom (t-test only).
    pub degrees_of_freedom: Option<f64>,
    /// Confidence level the significance decision used.
    pub confidence_level: f64,
    /// `p_value < 1 - confidence_level`, with at least 2 observations per arm.
    pub significant: bool,
    /// Combined sample size reached the experiment's requirement.
    pub sufficient_power: bool,
    /// The experiment's required sample size.
    pub required_sample_size: u64,
}

/// Pooled two-proportion z-test.
///
/// `x` are success counts, `n` trial counts. A degenerate pooled rate of 0 or 1
/// yields `z = 0, p = 1`. Rates of exactly 0 and 1 report the pooled standard
/// error.
#[must_use]
pub fn two_proportion_z_test(x1: f64, n1: f64, x2: f64, n2: f64) -> TestOutcome {
    let p1 = x1 / n1;
    let p2 = x2 / n2;
    let pooled = (x1 + x2) / (n1 + n2);
    let se_pooled = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    let unpooled = (p1 * (1.0 - p1) / n1 + p2 * (1.0 - p2) / n2).max(0.0).sqrt();
    let standard_error = if unpooled > 0.0 { unpooled } else { se_pooled };

    if se_pooled == 0.0 || !se_pooled.is_finite() {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
            degrees_of_freedom: None,
            standard_error,
        };
    }

    let z = (p2 - p1) / se_pooled;
    TestOutcome {
        statistic: z,
        p_value: (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0),
        degrees_of_freedom: None,
        standard_error,
    }
}

/// Welch's two-sample t-test on summary statistics.
///
/// An arm with fewer than 2 observations has no variance estimate and yields
/// `t = 0, p = 1`.
#[must_use]
pub fn welch_t_test(control: &AggregateStatistics, treatment: &AggregateStatistics) -> TestOutcome {
    #[allow(clippy::cast_precision_loss)]
    let (n1, n2) = (control.count as f64, treatment.count as f64);
    let a = control.variance / n1;
    let b = treatment.variance / n2;
    let standard_error = (a + b).sqrt();
    let diff = treatment.mean - control.mean;

    if control.count < 2 || treatment.count < 2 {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
            degrees_of_freedom: None,
            standard_error,
        };
    }

    let welch_term = |v: f64, n: f64| if n > 1.0 { v * v / (n - 1.0) } else { 0.0 };
    let denominator = welch_term(a, n1) + welch_term(b, n2);
    let df = if denominator > 0.0 {
        (a + b).powi(2) / denominator
    } else {
        f64::INFINITY
    };

    let (statistic, p_value) = if standard_error == 0.0 {
        if diff == 0.0 {
            (0.0, 1.0)
        } else {
            (diff.signum() * f64::INFINITY, 0.0)
        }
    } else {
        let t = diff / standard_error;
        (t, student_t_two_sided_p(t, df).clamp(0.0, 1.0))
    };

    TestOutcome {
        statistic,
        p_value,
        degrees_of_freedom: Some(df),
        standard_error,
    }
}

/// Every value is 0 or 1. A `binary` tag on out-of-range values is ignored.
fn is_binary(observations: &[MetricObservation]) -> bool {
    let zero_one = observations
        .iter()
        .all(|o| o.value() == 0.0 || o.value() == 1.0);
    if !zero_one {
        if let Some(tagged) = observations.iter().find(|o| o.kind() == MetricKind::Binary) {
            warn!(
                experiment_id = tagged.experiment_id(),
                variant_id = tagged.variant_id(),
                metric = tagged.metric_name(),
                "binary metric has values outside {{0, 1}}, using Welch t-test"
            );
        }
    }
    zero_one
}

/// Statistical analysis engine over the registry and metrics store.
#[derive(Debug, Clone)]
pub struct StatisticalAnalyzer {
    registry: Arc<ExperimentRegistry>,
    metrics: Arc<MetricsStore>,
}

impl StatisticalAnalyzer {
    /// Create an analyzer.
    #[must_use]
    pub const fn new(registry: Arc<ExperimentRegistry>, metrics: Arc<MetricsStore>) -> Self {
        Self { registry, metrics }
    }

    /// Compare `variant_id` (default: first non-control variant) against control.
    ///
    /// Metrics whose values are all 0/1 use the two-proportion z-test;
    /// everything else uses Welch's t-test.
    ///
    /// Returns `Ok(None)` when either arm has no observations for the metric
    /// or the experiment has no treatment variant.
    ///
    /// # Errors
    ///
    /// - `ExperimentNotFound` / `VariantNotFound` for unknown references
    /// - `InvalidInput` if `variant_id` is the control variant itself
    pub fn analyze_experiment(
        &self,
        experiment_id: &str,
        metric_name: &str,
        variant_id: Option<&str>,
    ) -> Result<Option<AnalysisResult>> {
        let experiment = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        let Some(control) = experiment.control_variant().map(|v| v.id().to_string()) else {
            return Ok(None);
        };

        let treatment = match variant_id {
            Some(id) if id == control => {
                return Err(Error::InvalidInput(format!(
                    "variant '{id}' is the control of experiment '{experiment_id}'"
                )));
            }
            Some(id) => {
                if !experiment.has_variant(id) {
                    return Err(Error::VariantNotFound {
                        experiment_id: experiment_id.to_string(),
                        variant_id: id.to_string(),
                    });
                }
                id.to_string()
            }
            None => match experiment.treatment_variants().next() {
                Some(v) => v.id().to_string(),
                None => return Ok(None),
            },
        };

        self.compare(&experiment, metric_name, &control, &treatment)
    }

    /// Compare every non-control variant against control.
    ///
    /// Variants without data on either side are omitted.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` if the experiment is unknown.
    pub fn analyze_all(&self, experiment_id: &str, metric_name: &str) -> Result<Vec<AnalysisResult>> {
        let experiment = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        let Some(control) = experiment.control_variant().map(|v| v.id().to_string()) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for treatment in experiment.treatment_variants() {
            if let Some(result) = self.compare(&experiment, metric_name, &control, treatment.id())? {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn compare(
        &self,
        experiment: &Experiment,
        metric_name: &str,
        control: &str,
        treatment: &str,
    ) -> Result<Option<AnalysisResult>> {
        let control_obs = self
            .metrics
            .get_metrics(experiment.id(), control, Some(metric_name))?;
        let treatment_obs = self
            .metrics
            .get_metrics(experiment.id(), treatment, Some(metric_name))?;

        if control_obs.is_empty() || treatment_obs.is_empty() {
            debug!(
                experiment_id = experiment.id(),
                metric = metric_name,
                control_n = control_obs.len(),
                treatment_n = treatment_obs.len(),
                "skipping analysis: an arm has no observations"
            );
            return Ok(None);
        }

        let control_stats =
            AggregateStatistics::from_values(control_obs.iter().map(MetricObservation::value));
        let treatment_stats =
            AggregateStatistics::from_values(treatment_obs.iter().map(MetricObservation::value));

        let binary = is_binary(&control_obs) && is_binary(&treatment_obs);
        let (test, outcome) = if binary {
            #[allow(clippy::cast_precision_loss)]
            let outcome = two_proportion_z_test(
                control_stats.sum,
                control_stats.count as f64,
                treatment_stats.sum,
                treatment_stats.count as f64,
            );
            (TestKind::TwoProportionZ, outcome)
        } else {
            (TestKind::WelchT, welch_t_test(&control_stats, &treatment_stats))
        };

        let confidence_level = experiment.confidence_level();
        let absolute_difference = treatment_stats.mean - control_stats.mean;
        let relative_uplift =
            (control_stats.mean != 0.0).then(|| absolute_difference / control_stats.mean);

        let enough_data = control_stats.count >= 2 && treatment_stats.count >= 2;

        let confidence_interval = relative_uplift.filter(|_| enough_data).and_then(|uplift| {
            let margin =
                outcome.critical_value(confidence_level) * outcome.standard_error / control_stats.mean.abs();
            (margin.is_finite() && margin > 0.0).then(|| ConfidenceInterval {
                lower: uplift - margin,
                upper: uplift + margin,
                level: confidence_level,
            })
        });

        let combined = control_stats.count + treatment_stats.count;
        let result = AnalysisResult {
            experiment_id: experiment.id().to_string(),
            metric_name: metric_name.to_string(),
            control_variant: control.to_string(),
            treatment_variant: treatment.to_string(),
            test,
            control_mean: control_stats.mean,
            treatment_mean: treatment_stats.mean,
            control_sample_size: control_stats.count,
            treatment_sample_size: treatment_stats.count,
            absolute_difference,
            relative_uplift,
            confidence_interval,
            statistic: outcome.statistic,
            p_value: outcome.p_value,
            degrees_of_freedom: outcome.degrees_of_freedom,
            confidence_level,
            significant: enough_data && outcome.p_value < 1.0 - confidence_level,
            sufficient_power: combined >= experiment.sample_size_required(),
            required_sample_size: experiment.sample_size_required(),
        };

        debug!(
            experiment_id = experiment.id(),
            metric = metric_name,
            test = %result.test,
            statistic = result.statistic,
            p_value = result.p_value,
            significant = result.significant,
            "analyzed experiment"
        );
        Ok(Some(result))
    }
}
