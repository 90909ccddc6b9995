//! Per-variant experiment reports and operator listings

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::{AggregateStatistics, Experiment, ExperimentProgress, ExperimentStatus};

/// Summary of one metric for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Metric name.
    pub metric_name: String,
    /// Aggregate over current observations.
    pub statistics: AggregateStatistics,
}

/// Per-variant section of an [`ExperimentReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
    /// Variant ID.
    pub variant_id: String,
    /// Display name.
    pub name: String,
    /// Allocation weight (percent).
    pub weight: f64,
    /// One entry per tracked or observed metric.
    pub metrics: Vec<MetricSummary>,
}

/// Per-variant metrics summary of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    /// Experiment ID.
    pub experiment_id: String,
    /// Experiment name.
    pub name: String,
    /// Lifecycle status at report time.
    pub status: ExperimentStatus,
    /// Primary metric name.
    pub primary_metric: String,
    /// Sample-size progress.
    pub progress: ExperimentProgress,
    /// Declared winner, if completed with one.
    pub winning_variant: Option<String>,
    /// Conclusion or stop reason.
    pub conclusion: Option<String>,
    /// Variant sections in allocation order.
    pub variants: Vec<VariantReport>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Experiment: {} ({})", self.name, self.experiment_id)?;
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Primary metric: {}", self.primary_metric)?;
        writeln!(
            f,
            "Progress: {} subjects ({:.1}%{})",
            self.progress.total_sample_size,
            self.progress.percentage_complete,
            if self.progress.complete { ", complete" } else { "" }
        )?;
        if let Some(winner) = &self.winning_variant {
            writeln!(f, "Winner: {winner}")?;
        }
        if let Some(conclusion) = &self.conclusion {
            writeln!(f, "Conclusion: {conclusion}")?;
        }

        for variant in &self.variants {
            writeln!(f)?;
            writeln!(f, "  {} ({}) - {}%", variant.name, variant.variant_id, variant.weight)?;
            if variant.metrics.is_empty() {
                writeln!(f, "    no observations")?;
            }
            for metric in &variant.metrics {
                let s = &metric.statistics;
                writeln!(
                    f,
                    "    {}: n={} mean={:.4} sd={:.4} sum={:.4}",
                    metric.metric_name, s.count, s.mean, s.std_dev, s.sum
                )?;
            }
        }
        Ok(())
    }
}

/// Render experiments as a bulleted list for operator tooling.
///
/// ```text
/// • Checkout button copy (checkout-cta) [running]
///   variants: control 50%, treatment 50% | metric: converted
/// ```
#[must_use]
pub fn render_experiment_list(experiments: &[Experiment]) -> String {
    if experiments.is_empty() {
        return "No experiments.\n".to_string();
    }

    let mut out = String::new();
    for experiment in experiments {
        let variants = experiment
            .variants()
            .iter()
            .map(|v| format!("{} {}%", v.id(), v.weight()))
            .collect::<Vec<_>>()
            .join(", ");

        let _ = writeln!(
            out,
            "• {} ({}) [{}]",
            experiment.name(),
            experiment.id(),
            experiment.status()
        );
        let _ = write!(
            out,
            "  variants: {variants} | metric: {}",
            experiment.primary_metric()
        );
        if let Some(winner) = experiment.winning_variant() {
            let _ = write!(out, " | winner: {winner}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Variant;

    #[test]
    fn test_render_empty() {
        assert_eq!(render_experiment_list(&[]), "No experiments.\n");
    }

    #[test]
    fn test_render_lists_variants_and_status() {
        let experiment = Experiment::builder("checkout-cta", "Checkout button copy")
            .variant(Variant::new("control", "Buy now", 70.0))
            .variant(Variant::new("treatment", "Complete purchase", 30.0))
            .primary_metric("converted")
            .build();
        let text = render_experiment_list(&[experiment]);
        assert!(text.contains("Checkout button copy (checkout-cta) [draft]"));
        assert!(text.contains("control 70%, treatment 30%"));
        assert!(text.contains("metric: converted"));
        assert!(!text.contains("winner"));
    }

    #[test]
    fn test_report_display() {
        let report = ExperimentReport {
            experiment_id: "e".to_string(),
            name: "E".to_string(),
            status: ExperimentStatus::Running,
            primary_metric: "m".to_string(),
            progress: ExperimentProgress {
                total_sample_size: 3,
                percentage_complete: 30.0,
                complete: false,
            },
            winning_variant: None,
            conclusion: None,
            variants: vec![VariantReport {
                variant_id: "control".to_string(),
                name: "Control".to_string(),
                weight: 100.0,
                metrics: vec![MetricSummary {
                    metric_name: "m".to_string(),
                    statistics: AggregateStatistics::from_values([1.0, 0.0, 1.0]),
                }],
            }],
            generated_at: Utc::now(),
        };
        let text = report.to_string();
        assert!(text.contains("Status: running"));
        assert!(text.contains("3 subjects (30.0%)"));
        assert!(text.contains("m: n=3 mean=0.6667"));
    }
}
