//! Statistical analysis tests
//!
//! Two-proportion z-test, Welch t-test, uplift intervals, power flags and
//! sample-size planning through the engine API.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trueno_ab::experiment::{Experiment, MetricKind, MetricObservation, Variant};
use trueno_ab::stats::{SampleSizeParams, TestKind};
use trueno_ab::{AbTestEngine, Error};

fn engine(id: &str, variants: &[&str], sample_size_required: u64) -> AbTestEngine {
    let engine = AbTestEngine::builder().build().unwrap();
    #[allow(clippy::cast_precision_loss)]
    let weight = 100.0 / variants.len() as f64;
    let variants = variants
        .iter()
        .map(|v| Variant::new(*v, *v, weight))
        .collect();
    engine
        .create_experiment(
            Experiment::builder(id, "Analysis")
                .variants(variants)
                .primary_metric("converted")
                .sample_size_required(sample_size_required)
                .build(),
        )
        .unwrap();
    engine.start_experiment(id).unwrap();
    engine
}

fn record_binary(engine: &AbTestEngine, id: &str, variant: &str, n: usize, converted: impl Fn(usize) -> bool) {
    for i in 0..n {
        engine
            .record_metric(
                MetricObservation::builder(
                    id,
                    variant,
                    format!("{variant}-{i}"),
                    "converted",
                    if converted(i) { 1.0 } else { 0.0 },
                )
                .kind(MetricKind::Binary)
                .build(),
            )
            .unwrap();
    }
}

fn record_numeric(engine: &AbTestEngine, id: &str, variant: &str, values: &[f64]) {
    for (i, value) in values.iter().enumerate() {
        engine
            .record_metric(MetricObservation::new(
                id,
                variant,
                format!("{variant}-{i}"),
                "revenue",
                *value,
            ))
            .unwrap();
    }
}

// =============================================================================
// Two-proportion z-test
// =============================================================================

#[test]
fn test_ten_vs_fifteen_percent_is_significant() {
    let engine = engine("conv", &["control", "treatment"], 2_000);
    record_binary(&engine, "conv", "control", 1_000, |i| i % 10 == 0);
    record_binary(&engine, "conv", "treatment", 1_000, |i| i % 20 < 3);

    let result = engine
        .analyze_experiment("conv", "converted", None)
        .unwrap()
        .expect("both arms have data");

    assert_eq!(result.test, TestKind::TwoProportionZ);
    assert_eq!(result.control_variant, "control");
    assert_eq!(result.treatment_variant, "treatment");
    assert!((result.control_mean - 0.10).abs() < 1e-9);
    assert!((result.treatment_mean - 0.15).abs() < 1e-9);
    assert!((result.relative_uplift.unwrap() - 0.5).abs() < 1e-9);
    assert!(result.significant);
    assert!(result.p_value < 0.01);
    assert!(result.statistic > 1.96);
    assert!(result.sufficient_power);

    let ci = result.confidence_interval.unwrap();
    assert!(ci.lower < 0.5 && 0.5 < ci.upper);
    assert!(ci.lower > 0.0, "interval should exclude zero, got {ci:?}");
    assert!((ci.level - 0.95).abs() < f64::EPSILON);
}

#[test]
fn test_equal_rates_are_not_significant() {
    let engine = engine("flat", &["control", "treatment"], 0);
    record_binary(&engine, "flat", "control", 500, |i| i % 5 == 0);
    record_binary(&engine, "flat", "treatment", 500, |i| i % 5 == 1);

    let result = engine
        .analyze_experiment("flat", "converted", None)
        .unwrap()
        .unwrap();
    assert!(!result.significant);
    assert!(result.relative_uplift.unwrap().abs() < 1e-12);
    assert!(result.confidence_interval.unwrap().contains(0.0));
}

#[test]
fn test_untagged_zero_one_values_use_z_test() {
    let engine = engine("untagged", &["control", "treatment"], 0);
    for i in 0..100 {
        let v = if i % 4 == 0 { 1.0 } else { 0.0 };
        engine
            .record_metric(MetricObservation::new("untagged", "control", format!("c{i}"), "converted", v))
            .unwrap();
        engine
            .record_metric(MetricObservation::new("untagged", "treatment", format!("t{i}"), "converted", v))
            .unwrap();
    }
    let result = engine
        .analyze_experiment("untagged", "converted", None)
        .unwrap()
        .unwrap();
    assert_eq!(result.test, TestKind::TwoProportionZ);
}

#[test]
fn test_zero_control_rate_leaves_uplift_undefined() {
    let engine = engine("zero", &["control", "treatment"], 0);
    record_binary(&engine, "zero", "control", 100, |_| false);
    record_binary(&engine, "zero", "treatment", 100, |i| i % 10 == 0);

    let result = engine
        .analyze_experiment("zero", "converted", None)
        .unwrap()
        .unwrap();
    assert!(result.relative_uplift.is_none());
    assert!(result.confidence_interval.is_none());
    assert!((result.absolute_difference - 0.1).abs() < 1e-12);
}

// =============================================================================
// Welch t-test
// =============================================================================

#[test]
fn test_numeric_means_use_welch() {
    let engine = engine("rev", &["control", "treatment"], 200);
    let mut rng = StdRng::seed_from_u64(42);
    let control: Vec<f64> = (0..100).map(|_| rng.gen_range(90.0..110.0)).collect();
    let treatment: Vec<f64> = (0..100).map(|_| rng.gen_range(100.0..120.0)).collect();
    record_numeric(&engine, "rev", "control", &control);
    record_numeric(&engine, "rev", "treatment", &treatment);

    let result = engine
        .analyze_experiment("rev", "revenue", None)
        .unwrap()
        .unwrap();

    assert_eq!(result.test, TestKind::WelchT);
    assert!(result.treatment_mean > result.control_mean);
    assert!((90.0..110.0).contains(&result.control_mean));
    assert!((100.0..120.0).contains(&result.treatment_mean));
    assert!(result.significant);
    assert!(result.sufficient_power);
    let df = result.degrees_of_freedom.unwrap();
    assert!(df > 150.0 && df <= 198.0, "df = {df}");

    let uplift = result.relative_uplift.unwrap();
    let ci = result.confidence_interval.unwrap();
    assert!(ci.lower < uplift && uplift < ci.upper);
}

#[test]
fn test_identical_constant_samples() {
    let engine = engine("const", &["control", "treatment"], 0);
    record_numeric(&engine, "const", "control", &[7.5; 10]);
    record_numeric(&engine, "const", "treatment", &[7.5; 10]);

    let result = engine
        .analyze_experiment("const", "revenue", None)
        .unwrap()
        .unwrap();
    assert!(!result.significant);
    assert!(!result.p_value.is_nan());
    assert!(result.statistic.abs() < f64::EPSILON);
    assert!(result.confidence_interval.is_none());
}

#[test]
fn test_single_observation_per_arm_is_not_significant() {
    let engine = engine("single", &["control", "treatment"], 0);
    record_numeric(&engine, "single", "control", &[10.0]);
    record_numeric(&engine, "single", "treatment", &[12.0]);

    let result = engine
        .analyze_experiment("single", "revenue", None)
        .unwrap()
        .unwrap();
    assert_eq!(result.test, TestKind::WelchT);
    assert!(!result.significant);
    assert!(result.statistic.is_finite());
    assert!((result.p_value - 1.0).abs() < f64::EPSILON);
    assert!((result.relative_uplift.unwrap() - 0.2).abs() < 1e-12);
    assert!(result.confidence_interval.is_none());
}

#[test]
fn test_constant_arms_with_different_means_have_no_interval() {
    let engine = engine("steps", &["control", "treatment"], 0);
    record_numeric(&engine, "steps", "control", &[5.0; 10]);
    record_numeric(&engine, "steps", "treatment", &[6.0; 10]);

    let result = engine
        .analyze_experiment("steps", "revenue", None)
        .unwrap()
        .unwrap();
    assert!(result.significant);
    assert!(result.confidence_interval.is_none());
}

#[test]
fn test_certain_versus_impossible_conversion_interval_has_width() {
    let engine = engine("certain", &["control", "treatment"], 0);
    record_binary(&engine, "certain", "control", 50, |_| true);
    record_binary(&engine, "certain", "treatment", 50, |_| false);

    let result = engine
        .analyze_experiment("certain", "converted", None)
        .unwrap()
        .unwrap();
    assert_eq!(result.test, TestKind::TwoProportionZ);
    assert!(result.significant);

    let uplift = result.relative_uplift.unwrap();
    assert!((uplift + 1.0).abs() < 1e-12);
    let ci = result.confidence_interval.unwrap();
    assert!(ci.lower < uplift && uplift < ci.upper);
}

#[test]
fn test_binary_tag_with_out_of_range_values_uses_welch() {
    let engine = engine("mislabeled", &["control", "treatment"], 0);
    for (variant, values) in [("control", [3.0, 5.0, 4.0, 6.0]), ("treatment", [5.0, 7.0, 6.0, 8.0])] {
        for (i, value) in values.into_iter().enumerate() {
            engine
                .record_metric(
                    MetricObservation::builder("mislabeled", variant, format!("{variant}-{i}"), "converted", value)
                        .kind(MetricKind::Binary)
                        .build(),
                )
                .unwrap();
        }
    }

    let result = engine
        .analyze_experiment("mislabeled", "converted", None)
        .unwrap()
        .unwrap();
    assert_eq!(result.test, TestKind::WelchT);
    assert!(result.p_value.is_finite() && result.p_value < 1.0);
    assert!(result.statistic > 0.0);
}

// =============================================================================
// Missing data, power and targeting
// =============================================================================

#[test]
fn test_empty_arm_returns_none() {
    let engine = engine("empty", &["control", "treatment"], 0);
    record_numeric(&engine, "empty", "control", &[1.0, 2.0, 3.0]);
    assert!(engine
        .analyze_experiment("empty", "revenue", None)
        .unwrap()
        .is_none());
    assert!(engine
        .analyze_experiment("empty", "never_recorded", None)
        .unwrap()
        .is_none());
}

#[test]
fn test_insufficient_power_is_flagged_not_withheld() {
    let engine = engine("small", &["control", "treatment"], 10_000);
    record_binary(&engine, "small", "control", 50, |i| i % 10 == 0);
    record_binary(&engine, "small", "treatment", 50, |i| i % 5 == 0);

    let result = engine
        .analyze_experiment("small", "converted", None)
        .unwrap()
        .expect("result is still returned");
    assert!(!result.sufficient_power);
    assert_eq!(result.required_sample_size, 10_000);
    assert_eq!(result.control_sample_size + result.treatment_sample_size, 100);
}

#[test]
fn test_explicit_variant_and_multi_arm() {
    let engine = engine("abc", &["control", "b", "c"], 0);
    record_binary(&engine, "abc", "control", 300, |i| i % 10 == 0);
    record_binary(&engine, "abc", "b", 300, |i| i % 10 == 0);
    record_binary(&engine, "abc", "c", 300, |i| i % 4 == 0);

    let c = engine
        .analyze_experiment("abc", "converted", Some("c"))
        .unwrap()
        .unwrap();
    assert_eq!(c.treatment_variant, "c");
    assert!(c.significant);

    let default = engine
        .analyze_experiment("abc", "converted", None)
        .unwrap()
        .unwrap();
    assert_eq!(default.treatment_variant, "b");

    let all = engine.analyze_all("abc", "converted").unwrap();
    let arms: Vec<_> = all.iter().map(|r| r.treatment_variant.as_str()).collect();
    assert_eq!(arms, vec!["b", "c"]);
}

#[test]
fn test_analysis_reference_errors() {
    let engine = engine("err", &["control", "treatment"], 0);
    assert!(matches!(
        engine.analyze_experiment("missing", "converted", None),
        Err(Error::ExperimentNotFound(_))
    ));
    assert!(matches!(
        engine.analyze_experiment("err", "converted", Some("ghost")),
        Err(Error::VariantNotFound { .. })
    ));
    assert!(matches!(
        engine.analyze_experiment("err", "converted", Some("control")),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_single_variant_has_nothing_to_compare() {
    let engine = engine("solo", &["control"], 0);
    record_binary(&engine, "solo", "control", 10, |i| i % 2 == 0);
    assert!(engine
        .analyze_experiment("solo", "converted", None)
        .unwrap()
        .is_none());
    assert!(engine.analyze_all("solo", "converted").unwrap().is_empty());
}

#[test]
fn test_custom_confidence_level_widens_interval() {
    let build = |id: &str, level: f64| {
        let engine = AbTestEngine::builder().build().unwrap();
        engine
            .create_experiment(
                Experiment::builder(id, "CI")
                    .variant(Variant::new("control", "C", 50.0))
                    .variant(Variant::new("treatment", "T", 50.0))
                    .primary_metric("converted")
                    .confidence_level(level)
                    .build(),
            )
            .unwrap();
        record_binary(&engine, id, "control", 400, |i| i % 10 == 0);
        record_binary(&engine, id, "treatment", 400, |i| i % 8 == 0);
        engine
            .analyze_experiment(id, "converted", None)
            .unwrap()
            .unwrap()
            .confidence_interval
            .unwrap()
    };

    let ci95 = build("ci95", 0.95);
    let ci99 = build("ci99", 0.99);
    assert!(ci99.upper - ci99.lower > ci95.upper - ci95.lower);
}

// =============================================================================
// Sample-size planning
// =============================================================================

#[test]
fn test_required_sample_size_magnitude() {
    let engine = AbTestEngine::builder().build().unwrap();
    let n = engine
        .calculate_required_sample_size(&SampleSizeParams {
            baseline_rate: 0.1,
            minimum_detectable_effect: 0.05,
            alpha: 0.05,
            power: 0.8,
        })
        .unwrap();
    assert!((100..=10_000).contains(&n), "got {n}");
}
