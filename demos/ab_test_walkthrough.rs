//! A/B Test Walkthrough
//!
//! Runs a checkout-button experiment end to end: create, start, assign
//! simulated traffic, record conversions and basket values, analyze, report,
//! complete, and persist to a JSON snapshot with background maintenance.
//!
//! Run with: TRUENO_AB_LOG=trueno_ab=debug cargo run --example ab_test_walkthrough

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trueno_ab::experiment::{MetricKind, MetricObservation, Variant};
use trueno_ab::stats::SampleSizeParams;
use trueno_ab::{logging, AbTestEngine};

const EXPERIMENT: &str = "checkout-cta";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    println!("=== Trueno-AB Walkthrough ===\n");

    let data_path = std::env::temp_dir().join("trueno-ab-walkthrough.json");
    // Start from a clean slate on every run
    let _ = std::fs::remove_file(&data_path);

    let engine = Arc::new(
        AbTestEngine::builder()
            .data_path(&data_path)
            .flush_interval(Duration::from_secs(5))
            .build()
            .context("failed to build engine")?,
    );
    let maintenance = engine.spawn_maintenance();

    // -------------------------------------------------------------------------
    // 1. Plan the sample size
    // -------------------------------------------------------------------------
    let per_arm = engine.calculate_required_sample_size(&SampleSizeParams {
        baseline_rate: 0.10,
        minimum_detectable_effect: 0.03,
        ..SampleSizeParams::default()
    })?;
    println!("1. Required sample size: {per_arm} per arm\n");

    // -------------------------------------------------------------------------
    // 2. Create and start the experiment
    // -------------------------------------------------------------------------
    engine.create_experiment(
        engine
            .experiment_builder(EXPERIMENT, "Checkout button copy")
            .description("\"Buy now\" versus \"Complete purchase\"")
            .hypothesis("Action-oriented copy increases checkout conversion")
            .variant(
                Variant::new("control", "Complete purchase", 50.0)
                    .with_config(serde_json::json!({"label": "Complete purchase"})),
            )
            .variant(
                Variant::new("treatment", "Buy now", 50.0)
                    .with_config(serde_json::json!({"label": "Buy now"})),
            )
            .primary_metric("converted")
            .secondary_metric("basket_value")
            .sample_size_required(per_arm * 2)
            .minimum_detectable_effect(0.03)
            .build(),
    )?;
    engine.start_experiment(EXPERIMENT)?;
    print!("2. {}", engine.render_experiment_list(None));

    // -------------------------------------------------------------------------
    // 3. Simulate traffic
    // -------------------------------------------------------------------------
    let mut rng = StdRng::seed_from_u64(7);
    let visitors = per_arm * 2 + 200;
    for n in 0..visitors {
        let subject = format!("visitor-{n}");
        let variant = engine.assign_variant(EXPERIMENT, &subject)?;
        let rate = if variant.id() == "control" { 0.10 } else { 0.13 };
        let converted = rng.gen_bool(rate);

        engine.record_metric(
            MetricObservation::builder(
                EXPERIMENT,
                variant.id(),
                subject.clone(),
                "converted",
                if converted { 1.0 } else { 0.0 },
            )
            .kind(MetricKind::Binary)
            .build(),
        )?;
        if converted {
            engine.record_metric(MetricObservation::new(
                EXPERIMENT,
                variant.id(),
                subject,
                "basket_value",
                rng.gen_range(20.0..120.0),
            ))?;
        }
    }
    let progress = engine.get_experiment_progress(EXPERIMENT)?;
    println!(
        "\n3. Simulated {visitors} visitors: {} subjects, {:.1}% of target",
        progress.total_sample_size, progress.percentage_complete
    );

    // -------------------------------------------------------------------------
    // 4. Analyze
    // -------------------------------------------------------------------------
    println!("\n4. Analysis");
    let mut winner = None;
    for metric in ["converted", "basket_value"] {
        let Some(result) = engine.analyze_experiment(EXPERIMENT, metric, None)? else {
            println!("   {metric}: not enough data");
            continue;
        };
        println!(
            "   {metric} ({}): control {:.4} vs treatment {:.4}, p = {:.4}, significant = {}, powered = {}",
            result.test,
            result.control_mean,
            result.treatment_mean,
            result.p_value,
            result.significant,
            result.sufficient_power
        );
        if let (Some(uplift), Some(ci)) = (result.relative_uplift, result.confidence_interval) {
            println!(
                "      uplift {:+.1}% ({:.0}% CI {:+.1}% .. {:+.1}%)",
                uplift * 100.0,
                ci.level * 100.0,
                ci.lower * 100.0,
                ci.upper * 100.0
            );
        }
        if metric == "converted" && result.significant && result.absolute_difference > 0.0 {
            winner = Some(result.treatment_variant);
        }
    }

    // -------------------------------------------------------------------------
    // 5. Report and conclude
    // -------------------------------------------------------------------------
    println!("\n5. Report\n{}", engine.generate_report(EXPERIMENT)?);

    let conclusion = if winner.is_some() {
        "Buy now converts better"
    } else {
        "No significant difference"
    };
    engine.complete_experiment(EXPERIMENT, winner.as_deref(), conclusion)?;
    print!("{}", engine.render_experiment_list(None));

    // -------------------------------------------------------------------------
    // 6. Persist and reload
    // -------------------------------------------------------------------------
    maintenance.shutdown().await;
    let reloaded = AbTestEngine::builder()
        .data_path(&data_path)
        .build()
        .context("failed to reload snapshot")?;
    let experiment = reloaded
        .get_experiment(EXPERIMENT)
        .context("experiment missing after reload")?;
    println!(
        "\n6. Reloaded from {}: status {}, winner {:?}",
        data_path.display(),
        experiment.status(),
        experiment.winning_variant()
    );

    Ok(())
}
