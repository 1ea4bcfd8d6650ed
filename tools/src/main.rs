//! calc-runner: headless runner for the compensation calculation core.
//!
//! Usage:
//!   calc-runner --fixture data/demo_fixture.json
//!   calc-runner --db calc.db --tenant acme --period 2024-01 --rule-set rs-retail
//!   calc-runner --db calc.db --fixture data/demo_fixture.json --config data/calc_config.json --json

use anyhow::{Context, Result};
use compcalc_core::{
    config::CalcConfig,
    metrics::{AssignedEntity, MetricRow},
    rule_set::RuleSet,
    run_calculation,
    store::CalcStore,
    CalculationOutcome,
};
use std::collections::BTreeMap;
use std::env;

#[derive(serde::Deserialize)]
struct Fixture {
    tenant_id: String,
    period_id: String,
    rule_sets: Vec<RuleSet>,
    assignments: Vec<FixtureAssignment>,
    metric_rows: Vec<MetricRow>,
    #[serde(default)]
    prior_density: BTreeMap<String, f64>,
}

#[derive(serde::Deserialize)]
struct FixtureAssignment {
    rule_set_id: String,
    #[serde(flatten)]
    entity: AssignedEntity,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let config_path = string_arg(&args, "--config").unwrap_or("./data/calc_config.json");
    let fixture_path = string_arg(&args, "--fixture");
    let json_output = args.iter().any(|a| a == "--json");

    let config = CalcConfig::load(config_path)?;
    let store = CalcStore::open(db)?;
    store.migrate()?;

    let fixture = match fixture_path {
        Some(path) => Some(import_fixture(&store, path)?),
        None => None,
    };

    let tenant = string_arg(&args, "--tenant")
        .map(str::to_string)
        .or_else(|| fixture.as_ref().map(|f| f.tenant_id.clone()))
        .context("--tenant is required without a fixture")?;
    let period = string_arg(&args, "--period")
        .map(str::to_string)
        .or_else(|| fixture.as_ref().map(|f| f.period_id.clone()))
        .context("--period is required without a fixture")?;
    let rule_set = string_arg(&args, "--rule-set")
        .map(str::to_string)
        .or_else(|| fixture.as_ref().and_then(|f| f.rule_sets.first()).map(|r| r.id.clone()))
        .context("--rule-set is required without a fixture")?;

    if !json_output {
        println!("calc-runner");
        println!("  db:        {db}");
        println!("  tenant:    {tenant}");
        println!("  period:    {period}");
        println!("  rule set:  {rule_set}");
        println!();
    }

    let outcome = run_calculation(&store, &config, &tenant, &period, &rule_set)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    Ok(())
}

fn import_fixture(store: &CalcStore, path: &str) -> Result<Fixture> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let fixture: Fixture = serde_json::from_str(&content)?;

    for rule_set in &fixture.rule_sets {
        store.insert_rule_set(&fixture.tenant_id, rule_set)?;
    }
    for a in &fixture.assignments {
        store.assign_entity(&a.rule_set_id, &fixture.tenant_id, &a.entity)?;
    }
    let replaced =
        store.replace_metric_rows(&fixture.tenant_id, &fixture.period_id, &fixture.metric_rows)?;
    if replaced > 0 {
        log::info!("replaced {replaced} existing metric rows for {}", fixture.period_id);
    }
    for (signature, density) in &fixture.prior_density {
        store.seed_density(&fixture.tenant_id, signature, *density)?;
    }

    log::info!(
        "imported {path}: {} rule sets, {} assignments, {} metric rows",
        fixture.rule_sets.len(),
        fixture.assignments.len(),
        fixture.metric_rows.len()
    );
    Ok(fixture)
}

fn print_summary(outcome: &CalculationOutcome) {
    let s = &outcome.summary;
    let concordance = outcome
        .concordance_rate
        .map(|r| format!("{:.1}%", r * 100.0))
        .unwrap_or_else(|| "N/A".to_string());

    println!("=== BATCH SUMMARY ===");
    println!("  batch_id:          {}", outcome.batch_id);
    println!("  entities:          {}", outcome.entity_count);
    println!("  total payout:      {:.2}", outcome.total_payout);
    println!("  concordance:       {concordance}");
    println!("  mismatched:        {}", s.entities_mismatched);
    println!("  with errors:       {}", s.entities_with_errors);
    println!("  patterns:          {}", s.patterns_consolidated);
    println!("  anomalies:         {}", s.anomaly_count);
    println!(
        "  modes:             {} shadow / {} verify / {} trusted",
        s.shadow_patterns, s.verify_patterns, s.trusted_patterns
    );

    println!();
    println!("=== ENTITY RESULTS ===");
    for r in &outcome.per_entity_results {
        let flag = if r.dual_path.matched { "" } else { "  [MISMATCH]" };
        println!("  {:<16} {:>12.2}  ({}){flag}", r.entity_id, r.total_payout, r.variant_id);
        for c in &r.components {
            println!("      {:<28} {:>12.2}", c.component_name, c.payout);
        }
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
