use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use tracing::info;

use inscore::config::{AppConfig, FilterState};
use inscore::facts::FactTable;
use inscore::invariants::{self, InvariantViolation};
use inscore::metrics::MetricDictionary;
use inscore::pipeline::{PipelineOutput, derive};
use inscore::synth::{MarketSpec, generate_market};
use inscore::taxonomy::Taxonomies;
use inscore::types::ReportingForm;

struct Evaluated {
    output: PipelineOutput,
    violations: Vec<InvariantViolation>,
}

fn evaluate(state: &FilterState, facts: &FactTable, taxonomies: &Taxonomies, dict: &MetricDictionary) -> Evaluated {
    match derive(state, facts, taxonomies, dict) {
        Some(derived) => {
            let violations = invariants::check(&derived.rows, dict);
            let output = PipelineOutput::from_derived(derived, state, taxonomies, dict);
            Evaluated { output, violations }
        }
        None => Evaluated { output: PipelineOutput::default(), violations: Vec::new() },
    }
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{flag} requires a value"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut facts_override: Option<PathBuf> = None;
    let mut filter_path: Option<PathBuf> = None;
    let mut synthetic_seed: Option<u64> = None;
    let mut output_path = "output.ndjson".to_string();
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(next_value(&args, i, "--config")?.into());
            }
            "--facts" => {
                i += 1;
                facts_override = Some(next_value(&args, i, "--facts")?.into());
            }
            "--filter" => {
                i += 1;
                filter_path = Some(next_value(&args, i, "--filter")?.into());
            }
            "--synthetic" => {
                i += 1;
                let seed = next_value(&args, i, "--synthetic")?;
                synthetic_seed = Some(seed.parse::<u64>().with_context(|| format!("--synthetic requires a u64, got `{seed}`"))?);
            }
            "--output" => {
                i += 1;
                output_path = next_value(&args, i, "--output")?.to_string();
            }
            "--quiet" => quiet = true,
            other => bail!("unrecognised argument `{other}`"),
        }
        i += 1;
    }

    let dict = MetricDictionary::canonical().context("metric dictionary is invalid")?;

    let (facts, taxonomies) = match synthetic_seed {
        Some(seed) => {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let facts = generate_market(&MarketSpec::canonical(), &mut rng).context("generating synthetic market")?;
            (facts, Taxonomies::default())
        }
        None => {
            let config = match &config_path {
                Some(path) => AppConfig::from_json_path(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => AppConfig::canonical(),
            };
            let facts_path = facts_override.unwrap_or(config.facts.clone());
            let facts = FactTable::from_csv_path(&facts_path, ReportingForm::F162)
                .with_context(|| format!("loading facts {}", facts_path.display()))?;
            let taxonomies = Taxonomies::load(&config.lines_162, &config.lines_158, &config.insurers)
                .context("loading taxonomies")?;
            (facts, taxonomies)
        }
    };

    let states = match &filter_path {
        Some(path) => FilterState::load_many(path).with_context(|| format!("loading filters {}", path.display()))?,
        None => vec![FilterState::default()],
    };
    info!(facts = facts.len(), requests = states.len(), "inputs loaded");

    let evaluated: Vec<Evaluated> = states
        .par_iter()
        .map(|state| evaluate(state, &facts, &taxonomies, &dict))
        .collect();

    let file = File::create(&output_path).with_context(|| format!("creating {output_path}"))?;
    let mut writer = BufWriter::new(file);
    for e in &evaluated {
        serde_json::to_writer(&mut writer, &e.output).context("serialising output")?;
        writeln!(writer).context("writing output")?;
    }
    writer.flush().context("writing output")?;

    if !quiet {
        for (n, e) in evaluated.iter().enumerate() {
            print_summary(n, e);
        }
        println!("\nOutput: {output_path}");
    }
    Ok(())
}

fn print_summary(n: usize, e: &Evaluated) {
    let out = &e.output;
    println!("\n=== Request {n} ===");
    println!(
        "  rows: {}  periods: {}  insurers available: {}",
        out.table.len(),
        out.periods_available.len(),
        out.insurers_available
    );
    if let (Some(first), Some(last)) = (out.periods_available.first(), out.periods_available.last()) {
        println!("  window: {first} .. {last}");
    }

    let inv = |variant: fn(&InvariantViolation) -> bool| {
        if e.violations.iter().any(variant) { "FAIL" } else { "PASS" }
    };
    println!("  [1] Row-key uniqueness:      {}", inv(|v| matches!(v, InvariantViolation::DuplicateKey { .. })));
    println!("  [2] Market shares sum to 1:  {}", inv(|v| matches!(v, InvariantViolation::ShareSum { .. })));
    println!("  [3] total_premiums identity: {}", inv(|v| matches!(v, InvariantViolation::TotalPremiumsIdentity { .. })));
    println!("  [4] top-N sums:              {}", inv(|v| matches!(v, InvariantViolation::TopNSum { .. })));

    if !e.violations.is_empty() {
        println!("\n  {} violation(s):", e.violations.len());
        for v in e.violations.iter().take(20) {
            println!("    {v}");
        }
    }
}
