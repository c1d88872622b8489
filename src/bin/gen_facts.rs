use std::collections::BTreeMap;
use std::env;
use std::io;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use inscore::synth::{MarketSpec, generate_market};
use inscore::types::ReportingForm;

/// `gen_facts [seed] [insurers] [quarters]`: synthetic fact table CSV on
/// stdout, summary on stderr.
fn main() -> Result<()> {
    let mut market = MarketSpec::canonical();
    let args: Vec<String> = env::args().collect();

    let seed: u64 = match args.get(1) {
        Some(s) => s.parse().with_context(|| format!("seed must be a u64, got `{s}`"))?,
        None => 42,
    };
    if let Some(s) = args.get(2) {
        market.insurers = s.parse().with_context(|| format!("insurers must be a count, got `{s}`"))?;
    }
    if let Some(s) = args.get(3) {
        market.quarters = s.parse().with_context(|| format!("quarters must be a count, got `{s}`"))?;
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let facts = generate_market(&market, &mut rng).context("generating market")?;
    facts.write_csv(io::stdout().lock()).context("writing CSV")?;

    let (first, last) = (
        facts.earliest_quarter(ReportingForm::F162),
        facts.latest_quarter(ReportingForm::F162),
    );
    eprintln!(
        "gen_facts: seed={seed} insurers={} quarters={} rows={} span={}..{}",
        market.insurers,
        market.quarters,
        facts.len(),
        first.map(|q| q.to_string()).unwrap_or_default(),
        last.map(|q| q.to_string()).unwrap_or_default(),
    );

    // Direct premiums per line at the latest quarter.
    let mut by_line: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for r in facts.rows() {
        if Some(r.quarter) == last && r.reporting_form == ReportingForm::F162 && r.metric == "direct_premiums" {
            let entry = by_line.entry(r.line.as_str()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += r.value;
        }
    }
    for (line, (writers, premiums)) in by_line {
        eprintln!("  line={line:<10}  insurers={writers:>4}  direct_premiums={premiums:>12.1}");
    }
    Ok(())
}
