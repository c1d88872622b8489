use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use inscore::config::FilterState;
use inscore::facts::FactTable;
use inscore::synth::{MarketSpec, generate_market};
use inscore::types::PeriodType;

pub struct Scenario {
    pub insurers: usize,
    pub quarters: usize,
}

pub const SMALL: Scenario = Scenario { insurers: 20, quarters: 8 };

pub const MEDIUM: Scenario = Scenario { insurers: 100, quarters: 16 };

pub const LARGE: Scenario = Scenario { insurers: 400, quarters: 24 };

pub fn build_market(scenario: &Scenario, seed: u64) -> FactTable {
    let market = MarketSpec { insurers: scenario.insurers, quarters: scenario.quarters, ..MarketSpec::canonical() };
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    generate_market(&market, &mut rng).unwrap_or_else(|e| panic!("fixture market: {e}"))
}

/// A chart request over a handful of insurers plus every synthetic kind.
pub fn chart_request(period: PeriodType) -> FilterState {
    FilterState {
        primary_metrics: vec!["net_premiums".to_string(), "direct_premiums_market_share".to_string()],
        secondary_metrics: vec!["net_loss_ratio".to_string()],
        period_type: period,
        selected_insurers: ["1001", "1002", "total", "top-10", "top-5-benchmark", "others"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..FilterState::default()
    }
}

/// A table request retaining the ten largest insurers per line.
pub fn table_request() -> FilterState {
    FilterState {
        show_data_table: true,
        number_of_insurers: Some(10),
        ..chart_request(PeriodType::Qoq)
    }
}
