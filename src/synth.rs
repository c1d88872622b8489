use rand::Rng;
use rand_distr::{Distribution, LogNormal};

use crate::error::{Error, Result};
use crate::facts::FactTable;
use crate::rows::FactRow;
use crate::types::{Facets, Insurer, LineType, Quarter, ReportingForm};

/// Shape of a synthetic insurance market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSpec {
    pub insurers: usize,
    /// `(line code, life?)`.
    pub lines: Vec<(&'static str, bool)>,
    pub first_quarter: Quarter,
    pub quarters: usize,
    /// ln-space params of an insurer's quarterly direct premium on one line.
    /// E[X] = exp(mu + sigma²/2).
    pub size_mu: f64,
    pub size_sigma: f64,
    /// Quarter-on-quarter multiplicative noise, ln-space sigma.
    pub noise_sigma: f64,
    /// Probability that an insurer writes a given line.
    pub line_presence: f64,
    /// Probability that an insurer also writes inward reinsurance.
    pub inward_share: f64,
    /// Also emit F158 totals alongside F162.
    pub with_f158: bool,
}

impl MarketSpec {
    pub fn canonical() -> Self {
        MarketSpec {
            insurers: 40,
            lines: vec![
                ("motor", false),
                ("property", false),
                ("liability", false),
                ("cargo", false),
                ("health", false),
                ("life", true),
            ],
            first_quarter: Quarter { year: 2021, quarter: 1 },
            quarters: 16,
            size_mu: 6.0,
            size_sigma: 1.5,
            noise_sigma: 0.08,
            line_presence: 0.7,
            inward_share: 0.3,
            with_f158: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.insurers == 0 || self.lines.is_empty() || self.quarters == 0 {
            return Err(Error::InvalidMarket("insurers, lines and quarters must be non-empty".to_string()));
        }
        for (name, p) in [("line_presence", self.line_presence), ("inward_share", self.inward_share)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidMarket(format!("{name}={p} is not a probability")));
            }
        }
        Ok(())
    }
}

/// Per insurer and line, the fixed ratios its quarterly figures follow.
struct Book {
    insurer: Insurer,
    line: &'static str,
    life: bool,
    premium: f64,
    loss_ratio: f64,
    inward: f64,
    cession: f64,
    ceded_loss_ratio: f64,
    avg_premium: f64,
    sum_per_premium: f64,
}

impl Book {
    fn draw(insurer: Insurer, line: &'static str, life: bool, premium: f64, inward: bool, rng: &mut impl Rng) -> Self {
        Book {
            insurer,
            line,
            life,
            premium,
            loss_ratio: rng.random_range(0.3..0.9),
            inward: if inward { rng.random_range(0.02..0.2) } else { 0.0 },
            cession: rng.random_range(0.05..0.35),
            ceded_loss_ratio: rng.random_range(0.3..1.1),
            avg_premium: rng.random_range(0.5..5.0),
            sum_per_premium: rng.random_range(10.0..200.0),
        }
    }

    /// Base metrics of one quarter for both forms.
    fn quarter(&self, quarter: Quarter, scale: f64, with_f158: bool) -> Vec<FactRow> {
        let direct = self.premium * scale;
        let inward = direct * self.inward;
        let ceded = (direct + inward) * self.cession;
        let contracts = direct / self.avg_premium;

        let mut figures: Vec<(ReportingForm, &'static str, f64)> = vec![
            (ReportingForm::F162, "direct_premiums", direct),
            (ReportingForm::F162, "direct_losses", direct * self.loss_ratio),
            (ReportingForm::F162, "ceded_premiums", ceded),
            (ReportingForm::F162, "ceded_losses", ceded * self.ceded_loss_ratio),
            (ReportingForm::F162, "premiums_interm", direct * 0.6),
            (ReportingForm::F162, "commissions_interm", direct * 0.6 * 0.15),
            (ReportingForm::F162, "new_contracts", contracts * 0.3),
            (ReportingForm::F162, "contracts_end", contracts),
            (ReportingForm::F162, "new_sums", direct * 0.3 * self.sum_per_premium),
            (ReportingForm::F162, "sums_end", direct * self.sum_per_premium),
            (ReportingForm::F162, "claims_reported", contracts * 0.05),
            (ReportingForm::F162, "claims_settled", contracts * 0.04),
        ];
        if inward > 0.0 {
            figures.push((ReportingForm::F162, "inward_premiums", inward));
            figures.push((ReportingForm::F162, "inward_losses", inward * self.loss_ratio));
        }
        if with_f158 {
            figures.push((ReportingForm::F158, "total_premiums", direct + inward));
            figures.push((ReportingForm::F158, "total_losses", (direct + inward) * self.loss_ratio));
            figures.push((ReportingForm::F158, "ceded_premiums", ceded));
            figures.push((ReportingForm::F158, "ceded_losses", ceded * self.ceded_loss_ratio));
        }

        let line_type = if self.life { LineType::Life } else { LineType::NonLife };
        figures
            .into_iter()
            .map(|(form, metric, value)| FactRow {
                quarter,
                reporting_form: form,
                line: self.line.to_string(),
                insurer: self.insurer.clone(),
                metric: metric.to_string(),
                value,
                line_type: Some(line_type),
                facets: Facets::default(),
            })
            .collect()
    }
}

/// Generate a market of `market.insurers` companies over `market.quarters`
/// quarters. Insurer ids are registry-style numbers starting at 1001.
/// Quarterly figures follow a random walk with a Q4 seasonal peak.
pub fn generate_market(market: &MarketSpec, rng: &mut impl Rng) -> Result<FactTable> {
    market.validate()?;
    let size = LogNormal::new(market.size_mu, market.size_sigma).map_err(|e| Error::InvalidMarket(e.to_string()))?;
    let noise = LogNormal::new(0.0, market.noise_sigma).map_err(|e| Error::InvalidMarket(e.to_string()))?;

    let mut books = Vec::new();
    for i in 0..market.insurers {
        let insurer = Insurer::company((1001 + i).to_string());
        let inward = rng.random_bool(market.inward_share);
        let base = size.sample(rng);
        for &(line, life) in &market.lines {
            if rng.random_bool(market.line_presence) {
                let premium = base * rng.random_range(0.2..1.0);
                books.push(Book::draw(insurer.clone(), line, life, premium, inward, rng));
            }
        }
    }

    let mut rows = Vec::new();
    for book in &books {
        let mut level = 1.0;
        for offset in 0..market.quarters {
            let quarter = market.first_quarter.offset(offset as i64);
            level *= noise.sample(rng);
            let seasonal = if quarter.quarter == 4 { 1.15 } else { 1.0 };
            rows.extend(book.quarter(quarter, level * seasonal, market.with_f158));
        }
    }

    Ok(FactTable::new(rows))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    fn small() -> MarketSpec {
        MarketSpec { insurers: 8, quarters: 6, ..MarketSpec::canonical() }
    }

    #[test]
    fn same_seed_same_market() {
        let a = generate_market(&small(), &mut rng()).unwrap();
        let b = generate_market(&small(), &mut rng()).unwrap();
        assert_eq!(a.rows(), b.rows());
        assert!(!a.is_empty());
    }

    #[test]
    fn quarters_cover_the_requested_span() {
        let facts = generate_market(&small(), &mut rng()).unwrap();
        let quarters = facts.quarters(ReportingForm::F162);
        assert_eq!(quarters.len(), 6);
        assert_eq!(facts.earliest_quarter(ReportingForm::F162), Some(Quarter { year: 2021, quarter: 1 }));
        assert_eq!(facts.latest_quarter(ReportingForm::F158), Some(Quarter { year: 2022, quarter: 2 }));
    }

    #[test]
    fn figures_are_non_negative_and_f158_totals_add_up() {
        let facts = generate_market(&small(), &mut rng()).unwrap();
        assert!(facts.rows().iter().all(|r| r.value >= 0.0 && r.value.is_finite()));

        let sum = |form: ReportingForm, metrics: &[&str]| -> f64 {
            facts
                .rows()
                .iter()
                .filter(|r| r.reporting_form == form && metrics.contains(&r.metric.as_str()))
                .map(|r| r.value)
                .sum()
        };
        let f162 = sum(ReportingForm::F162, &["direct_premiums", "inward_premiums"]);
        let f158 = sum(ReportingForm::F158, &["total_premiums"]);
        assert!((f162 - f158).abs() < 1e-6 * f158.max(1.0));
    }

    #[test]
    fn empty_market_is_rejected() {
        let market = MarketSpec { insurers: 0, ..MarketSpec::canonical() };
        assert!(matches!(generate_market(&market, &mut rng()), Err(Error::InvalidMarket(_))));
        let market = MarketSpec { line_presence: 1.5, ..MarketSpec::canonical() };
        assert!(generate_market(&market, &mut rng()).is_err());
    }
}
