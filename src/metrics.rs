use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{PremiumLoss, ReportingForm};

pub const MARKET_SHARE_SUFFIX: &str = "_market_share";
pub const DELTA_SUFFIX: &str = "_q_to_q_change";

/// Longest first, so `x_market_share_q_to_q_change` strips to `x`.
const SUFFIXES: [&str; 3] = ["_market_share_q_to_q_change", DELTA_SUFFIX, MARKET_SHARE_SUFFIX];

/// Values of one pivoted cell, keyed by metric name. `Some(None)` is a null.
pub type MetricValues = HashMap<String, Option<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Level,
    Count,
    Ratio,
    Average,
    Share,
    Delta,
}

impl MetricKind {
    /// Kinds that can be expressed as a fraction of the market total.
    pub fn is_additive(self) -> bool {
        matches!(self, MetricKind::Level | MetricKind::Count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// Signed sum of inputs; absent or null inputs count as zero.
    Linear(&'static [(&'static str, f64)]),
    /// `numerator / denominator * scale`; null when the denominator is zero or absent.
    Quotient {
        numerator: &'static str,
        denominator: &'static str,
        scale: f64,
    },
    /// `left − right` over two computed metrics; null if either side is null.
    Difference(&'static str, &'static str),
}

impl Formula {
    pub fn inputs(&self) -> Vec<&'static str> {
        match self {
            Formula::Linear(terms) => terms.iter().map(|(name, _)| *name).collect(),
            Formula::Quotient { numerator, denominator, .. } => vec![*numerator, *denominator],
            Formula::Difference(left, right) => vec![*left, *right],
        }
    }

    pub fn evaluate(&self, cell: &MetricValues) -> Option<f64> {
        let value = |name: &str| cell.get(name).copied().flatten();
        match self {
            Formula::Linear(terms) => {
                Some(terms.iter().map(|&(name, coef)| coef * value(name).unwrap_or(0.0)).sum())
            }
            Formula::Quotient { numerator, denominator, scale } => {
                let den = value(*denominator)?;
                if den == 0.0 {
                    return None;
                }
                Some(value(*numerator).unwrap_or(0.0) / den * *scale)
            }
            Formula::Difference(left, right) => Some(value(*left)? - value(*right)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    /// `None` for base metrics read straight from F.
    pub formula: Option<Formula>,
    pub forms: &'static [ReportingForm],
    /// Business type this metric belongs to, for premium/loss gating.
    pub gate: Option<PremiumLoss>,
    /// Multiplier applied to the raw value before use.
    pub unit_scale: Option<f64>,
}

impl MetricDef {
    pub fn is_composite(&self) -> bool {
        self.formula.is_some() && self.kind.is_additive()
    }

    pub fn is_ratio(&self) -> bool {
        matches!(self.kind, MetricKind::Ratio | MetricKind::Average)
    }

    pub fn defined_on(&self, form: ReportingForm) -> bool {
        self.forms.contains(&form)
    }
}

const BOTH: &[ReportingForm] = &[ReportingForm::F162, ReportingForm::F158];
const F162: &[ReportingForm] = &[ReportingForm::F162];

fn base(name: &'static str, kind: MetricKind, forms: &'static [ReportingForm]) -> MetricDef {
    MetricDef { name, kind, formula: None, forms, gate: None, unit_scale: None }
}

fn composite(name: &'static str, terms: &'static [(&'static str, f64)]) -> MetricDef {
    MetricDef {
        name,
        kind: MetricKind::Level,
        formula: Some(Formula::Linear(terms)),
        forms: BOTH,
        gate: None,
        unit_scale: None,
    }
}

fn quotient(
    name: &'static str,
    kind: MetricKind,
    numerator: &'static str,
    denominator: &'static str,
    forms: &'static [ReportingForm],
) -> MetricDef {
    MetricDef {
        name,
        kind,
        formula: Some(Formula::Quotient { numerator, denominator, scale: 1.0 }),
        forms,
        gate: None,
        unit_scale: None,
    }
}

fn difference(name: &'static str, left: &'static str, right: &'static str) -> MetricDef {
    MetricDef {
        name,
        kind: MetricKind::Ratio,
        formula: Some(Formula::Difference(left, right)),
        forms: BOTH,
        gate: None,
        unit_scale: None,
    }
}

/// Metric taxonomy M with a precomputed evaluation order.
#[derive(Debug, Clone)]
pub struct MetricDictionary {
    defs: Vec<MetricDef>,
    index: BTreeMap<&'static str, usize>,
    /// Every formula metric, inputs before dependents.
    order: Vec<&'static str>,
}

impl MetricDictionary {
    /// Validate that every formula input is defined and the dependency graph
    /// is acyclic.
    pub fn new(defs: Vec<MetricDef>) -> Result<Self> {
        let index: BTreeMap<&'static str, usize> =
            defs.iter().enumerate().map(|(i, d)| (d.name, i)).collect();

        for def in &defs {
            for input in def.formula.iter().flat_map(Formula::inputs) {
                if !index.contains_key(input) {
                    return Err(Error::UnknownInput {
                        metric: def.name.to_string(),
                        input: input.to_string(),
                    });
                }
            }
        }

        let mut order = Vec::new();
        let mut state: BTreeMap<&'static str, bool> = BTreeMap::new();
        for def in &defs {
            visit(def.name, &defs, &index, &mut state, &mut order)?;
        }

        Ok(MetricDictionary { defs, index, order })
    }

    /// The metric set of the two regulatory forms.
    pub fn canonical() -> Result<Self> {
        use MetricKind::{Average, Count, Level, Ratio};

        let gated = |name, gate| MetricDef { gate: Some(gate), ..base(name, Level, F162) };
        let scaled = |name, kind, scale| MetricDef { unit_scale: Some(scale), ..base(name, kind, F162) };

        Self::new(vec![
            // ── Base metrics ──────────────────────────────────────────────────
            gated("direct_premiums", PremiumLoss::Direct),
            gated("direct_losses", PremiumLoss::Direct),
            gated("inward_premiums", PremiumLoss::Inward),
            gated("inward_losses", PremiumLoss::Inward),
            base("ceded_premiums", Level, BOTH),
            base("ceded_losses", Level, BOTH),
            base("premiums_interm", Level, F162),
            base("commissions_interm", Level, F162),
            scaled("new_sums", Level, 0.1),
            scaled("sums_end", Level, 0.1),
            scaled("new_contracts", Count, 1000.0),
            scaled("contracts_end", Count, 1000.0),
            scaled("claims_reported", Count, 1000.0),
            scaled("claims_settled", Count, 1000.0),
            // ── Composite levels (base metrics on F158 for the totals) ────────
            composite("total_premiums", &[("direct_premiums", 1.0), ("inward_premiums", 1.0)]),
            composite("total_losses", &[("direct_losses", 1.0), ("inward_losses", 1.0)]),
            composite("net_premiums", &[("total_premiums", 1.0), ("ceded_premiums", -1.0)]),
            composite("net_losses", &[("total_losses", 1.0), ("ceded_losses", -1.0)]),
            composite("net_balance", &[("ceded_losses", 1.0), ("ceded_premiums", -1.0)]),
            composite("gross_result", &[("total_premiums", 1.0), ("total_losses", -1.0)]),
            composite("net_result", &[("net_premiums", 1.0), ("net_losses", -1.0)]),
            // ── Ratios and averages ───────────────────────────────────────────
            quotient("ceded_premiums_ratio", Ratio, "ceded_premiums", "total_premiums", BOTH),
            quotient("ceded_losses_ratio", Ratio, "ceded_losses", "total_losses", BOTH),
            quotient("ceded_losses_to_ceded_premiums_ratio", Ratio, "ceded_losses", "ceded_premiums", BOTH),
            quotient("gross_loss_ratio", Ratio, "total_losses", "total_premiums", BOTH),
            quotient("net_loss_ratio", Ratio, "net_losses", "net_premiums", BOTH),
            difference("effect_on_loss_ratio", "gross_loss_ratio", "net_loss_ratio"),
            difference("ceded_ratio_diff", "ceded_losses_ratio", "ceded_premiums_ratio"),
            quotient("direct_loss_ratio", Ratio, "direct_losses", "direct_premiums", F162),
            quotient("inward_loss_ratio", Ratio, "inward_losses", "inward_premiums", F162),
            quotient("premiums_interm_ratio", Ratio, "premiums_interm", "direct_premiums", F162),
            quotient("commissions_rate", Ratio, "commissions_interm", "premiums_interm", F162),
            MetricDef {
                formula: Some(Formula::Quotient {
                    numerator: "sums_end",
                    denominator: "contracts_end",
                    scale: 0.001,
                }),
                ..base("average_sum_insured", Average, F162)
            },
            MetricDef {
                formula: Some(Formula::Quotient {
                    numerator: "new_sums",
                    denominator: "new_contracts",
                    scale: 0.001,
                }),
                ..base("average_new_sum_insured", Average, F162)
            },
            quotient("average_new_premium", Average, "direct_premiums", "new_contracts", F162),
            quotient("average_loss", Average, "direct_losses", "claims_settled", F162),
            quotient("average_rate", Ratio, "direct_premiums", "new_sums", F162),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&MetricDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    pub fn defs(&self) -> &[MetricDef] {
        &self.defs
    }

    /// Formula metrics in dependency order.
    pub fn evaluation_order(&self) -> impl Iterator<Item = &MetricDef> {
        self.order.iter().filter_map(|name| self.get(name))
    }

    /// Metrics defined on `form`, in dictionary order.
    pub fn names_for(&self, form: ReportingForm) -> Vec<&'static str> {
        self.defs.iter().filter(|d| d.defined_on(form)).map(|d| d.name).collect()
    }

    /// Kind of any metric name, derived suffixes included.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        if name.ends_with(DELTA_SUFFIX) {
            Some(MetricKind::Delta)
        } else if name.ends_with(MARKET_SHARE_SUFFIX) {
            Some(MetricKind::Share)
        } else {
            self.get(name).map(|d| d.kind)
        }
    }
}

fn visit(
    name: &'static str,
    defs: &[MetricDef],
    index: &BTreeMap<&'static str, usize>,
    state: &mut BTreeMap<&'static str, bool>,
    order: &mut Vec<&'static str>,
) -> Result<()> {
    // false = on the current path, true = finished
    match state.get(name) {
        Some(true) => return Ok(()),
        Some(false) => return Err(Error::MetricCycle(name.to_string())),
        None => {}
    }
    state.insert(name, false);
    let def = &defs[index[name]];
    if let Some(formula) = &def.formula {
        for input in formula.inputs() {
            visit(input, defs, index, state, order)?;
        }
        order.push(name);
    }
    state.insert(name, true);
    Ok(())
}

/// Strip a `_market_share` / `_q_to_q_change` suffix (or both).
pub fn base_name(name: &str) -> &str {
    SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
}

pub fn share_name(metric: &str) -> String {
    format!("{metric}{MARKET_SHARE_SUFFIX}")
}

pub fn delta_name(metric: &str) -> String {
    format!("{metric}{DELTA_SUFFIX}")
}
