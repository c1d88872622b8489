use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::metrics::{MetricDictionary, MetricKind};
use crate::rows::{CellKey, PivotKey, Row};
use crate::types::{Facets, Insurer, Quarter, ReportingForm};

const TOLERANCE: f64 = 1e-6;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// A derived-table invariant that does not hold.
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    /// Two rows share `(quarter, form, line, insurer, metric, facets)`.
    DuplicateKey { quarter: Quarter, line: String, insurer: Insurer, metric: String },
    /// Company market shares of a cell do not sum to one.
    ShareSum { quarter: Quarter, line: String, metric: String, sum: f64 },
    /// `total_premiums` differs from `direct_premiums + inward_premiums`.
    TotalPremiumsIdentity { quarter: Quarter, line: String, insurer: Insurer, total: f64, parts: f64 },
    /// A `top-N` row differs from the sum of the N largest companies.
    TopNSum { quarter: Quarter, line: String, metric: String, n: usize, value: f64, expected: f64 },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey { quarter, line, insurer, metric } => {
                write!(f, "DuplicateKey quarter={quarter} line={line} insurer={insurer} metric={metric}")
            }
            Self::ShareSum { quarter, line, metric, sum } => {
                write!(f, "ShareSum quarter={quarter} line={line} metric={metric} sum={sum}")
            }
            Self::TotalPremiumsIdentity { quarter, line, insurer, total, parts } => {
                write!(f, "TotalPremiumsIdentity quarter={quarter} line={line} insurer={insurer} total={total} parts={parts}")
            }
            Self::TopNSum { quarter, line, metric, n, value, expected } => {
                write!(f, "TopNSum quarter={quarter} line={line} metric={metric} n={n} value={value} expected={expected}")
            }
        }
    }
}

type RowKey = (Quarter, ReportingForm, String, Insurer, String, Facets);

fn duplicate_keys(rows: &[Row], violations: &mut Vec<InvariantViolation>) {
    let mut seen: HashSet<RowKey> = HashSet::with_capacity(rows.len());
    for r in rows {
        let key = (r.quarter, r.reporting_form, r.line.clone(), r.insurer.clone(), r.metric.clone(), r.facets.clone());
        if !seen.insert(key) {
            violations.push(InvariantViolation::DuplicateKey {
                quarter: r.quarter,
                line: r.line.clone(),
                insurer: r.insurer.clone(),
                metric: r.metric.clone(),
            });
        }
    }
}

fn share_sums(rows: &[Row], dict: &MetricDictionary, violations: &mut Vec<InvariantViolation>) {
    let mut sums: BTreeMap<CellKey, f64> = BTreeMap::new();
    for r in rows {
        if dict.kind_of(&r.metric) != Some(MetricKind::Share) || r.insurer.company_id().is_none() {
            continue;
        }
        *sums.entry(r.cell_key()).or_insert(0.0) += r.value.unwrap_or(0.0);
    }
    for ((quarter, line, metric, _), sum) in sums {
        if !close(sum, 1.0) {
            violations.push(InvariantViolation::ShareSum { quarter, line, metric, sum });
        }
    }
}

fn total_premiums_identity(rows: &[Row], violations: &mut Vec<InvariantViolation>) {
    let mut cells: BTreeMap<PivotKey, [Option<f64>; 3]> = BTreeMap::new();
    // Cohort rows rank each metric separately, so only real insurers and the market add up.
    for r in rows.iter().filter(|&r| matches!(r.insurer, Insurer::Company(_) | Insurer::Total)) {
        let slot = match r.metric.as_str() {
            "total_premiums" => 0,
            "direct_premiums" => 1,
            "inward_premiums" => 2,
            _ => continue,
        };
        cells.entry(r.pivot_key()).or_default()[slot] = r.value;
    }
    for ((quarter, line, insurer, _), values) in cells {
        let [Some(total), Some(direct), Some(inward)] = values else { continue };
        if !close(total, direct + inward) {
            violations.push(InvariantViolation::TotalPremiumsIdentity {
                quarter,
                line,
                insurer,
                total,
                parts: direct + inward,
            });
        }
    }
}

fn top_n_sums(rows: &[Row], dict: &MetricDictionary, violations: &mut Vec<InvariantViolation>) {
    let summable = |metric: &str| {
        dict.kind_of(metric).is_some_and(|k| k.is_additive() || k == MetricKind::Share)
    };

    let mut companies: BTreeMap<CellKey, Vec<f64>> = BTreeMap::new();
    let mut cohorts: Vec<(CellKey, usize, f64)> = Vec::new();
    for r in rows.iter().filter(|&r| summable(&r.metric)) {
        let Some(v) = r.value else { continue };
        match r.insurer {
            Insurer::Company(_) => companies.entry(r.cell_key()).or_default().push(v),
            Insurer::TopN(n) => cohorts.push((r.cell_key(), n, v)),
            _ => {}
        }
    }

    for ((quarter, line, metric, facets), n, value) in cohorts {
        let key = (quarter, line, metric, facets);
        let mut values = companies.get(&key).cloned().unwrap_or_default();
        values.sort_by(|a, b| b.total_cmp(a));
        let expected: f64 = values.iter().take(n).sum();
        if !close(value, expected) {
            let (quarter, line, metric, _) = key;
            violations.push(InvariantViolation::TopNSum { quarter, line, metric, n, value, expected });
        }
    }
}

/// Check a derived table before insurer retention. Retained tables drop the
/// companies the share and top-N checks need.
pub fn check(rows: &[Row], dict: &MetricDictionary) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    duplicate_keys(rows, &mut violations);
    share_sums(rows, dict, &mut violations);
    total_premiums_identity(rows, &mut violations);
    top_n_sums(rows, dict, &mut violations);
    violations
}
