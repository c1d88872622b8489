use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::{BENCHMARK_METRIC, TOP_N_COHORTS};
use crate::rows::{CellKey, Row};
use crate::selector::Selection;
use crate::types::{Insurer, Quarter};

/// `line → insurer id → rank`, ranks starting at 1.
pub type RankMap = BTreeMap<String, BTreeMap<String, usize>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rankings {
    pub current: RankMap,
    pub previous: RankMap,
}

/// Descending by value, ties by identifier ascending.
pub(crate) fn by_value_desc(a: &(&str, f64), b: &(&str, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// The metric insurers are ranked by: the first requested metric present in
/// `rows`, otherwise the first metric present.
pub fn ranking_metric(requested: &[String], rows: &[Row]) -> Option<String> {
    let present: BTreeSet<&str> = rows.iter().map(|r| r.metric.as_str()).collect();
    requested
        .iter()
        .find(|m| present.contains(m.as_str()))
        .cloned()
        .or_else(|| present.first().map(|m| m.to_string()))
}

/// Per-line company totals of `metric` at `quarter`, summed across facets,
/// in rank order.
pub fn line_leaders(rows: &[Row], metric: &str, quarter: Quarter) -> BTreeMap<String, Vec<(String, f64)>> {
    let mut sums: BTreeMap<String, BTreeMap<&str, f64>> = BTreeMap::new();
    for r in rows {
        let (Some(id), Some(v)) = (r.insurer.company_id(), r.value) else {
            continue;
        };
        if r.quarter == quarter && r.metric == metric {
            *sums.entry(r.line.clone()).or_default().entry(id).or_insert(0.0) += v;
        }
    }

    sums.into_iter()
        .map(|(line, by_insurer)| {
            let mut ranked: Vec<(&str, f64)> = by_insurer.into_iter().collect();
            ranked.sort_by(by_value_desc);
            let ranked: Vec<(String, f64)> = ranked.into_iter().map(|(id, v)| (id.to_string(), v)).collect();
            (line, ranked)
        })
        .collect()
}

pub fn rank_insurers(rows: &[Row], metric: &str, quarter: Quarter) -> RankMap {
    line_leaders(rows, metric, quarter)
        .into_iter()
        .map(|(line, ranked)| {
            let ranks: BTreeMap<String, usize> =
                ranked.into_iter().enumerate().map(|(i, (id, _))| (id, i + 1)).collect();
            (line, ranks)
        })
        .collect()
}

/// Ranks at `end` and at the latest earlier quarter present in `rows`.
pub fn rankings(rows: &[Row], metric: &str, end: Quarter) -> Rankings {
    let previous = rows.iter().map(|r| r.quarter).filter(|q| *q < end).max();
    Rankings {
        current: rank_insurers(rows, metric, end),
        previous: previous.map(|q| rank_insurers(rows, metric, q)).unwrap_or_default(),
    }
}

struct Cell<'a> {
    template: &'a Row,
    companies: Vec<(&'a str, f64)>,
    /// A `total` row carried by the source.
    total: Option<f64>,
}

impl Cell<'_> {
    fn market_total(&self) -> f64 {
        self.total.unwrap_or_else(|| self.companies.iter().map(|(_, v)| v).sum())
    }

    fn top_sum(&self, n: usize) -> f64 {
        self.companies.iter().take(n).map(|(_, v)| v).sum()
    }
}

/// Builder for the synthetic insurer rows of one table. Every formula reads
/// the company rows captured at construction, never rows emitted earlier.
pub struct SyntheticRows<'a> {
    cells: BTreeMap<CellKey, Cell<'a>>,
    out: Vec<Row>,
}

impl<'a> SyntheticRows<'a> {
    pub fn new(rows: &'a [Row]) -> Self {
        let mut cells: BTreeMap<CellKey, Cell<'a>> = BTreeMap::new();
        for r in rows {
            let Some(v) = r.value else { continue };
            let cell = cells
                .entry(r.cell_key())
                .or_insert_with(|| Cell { template: r, companies: Vec::new(), total: None });
            match &r.insurer {
                Insurer::Company(id) => cell.companies.push((id.as_str(), v)),
                Insurer::Total => cell.total = Some(v),
                _ => {}
            }
        }
        for cell in cells.values_mut() {
            cell.companies.sort_by(by_value_desc);
        }
        SyntheticRows { cells, out: Vec::new() }
    }

    fn emit(&mut self, insurer: impl Fn(&Cell<'a>) -> Option<(Insurer, f64)>) -> usize {
        let before = self.out.len();
        for cell in self.cells.values() {
            if let Some((who, value)) = insurer(cell) {
                self.out.push(cell.template.derive(who, cell.template.metric.clone(), Some(value)));
            }
        }
        self.out.len() - before
    }

    /// `total` for every cell that does not already carry one.
    pub fn market_total(mut self) -> Self {
        let n = self.emit(|c| {
            (c.total.is_none() && !c.companies.is_empty()).then(|| (Insurer::Total, c.market_total()))
        });
        debug!(rows = n, "market total");
        self
    }

    /// `top-N` for each cohort size.
    pub fn top_n(mut self, sizes: &[usize]) -> Self {
        for &size in sizes {
            self.emit(|c| (!c.companies.is_empty()).then(|| (Insurer::TopN(size), c.top_sum(size))));
        }
        self
    }

    /// `top-N-benchmark` over a fixed per-line cohort.
    pub fn benchmark(mut self, size: usize, cohorts: &BTreeMap<String, BTreeSet<String>>) -> Self {
        self.emit(|c| {
            let cohort = cohorts.get(&c.template.line)?;
            let members: Vec<f64> =
                c.companies.iter().filter(|(id, _)| cohort.contains(*id)).map(|(_, v)| *v).collect();
            (!members.is_empty()).then(|| (Insurer::Benchmark(size), members.iter().sum::<f64>()))
        });
        self
    }

    /// Market total minus the selected companies and the selected cohort.
    /// Non-positive residuals are dropped.
    pub fn others(mut self, selected: &[&str], top_n: Option<usize>) -> Self {
        self.emit(|c| {
            let picked: f64 = c.companies.iter().filter(|(id, _)| selected.contains(id)).map(|(_, v)| v).sum();
            let cohort = top_n.map_or(0.0, |n| c.top_sum(n));
            let residual = (c.market_total() - picked - cohort).max(0.0);
            (residual > 0.0).then_some((Insurer::Others, residual))
        });
        self
    }

    pub fn build(self) -> Vec<Row> {
        self.out
    }
}

/// Per line, the `size` largest companies by the benchmark metric at `end`,
/// excluding `main`. Falls back to `fallback_metric` when the benchmark metric
/// has no rows.
pub fn benchmark_cohorts(
    rows: &[Row],
    size: usize,
    end: Quarter,
    main: Option<&str>,
    fallback_metric: Option<&str>,
) -> BTreeMap<String, BTreeSet<String>> {
    let has_benchmark = rows.iter().any(|r| r.metric == BENCHMARK_METRIC);
    let metric = if has_benchmark { Some(BENCHMARK_METRIC) } else { fallback_metric };
    let Some(metric) = metric else {
        return BTreeMap::new();
    };

    line_leaders(rows, metric, end)
        .into_iter()
        .map(|(line, ranked)| {
            let cohort: BTreeSet<String> = ranked
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| Some(id.as_str()) != main)
                .take(size)
                .collect();
            (line, cohort)
        })
        .collect()
}

/// Emit every synthetic row the selection calls for, appended to `rows`.
/// Benchmark cohorts rank `cohort_basis` when it is non-empty, `rows`
/// otherwise.
pub fn aggregate(
    mut rows: Vec<Row>,
    selection: &Selection,
    ranking_metric: Option<&str>,
    cohort_basis: &[Row],
) -> Vec<Row> {
    let synthetic = {
        let basis = if cohort_basis.is_empty() { &rows[..] } else { cohort_basis };
        let mut builder = SyntheticRows::new(&rows).market_total().top_n(&TOP_N_COHORTS);
        for size in selection.benchmark_sizes() {
            let cohorts = benchmark_cohorts(
                basis,
                size,
                selection.window.end,
                selection.main_insurer.as_deref(),
                ranking_metric,
            );
            builder = builder.benchmark(size, &cohorts);
        }
        if selection.insurers.contains(&Insurer::Others) {
            builder = builder.others(&selection.selected_companies(), selection.residual_top_n());
        }
        builder.build()
    };
    debug!(synthetic = synthetic.len(), "aggregator");
    rows.extend(synthetic);
    rows
}

/// Which insurers survive into the returned table.
#[derive(Debug, Clone, Default)]
pub struct InsurerRetention {
    keep: BTreeSet<Insurer>,
    /// Per line, extra companies kept in table mode.
    leaders: BTreeMap<String, BTreeSet<String>>,
}

impl InsurerRetention {
    pub fn new(selection: &Selection, rankings: &Rankings) -> Self {
        let mut keep: BTreeSet<Insurer> = selection.insurers.iter().cloned().collect();

        if selection.closure.share_requested || selection.table_mode {
            keep.insert(Insurer::Total);
        }
        if let Some(n) = selection.top_n {
            keep.insert(Insurer::TopN(n));
        } else if selection.table_mode {
            keep.extend(TOP_N_COHORTS.iter().map(|&n| Insurer::TopN(n)));
        }

        let leaders: BTreeMap<String, BTreeSet<String>> = match (selection.table_mode, selection.number_of_insurers) {
            (true, Some(k)) => rankings
                .current
                .iter()
                .map(|(line, ranks)| {
                    let top: BTreeSet<String> = ranks.iter().filter(|(_, r)| **r <= k).map(|(id, _)| id.clone()).collect();
                    (line.clone(), top)
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        InsurerRetention { keep, leaders }
    }

    pub fn keeps(&self, row: &Row) -> bool {
        self.keep.contains(&row.insurer)
            || row
                .insurer
                .company_id()
                .is_some_and(|id| self.leaders.get(&row.line).is_some_and(|l| l.contains(id)))
    }

    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        rows.into_iter().filter(|r| self.keeps(r)).collect()
    }
}
