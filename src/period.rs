use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::rows::{Row, SeriesKey};
use crate::types::{PeriodType, Quarter};

/// The reporting window of one request and the history it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub period: PeriodType,
    pub start: Quarter,
    pub end: Quarter,
    /// Earliest quarter read from F. `None` reads from inception.
    pub fetch_from: Option<Quarter>,
    pub num_periods: usize,
}

fn fetch_from(period: PeriodType, start: Quarter) -> Option<Quarter> {
    match period {
        PeriodType::Qoq | PeriodType::YoyQ => Some(start),
        PeriodType::Ytd => Some(start.year_start()),
        PeriodType::Mat | PeriodType::YoyY => Some(start.offset(-3)),
        PeriodType::CumulativeSum => None,
    }
}

impl Window {
    /// Without an explicit start the window spans `num_periods` transformed
    /// periods: quarters, or whole years under the annual semantics. The start
    /// never reaches back past year 0.
    pub fn resolve(period: PeriodType, end: Quarter, start: Option<Quarter>, num_periods: usize) -> Window {
        let num_periods = num_periods.max(1);
        let step = if period.is_annual() { 4 } else { 1 };
        let lookback = i64::try_from(num_periods - 1)
            .unwrap_or(i64::MAX)
            .saturating_mul(step)
            .min(Quarter { year: 0, quarter: 1 }.quarters_until(end).max(0));
        let start = start.filter(|s| *s <= end).unwrap_or_else(|| end.offset(-lookback));

        Window { period, start, end, fetch_from: fetch_from(period, start), num_periods }
    }

    /// Raise the start to `earliest`, the first quarter the data holds.
    pub fn not_before(self, earliest: Option<Quarter>) -> Window {
        match earliest {
            Some(earliest) if self.start < earliest && earliest <= self.end => {
                debug!(requested = %self.start, start = %earliest, "window start clamped to the data");
                Window { start: earliest, fetch_from: fetch_from(self.period, earliest), ..self }
            }
            _ => self,
        }
    }

    pub fn contains(&self, q: Quarter) -> bool {
        self.start <= q && q <= self.end
    }
}

/// For each row, the sum of the values of the rows at or before it that
/// `in_span(earlier, current)` accepts. Rows must be sorted by quarter.
/// Missing quarters contribute nothing.
fn trailing_sums(rows: &[Row], in_span: impl Fn(Quarter, Quarter) -> bool) -> Vec<Row> {
    rows.iter()
        .enumerate()
        .map(|(i, r)| {
            let total: f64 = rows[..=i]
                .iter()
                .rev()
                .take_while(|e| in_span(e.quarter, r.quarter))
                .filter_map(|e| e.value)
                .sum();
            Row { value: Some(total), ..r.clone() }
        })
        .collect()
}

fn transform_series(mut rows: Vec<Row>, period: PeriodType, k: u8) -> Vec<Row> {
    rows.sort_by_key(|r| r.quarter);
    let at_k = |r: &Row| r.quarter.quarter == k;

    match period {
        PeriodType::Qoq => rows,
        PeriodType::YoyQ => rows.into_iter().filter(at_k).collect(),
        PeriodType::Ytd => trailing_sums(&rows, |e, q| e.year == q.year).into_iter().filter(at_k).collect(),
        PeriodType::Mat => trailing_sums(&rows, |e, q| e.quarters_until(q) < 4),
        PeriodType::YoyY => trailing_sums(&rows, |e, q| e.quarters_until(q) < 4)
            .into_iter()
            .filter(at_k)
            .collect(),
        PeriodType::CumulativeSum => trailing_sums(&rows, |_, _| true),
    }
}

/// Distinct quarters of `rows`, latest `count` only.
pub fn recent_quarters<'a>(rows: impl IntoIterator<Item = &'a Row>, count: usize) -> BTreeSet<Quarter> {
    let all: BTreeSet<Quarter> = rows.into_iter().map(|r| r.quarter).collect();
    all.into_iter().rev().take(count).collect()
}

/// Apply the window's period semantics per `(line, insurer, metric, facets)`
/// series, clip to the window, and keep the `num_periods + 1` latest periods.
pub fn transform(rows: Vec<Row>, window: &Window) -> Vec<Row> {
    let mut series: BTreeMap<SeriesKey, Vec<Row>> = BTreeMap::new();
    for r in rows {
        series.entry(r.series_key()).or_default().push(r);
    }

    let k = window.end.quarter;
    let transformed: Vec<Row> = series
        .into_values()
        .flat_map(|s| transform_series(s, window.period, k))
        .filter(|r| window.contains(r.quarter))
        .collect();

    let keep = recent_quarters(&transformed, window.num_periods.saturating_add(1));
    let out: Vec<Row> = transformed.into_iter().filter(|r| keep.contains(&r.quarter)).collect();
    debug!(period = ?window.period, rows = out.len(), periods = keep.len(), "period transform");
    out
}
