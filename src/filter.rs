use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::rows::{FactRow, Row};
use crate::types::{Facets, Insurer, LineType, Quarter, ReportingForm};

/// Membership and date-window filter over F. An empty set matches every value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub form: Option<ReportingForm>,
    pub lines: BTreeSet<String>,
    pub metrics: BTreeSet<String>,
    pub reinsurance_form: BTreeSet<String>,
    pub reinsurance_geography: BTreeSet<String>,
    pub reinsurance_type: BTreeSet<String>,
    pub line_types: BTreeSet<LineType>,
    /// Inclusive; `None` is unbounded.
    pub from: Option<Quarter>,
    pub to: Option<Quarter>,
}

fn member(set: &BTreeSet<String>, value: &str) -> bool {
    set.is_empty() || set.contains(value)
}

fn facet_member(set: &BTreeSet<String>, value: Option<&String>) -> bool {
    set.is_empty() || value.is_some_and(|v| set.contains(v))
}

impl RowFilter {
    pub fn matches(&self, row: &FactRow) -> bool {
        self.form.is_none_or(|f| f == row.reporting_form)
            && self.from.is_none_or(|q| row.quarter >= q)
            && self.to.is_none_or(|q| row.quarter <= q)
            && member(&self.lines, &row.line)
            && member(&self.metrics, &row.metric)
            && facet_member(&self.reinsurance_form, row.facets.reinsurance_form.as_ref())
            && facet_member(&self.reinsurance_geography, row.facets.reinsurance_geography.as_ref())
            && facet_member(&self.reinsurance_type, row.facets.reinsurance_type.as_ref())
            && (self.line_types.is_empty() || row.line_type.is_some_and(|t| self.line_types.contains(&t)))
    }

    pub fn apply(&self, rows: &[FactRow]) -> Vec<FactRow> {
        rows.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

/// Keep only the selected values that occur somewhere in `present`. Unknown
/// values are dropped; if none survive the result is empty and matches all.
pub fn known_values(
    field: &str,
    selected: &[String],
    present: impl Fn(&str) -> bool,
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for value in selected {
        if present(value.as_str()) {
            out.insert(value.clone());
        } else {
            debug!(field, value = %value, "unknown filter value ignored");
        }
    }
    out
}

/// Collapse the `line_type` dimension by summing rows that share every other key.
pub fn sum_over_line_type(rows: &[FactRow]) -> Vec<Row> {
    type Key = (Quarter, ReportingForm, String, Insurer, String, Facets);

    let mut sums: BTreeMap<Key, f64> = BTreeMap::new();
    for r in rows {
        let key = (
            r.quarter,
            r.reporting_form,
            r.line.clone(),
            r.insurer.clone(),
            r.metric.clone(),
            r.facets.clone(),
        );
        *sums.entry(key).or_insert(0.0) += r.value;
    }

    sums.into_iter()
        .map(|((quarter, reporting_form, line, insurer, metric, facets), value)| Row {
            quarter,
            reporting_form,
            line,
            insurer,
            metric,
            value: Some(value),
            facets,
        })
        .collect()
}

/// Filter F and collapse `line_type`. Output is ordered by quarter first.
pub fn filter_rows(rows: &[FactRow], filter: &RowFilter) -> Vec<Row> {
    let kept = filter.apply(rows);
    let out = sum_over_line_type(&kept);
    debug!(input = rows.len(), kept = kept.len(), rows = out.len(), "row filter");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(q: (i32, u8), line: &str, insurer: &str, metric: &str, value: f64, lt: Option<LineType>) -> FactRow {
        FactRow {
            quarter: Quarter::new(q.0, q.1).unwrap(),
            reporting_form: ReportingForm::F162,
            line: line.to_string(),
            insurer: Insurer::from(insurer),
            metric: metric.to_string(),
            value,
            line_type: lt,
            facets: Facets::default(),
        }
    }

    fn sample() -> Vec<FactRow> {
        vec![
            fact((2023, 4), "fire", "A", "direct_premiums", 100.0, Some(LineType::NonLife)),
            fact((2024, 1), "fire", "A", "direct_premiums", 70.0, Some(LineType::NonLife)),
            fact((2024, 1), "fire", "A", "direct_premiums", 50.0, Some(LineType::Life)),
            fact((2024, 1), "cargo", "B", "direct_losses", 10.0, None),
        ]
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let rows = sample();
        assert_eq!(RowFilter::default().apply(&rows), rows);
    }

    #[test]
    fn membership_and_window_filters_combine() {
        let filter = RowFilter {
            lines: BTreeSet::from(["fire".to_string()]),
            from: Quarter::new(2024, 1),
            ..RowFilter::default()
        };
        let kept = filter.apply(&sample());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.line == "fire" && r.quarter.year == 2024));
    }

    #[test]
    fn line_type_filter_excludes_untyped_rows() {
        let filter = RowFilter { line_types: BTreeSet::from([LineType::Life]), ..RowFilter::default() };
        let kept = filter.apply(&sample());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].value, 50.0);
    }

    #[test]
    fn line_type_is_summed_away() {
        let rows = filter_rows(&sample(), &RowFilter::default());
        assert_eq!(rows.len(), 3);
        let a_q1 = rows
            .iter()
            .find(|r| r.insurer == Insurer::company("A") && r.quarter == Quarter::new(2024, 1).unwrap())
            .unwrap();
        assert_eq!(a_q1.value, Some(120.0));
    }

    #[test]
    fn facet_filter_requires_a_matching_facet() {
        let mut rows = sample();
        rows[0].facets.reinsurance_geography = Some("abroad".to_string());
        let filter = RowFilter {
            reinsurance_geography: BTreeSet::from(["abroad".to_string()]),
            ..RowFilter::default()
        };
        assert_eq!(filter.apply(&rows).len(), 1);
    }

    #[test]
    fn unknown_values_are_dropped() {
        let present = ["fire", "cargo"];
        let kept = known_values("lines", &["fire".to_string(), "marine".to_string()], |v| present.contains(&v));
        assert_eq!(kept, BTreeSet::from(["fire".to_string()]));
        let none = known_values("lines", &["marine".to_string()], |v| present.contains(&v));
        assert!(none.is_empty());
    }
}
