use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::metrics::{MetricDictionary, MetricKind, delta_name};
use crate::period::recent_quarters;
use crate::rows::{Row, SeriesKey};
use crate::types::Quarter;

fn change(kind: MetricKind, current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match kind {
        // Percentage-point change; a missing side counts as no change.
        MetricKind::Share => match (current, previous) {
            (Some(c), Some(p)) => Some(c - p),
            _ => Some(0.0),
        },
        _ => {
            let (c, p) = (current?, previous?);
            (p != 0.0).then(|| (c - p) / p)
        }
    }
}

/// Append `<metric>_q_to_q_change` rows. The predecessor of a quarter is the
/// previous quarter present anywhere in `rows`; the earliest quarter gets a
/// null delta. Delta rows are never differenced again, and delta rows already
/// present are left as they are.
pub fn append_deltas(mut rows: Vec<Row>, dict: &MetricDictionary) -> Vec<Row> {
    let quarters: Vec<Quarter> = rows.iter().map(|r| r.quarter).collect::<BTreeSet<_>>().into_iter().collect();
    let predecessor: BTreeMap<Quarter, Quarter> = quarters.windows(2).map(|w| (w[1], w[0])).collect();

    let existing: HashSet<(SeriesKey, Quarter)> = rows
        .iter()
        .filter(|r| dict.kind_of(&r.metric) == Some(MetricKind::Delta))
        .map(|r| (r.series_key(), r.quarter))
        .collect();

    let mut series: BTreeMap<SeriesKey, BTreeMap<Quarter, &Row>> = BTreeMap::new();
    for r in &rows {
        if dict.kind_of(&r.metric) != Some(MetricKind::Delta) {
            series.entry(r.series_key()).or_default().insert(r.quarter, r);
        }
    }

    let mut added = Vec::new();
    for (key, points) in &series {
        let kind = dict.kind_of(&key.2).unwrap_or(MetricKind::Level);
        let name = delta_name(&key.2);
        let delta_key: SeriesKey = (key.0.clone(), key.1.clone(), name.clone(), key.3.clone());
        for (q, r) in points {
            if existing.contains(&(delta_key.clone(), *q)) {
                continue;
            }
            let value = predecessor
                .get(q)
                .and_then(|p| change(kind, r.value, points.get(p).and_then(|prev| prev.value)));
            added.push(r.derive(r.insurer.clone(), name.clone(), value));
        }
    }

    debug!(rows = added.len(), "delta stage");
    rows.extend(added);
    rows
}

/// Tabular view: the latest `num_periods` quarters of levels and one fewer of
/// deltas (at least one).
pub fn retain_table_periods(rows: Vec<Row>, num_periods: usize, dict: &MetricDictionary) -> Vec<Row> {
    let is_delta = |r: &Row| dict.kind_of(&r.metric) == Some(MetricKind::Delta);
    let levels = recent_quarters(rows.iter().filter(|&r| !is_delta(r)), num_periods);
    let deltas = recent_quarters(rows.iter().filter(|&r| !is_delta(r)), num_periods.saturating_sub(1).max(1));
    rows.into_iter()
        .filter(|r| if is_delta(r) { deltas.contains(&r.quarter) } else { levels.contains(&r.quarter) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Facets, Insurer, ReportingForm};

    fn q(year: i32, quarter: u8) -> Quarter {
        Quarter::new(year, quarter).unwrap()
    }

    fn row(quarter: Quarter, insurer: &str, metric: &str, value: Option<f64>) -> Row {
        Row {
            quarter,
            reporting_form: ReportingForm::F162,
            line: "all".to_string(),
            insurer: Insurer::from(insurer),
            metric: metric.to_string(),
            value,
            facets: Facets::default(),
        }
    }

    fn delta_at(rows: &[Row], quarter: Quarter, insurer: &str, metric: &str) -> Option<f64> {
        rows.iter()
            .find(|r| r.quarter == quarter && r.insurer == Insurer::from(insurer) && r.metric == metric)
            .unwrap_or_else(|| panic!("no {metric} row for {insurer} at {quarter}"))
            .value
    }

    #[test]
    fn levels_are_relative_and_shares_absolute() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows = vec![
            row(q(2023, 4), "A", "direct_premiums", Some(100.0)),
            row(q(2024, 1), "A", "direct_premiums", Some(120.0)),
            row(q(2023, 4), "A", "direct_premiums_market_share", Some(0.5)),
            row(q(2024, 1), "A", "direct_premiums_market_share", Some(0.48)),
        ];
        let out = append_deltas(rows, &dict);
        let level = delta_at(&out, q(2024, 1), "A", "direct_premiums_q_to_q_change").unwrap();
        assert!((level - 0.2).abs() < 1e-10);
        let share = delta_at(&out, q(2024, 1), "A", "direct_premiums_market_share_q_to_q_change").unwrap();
        assert!((share + 0.02).abs() < 1e-10);
    }

    #[test]
    fn earliest_quarter_is_null_for_every_kind() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows = vec![
            row(q(2023, 4), "A", "direct_premiums", Some(100.0)),
            row(q(2023, 4), "A", "direct_premiums_market_share", Some(0.5)),
        ];
        let out = append_deltas(rows, &dict);
        assert_eq!(delta_at(&out, q(2023, 4), "A", "direct_premiums_q_to_q_change"), None);
        assert_eq!(delta_at(&out, q(2023, 4), "A", "direct_premiums_market_share_q_to_q_change"), None);
    }

    #[test]
    fn zero_or_missing_predecessor() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows = vec![
            row(q(2023, 4), "A", "direct_premiums", Some(0.0)),
            row(q(2024, 1), "A", "direct_premiums", Some(10.0)),
            row(q(2023, 4), "B", "direct_premiums", Some(5.0)),
            row(q(2024, 1), "C", "direct_premiums", Some(7.0)),
            row(q(2024, 1), "C", "direct_premiums_market_share", Some(0.1)),
        ];
        let out = append_deltas(rows, &dict);
        assert_eq!(delta_at(&out, q(2024, 1), "A", "direct_premiums_q_to_q_change"), None);
        assert_eq!(delta_at(&out, q(2024, 1), "C", "direct_premiums_q_to_q_change"), None);
        assert_eq!(delta_at(&out, q(2024, 1), "C", "direct_premiums_market_share_q_to_q_change"), Some(0.0));
    }

    #[test]
    fn predecessor_follows_the_transformed_sequence() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows = vec![
            row(q(2023, 2), "A", "direct_premiums", Some(50.0)),
            row(q(2024, 2), "A", "direct_premiums", Some(75.0)),
        ];
        let out = append_deltas(rows, &dict);
        assert_eq!(delta_at(&out, q(2024, 2), "A", "direct_premiums_q_to_q_change"), Some(0.5));
    }

    #[test]
    fn applying_twice_changes_nothing() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows = vec![
            row(q(2023, 4), "A", "net_loss_ratio", Some(0.5)),
            row(q(2024, 1), "A", "net_loss_ratio", Some(0.4)),
        ];
        let once = append_deltas(rows, &dict);
        let twice = append_deltas(once.clone(), &dict);
        assert_eq!(once, twice);
        assert!(!twice.iter().any(|r| r.metric.ends_with("_q_to_q_change_q_to_q_change")));
    }

    #[test]
    fn table_retention_drops_oldest_delta() {
        let dict = MetricDictionary::canonical().unwrap();
        let rows: Vec<Row> = (0..4)
            .map(|i| row(q(2023, 1).offset(i), "A", "direct_premiums", Some(10.0 + i as f64)))
            .collect();
        let out = retain_table_periods(append_deltas(rows, &dict), 3, &dict);
        let levels = out.iter().filter(|r| r.metric == "direct_premiums").count();
        let deltas = out.iter().filter(|r| r.metric.ends_with("_q_to_q_change")).count();
        assert_eq!(levels, 3);
        assert_eq!(deltas, 2);
    }
}
