use tracing::debug;

use crate::compose::Pivot;
use crate::metrics::MetricDictionary;
use crate::rows::Row;
use crate::selector::Closure;

/// Rescale count and sum metrics in C to the units the ratios expect.
pub fn apply_unit_scales(rows: &mut [Row], closure: &Closure, dict: &MetricDictionary) {
    for r in rows.iter_mut() {
        if !closure.contains(&r.metric) {
            continue;
        }
        if let Some(scale) = dict.get(&r.metric).and_then(|d| d.unit_scale) {
            r.value = r.value.map(|v| v * scale);
        }
    }
}

/// Evaluate every ratio and average in C for each `(quarter, line, insurer,
/// facets)` cell that carries all of its inputs. Division by zero gives a
/// null-valued row.
pub fn compute_ratios(rows: &[Row], closure: &Closure, dict: &MetricDictionary) -> Vec<Row> {
    let ratios: Vec<_> = dict
        .evaluation_order()
        .filter(|d| d.is_ratio() && closure.contains(d.name))
        .collect();
    if ratios.is_empty() {
        return Vec::new();
    }

    let pivot = Pivot::build(rows);
    let mut out = Vec::new();
    for (template, mut cell) in pivot.cells.into_values() {
        for def in &ratios {
            let Some(formula) = def.formula else { continue };
            if !formula.inputs().iter().all(|i| cell.contains_key(*i)) {
                continue;
            }
            let value = formula.evaluate(&cell);
            cell.insert(def.name.to_string(), value);
            out.push(rows[template].derive(rows[template].insurer.clone(), def.name, value));
        }
    }
    debug!(rows = out.len(), "ratio engine");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::closure;
    use crate::types::{Facets, Insurer, Quarter, ReportingForm};

    fn row(insurer: &str, metric: &str, value: f64) -> Row {
        Row {
            quarter: Quarter::new(2024, 2).unwrap(),
            reporting_form: ReportingForm::F162,
            line: "all".to_string(),
            insurer: Insurer::from(insurer),
            metric: metric.to_string(),
            value: Some(value),
            facets: Facets::default(),
        }
    }

    fn metric<'a>(rows: &'a [Row], insurer: &str, name: &str) -> Option<&'a Row> {
        rows.iter().find(|r| r.insurer == Insurer::from(insurer) && r.metric == name)
    }

    fn setup(requested: &[&str]) -> (Closure, MetricDictionary) {
        let dict = MetricDictionary::canonical().unwrap();
        let names: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        (closure(&names, &[], ReportingForm::F162, &dict), dict)
    }

    #[test]
    fn loss_ratios_and_effect() {
        let (c, dict) = setup(&["effect_on_loss_ratio"]);
        let rows = vec![
            row("A", "total_premiums", 200.0),
            row("A", "total_losses", 120.0),
            row("A", "net_premiums", 150.0),
            row("A", "net_losses", 75.0),
        ];
        let out = compute_ratios(&rows, &c, &dict);
        assert_eq!(metric(&out, "A", "gross_loss_ratio").unwrap().value, Some(0.6));
        assert_eq!(metric(&out, "A", "net_loss_ratio").unwrap().value, Some(0.5));
        let effect = metric(&out, "A", "effect_on_loss_ratio").unwrap().value.unwrap();
        assert!((effect - 0.1).abs() < 1e-10);
    }

    #[test]
    fn zero_denominator_emits_null_row() {
        let (c, dict) = setup(&["direct_loss_ratio"]);
        let rows = vec![row("A", "direct_premiums", 0.0), row("A", "direct_losses", 5.0)];
        let out = compute_ratios(&rows, &c, &dict);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, None);
    }

    #[test]
    fn missing_input_skips_the_ratio() {
        let (c, dict) = setup(&["direct_loss_ratio"]);
        let out = compute_ratios(&[row("A", "direct_losses", 5.0)], &c, &dict);
        assert!(out.is_empty());
    }

    #[test]
    fn unit_scales_feed_averages() {
        let (c, dict) = setup(&["average_sum_insured", "average_loss"]);
        let mut rows = vec![
            row("A", "sums_end", 5000.0),
            row("A", "contracts_end", 2.0),
            row("A", "direct_losses", 300.0),
            row("A", "claims_settled", 0.5),
        ];
        apply_unit_scales(&mut rows, &c, &dict);
        assert_eq!(metric(&rows, "A", "sums_end").unwrap().value, Some(500.0));
        assert_eq!(metric(&rows, "A", "contracts_end").unwrap().value, Some(2000.0));

        let out = compute_ratios(&rows, &c, &dict);
        let avg = metric(&out, "A", "average_sum_insured").unwrap().value.unwrap();
        assert!((avg - 500.0 / 2000.0 * 0.001).abs() < 1e-12);
        let loss = metric(&out, "A", "average_loss").unwrap().value.unwrap();
        assert!((loss - 0.6).abs() < 1e-12);
    }

    #[test]
    fn ratios_are_per_insurer_including_total() {
        let (c, dict) = setup(&["direct_loss_ratio"]);
        let rows = vec![
            row("A", "direct_premiums", 100.0),
            row("A", "direct_losses", 50.0),
            row("total", "direct_premiums", 400.0),
            row("total", "direct_losses", 100.0),
        ];
        let out = compute_ratios(&rows, &c, &dict);
        assert_eq!(metric(&out, "A", "direct_loss_ratio").unwrap().value, Some(0.5));
        assert_eq!(metric(&out, "total", "direct_loss_ratio").unwrap().value, Some(0.25));
    }
}
