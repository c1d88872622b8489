use std::collections::BTreeMap;

use tracing::debug;

use crate::metrics::{MetricDictionary, MetricValues};
use crate::rows::{PivotKey, Row};
use crate::selector::Closure;

/// Rows grouped by `(quarter, line, insurer, facets)` with their metric values.
pub(crate) struct Pivot {
    pub cells: BTreeMap<PivotKey, (usize, MetricValues)>,
}

impl Pivot {
    /// The `usize` is the index of the first row of the cell, used as a template.
    pub fn build(rows: &[Row]) -> Pivot {
        let mut cells: BTreeMap<PivotKey, (usize, MetricValues)> = BTreeMap::new();
        for (i, r) in rows.iter().enumerate() {
            cells
                .entry(r.pivot_key())
                .or_insert_with(|| (i, MetricValues::new()))
                .1
                .insert(r.metric.clone(), r.value);
        }
        Pivot { cells }
    }
}

/// Add composite level metrics in C to every cell where at least one input is
/// present and the composite itself is not. Missing inputs count as zero.
pub fn compose(mut rows: Vec<Row>, closure: &Closure, dict: &MetricDictionary) -> Vec<Row> {
    let composites: Vec<_> = dict
        .evaluation_order()
        .filter(|d| d.is_composite() && closure.contains(d.name))
        .collect();
    if composites.is_empty() {
        return rows;
    }

    let pivot = Pivot::build(&rows);
    let mut added = Vec::new();
    for (template, mut cell) in pivot.cells.into_values() {
        for def in &composites {
            let Some(formula) = def.formula else { continue };
            if cell.contains_key(def.name) || !formula.inputs().iter().any(|i| cell.contains_key(*i)) {
                continue;
            }
            let value = formula.evaluate(&cell);
            cell.insert(def.name.to_string(), value);
            added.push(rows[template].derive(rows[template].insurer.clone(), def.name, value));
        }
    }

    debug!(added = added.len(), "base composer");
    rows.extend(added);
    rows
}
