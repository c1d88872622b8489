use std::collections::BTreeMap;

use tracing::debug;

use crate::metrics::{MetricDictionary, share_name};
use crate::rows::{CellKey, Row};
use crate::types::Insurer;

/// `<metric>_market_share` for every level or count row whose cell has a
/// non-zero market total. Synthetic insurers get shares too; `total` is 1.
pub fn market_shares(rows: &[Row], dict: &MetricDictionary) -> Vec<Row> {
    let totals: BTreeMap<CellKey, f64> = rows
        .iter()
        .filter(|r| r.insurer == Insurer::Total)
        .filter_map(|r| r.value.map(|v| (r.cell_key(), v)))
        .collect();

    let out: Vec<Row> = rows
        .iter()
        .filter(|r| dict.get(&r.metric).is_some_and(|d| d.kind.is_additive()))
        .filter_map(|r| {
            let value = r.value?;
            let total = *totals.get(&r.cell_key())?;
            (total != 0.0).then(|| r.derive(r.insurer.clone(), share_name(&r.metric), Some(value / total)))
        })
        .collect();

    debug!(rows = out.len(), cells = totals.len(), "market share");
    out
}
