use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::aggregate::{RankMap, Rankings, by_value_desc, ranking_metric};
use crate::config::TOP_N_COHORTS;
use crate::facts::FactTable;
use crate::metrics::{MetricDictionary, MetricKind, share_name};
use crate::rows::Row;
use crate::taxonomy::{InsurerNames, LineOption, Taxonomies};
use crate::types::{Insurer, Quarter, ReportingForm};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricOption {
    pub value: String,
    pub kind: MetricKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricOptions {
    pub primary: Vec<MetricOption>,
    pub secondary: Vec<MetricOption>,
    /// The incoming selections with names the form does not offer removed.
    pub primary_selected: Vec<String>,
    pub secondary_selected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsurerOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsurerOptions {
    pub options: Vec<InsurerOption>,
    pub current_ranks: RankMap,
    pub previous_ranks: RankMap,
}

/// Flattened line taxonomy of `form`, down to `depth` levels below the roots.
pub fn insurance_line_options(taxonomies: &Taxonomies, form: ReportingForm, depth: Option<usize>) -> Vec<LineOption> {
    taxonomies.lines(form).flatten(depth)
}

/// Every metric offered on `form`, with `_market_share` variants of the
/// additive ones. The secondary list omits the selected primary metrics.
pub fn metric_options(
    dict: &MetricDictionary,
    form: ReportingForm,
    selected_primary: &[String],
    selected_secondary: &[String],
) -> MetricOptions {
    let mut all: Vec<MetricOption> = Vec::new();
    for def in dict.defs().iter().filter(|d| d.defined_on(form)) {
        all.push(MetricOption { value: def.name.to_string(), kind: def.kind });
        if def.kind.is_additive() {
            all.push(MetricOption { value: share_name(def.name), kind: MetricKind::Share });
        }
    }

    let offered: BTreeSet<&str> = all.iter().map(|o| o.value.as_str()).collect();
    let valid = |selected: &[String]| -> Vec<String> {
        selected.iter().filter(|m| offered.contains(m.as_str())).cloned().collect()
    };
    let primary_selected = valid(selected_primary);
    let mut secondary_selected = valid(selected_secondary);
    secondary_selected.retain(|m| !primary_selected.contains(m));

    let secondary = all.iter().filter(|o| !primary_selected.contains(&o.value)).cloned().collect();

    MetricOptions { primary: all, secondary, primary_selected, secondary_selected }
}

/// Every sentinel, in display order.
pub fn sentinels() -> Vec<Insurer> {
    let mut out = vec![Insurer::Total];
    out.extend(TOP_N_COHORTS.iter().map(|&n| Insurer::TopN(n)));
    out.extend(TOP_N_COHORTS.iter().map(|&n| Insurer::Benchmark(n)));
    out.push(Insurer::Others);
    out
}

/// Sentinels, then companies by the first primary metric at the latest
/// quarter of `rows`, summed over `lines` (all lines when empty). Companies
/// absent at that quarter follow in identifier order. The rank maps are the
/// aggregator's, passed through.
pub fn insurer_options(
    rows: &[Row],
    primary_metrics: &[String],
    lines: &[String],
    names: &InsurerNames,
    rankings: &Rankings,
) -> InsurerOptions {
    let ranks_only = || InsurerOptions {
        options: Vec::new(),
        current_ranks: rankings.current.clone(),
        previous_ranks: rankings.previous.clone(),
    };
    let Some(end) = rows.iter().map(|r| r.quarter).max() else {
        return ranks_only();
    };
    let Some(metric) = ranking_metric(primary_metrics, rows) else {
        return ranks_only();
    };
    let in_lines = |r: &Row| lines.is_empty() || lines.contains(&r.line);

    let mut at_end: BTreeMap<&str, f64> = BTreeMap::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for r in rows.iter().filter(|&r| in_lines(r)) {
        let Some(id) = r.insurer.company_id() else { continue };
        seen.insert(id);
        if r.quarter == end && r.metric == metric {
            *at_end.entry(id).or_insert(0.0) += r.value.unwrap_or(0.0);
        }
    }
    let mut ranked: Vec<(&str, f64)> = at_end.into_iter().collect();
    ranked.sort_by(by_value_desc);
    let ordered: Vec<&str> = ranked.iter().map(|(id, _)| *id).collect();

    let mut options: Vec<InsurerOption> = sentinels()
        .iter()
        .map(|s| InsurerOption { value: s.to_string(), label: names.label(s) })
        .collect();
    let companies = ordered.iter().copied().chain(seen.iter().copied().filter(|id| !ordered.contains(id)));
    options.extend(companies.map(|id| {
        let insurer = Insurer::company(id);
        InsurerOption { value: id.to_string(), label: names.label(&insurer) }
    }));

    InsurerOptions { options, ..ranks_only() }
}

/// Insurers a selection can be compared against: everything but `main`.
pub fn compare_options(options: &[InsurerOption], main: Option<&str>) -> Vec<InsurerOption> {
    options.iter().filter(|o| Some(o.value.as_str()) != main).cloned().collect()
}

/// Quarters F holds for `form`, latest first.
pub fn quarter_options(facts: &FactTable, form: ReportingForm) -> Vec<Quarter> {
    facts.quarters(form).into_iter().rev().collect()
}
