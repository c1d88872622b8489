use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{InsurerRetention, RankMap, Rankings, aggregate, ranking_metric, rankings};
use crate::compose::compose;
use crate::config::FilterState;
use crate::delta::{append_deltas, retain_table_periods};
use crate::facts::FactTable;
use crate::filter::filter_rows;
use crate::metrics::{MetricDictionary, base_name};
use crate::options::{InsurerOption, MetricOptions, compare_options, insurer_options, metric_options};
use crate::period;
use crate::ratios::{apply_unit_scales, compute_ratios};
use crate::rows::Row;
use crate::selector::{Closure, Selection};
use crate::share::market_shares;
use crate::taxonomy::Taxonomies;
use crate::types::{Insurer, Quarter};

/// Everything one request returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub table: Vec<Row>,
    pub metric_options: MetricOptions,
    pub insurer_options: Vec<InsurerOption>,
    pub compare_options: Vec<InsurerOption>,
    pub selected_insurers: Vec<String>,
    pub current_ranks: RankMap,
    pub previous_ranks: RankMap,
    pub periods_available: Vec<Quarter>,
    pub insurers_available: usize,
}

/// The derived table before insurer and period retention.
#[derive(Debug, Clone)]
pub struct Derived {
    pub selection: Selection,
    pub rows: Vec<Row>,
    pub ranking_metric: Option<String>,
    pub rankings: Rankings,
    pub insurers_available: usize,
}

/// Keep the requested metrics with their share and delta variants.
fn restrict_to_requested(rows: Vec<Row>, closure: &Closure) -> Vec<Row> {
    rows.into_iter().filter(|r| closure.is_requested(base_name(&r.metric))).collect()
}

/// Stages 1 to 7 over every insurer and transformed period. `None` when the
/// request selects nothing.
pub fn derive(
    state: &FilterState,
    facts: &FactTable,
    taxonomies: &Taxonomies,
    dict: &MetricDictionary,
) -> Option<Derived> {
    let selection = Selection::resolve(state, facts, taxonomies, dict)?;
    if selection.closure.requested.is_empty() {
        debug!("no requested metric is defined for the form");
        return None;
    }

    // Rows outside the closure were fetched only to rank benchmark cohorts.
    let (filtered, cohort_basis): (Vec<Row>, Vec<Row>) = filter_rows(facts.rows(), &selection.row_filter)
        .into_iter()
        .partition(|r| selection.closure.contains(&r.metric));
    if filtered.is_empty() {
        debug!("no rows survive the filter");
        return None;
    }
    let insurers_available = filtered
        .iter()
        .filter_map(|r| r.insurer.company_id())
        .collect::<BTreeSet<_>>()
        .len();

    let cohort_basis = period::transform(cohort_basis, &selection.window);
    let transformed = period::transform(filtered, &selection.window);
    let composed = compose(transformed, &selection.closure, dict);

    let metric = ranking_metric(&selection.closure.requested, &composed);
    let ranks = metric
        .as_deref()
        .map(|m| rankings(&composed, m, selection.window.end))
        .unwrap_or_default();

    let mut rows = aggregate(composed, &selection, metric.as_deref(), &cohort_basis);
    apply_unit_scales(&mut rows, &selection.closure, dict);
    let ratios = compute_ratios(&rows, &selection.closure, dict);
    rows.extend(ratios);
    let shares = market_shares(&rows, dict);
    rows.extend(shares);
    let rows = append_deltas(restrict_to_requested(rows, &selection.closure), dict);

    Some(Derived { selection, rows, ranking_metric: metric, rankings: ranks, insurers_available })
}

fn sort_table(rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        (&a.line, &a.facets, &a.metric, &a.insurer, a.quarter)
            .cmp(&(&b.line, &b.facets, &b.metric, &b.insurer, b.quarter))
    });
}

impl PipelineOutput {
    /// Apply insurer and period retention and gather the option lists.
    pub fn from_derived(
        derived: Derived,
        state: &FilterState,
        taxonomies: &Taxonomies,
        dict: &MetricDictionary,
    ) -> PipelineOutput {
        let Derived { selection, rows, rankings, insurers_available, .. } = derived;

        let insurers =
            insurer_options(&rows, &state.primary_metrics, &selection.lines, &taxonomies.insurers, &rankings);
        let known: BTreeSet<&str> = insurers.options.iter().map(|o| o.value.as_str()).collect();
        let selected_insurers: Vec<String> = selection
            .insurers
            .iter()
            .filter(|i| i.is_synthetic() || i.company_id().is_some_and(|id| known.contains(id)))
            .map(Insurer::to_string)
            .collect();
        let compare = compare_options(&insurers.options, selection.main_insurer.as_deref());

        let retention = InsurerRetention::new(&selection, &rankings);
        let mut table = retention.apply(rows);
        if selection.table_mode {
            table = retain_table_periods(table, selection.window.num_periods, dict);
        }
        sort_table(&mut table);

        let periods_available: Vec<Quarter> =
            table.iter().map(|r| r.quarter).collect::<BTreeSet<_>>().into_iter().collect();

        PipelineOutput {
            table,
            metric_options: metric_options(dict, selection.form, &state.primary_metrics, &state.secondary_metrics),
            insurer_options: insurers.options,
            compare_options: compare,
            selected_insurers,
            current_ranks: insurers.current_ranks,
            previous_ranks: insurers.previous_ranks,
            periods_available,
            insurers_available,
        }
    }
}

/// Run one request end to end. An empty selection yields an empty output.
pub fn run(
    state: &FilterState,
    facts: &FactTable,
    taxonomies: &Taxonomies,
    dict: &MetricDictionary,
) -> PipelineOutput {
    let Some(derived) = derive(state, facts, taxonomies, dict) else {
        return PipelineOutput::default();
    };
    let output = PipelineOutput::from_derived(derived, state, taxonomies, dict);
    info!(
        rows = output.table.len(),
        periods = output.periods_available.len(),
        insurers = output.insurers_available,
        "pipeline complete"
    );
    output
}
