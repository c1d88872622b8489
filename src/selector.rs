use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::{BENCHMARK_METRIC, FilterState};
use crate::facts::FactTable;
use crate::filter::{RowFilter, known_values};
use crate::metrics::{MARKET_SHARE_SUFFIX, MetricDictionary, base_name};
use crate::period::Window;
use crate::rows::FactRow;
use crate::taxonomy::Taxonomies;
use crate::types::{Insurer, LineType, PremiumLoss, ReportingForm};

/// Dependency closure C(R, P) of a metric request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Closure {
    /// Bare requested metrics defined on the form, in request order.
    pub requested: Vec<String>,
    /// Every metric needed to compute `requested`.
    pub metrics: BTreeSet<String>,
    /// Some request carried the `_market_share` suffix.
    pub share_requested: bool,
}

impl Closure {
    pub fn contains(&self, metric: &str) -> bool {
        self.metrics.contains(metric)
    }

    pub fn is_requested(&self, metric: &str) -> bool {
        self.requested.iter().any(|m| m == metric)
    }
}

/// Expand `requested` into its closure on `form`. Metrics the form does not
/// define are dropped with a warning. Gated base inputs are removed when their
/// business type is not in `premium_loss`, unless requested directly.
pub fn closure(
    requested: &[String],
    premium_loss: &[PremiumLoss],
    form: ReportingForm,
    dict: &MetricDictionary,
) -> Closure {
    let mut out = Closure::default();

    for name in requested {
        let bare = base_name(name);
        if name.contains(MARKET_SHARE_SUFFIX) {
            out.share_requested = true;
        }
        match dict.get(bare) {
            Some(def) if def.defined_on(form) => {
                if !out.is_requested(bare) {
                    out.requested.push(bare.to_string());
                }
            }
            _ => warn!(metric = %name, form = %form, "metric not defined for reporting form; dropped"),
        }
    }

    let mut pending: Vec<String> = out.requested.clone();
    out.metrics = pending.iter().cloned().collect();
    while let Some(name) = pending.pop() {
        let Some(formula) = dict.get(&name).and_then(|d| d.formula) else {
            continue;
        };
        for input in formula.inputs() {
            let on_form = dict.get(input).is_some_and(|d| d.defined_on(form));
            if on_form && out.metrics.insert(input.to_string()) {
                pending.push(input.to_string());
            }
        }
    }

    if !premium_loss.is_empty() {
        let gated_out: Vec<String> = out
            .metrics
            .iter()
            .filter(|m| !out.is_requested(m))
            .filter(|m| {
                dict.get(m)
                    .and_then(|d| d.gate)
                    .is_some_and(|gate| !premium_loss.contains(&gate))
            })
            .cloned()
            .collect();
        for m in gated_out {
            debug!(metric = %m, "gated out by premium/loss selection");
            out.metrics.remove(&m);
        }
    }

    out
}

fn present_in(
    facts: &FactTable,
    form: ReportingForm,
    value: &str,
    field: impl Fn(&FactRow) -> Option<&String>,
) -> bool {
    facts
        .rows()
        .iter()
        .any(|r| r.reporting_form == form && field(r).is_some_and(|v| v == value))
}

/// One request resolved against the loaded data.
#[derive(Debug, Clone)]
pub struct Selection {
    pub form: ReportingForm,
    pub window: Window,
    /// Normalised line selection; empty means every line.
    pub lines: Vec<String>,
    pub closure: Closure,
    pub insurers: Vec<Insurer>,
    pub top_n: Option<usize>,
    pub main_insurer: Option<String>,
    pub table_mode: bool,
    pub number_of_insurers: Option<usize>,
    pub row_filter: RowFilter,
}

impl Selection {
    /// `None` when F holds nothing for the requested form.
    pub fn resolve(
        state: &FilterState,
        facts: &FactTable,
        taxonomies: &Taxonomies,
        dict: &MetricDictionary,
    ) -> Option<Selection> {
        let form = state.reporting_form;
        let end = state.end_quarter.or_else(|| facts.latest_quarter(form))?;
        let window = Window::resolve(state.period_type, end, state.start_quarter, state.num_periods)
            .not_before(facts.earliest_quarter(form));

        let closure = closure(&state.requested_metrics(), &state.premium_loss, form, dict);

        let taxonomy = taxonomies.lines(form);
        let raw_lines = known_values("lines", &state.lines, |code| {
            taxonomy.contains(code) || present_in(facts, form, code, |r| Some(&r.line))
        });
        let ordered: Vec<String> = state.lines.iter().filter(|l| raw_lines.contains(l.as_str())).cloned().collect();
        let lines = taxonomy.normalize_selection(&ordered, state.detailize);

        let mut insurers: Vec<Insurer> = Vec::new();
        for literal in &state.selected_insurers {
            let insurer = Insurer::from(literal.as_str());
            if !insurers.contains(&insurer) {
                insurers.push(insurer);
            }
        }
        if insurers.is_empty() {
            insurers.push(Insurer::Total);
        }

        let main_insurer = state
            .main_insurer
            .clone()
            .or_else(|| insurers.iter().find_map(|i| i.company_id().map(str::to_string)));

        // Benchmark cohorts rank by a fixed metric the request may not need.
        let mut metrics = closure.metrics.clone();
        let benchmarked = insurers.iter().any(|i| matches!(i, Insurer::Benchmark(_)));
        if benchmarked && !metrics.is_empty() && dict.get(BENCHMARK_METRIC).is_some_and(|d| d.defined_on(form)) {
            metrics.insert(BENCHMARK_METRIC.to_string());
        }

        let line_types: BTreeSet<LineType> = state.line_type.iter().filter_map(|t| t.parse().ok()).collect();

        let row_filter = RowFilter {
            form: Some(form),
            lines: lines.iter().cloned().collect(),
            metrics,
            reinsurance_form: known_values("reinsurance_form", &state.reinsurance_form, |v| {
                present_in(facts, form, v, |r| r.facets.reinsurance_form.as_ref())
            }),
            reinsurance_geography: known_values("reinsurance_geography", &state.reinsurance_geography, |v| {
                present_in(facts, form, v, |r| r.facets.reinsurance_geography.as_ref())
            }),
            reinsurance_type: known_values("reinsurance_type", &state.reinsurance_type, |v| {
                present_in(facts, form, v, |r| r.facets.reinsurance_type.as_ref())
            }),
            line_types,
            from: window.fetch_from,
            to: Some(window.end),
        };

        debug!(
            form = %form,
            start = %window.start,
            end = %window.end,
            metrics = closure.metrics.len(),
            lines = lines.len(),
            "request resolved"
        );

        Some(Selection {
            form,
            window,
            lines,
            closure,
            insurers,
            top_n: state.top_n_rows,
            main_insurer,
            table_mode: state.show_data_table,
            number_of_insurers: state.number_of_insurers,
            row_filter,
        })
    }

    /// The `top-N` cohort the `others` residual subtracts.
    pub fn residual_top_n(&self) -> Option<usize> {
        self.top_n.or_else(|| {
            self.insurers.iter().find_map(|i| match i {
                Insurer::TopN(n) => Some(*n),
                _ => None,
            })
        })
    }

    pub fn selected_companies(&self) -> Vec<&str> {
        self.insurers.iter().filter_map(Insurer::company_id).collect()
    }

    pub fn benchmark_sizes(&self) -> Vec<usize> {
        self.insurers
            .iter()
            .filter_map(|i| match i {
                Insurer::Benchmark(n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}
