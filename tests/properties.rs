use inscore::config::FilterState;
use inscore::delta::append_deltas;
use inscore::facts::FactTable;
use inscore::filter::RowFilter;
use inscore::invariants::check;
use inscore::metrics::MetricDictionary;
use inscore::pipeline::derive;
use inscore::rows::FactRow;
use inscore::taxonomy::Taxonomies;
use inscore::types::{Facets, Insurer, PeriodType, Quarter, ReportingForm};
use proptest::prelude::*;

fn q(year: i32, quarter: u8) -> Quarter {
    Quarter::new(year, quarter).unwrap()
}

fn fact(quarter: Quarter, line: &str, insurer: usize, metric: &str, value: f64) -> FactRow {
    FactRow {
        quarter,
        reporting_form: ReportingForm::F162,
        line: line.to_string(),
        insurer: Insurer::company(format!("{}", 1001 + insurer)),
        metric: metric.to_string(),
        value,
        line_type: None,
        facets: Facets::default(),
    }
}

/// Up to 25 companies, two lines, two quarters; a few write inward business.
fn arb_market() -> impl Strategy<Value = FactTable> {
    prop::collection::vec((0.0f64..1_000.0, 0.0f64..1_000.0, prop::option::of(0.0f64..100.0)), 1..25).prop_map(
        |books| {
            let mut rows = Vec::new();
            for (i, (now, before, inward)) in books.into_iter().enumerate() {
                let line = if i % 3 == 0 { "cargo" } else { "motor" };
                rows.push(fact(q(2023, 4), line, i, "direct_premiums", before));
                rows.push(fact(q(2024, 1), line, i, "direct_premiums", now));
                if let Some(inward) = inward {
                    rows.push(fact(q(2024, 1), line, i, "inward_premiums", inward));
                }
            }
            FactTable::new(rows)
        },
    )
}

fn arb_insurers() -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(
        vec!["1001", "1003", "total", "top-5", "top-10", "top-5-benchmark", "others"],
        0..5,
    )
    .prop_map(|v| v.into_iter().map(str::to_string).collect())
}

fn state(insurers: Vec<String>, period: PeriodType) -> FilterState {
    FilterState {
        primary_metrics: vec!["total_premiums".to_string(), "direct_premiums_market_share".to_string()],
        selected_insurers: insurers,
        period_type: period,
        ..FilterState::default()
    }
}

proptest! {
    #[test]
    fn derived_tables_hold_every_invariant(facts in arb_market(), insurers in arb_insurers()) {
        let dict = MetricDictionary::canonical().unwrap();
        for period in [PeriodType::Qoq, PeriodType::Ytd, PeriodType::Mat] {
            let derived = derive(&state(insurers.clone(), period), &facts, &Taxonomies::default(), &dict).unwrap();
            let violations = check(&derived.rows, &dict);
            prop_assert!(violations.is_empty(), "{period:?}: {violations:?}");
        }
    }

    #[test]
    fn delta_stage_is_idempotent(facts in arb_market(), insurers in arb_insurers()) {
        let dict = MetricDictionary::canonical().unwrap();
        let derived = derive(&state(insurers, PeriodType::Qoq), &facts, &Taxonomies::default(), &dict).unwrap();
        let again = append_deltas(derived.rows.clone(), &dict);
        prop_assert_eq!(again, derived.rows);
    }

    #[test]
    fn empty_filter_is_identity(facts in arb_market()) {
        prop_assert_eq!(RowFilter::default().apply(facts.rows()), facts.rows().to_vec());
    }

    #[test]
    fn share_deltas_cancel_across_a_cell(facts in arb_market()) {
        let dict = MetricDictionary::canonical().unwrap();
        let request = FilterState {
            primary_metrics: vec!["direct_premiums_market_share".to_string()],
            period_type: PeriodType::Qoq,
            ..FilterState::default()
        };
        let derived = derive(&request, &facts, &Taxonomies::default(), &dict).unwrap();
        for line in ["cargo", "motor"] {
            let shares_before: f64 = derived
                .rows
                .iter()
                .filter(|r| r.line == line && r.quarter == q(2023, 4) && r.insurer.company_id().is_some())
                .filter(|r| r.metric == "direct_premiums_market_share")
                .filter_map(|r| r.value)
                .sum();
            let shares_now: f64 = derived
                .rows
                .iter()
                .filter(|r| r.line == line && r.quarter == q(2024, 1) && r.insurer.company_id().is_some())
                .filter(|r| r.metric == "direct_premiums_market_share")
                .filter_map(|r| r.value)
                .sum();
            // Only meaningful when both quarters have a market.
            if (shares_before - 1.0).abs() > 1e-9 || (shares_now - 1.0).abs() > 1e-9 {
                continue;
            }
            let sum: f64 = derived
                .rows
                .iter()
                .filter(|r| r.line == line && r.quarter == q(2024, 1) && r.insurer.company_id().is_some())
                .filter(|r| r.metric == "direct_premiums_market_share_q_to_q_change")
                .filter_map(|r| r.value)
                .sum();
            prop_assert!(sum.abs() < 1e-9, "line {line}: share deltas sum to {sum}");
        }
    }

    #[test]
    fn ytd_sums_quarters_one_to_k(values in prop::collection::vec(0.0f64..500.0, 8), k in 1u8..=4) {
        let dict = MetricDictionary::canonical().unwrap();
        let rows: Vec<FactRow> = values
            .iter()
            .enumerate()
            .map(|(i, v)| fact(q(2023, 1).offset(i as i64), "motor", 0, "direct_premiums", *v))
            .collect();
        let request = FilterState {
            period_type: PeriodType::Ytd,
            end_quarter: Some(q(2024, k)),
            selected_insurers: vec!["1001".to_string()],
            ..FilterState::default()
        };
        let derived = derive(&request, &FactTable::new(rows), &Taxonomies::default(), &dict).unwrap();
        for year in [2023, 2024] {
            let expected: f64 = values[(year as usize - 2023) * 4..][..k as usize].iter().sum();
            let got = derived
                .rows
                .iter()
                .find(|r| r.quarter == q(year, k) && r.metric == "direct_premiums" && r.insurer == Insurer::company("1001"))
                .and_then(|r| r.value)
                .unwrap();
            prop_assert!((got - expected).abs() < 1e-9 * expected.max(1.0));
        }
    }
}
