use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{PeriodType, PremiumLoss, Quarter, ReportingForm};

/// Cohort sizes for which `top-N` rows are synthesised.
pub const TOP_N_COHORTS: [usize; 3] = [5, 10, 20];

/// Fixed metric that orders the benchmark cohort.
pub const BENCHMARK_METRIC: &str = "direct_premiums";

pub const DEFAULT_NUM_PERIODS: usize = 5;

fn default_primary_metrics() -> Vec<String> {
    vec![BENCHMARK_METRIC.to_string()]
}

/// One request's filter state. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub reporting_form: ReportingForm,
    /// Empty means no premium/loss gating.
    pub premium_loss: Vec<PremiumLoss>,
    /// Empty means every line.
    pub lines: Vec<String>,
    pub primary_metrics: Vec<String>,
    pub secondary_metrics: Vec<String>,
    pub end_quarter: Option<Quarter>,
    pub start_quarter: Option<Quarter>,
    pub num_periods: usize,
    pub period_type: PeriodType,
    pub selected_insurers: Vec<String>,
    pub top_n_rows: Option<usize>,
    pub show_data_table: bool,
    pub reinsurance_form: Vec<String>,
    pub reinsurance_geography: Vec<String>,
    pub reinsurance_type: Vec<String>,
    /// `life` / `non-life`; unrecognised values are ignored.
    pub line_type: Vec<String>,
    /// Replace every selected internal line by its immediate children.
    pub detailize: bool,
    /// Table mode only: also keep the top-K real insurers of each line.
    pub number_of_insurers: Option<usize>,
    /// Excluded from the benchmark cohort. Defaults to the first selected company.
    pub main_insurer: Option<String>,
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState {
            reporting_form: ReportingForm::default(),
            premium_loss: Vec::new(),
            lines: Vec::new(),
            primary_metrics: default_primary_metrics(),
            secondary_metrics: Vec::new(),
            end_quarter: None,
            start_quarter: None,
            num_periods: DEFAULT_NUM_PERIODS,
            period_type: PeriodType::default(),
            selected_insurers: Vec::new(),
            top_n_rows: None,
            show_data_table: false,
            reinsurance_form: Vec::new(),
            reinsurance_geography: Vec::new(),
            reinsurance_type: Vec::new(),
            line_type: Vec::new(),
            detailize: false,
            number_of_insurers: None,
            main_insurer: None,
        }
    }
}

impl FilterState {
    /// Requested metrics R: primary then secondary, first occurrence wins.
    pub fn requested_metrics(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in self.primary_metrics.iter().chain(&self.secondary_metrics) {
            if !out.contains(m) {
                out.push(m.clone());
            }
        }
        out
    }

    /// A single request from JSON, or a batch from a JSON array.
    pub fn load_many(path: &Path) -> Result<Vec<FilterState>> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| Error::Json { path: path.to_path_buf(), source })?;
        let states = match value {
            serde_json::Value::Array(_) => serde_json::from_value(value),
            other => serde_json::from_value(other).map(|s| vec![s]),
        };
        states.map_err(|source| Error::Json { path: path.to_path_buf(), source })
    }
}

/// Where the startup loader finds its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub facts: PathBuf,
    pub lines_162: PathBuf,
    pub lines_158: PathBuf,
    pub insurers: PathBuf,
}

impl AppConfig {
    pub fn canonical() -> Self {
        AppConfig {
            facts: PathBuf::from("data/facts.csv"),
            lines_162: PathBuf::from("data/lines_162.json"),
            lines_158: PathBuf::from("data/lines_158.json"),
            insurers: PathBuf::from("data/insurers.json"),
        }
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| Error::Json { path: path.to_path_buf(), source })
    }
}
