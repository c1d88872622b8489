use serde::{Deserialize, Serialize};

use crate::types::{Facets, Insurer, LineType, Quarter, ReportingForm};

/// One observation of the long-form fact table F.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub quarter: Quarter,
    pub reporting_form: ReportingForm,
    pub line: String,
    pub insurer: Insurer,
    pub metric: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<LineType>,
    #[serde(flatten)]
    pub facets: Facets,
}

/// One row of the derived table. `value` is `None` where an arithmetic edge
/// (division by zero, missing predecessor) produced a null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub quarter: Quarter,
    pub reporting_form: ReportingForm,
    pub line: String,
    pub insurer: Insurer,
    pub metric: String,
    pub value: Option<f64>,
    #[serde(flatten)]
    pub facets: Facets,
}

/// `(quarter, line, metric, facets)`: the cell the insurer dimension is summarised over.
pub type CellKey = (Quarter, String, String, Facets);

/// `(quarter, line, insurer, facets)`: the cell metrics are pivoted over.
pub type PivotKey = (Quarter, String, Insurer, Facets);

/// `(line, insurer, metric, facets)`: a time series.
pub type SeriesKey = (String, Insurer, String, Facets);

impl Row {
    pub fn cell_key(&self) -> CellKey {
        (self.quarter, self.line.clone(), self.metric.clone(), self.facets.clone())
    }

    pub fn pivot_key(&self) -> PivotKey {
        (self.quarter, self.line.clone(), self.insurer.clone(), self.facets.clone())
    }

    pub fn series_key(&self) -> SeriesKey {
        (self.line.clone(), self.insurer.clone(), self.metric.clone(), self.facets.clone())
    }

    /// A new row in the same `(quarter, line, facets)` position.
    pub fn derive(&self, insurer: Insurer, metric: impl Into<String>, value: Option<f64>) -> Row {
        Row {
            quarter: self.quarter,
            reporting_form: self.reporting_form,
            line: self.line.clone(),
            insurer,
            metric: metric.into(),
            value,
            facets: self.facets.clone(),
        }
    }
}

impl From<&FactRow> for Row {
    fn from(f: &FactRow) -> Self {
        Row {
            quarter: f.quarter,
            reporting_form: f.reporting_form,
            line: f.line.clone(),
            insurer: f.insurer.clone(),
            metric: f.metric.clone(),
            value: Some(f.value),
            facets: f.facets.clone(),
        }
    }
}
