use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::rows::FactRow;
use crate::types::{Facets, Insurer, LineType, Quarter, ReportingForm};

/// Flat CSV shape of F. `reporting_form` may be absent when a file holds one
/// form only; the column names of the regulator extracts are accepted as aliases.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRecord {
    #[serde(alias = "year_quarter")]
    quarter: String,
    #[serde(default)]
    reporting_form: Option<String>,
    #[serde(alias = "linemain")]
    line: String,
    insurer: String,
    metric: String,
    value: Option<f64>,
    #[serde(default)]
    line_type: Option<String>,
    #[serde(default)]
    reinsurance_form: Option<String>,
    #[serde(default)]
    reinsurance_geography: Option<String>,
    #[serde(default)]
    reinsurance_type: Option<String>,
}

/// The immutable in-memory fact table.
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    rows: Vec<FactRow>,
}

impl FactTable {
    pub fn new(rows: Vec<FactRow>) -> Self {
        FactTable { rows }
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn from_csv_path(path: &Path, default_form: ReportingForm) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        Self::from_csv_reader(file, default_form)
    }

    /// Parse F from CSV. Rows without a value and rows carrying a synthetic
    /// sentinel other than `total` are skipped.
    pub fn from_csv_reader<R: Read>(reader: R, default_form: ReportingForm) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for record in csv_reader.deserialize::<CsvRecord>() {
            let record = record?;
            let Some(value) = record.value else {
                skipped += 1;
                continue;
            };
            let insurer = Insurer::from(record.insurer.as_str());
            if insurer.is_synthetic() && insurer != Insurer::Total {
                warn!(insurer = %insurer, "synthetic insurer in source data; row skipped");
                skipped += 1;
                continue;
            }
            let reporting_form = match record.reporting_form.as_deref() {
                Some(code) => code.parse()?,
                None => default_form,
            };
            rows.push(FactRow {
                quarter: record.quarter.parse()?,
                reporting_form,
                line: record.line,
                insurer,
                metric: record.metric,
                value,
                line_type: record.line_type.as_deref().and_then(|t| t.parse::<LineType>().ok()),
                facets: Facets {
                    reinsurance_form: record.reinsurance_form,
                    reinsurance_geography: record.reinsurance_geography,
                    reinsurance_type: record.reinsurance_type,
                },
            });
        }

        debug!(rows = rows.len(), skipped, "fact table loaded");
        Ok(FactTable { rows })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv_writer.serialize(CsvRecord {
                quarter: row.quarter.to_string(),
                reporting_form: Some(row.reporting_form.to_string()),
                line: row.line.clone(),
                insurer: row.insurer.to_string(),
                metric: row.metric.clone(),
                value: Some(row.value),
                line_type: row.line_type.map(|t| match t {
                    LineType::Life => "life".to_string(),
                    LineType::NonLife => "non-life".to_string(),
                }),
                reinsurance_form: row.facets.reinsurance_form.clone(),
                reinsurance_geography: row.facets.reinsurance_geography.clone(),
                reinsurance_type: row.facets.reinsurance_type.clone(),
            })?;
        }
        csv_writer.flush().map_err(|e| Error::Csv(e.into()))?;
        Ok(())
    }

    pub fn quarters(&self, form: ReportingForm) -> BTreeSet<Quarter> {
        self.rows
            .iter()
            .filter(|r| r.reporting_form == form)
            .map(|r| r.quarter)
            .collect()
    }

    pub fn latest_quarter(&self, form: ReportingForm) -> Option<Quarter> {
        self.rows.iter().filter(|r| r.reporting_form == form).map(|r| r.quarter).max()
    }

    pub fn earliest_quarter(&self, form: ReportingForm) -> Option<Quarter> {
        self.rows.iter().filter(|r| r.reporting_form == form).map(|r| r.quarter).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
year_quarter,linemain,insurer,metric,value,line_type
2023-10-01,all,A,direct_premiums,100,non-life
2024-01-01,all,A,direct_premiums,120,non-life
2024-01-01,all,total,direct_premiums,250,
2024-01-01,all,top-5,direct_premiums,250,
2024-01-01,all,B,direct_premiums,,
";

    #[test]
    fn loads_regulator_extract_columns() {
        let table = FactTable::from_csv_reader(SAMPLE.as_bytes(), ReportingForm::F162).unwrap();
        assert_eq!(table.len(), 3, "empty value and top-5 rows are skipped");
        assert_eq!(table.rows()[0].quarter, Quarter::new(2023, 4).unwrap());
        assert_eq!(table.rows()[0].line_type, Some(LineType::NonLife));
        assert_eq!(table.rows()[2].insurer, Insurer::Total);
        assert!(table.rows().iter().all(|r| r.reporting_form == ReportingForm::F162));
    }

    #[test]
    fn quarter_bounds_are_per_form() {
        let table = FactTable::from_csv_reader(SAMPLE.as_bytes(), ReportingForm::F158).unwrap();
        assert_eq!(table.latest_quarter(ReportingForm::F158), Quarter::new(2024, 1));
        assert_eq!(table.earliest_quarter(ReportingForm::F158), Quarter::new(2023, 4));
        assert_eq!(table.latest_quarter(ReportingForm::F162), None);
        assert_eq!(table.quarters(ReportingForm::F158).len(), 2);
    }

    #[test]
    fn bad_quarter_is_an_error() {
        let data = "quarter,line,insurer,metric,value\nsoon,all,A,direct_premiums,1\n";
        let err = FactTable::from_csv_reader(data.as_bytes(), ReportingForm::F162).unwrap_err();
        assert!(matches!(err, Error::InvalidQuarter(_)));
    }

    #[test]
    fn written_csv_reads_back() {
        let table = FactTable::from_csv_reader(SAMPLE.as_bytes(), ReportingForm::F162).unwrap();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let back = FactTable::from_csv_reader(buf.as_slice(), ReportingForm::F158).unwrap();
        assert_eq!(back.rows(), table.rows());
    }
}
