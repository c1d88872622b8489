use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A calendar quarter. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Quarter {
    pub year: i32,
    /// 1..=4
    pub quarter: u8,
}

impl Quarter {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Quarter { year, quarter })
    }

    /// Zero-based count of quarters since year 0, used for offset arithmetic.
    fn ordinal(self) -> i64 {
        self.year as i64 * 4 + (self.quarter as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Quarter {
            year: ordinal.div_euclid(4) as i32,
            quarter: (ordinal.rem_euclid(4) + 1) as u8,
        }
    }

    /// Shift by a signed number of quarters.
    pub fn offset(self, quarters: i64) -> Self {
        Self::from_ordinal(self.ordinal() + quarters)
    }

    /// Q1 of the same calendar year.
    pub fn year_start(self) -> Self {
        Quarter { year: self.year, quarter: 1 }
    }

    /// Signed number of quarters from `self` to `later`.
    pub fn quarters_until(self, later: Quarter) -> i64 {
        later.ordinal() - self.ordinal()
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

/// Accepts `2024Q1`, `2024-Q1` and ISO dates such as `2024-01-01` or
/// `2024-03-31` (the quarter containing the date).
impl FromStr for Quarter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || Error::InvalidQuarter(s.to_string());

        if let Some((year, q)) = trimmed.split_once(['Q', 'q']) {
            let year: i32 = year.trim_end_matches('-').parse().map_err(|_| invalid())?;
            let q: u8 = q.parse().map_err(|_| invalid())?;
            return Quarter::new(year, q).ok_or_else(invalid);
        }

        let date_part = trimmed.split([' ', 'T']).next().unwrap_or(trimmed);
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid())?;
        Quarter::new(date.year(), ((date.month0() / 3) + 1) as u8).ok_or_else(invalid)
    }
}

impl From<Quarter> for String {
    fn from(q: Quarter) -> Self {
        q.to_string()
    }
}

impl TryFrom<String> for Quarter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// The two regulatory report families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum ReportingForm {
    #[default]
    #[serde(alias = "0420162")]
    F162,
    #[serde(alias = "0420158")]
    F158,
}

impl ReportingForm {
    pub const ALL: [ReportingForm; 2] = [ReportingForm::F162, ReportingForm::F158];
}

impl fmt::Display for ReportingForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportingForm::F162 => f.write_str("F162"),
            ReportingForm::F158 => f.write_str("F158"),
        }
    }
}

impl FromStr for ReportingForm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "F162" | "f162" | "0420162" | "162" => Ok(ReportingForm::F162),
            "F158" | "f158" | "0420158" | "158" => Ok(ReportingForm::F158),
            other => Err(Error::UnknownForm(other.to_string())),
        }
    }
}

/// Period semantics applied to the whole invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Qoq,
    YoyQ,
    #[default]
    Ytd,
    Mat,
    YoyY,
    CumulativeSum,
}

impl PeriodType {
    /// Semantics that keep only quarters matching the end quarter-number.
    pub fn is_annual(self) -> bool {
        matches!(self, PeriodType::YoyQ | PeriodType::Ytd | PeriodType::YoyY)
    }
}

/// Business-type gate on base premium/loss metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumLoss {
    Direct,
    Inward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LineType {
    #[serde(rename = "life")]
    Life,
    #[serde(rename = "non-life", alias = "nonlife", alias = "non_life")]
    NonLife,
}

impl FromStr for LineType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "life" => Ok(LineType::Life),
            "non-life" | "nonlife" | "non_life" => Ok(LineType::NonLife),
            _ => Err(()),
        }
    }
}

/// Insurer dimension: a real registry identifier or one of the synthetic sentinels.
///
/// On the wire sentinels are `total`, `top-N`, `top-N-benchmark` and `others`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Insurer {
    Company(String),
    Total,
    TopN(usize),
    Benchmark(usize),
    Others,
}

impl Insurer {
    pub fn company(id: impl Into<String>) -> Self {
        Insurer::Company(id.into())
    }

    pub fn is_synthetic(&self) -> bool {
        !matches!(self, Insurer::Company(_))
    }

    pub fn company_id(&self) -> Option<&str> {
        match self {
            Insurer::Company(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Insurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insurer::Company(id) => f.write_str(id),
            Insurer::Total => f.write_str("total"),
            Insurer::TopN(n) => write!(f, "top-{n}"),
            Insurer::Benchmark(n) => write!(f, "top-{n}-benchmark"),
            Insurer::Others => f.write_str("others"),
        }
    }
}

impl From<&str> for Insurer {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s {
            "total" | "TOTAL" => return Insurer::Total,
            "others" => return Insurer::Others,
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("top-") {
            if let Some(n) = rest.strip_suffix("-benchmark").and_then(|n| n.parse().ok()) {
                return Insurer::Benchmark(n);
            }
            if let Ok(n) = rest.parse() {
                return Insurer::TopN(n);
            }
        }
        Insurer::Company(s.to_string())
    }
}

impl From<String> for Insurer {
    fn from(s: String) -> Self {
        Insurer::from(s.as_str())
    }
}

impl From<Insurer> for String {
    fn from(i: Insurer) -> Self {
        i.to_string()
    }
}

/// Optional reinsurance facets. Part of every row key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Facets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinsurance_form: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinsurance_geography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinsurance_type: Option<String>,
}
