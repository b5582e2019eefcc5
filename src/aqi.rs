//! Air quality index from particulate matter readings.
//!
//! The AQI follows the US EPA breakpoint interpolation (2012 table). The
//! deployment policy is an integer AQI: PM2.5 is truncated to 0.1 ug/m3,
//! PM10 to 1 ug/m3, and each sub-index is rounded to the nearest integer.
//! The reported AQI is the larger of the PM10 and PM2.5 sub-indices.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::models::{FieldValue, Record};

// ---

/// The six EPA categories, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AqiCategory {
    #[serde(rename = "Good")]
    Good,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Unhealthy for Sensitive Groups")]
    UnhealthyForSensitiveGroups,
    #[serde(rename = "Unhealthy")]
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    #[serde(rename = "Hazardous")]
    Hazardous,
}

/// Half-open intervals `(lower, upper]`, checked in ascending order.
const CATEGORY_TABLE: [(f64, f64, AqiCategory); 6] = [
    (-1.0, 50.0, AqiCategory::Good),
    (50.0, 100.0, AqiCategory::Moderate),
    (100.0, 150.0, AqiCategory::UnhealthyForSensitiveGroups),
    (150.0, 200.0, AqiCategory::Unhealthy),
    (200.0, 300.0, AqiCategory::VeryUnhealthy),
    (300.0, 500.0, AqiCategory::Hazardous),
];

impl AqiCategory {
    // ---
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthyForSensitiveGroups,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown AQI category '{}'", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for AqiCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AqiCategory::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Map an AQI value to its category; `None` outside `(-1, 500]`.
pub fn classify(value: f64) -> Option<AqiCategory> {
    // ---
    CATEGORY_TABLE
        .iter()
        .find(|(lower, upper, _)| value > *lower && value <= *upper)
        .map(|(_, _, category)| *category)
}

// ---

/// Field names of one device family's particulate readings.
#[derive(Debug, Clone, Copy)]
pub struct PmFamily {
    pub name: &'static str,
    pub pm10: &'static str,
    pub pm25: &'static str,
}

/// Families in the order they are tried. Fields are never mixed across families.
pub const PM_FAMILIES: [PmFamily; 2] = [
    PmFamily {
        name: "SDS",
        pm10: "SDS_P1",
        pm25: "SDS_P2",
    },
    PmFamily {
        name: "PMS",
        pm10: "PMS_P1",
        pm25: "PMS_P2",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm10,
    Pm25,
}

/// `(conc_lo, conc_hi, index_lo, index_hi)`
type Breakpoint = (f64, f64, f64, f64);

const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 350.4, 301.0, 400.0),
    (350.5, 500.4, 401.0, 500.0),
];

const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 54.0, 0.0, 50.0),
    (55.0, 154.0, 51.0, 100.0),
    (155.0, 254.0, 101.0, 150.0),
    (255.0, 354.0, 151.0, 200.0),
    (355.0, 424.0, 201.0, 300.0),
    (425.0, 504.0, 301.0, 400.0),
    (505.0, 604.0, 401.0, 500.0),
];

// Keeps 35.4 from truncating to 35.3 through binary rounding.
const TRUNCATION_EPSILON: f64 = 1e-9;

impl Pollutant {
    // ---
    fn breakpoints(self) -> &'static [Breakpoint] {
        match self {
            Pollutant::Pm10 => &PM10_BREAKPOINTS,
            Pollutant::Pm25 => &PM25_BREAKPOINTS,
        }
    }

    fn truncate(self, concentration: f64) -> f64 {
        match self {
            Pollutant::Pm10 => (concentration + TRUNCATION_EPSILON).floor(),
            Pollutant::Pm25 => ((concentration * 10.0) + TRUNCATION_EPSILON).floor() / 10.0,
        }
    }
}

/// EPA sub-index for one pollutant; `None` when outside the breakpoint table.
pub fn sub_index(pollutant: Pollutant, concentration: f64) -> Option<f64> {
    // ---
    if !concentration.is_finite() || concentration < 0.0 {
        return None;
    }

    let c = pollutant.truncate(concentration);
    let &(c_lo, c_hi, i_lo, i_hi) = pollutant
        .breakpoints()
        .iter()
        .find(|(lo, hi, _, _)| c >= *lo && c <= *hi)?;

    Some(((i_hi - i_lo) / (c_hi - c_lo) * (c - c_lo) + i_lo).round())
}

/// AQI computed for one report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AqiReading {
    pub value: f64,
    pub category: Option<AqiCategory>,
    pub family: &'static str,
}

/// Compute the AQI from the first family with both PM10 and PM2.5 present.
///
/// Returns `None` when no family is complete or a concentration is outside
/// the breakpoint table. Missing data is not an error.
pub fn compute_aqi(record: &Record) -> Option<AqiReading> {
    // ---
    let (family, pm10, pm25) = PM_FAMILIES.iter().find_map(|family| {
        let pm10 = number(record, family.pm10)?;
        let pm25 = number(record, family.pm25)?;
        Some((family, pm10, pm25))
    })?;

    let value = sub_index(Pollutant::Pm10, pm10)?.max(sub_index(Pollutant::Pm25, pm25)?);

    Some(AqiReading {
        value,
        category: classify(value),
        family: family.name,
    })
}

fn number(record: &Record, key: &str) -> Option<f64> {
    match record.get(key)? {
        FieldValue::Number(v) => Some(*v),
        FieldValue::Text(_) => None,
    }
}
