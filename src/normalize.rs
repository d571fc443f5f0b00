/// Discharge reading normalization
///
/// Daily value pages report discharge as text such as `"1,234"`, `"567 A"` or
/// `"89.5 P e"`, where trailing letters are approval/estimate flags. This module
/// turns that text into a number, or into [`Discharge::Missing`] when nothing
/// numeric is left.
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

/// A single daily mean discharge value (cubic feet per second).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Discharge {
    Value(f64),
    #[default]
    Missing,
}

impl Discharge {
    pub fn is_missing(&self) -> bool {
        matches!(self, Discharge::Missing)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Discharge::Value(v) => Some(*v),
            Discharge::Missing => None,
        }
    }
}

impl From<Option<f64>> for Discharge {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Discharge::Missing, Discharge::Value)
    }
}

impl From<Discharge> for Option<f64> {
    fn from(value: Discharge) -> Self {
        value.value()
    }
}

impl fmt::Display for Discharge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discharge::Value(v) => write!(f, "{v}"),
            Discharge::Missing => write!(f, "None"),
        }
    }
}

impl Serialize for Discharge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Discharge::Value(v) => serializer.serialize_f64(*v),
            Discharge::Missing => serializer.serialize_none(),
        }
    }
}

fn non_numeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9,.\-]").expect("valid regex"))
}

/// Convert a raw discharge cell into a [`Discharge`]
///
/// Everything except ASCII digits, `,`, `.` and `-` is stripped, thousands
/// separators are dropped, and the remainder is parsed as `f64`. Empty or
/// malformed remainders yield [`Discharge::Missing`]; this never fails.
///
/// # Examples
///
/// ```
/// use usgs_discharge_scraper::normalize::{clean_value, Discharge};
///
/// assert_eq!(clean_value("1,234.5E"), Discharge::Value(1234.5));
/// assert_eq!(clean_value("567 P"), Discharge::Value(567.0));
/// assert_eq!(clean_value("Ice"), Discharge::Missing);
/// ```
pub fn clean_value(raw: &str) -> Discharge {
    let stripped = non_numeric().replace_all(raw, "");
    let digits = stripped.replace(',', "");

    digits.parse::<f64>().ok().into()
}
