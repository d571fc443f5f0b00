use chrono::{Duration, NaiveDate};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, PartialEq)]
pub enum InputError {
    #[error("Invalid date format: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Start date must be before end date ({start} > {end})")]
    StartAfterEnd { start: String, end: String },
}

pub fn parse_date(value: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| InputError::InvalidDate(value.to_string()))
}

/// Inclusive range of calendar days
///
/// The range is `Copy`, so iterating it never consumes it and the same
/// range can be walked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Number of days in the range, counting both ends.
    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            ((self.end - self.start).num_days() + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntoIterator for DateRange {
    type Item = NaiveDate;
    type IntoIter = Box<dyn Iterator<Item = NaiveDate>>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// The validated date window of one scraping run
///
/// Keeps the dates exactly as the caller typed them, because the output
/// sheet is named after the raw strings rather than the normalized dates.
#[derive(Debug, Clone, PartialEq)]
pub struct RunWindow {
    pub start_raw: String,
    pub end_raw: String,
    pub range: DateRange,
    /// True when no dates were given and yesterday was used.
    pub defaulted: bool,
}

impl RunWindow {
    /// Resolve zero, one or two positional date arguments
    ///
    /// Two non-empty dates give an explicit range and a lone non-empty start
    /// gives a single day. Anything else, including an end argument that is
    /// present but empty, defaults both ends to the day before `today`.
    pub fn from_args(
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, InputError> {
        let (start_raw, end_raw, defaulted) = match (start, end) {
            (Some(s), Some(e)) if !s.is_empty() && !e.is_empty() => {
                (s.to_string(), e.to_string(), false)
            }
            (Some(s), None) if !s.is_empty() => (s.to_string(), s.to_string(), false),
            _ => {
                let yesterday = (today - Duration::days(1)).format(DATE_FORMAT).to_string();
                (yesterday.clone(), yesterday, true)
            }
        };

        let start_date = parse_date(&start_raw)?;
        let end_date = parse_date(&end_raw)?;

        if start_date > end_date {
            return Err(InputError::StartAfterEnd {
                start: start_raw,
                end: end_raw,
            });
        }

        Ok(Self {
            start_raw,
            end_raw,
            range: DateRange::new(start_date, end_date),
            defaulted,
        })
    }

    pub fn sheet_name(&self) -> String {
        format!("{}_to_{}", self.start_raw, self.end_raw)
    }
}
