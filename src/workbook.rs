use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use umya_spreadsheet::{reader, writer, Spreadsheet, Worksheet};

use crate::dates::DATE_FORMAT;
use crate::normalize::Discharge;

pub const DATE_COLUMN: &str = "Date";

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Failed to read existing workbook: {0}")]
    Read(umya_spreadsheet::XlsxError),

    #[error("Failed to write workbook: {0}")]
    Write(umya_spreadsheet::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sheet already exists: {0}")]
    SheetExists(String),

    #[error("Invalid sheet name {0}")]
    InvalidSheet(String),

    #[error("Row for {date} has {found} values for {expected} stations")]
    RowWidth {
        date: NaiveDate,
        expected: usize,
        found: usize,
    },
}

/// What to do when the target sheet name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetCollision {
    #[default]
    Fail,
    /// Append the lowest numeric suffix that makes the name unique.
    Rename,
}

impl FromStr for SheetCollision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" | "error" => Ok(SheetCollision::Fail),
            "rename" | "new" => Ok(SheetCollision::Rename),
            other => Err(format!("unknown sheet collision policy '{other}'")),
        }
    }
}

/// One scraped day: the date plus one reading per station, in station order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub date: NaiveDate,
    pub values: Vec<Discharge>,
}

/// Scraped rows in chronological order, all sharing the same station columns
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    stations: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(stations: &[&str]) -> Self {
        Self {
            stations: stations.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; `values` must hold exactly one entry per station.
    pub fn push_row(&mut self, date: NaiveDate, values: Vec<Discharge>) -> Result<(), WorkbookError> {
        if values.len() != self.stations.len() {
            return Err(WorkbookError::RowWidth {
                date,
                expected: self.stations.len(),
                found: values.len(),
            });
        }
        self.rows.push(ResultRow { date, values });
        Ok(())
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Vec<&str> {
        std::iter::once(DATE_COLUMN)
            .chain(self.stations.iter().map(String::as_str))
            .collect()
    }
}

struct RowRecord<'a> {
    stations: &'a [String],
    row: &'a ResultRow,
}

impl Serialize for RowRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stations.len() + 1))?;
        map.serialize_entry(DATE_COLUMN, &self.row.date.format(DATE_FORMAT).to_string())?;
        for (station, value) in self.stations.iter().zip(&self.row.values) {
            map.serialize_entry(station, value)?;
        }
        map.end()
    }
}

/// Serializes as a list of `{"Date": ..., "<station>": value | null}` records.
impl Serialize for ResultTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowRecord {
                stations: &self.stations,
                row,
            })?;
        }
        seq.end()
    }
}

/// Destination for finished result tables
pub trait SheetSink {
    fn path(&self) -> &Path;

    /// Add `table` as a new sheet and return the name it was stored under.
    fn write_sheet(&mut self, table: &ResultTable, sheet_name: &str) -> Result<String, WorkbookError>;
}

/// Appends result tables as new sheets of an `.xlsx` workbook
///
/// An existing workbook is loaded and edited in place, so its sheets keep
/// their formulas, number formats, styles, column widths and merged cells.
/// The result is written to a temp file next to the target and renamed over
/// it, so a failed write leaves the previous file untouched.
pub struct XlsxSheetWriter {
    path: PathBuf,
    collision: SheetCollision,
}

impl XlsxSheetWriter {
    pub fn new(path: impl Into<PathBuf>, collision: SheetCollision) -> Self {
        Self {
            path: path.into(),
            collision,
        }
    }

    fn load(&self) -> Result<Spreadsheet, WorkbookError> {
        if self.path.exists() {
            info!("Appending to existing workbook {}", self.path.display());
            let book = reader::xlsx::read(&self.path).map_err(WorkbookError::Read)?;
            debug!("Loaded {} existing sheets", book.get_sheet_collection().len());
            Ok(book)
        } else {
            info!("Creating new workbook {}", self.path.display());
            Ok(umya_spreadsheet::new_file_empty_worksheet())
        }
    }

    fn replace_file(&self, book: &Spreadsheet) -> Result<(), WorkbookError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        writer::xlsx::write_writer(book, tmp.as_file_mut()).map_err(WorkbookError::Write)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| WorkbookError::Io(e.error))?;
        Ok(())
    }
}

impl SheetSink for XlsxSheetWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_sheet(&mut self, table: &ResultTable, sheet_name: &str) -> Result<String, WorkbookError> {
        let mut book = self.load()?;

        let taken: Vec<&str> = book
            .get_sheet_collection()
            .iter()
            .map(|sheet| sheet.get_name())
            .collect();
        let name = resolve_sheet_name(sheet_name, &taken, self.collision)?;

        let worksheet = book
            .new_sheet(name.as_str())
            .map_err(|e| WorkbookError::InvalidSheet(format!("{name}: {e}")))?;
        write_table(table, worksheet);

        self.replace_file(&book)?;

        info!(
            "Wrote sheet '{}' with {} rows to {}",
            name,
            table.len(),
            self.path.display()
        );
        Ok(name)
    }
}

/// Pick the name for a new sheet given the names already in the workbook
///
/// Sheet names compare case-insensitively, as in Excel.
pub fn resolve_sheet_name(
    requested: &str,
    taken: &[&str],
    collision: SheetCollision,
) -> Result<String, WorkbookError> {
    let is_taken = |candidate: &str| {
        let candidate = candidate.to_lowercase();
        taken.iter().any(|t| t.to_lowercase() == candidate)
    };

    if !is_taken(requested) {
        return Ok(requested.to_string());
    }

    match collision {
        SheetCollision::Fail => Err(WorkbookError::SheetExists(requested.to_string())),
        SheetCollision::Rename => {
            let mut suffix = 1;
            loop {
                let candidate = format!("{requested}{suffix}");
                if !is_taken(&candidate) {
                    debug!("Sheet '{}' exists, using '{}'", requested, candidate);
                    return Ok(candidate);
                }
                suffix += 1;
            }
        }
    }
}

fn write_table(table: &ResultTable, worksheet: &mut Worksheet) {
    // umya coordinates are (column, row), both 1-based
    for (col, heading) in table.header().iter().enumerate() {
        worksheet
            .get_cell_mut((col as u32 + 1, 1))
            .set_value_string(*heading);
    }

    for (idx, row) in table.rows().iter().enumerate() {
        let row_num = idx as u32 + 2;
        worksheet
            .get_cell_mut((1, row_num))
            .set_value_string(row.date.format(DATE_FORMAT).to_string());

        for (col, value) in row.values.iter().enumerate() {
            if let Discharge::Value(v) = value {
                worksheet
                    .get_cell_mut((col as u32 + 2, row_num))
                    .set_value_number(*v);
            }
        }
    }

    worksheet.get_column_dimension_mut("A").set_width(12.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_header_lists_date_then_stations() {
        let table = ResultTable::new(&["02029000", "02030000"]);
        assert_eq!(table.header(), vec!["Date", "02029000", "02030000"]);
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut table = ResultTable::new(&["02029000", "02030000"]);
        let result = table.push_row(ymd(2024, 5, 1), vec![Discharge::Missing]);

        assert!(matches!(
            result,
            Err(WorkbookError::RowWidth { expected: 2, found: 1, .. })
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_serializes_missing_as_null() {
        let mut table = ResultTable::new(&["02029000", "02030000"]);
        table
            .push_row(ymd(2024, 5, 1), vec![Discharge::Value(812.0), Discharge::Missing])
            .unwrap();

        let json: serde_json::Value = serde_json::to_value(&table).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "Date": "2024-05-01", "02029000": 812.0, "02030000": null }])
        );
    }

    #[test]
    fn test_resolve_free_name() {
        let name = resolve_sheet_name("2024-05-01_to_2024-05-01", &["Sheet1"], SheetCollision::Fail);
        assert_eq!(name.unwrap(), "2024-05-01_to_2024-05-01");
    }

    #[test]
    fn test_resolve_collision_fails() {
        let result = resolve_sheet_name("a_to_b", &["A_TO_B"], SheetCollision::Fail);
        assert!(matches!(result, Err(WorkbookError::SheetExists(name)) if name == "a_to_b"));
    }

    #[test]
    fn test_resolve_collision_renames() {
        let name = resolve_sheet_name("a_to_b", &["a_to_b", "a_to_b1"], SheetCollision::Rename);
        assert_eq!(name.unwrap(), "a_to_b2");
    }

    #[test]
    fn test_collision_policy_from_str() {
        assert_eq!("fail".parse::<SheetCollision>(), Ok(SheetCollision::Fail));
        assert_eq!(" Rename ".parse::<SheetCollision>(), Ok(SheetCollision::Rename));
        assert!("overwrite".parse::<SheetCollision>().is_err());
    }
}
