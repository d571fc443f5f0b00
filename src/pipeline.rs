use std::path::Path;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, instrument, warn};

use crate::dates::{InputError, RunWindow, DATE_FORMAT};
use crate::fetcher::DischargeSource;
use crate::lock_guard::UnlockWait;
use crate::stations::STATIONS;
use crate::workbook::{ResultTable, SheetSink, WorkbookError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Failed to save workbook: {0}")]
    Workbook(#[from] WorkbookError),

    #[error("Failed while waiting for output file: {0}")]
    Lock(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Saved { sheet_name: String, table: ResultTable },
    /// The output file stayed locked and the wait was abandoned; nothing was written.
    Cancelled { table: ResultTable },
}

/// Scrape a date window for every station and append it to the workbook
///
/// Fetches run strictly one after another: dates in order, and within a
/// date the stations in their declared order.
pub struct Pipeline<S, G, W> {
    source: S,
    guard: G,
    sink: W,
    stations: &'static [&'static str],
}

impl<S, G, W> Pipeline<S, G, W>
where
    S: DischargeSource,
    G: UnlockWait,
    W: SheetSink,
{
    pub fn new(source: S, guard: G, sink: W) -> Self {
        Self {
            source,
            guard,
            sink,
            stations: &STATIONS,
        }
    }

    /// Parse the date arguments, then fetch and persist
    ///
    /// Invalid input returns before any request is made.
    pub async fn run(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<RunOutcome, PipelineError> {
        let window = RunWindow::from_args(start, end, today)?;
        if window.defaulted {
            info!("Defaulting to yesterday's date: {}", window.start_raw);
        }

        let table = self.collect(&window).await?;
        self.persist(table, &window.sheet_name())
    }

    #[instrument(skip(self, window), fields(start = %window.start_raw, end = %window.end_raw))]
    pub async fn collect(&self, window: &RunWindow) -> Result<ResultTable, WorkbookError> {
        let mut table = ResultTable::new(self.stations);

        for date in window.range.iter() {
            info!("Scraping {}...", date.format(DATE_FORMAT));

            let mut values = Vec::with_capacity(self.stations.len());
            for site_no in self.stations {
                let value = self.source.daily_mean(site_no, date).await;
                debug!("Site {} on {}: {}", site_no, date, value);
                values.push(value);
            }
            table.push_row(date, values)?;
        }

        let missing = table
            .rows()
            .iter()
            .flat_map(|row| &row.values)
            .filter(|v| v.is_missing())
            .count();
        if missing > 0 {
            warn!("{} of {} cells have no value", missing, table.len() * self.stations.len());
        }

        Ok(table)
    }

    /// Run the lock guard, which may block on console input or sleep between checks
    ///
    /// On a multi-thread runtime the wait is handed to `block_in_place` so the
    /// worker's other tasks can move elsewhere. A current-thread runtime has
    /// nothing else to run while this pipeline waits, so the guard runs inline.
    fn wait_for_unlock(&mut self, path: &Path) -> std::io::Result<bool> {
        let guard = &mut self.guard;
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| guard.wait_for_unlock(path))
            }
            _ => guard.wait_for_unlock(path),
        }
    }

    /// Write `table` once the output file is free; skip the write if the wait is abandoned
    pub fn persist(&mut self, table: ResultTable, sheet_name: &str) -> Result<RunOutcome, PipelineError> {
        let path = self.sink.path().to_path_buf();

        if !self.wait_for_unlock(&path)? {
            info!("Write to {} cancelled, no data saved", path.display());
            return Ok(RunOutcome::Cancelled { table });
        }

        let sheet_name = self.sink.write_sheet(&table, sheet_name)?;
        Ok(RunOutcome::Saved { sheet_name, table })
    }
}
