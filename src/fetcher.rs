use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};

use crate::dates::DATE_FORMAT;
use crate::fetch_error::FetchError;
use crate::normalize::{clean_value, Discharge};

/// Caption text identifying the daily mean discharge table on a daily value page.
pub const TABLE_MARKER: &str = "Daily Mean Discharge";

/// Parameter code for discharge, cubic feet per second.
const DISCHARGE_PARAMETER: &str = "cb_00060";

/// Anything that can supply one daily mean discharge per (site, day)
///
/// Implementations fail soft: every upstream problem is reported as
/// [`Discharge::Missing`] so one bad cell never stops a run.
pub trait DischargeSource {
    fn daily_mean(&self, site_no: &str, date: NaiveDate) -> impl Future<Output = Discharge> + Send;
}

#[derive(Clone)]
pub struct UsgsFetcher {
    client: reqwest::Client,
    service_url: String,
}

impl UsgsFetcher {
    pub fn new(service_url: String, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            service_url,
        })
    }

    /// Request the daily value page for one site and one day and pull out the mean discharge
    #[instrument(skip(self), fields(url = %self.service_url))]
    pub async fn fetch_daily_mean(
        &self,
        site_no: &str,
        date: NaiveDate,
    ) -> Result<Discharge, FetchError> {
        let day = date.format(DATE_FORMAT).to_string();

        debug!("Sending HTTP request to daily value service");
        let response = self
            .client
            .get(&self.service_url)
            .query(&[
                (DISCHARGE_PARAMETER, "on"),
                ("format", "html"),
                ("site_no", site_no),
                ("legacy", ""),
                ("referred_module", "sw"),
                ("period", ""),
                ("begin_date", day.as_str()),
                ("end_date", day.as_str()),
            ])
            .send()
            .await?;
        debug!("Received HTTP response with status: {}", response.status());

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let html = response.text().await?;
        debug!("Retrieved HTML content, size: {} bytes", html.len());

        parse_html(&html)
    }
}

impl DischargeSource for UsgsFetcher {
    async fn daily_mean(&self, site_no: &str, date: NaiveDate) -> Discharge {
        match self.fetch_daily_mean(site_no, date).await {
            Ok(value) => value,
            Err(FetchError::NoData) => {
                warn!("No data found for site {} on {}", site_no, date);
                Discharge::Missing
            }
            Err(e) => {
                warn!("Failed to fetch data for site {} on {}: {}", site_no, date, e);
                Discharge::Missing
            }
        }
    }
}

fn cell_texts(row: ElementRef<'_>, cell_selector: &Selector) -> Vec<String> {
    row.select(cell_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

fn is_day_of_month(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

/// Find the daily mean discharge in a daily value HTML page
///
/// Scans tables whose text mentions [`TABLE_MARKER`] in document order and
/// returns the second cell of the first row that starts with a bare day
/// number. The second cell goes through [`clean_value`], so a row whose
/// value is a flag like `Ice` yields `Ok(Discharge::Missing)`.
#[instrument(skip(html), fields(html_size = html.len()))]
pub fn parse_html(html: &str) -> Result<Discharge, FetchError> {
    debug!("Parsing HTML document");
    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table").unwrap();
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("th, td").unwrap();

    let mut matched_tables = 0;

    for table in document.select(&table_selector) {
        let text = table.text().collect::<String>();
        if !text.contains(TABLE_MARKER) {
            continue;
        }
        matched_tables += 1;

        for row in table.select(&row_selector) {
            let cells = cell_texts(row, &cell_selector);
            if cells.len() >= 2 && is_day_of_month(&cells[0]) {
                debug!("Day row found: day='{}', value='{}'", cells[0], cells[1]);
                return Ok(clean_value(&cells[1]));
            }
        }
    }

    debug!(
        "Checked {} discharge tables without finding a day row. HTML preview (first 500 chars): {}",
        matched_tables,
        html.chars().take(500).collect::<String>()
    );
    Err(FetchError::NoData)
}
