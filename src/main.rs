use std::io::IsTerminal;

use chrono::Local;
use clap::Parser;
use tracing::{error, info};

use usgs_discharge_scraper::config::Config;
use usgs_discharge_scraper::fetcher::UsgsFetcher;
use usgs_discharge_scraper::lock_guard::{FixedRetries, PromptGuard, UnlockWait};
use usgs_discharge_scraper::pipeline::{Pipeline, PipelineError, RunOutcome};
use usgs_discharge_scraper::workbook::XlsxSheetWriter;

#[derive(Parser)]
#[command(name = "usgs-discharge-scraper")]
#[command(about = "Scrape USGS daily mean discharge into a new workbook sheet", long_about = None)]
struct Cli {
    /// First day to scrape (YYYY-MM-DD); defaults to yesterday
    start_date: Option<String>,

    /// Last day to scrape (YYYY-MM-DD); defaults to the start date
    end_date: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (ignore errors if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Starting discharge scraper with config: {:?}", config);

    let fetcher = UsgsFetcher::new(config.service_url.clone(), config.request_timeout())?;
    let writer = XlsxSheetWriter::new(config.output_path.clone(), config.sheet_collision);

    // Without a console there is nobody to answer the retry prompt
    let guard: Box<dyn UnlockWait> = if std::io::stdin().is_terminal() {
        Box::new(PromptGuard::stdio())
    } else {
        Box::new(FixedRetries::new(
            config.lock_retry_attempts,
            config.lock_retry_delay(),
        ))
    };

    let mut pipeline = Pipeline::new(fetcher, guard, writer);
    let today = Local::now().date_naive();

    match pipeline
        .run(cli.start_date.as_deref(), cli.end_date.as_deref(), today)
        .await
    {
        Ok(RunOutcome::Saved { sheet_name, table }) => {
            println!(
                "Data saved to {} (sheet: {})",
                config.output_path.display(),
                sheet_name
            );
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Ok(RunOutcome::Cancelled { .. }) => {
            println!("No data written.");
        }
        Err(PipelineError::Input(e)) => {
            println!("{e}");
        }
        Err(e) => {
            error!("Run failed: {}", e);
            println!("No data written.");
            return Err(e.into());
        }
    }

    Ok(())
}
