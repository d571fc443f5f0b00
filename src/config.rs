use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::workbook::SheetCollision;

pub const DEFAULT_SERVICE_URL: &str = "https://waterdata.usgs.gov/nwis/dv";
pub const DEFAULT_OUTPUT_PATH: &str = "USGSDataScraped.xlsx";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid SHEET_COLLISION: {0}")]
    SheetCollision(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub service_url: String,
    pub output_path: PathBuf,
    pub request_timeout_secs: u64,
    pub sheet_collision: SheetCollision,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            request_timeout_secs: 30,
            sheet_collision: SheetCollision::Fail,
            lock_retry_attempts: 10,
            lock_retry_delay_secs: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let sheet_collision = match env::var("SHEET_COLLISION") {
            Ok(value) => value.parse().map_err(ConfigError::SheetCollision)?,
            Err(_) => defaults.sheet_collision,
        };

        Ok(Config {
            service_url: env::var("USGS_DV_URL").unwrap_or(defaults.service_url),
            output_path: env::var("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            request_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            sheet_collision,
            lock_retry_attempts: env::var("LOCK_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_retry_attempts),
            lock_retry_delay_secs: env::var("LOCK_RETRY_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_retry_delay_secs),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_secs(self.lock_retry_delay_secs)
    }
}
