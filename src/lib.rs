pub mod config;
pub mod dates;
pub mod fetch_error;
pub mod fetcher;
pub mod lock_guard;
pub mod normalize;
pub mod pipeline;
pub mod stations;
pub mod workbook;
