/// USGS gauge sites scraped on every run, in output column order.
pub const STATIONS: [&str; 5] = ["02029000", "02030000", "02030500", "02034000", "02035000"];
