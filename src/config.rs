//! Runtime settings: hard defaults overridable through `SPIMEX_*`
//! environment variables (e.g. `SPIMEX_CUTOFF_YEAR=2020`).

use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Scheme and host that listing paths and file hrefs are resolved against.
    pub base_url: String,
    /// First listing page of the oil-products trade results.
    pub listing_path: String,
    /// Discovery stops at the first bulletin dated in or before this year.
    pub cutoff_year: i32,
    /// Max bulletin downloads in flight at once.
    pub concurrency: usize,
    /// Budget for the whole download session, not per file.
    pub session_timeout_secs: u64,
    /// Per-request budget for listing pages.
    pub listing_timeout_secs: u64,
    pub download_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://spimex.com".into(),
            listing_path: "/markets/oil_products/trades/results/".into(),
            cutoff_year: 2022,
            concurrency: 10,
            session_timeout_secs: 600,
            listing_timeout_secs: 5,
            download_dir: PathBuf::from("bulletins"),
            db_path: PathBuf::from("data/spimex.sqlite"),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .add_source(Environment::with_prefix("SPIMEX").try_parsing(true))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
