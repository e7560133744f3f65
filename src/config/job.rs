// src/config/job.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ingest::Mode;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";

/// Every variable [`JobConfig::apply_env`] reads.
pub const ENV_VARS: &[&str] = &[
    "BLOB_CONN_STR",
    "BLOB_CONTAINER",
    "FOREM_API_URL",
    "TIMESTAMP_FIELD",
    "BIND_ADDR",
    "BACKFILL_MODE",
    "RUN_ON_STARTUP",
    "PER_PAGE",
    "MAX_RETRIES",
    "RETRY_BASE_MS",
    "REQUEST_TIMEOUT_SECS",
    "PAGE_DELAY_MS",
    "MAX_PAGES_PER_RUN",
    "INCREMENTAL_MAX_PAGES",
    "BACKFILL_START_PAGE",
    "FETCH_INTERVAL_SECS",
];

/// Settings for one ingestion deployment. Built from defaults, then an
/// optional TOML/JSON file, then environment variables.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// `BLOB_CONN_STR`: Azure connection string, `file:<dir>` or `memory:`.
    #[serde(skip_serializing)]
    pub blob_conn_str: Option<String>,
    pub container: String,
    pub backfill_mode: bool,
    pub api_url: String,
    pub per_page: u32,
    pub max_retries: u8,
    pub retry_base_ms: u64,
    pub request_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub max_pages_per_run: u32,
    pub incremental_max_pages: u32,
    pub backfill_start_page: u32,
    pub timestamp_field: String,
    pub fetch_interval_secs: u64,
    pub run_on_startup: bool,
    pub bind_addr: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            blob_conn_str: None,
            container: "forem-data".into(),
            backfill_mode: false,
            api_url: "https://dev.to/api/articles/latest".into(),
            per_page: 300,
            max_retries: 3,
            retry_base_ms: 1_000,
            request_timeout_secs: 10,
            page_delay_ms: 1_000,
            max_pages_per_run: 10,
            incremental_max_pages: 1,
            backfill_start_page: 1,
            timestamp_field: crate::ingest::types::DEFAULT_TIMESTAMP_FIELD.into(),
            fetch_interval_secs: 24 * 3600,
            run_on_startup: false,
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

// The connection string carries the account key.
impl std::fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConfig")
            .field("blob_conn_str", &self.blob_conn_str.as_ref().map(|_| "***"))
            .field("container", &self.container)
            .field("backfill_mode", &self.backfill_mode)
            .field("api_url", &self.api_url)
            .field("per_page", &self.per_page)
            .field("max_retries", &self.max_retries)
            .field("max_pages_per_run", &self.max_pages_per_run)
            .field("incremental_max_pages", &self.incremental_max_pages)
            .field("fetch_interval_secs", &self.fetch_interval_secs)
            .field("bind_addr", &self.bind_addr)
            .finish_non_exhaustive()
    }
}

impl JobConfig {
    pub fn mode(&self) -> Mode {
        if self.backfill_mode {
            Mode::Backfill {
                max_pages: self.max_pages_per_run.max(1),
            }
        } else {
            Mode::Incremental
        }
    }

    /// Load a config file; TOML or JSON, picked by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display())),
            _ => toml::from_str(&content).with_context(|| format!("parsing {}", path.display())),
        }
    }

    /// File layer using env var + fallbacks, then the process environment:
    /// 1) $INGEST_CONFIG_PATH
    /// 2) config/ingest.toml
    /// 3) config/ingest.json
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/ingest.toml");
            let json_p = PathBuf::from("config/ingest.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        base.apply_env(|k| std::env::var(k).ok())
    }

    /// Overlay environment variables read through `lookup`. Unset and empty
    /// values leave the current setting alone; malformed values are errors.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("BLOB_CONN_STR") {
            self.blob_conn_str = Some(v);
        }
        if let Some(v) = get("BLOB_CONTAINER") {
            self.container = v;
        }
        if let Some(v) = get("FOREM_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = get("TIMESTAMP_FIELD") {
            self.timestamp_field = v;
        }
        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("BACKFILL_MODE") {
            self.backfill_mode = parse_flag("BACKFILL_MODE", &v)?;
        }
        if let Some(v) = get("RUN_ON_STARTUP") {
            self.run_on_startup = parse_flag("RUN_ON_STARTUP", &v)?;
        }
        set_parsed(&get, "PER_PAGE", &mut self.per_page)?;
        set_parsed(&get, "MAX_RETRIES", &mut self.max_retries)?;
        set_parsed(&get, "RETRY_BASE_MS", &mut self.retry_base_ms)?;
        set_parsed(&get, "REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        set_parsed(&get, "PAGE_DELAY_MS", &mut self.page_delay_ms)?;
        set_parsed(&get, "MAX_PAGES_PER_RUN", &mut self.max_pages_per_run)?;
        set_parsed(&get, "INCREMENTAL_MAX_PAGES", &mut self.incremental_max_pages)?;
        set_parsed(&get, "BACKFILL_START_PAGE", &mut self.backfill_start_page)?;
        set_parsed(&get, "FETCH_INTERVAL_SECS", &mut self.fetch_interval_secs)?;
        Ok(self)
    }
}

fn set_parsed<T, G>(get: &G, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(key) {
        *slot = v
            .parse()
            .map_err(|e| anyhow!("{key}={v:?} is not valid: {e}"))?;
    }
    Ok(())
}

fn parse_flag(key: &str, v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("{key}={other:?} is not a boolean"),
    }
}
