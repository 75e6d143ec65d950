//! Configuration loading and management
//!
//! Settings come from a TOML file (compiled defaults when it is absent),
//! then environment variables override credentials and endpoints.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::scraper::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub paths: PathsConfig,
    pub platform: PlatformConfig,
    pub detector: DetectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub channels: Vec<String>,
    pub days_back: u32,
    pub max_messages: usize,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub flood_wait_margin_secs: u64,
    pub error_backoff_secs: u64,
    /// Consecutive failures tolerated per page; unbounded when absent
    pub max_retries: Option<u32>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                "CheMed123".to_string(),
                "lobelia4cosmetics".to_string(),
                "Thequorachannel".to_string(),
            ],
            days_back: 5,
            max_messages: 1000,
            page_size: 100,
            page_delay_ms: 1500,
            flood_wait_margin_secs: 5,
            error_backoff_secs: 10,
            max_retries: None,
        }
    }
}

impl ScraperConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            flood_wait_margin: Duration::from_secs(self.flood_wait_margin_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            page_delay: Duration::from_millis(self.page_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "data/warehouse.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub ingestion_root: PathBuf,
    pub image_root: PathBuf,
    pub detections_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ingestion_root: PathBuf::from("data/raw/telegram_messages"),
            image_root: PathBuf::from("data/raw/images"),
            detections_file: PathBuf::from("data/enriched/yolo_detections.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api_base: String,
    pub api_id: String,
    pub api_hash: String,
    pub phone_number: String,
    pub session_name: String,
    pub requests_per_second: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8081".to_string(),
            api_id: String::new(),
            api_hash: String::new(),
            phone_number: String::new(),
            session_name: "telegram_scraper".to_string(),
            requests_per_second: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090/detect".to_string(),
            model: "yolov8n.pt".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("logs/pipeline.log")),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Override settings from the process environment (and a `.env` file if present).
    pub fn apply_env(&mut self) {
        dotenvy::dotenv().ok();
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(url) = var("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(id) = var("API_ID") {
            self.platform.api_id = id;
        }
        if let Some(hash) = var("API_HASH") {
            self.platform.api_hash = hash;
        }
        if let Some(phone) = var("PHONE_NUMBER") {
            self.platform.phone_number = phone;
        }
        if let Some(session) = var("SESSION_NAME") {
            self.platform.session_name = session;
        }
        if let Some(base) = var("CHANNEL_API_BASE") {
            self.platform.api_base = base;
        }
        if let Some(endpoint) = var("DETECTOR_ENDPOINT") {
            self.detector.endpoint = endpoint;
        }
    }
}
