//! Channel ingestion pipeline
//!
//! Scrapes rate-limited channels into per-day batch files, loads them into
//! the raw staging tables without duplicates, and classifies downloaded
//! images with an object detector.

pub mod channel;
pub mod classifier;
pub mod config;
pub mod context;
pub mod db;
pub mod detector;
pub mod error;
pub mod loader;
pub mod logging;
pub mod records;
pub mod scraper;

pub use channel::{ChannelClient, HttpChannelClient};
pub use classifier::{categorize, classify, Category, Detection};
pub use config::Config;
pub use context::PipelineContext;
pub use db::Database;
pub use detector::{DetectionRun, ObjectDetector};
pub use loader::RawLoader;
pub use records::{DetectionRecord, MessageRecord};
pub use scraper::{ChannelScraper, RetryPolicy};
