//! Per-run handles shared by the pipeline stages
//!
//! A context is built once at the start of a run and dropped at the end,
//! which closes the database connection on every exit path.

use anyhow::{Context as _, Result};
use std::io::{self, BufRead, Write};
use tracing::info;

use crate::channel::HttpChannelClient;
use crate::config::Config;
use crate::db::Database;
use crate::detector::{DetectionRun, HttpDetector};
use crate::loader::{LoadStats, RawLoader};
use crate::scraper::{ChannelScraper, ChannelSummary};

pub struct PipelineContext {
    pub config: Config,
    pub db: Database,
    channel_client: Option<HttpChannelClient>,
}

impl PipelineContext {
    /// Open the database named by the config. The channel client is created on first use.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::new(&config.storage.database_url)
            .with_context(|| format!("opening database {}", config.storage.database_url))?;
        db.run_migrations()?;
        info!("Database initialized");

        Ok(Self {
            config,
            db,
            channel_client: None,
        })
    }

    /// Channel client, signing in interactively the first time a session is used
    async fn channel_client(&mut self) -> Result<&HttpChannelClient> {
        if self.channel_client.is_none() {
            let client = HttpChannelClient::new(&self.config.platform)
                .context("building channel platform client")?;

            if !client.is_authorized().await? {
                client.send_code_request().await?;
                let code = prompt("Enter the code: ")?;
                client.sign_in(&code).await?;
                info!("Signed in as {}", self.config.platform.phone_number);
            }

            self.channel_client = Some(client);
        }

        self.channel_client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("channel client unavailable"))
    }

    pub async fn scrape(
        &mut self,
        channels: &[String],
        days_back: u32,
        max_messages: usize,
    ) -> Result<Vec<ChannelSummary>> {
        let scraper_config = self.config.scraper.clone();
        let paths = self.config.paths.clone();
        let client = self.channel_client().await?;

        let scraper = ChannelScraper::new(client, &paths.image_root)
            .with_page_size(scraper_config.page_size)
            .with_policy(scraper_config.retry_policy());

        Ok(scraper
            .run(channels, days_back, max_messages, &paths.ingestion_root)
            .await)
    }

    pub fn load_messages(&self) -> Result<LoadStats> {
        RawLoader::new(&self.db)?.load_messages(&self.config.paths.ingestion_root)
    }

    pub async fn detect(&self) -> Result<usize> {
        let detector = HttpDetector::new(&self.config.detector)?;
        info!("Using detector model {}", self.config.detector.model);

        DetectionRun::new(&detector)
            .run(&self.config.paths.image_root, &self.config.paths.detections_file)
            .await
    }

    pub fn load_detections(&self) -> Result<LoadStats> {
        RawLoader::new(&self.db)?.load_detections(&self.config.paths.detections_file)
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
