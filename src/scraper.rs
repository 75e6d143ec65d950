//! Paginated channel scraper
//!
//! Walks a channel's history backward one page at a time, stopping at the
//! cutoff date, the message budget, or the end of history. Photos are
//! downloaded next to the message records and every channel is written as one
//! batch file for the raw loader.

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::channel::{ChannelClient, ChannelHandle, ChannelMessage};
use crate::error::ChannelError;
use crate::records::{batch_path, write_message_batch, MessageRecord};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Backoff and retry settings for one channel scrape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Added on top of the wait mandated by flood control
    pub flood_wait_margin: Duration,
    /// Wait after any other transient failure
    pub error_backoff: Duration,
    /// Pause between successful pages
    pub page_delay: Duration,
    /// Consecutive failures allowed for one page; `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            flood_wait_margin: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            page_delay: Duration::from_millis(1500),
            max_retries: None,
        }
    }
}

/// Outcome of scraping one channel as part of a run
#[derive(Debug, Clone, Default)]
pub struct ChannelSummary {
    pub channel: String,
    pub messages: usize,
    pub images: usize,
    pub output: Option<PathBuf>,
}

pub struct ChannelScraper<'a, C: ChannelClient + ?Sized> {
    client: &'a C,
    image_root: PathBuf,
    page_size: usize,
    policy: RetryPolicy,
}

impl<'a, C: ChannelClient + ?Sized> ChannelScraper<'a, C> {
    pub fn new(client: &'a C, image_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            image_root: image_root.into(),
            page_size: DEFAULT_PAGE_SIZE,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scrape every channel in order and write one batch file per non-empty channel.
    pub async fn run(
        &self,
        channels: &[String],
        days_back: u32,
        max_messages: usize,
        ingestion_root: &Path,
    ) -> Vec<ChannelSummary> {
        let day = Local::now().format("%Y-%m-%d").to_string();
        let mut summaries = Vec::with_capacity(channels.len());

        for channel in channels {
            info!("Starting scrape for {}", channel);
            let messages = self.scrape_channel(channel, days_back, max_messages).await;

            let mut summary = ChannelSummary {
                channel: channel.clone(),
                messages: messages.len(),
                images: messages.iter().filter(|m| m.image_path.is_some()).count(),
                output: None,
            };

            if messages.is_empty() {
                warn!("No messages scraped for {}", channel);
            } else {
                let path = batch_path(ingestion_root, &day, channel);
                match write_message_batch(&path, &messages) {
                    Ok(()) => {
                        info!("Saved {} messages to {}", messages.len(), path.display());
                        summary.output = Some(path);
                    }
                    Err(e) => error!("Failed to write batch for {}: {}", channel, e),
                }
            }

            summaries.push(summary);
        }

        summaries
    }

    /// Scrape messages newer than `now - days_back`, up to roughly `max_messages`.
    pub async fn scrape_channel(
        &self,
        channel: &str,
        days_back: u32,
        max_messages: usize,
    ) -> Vec<MessageRecord> {
        let cutoff = cutoff_before(Utc::now(), days_back);
        self.scrape_since(channel, cutoff, max_messages).await
    }

    /// Scrape messages dated at or after `cutoff`, newest first.
    ///
    /// The message budget is checked after each full page, so the result can
    /// exceed `max_messages` by up to one page.
    pub async fn scrape_since(
        &self,
        channel: &str,
        cutoff: DateTime<Utc>,
        max_messages: usize,
    ) -> Vec<MessageRecord> {
        let mut messages: Vec<MessageRecord> = Vec::new();

        let handle = match self.client.resolve(channel).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Error accessing {}: {}", channel, e);
                return messages;
            }
        };
        info!("Accessed channel: {}", channel);

        let mut offset_id: i64 = 0;
        let mut failures: u32 = 0;

        loop {
            let page = match self.client.history(&handle, offset_id, self.page_size).await {
                Ok(page) => {
                    failures = 0;
                    page
                }
                Err(ChannelError::Inaccessible { reason, .. }) => {
                    error!("Channel {} became inaccessible: {}", channel, reason);
                    return messages;
                }
                Err(e) => {
                    failures += 1;
                    if self.retries_exhausted(failures) {
                        error!(
                            "Giving up on {} after {} consecutive failures: {}",
                            channel, failures, e
                        );
                        return messages;
                    }

                    let wait = match e {
                        ChannelError::FloodWait(mandated) => {
                            warn!("Flood wait: sleeping for {} seconds", mandated.as_secs());
                            mandated + self.policy.flood_wait_margin
                        }
                        other => {
                            error!("Error during scraping {}: {}", channel, other);
                            self.policy.error_backoff
                        }
                    };
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let Some(oldest) = page.last() else {
                break;
            };
            offset_id = oldest.id;

            let page_len = page.len();
            for msg in &page {
                if msg.date < cutoff {
                    info!("Reached cutoff date for {}", channel);
                    return messages;
                }
                messages.push(self.build_record(channel, &handle, msg).await);
            }

            info!(
                "Scraped {} messages from {}. Total: {}",
                page_len,
                channel,
                messages.len()
            );

            if messages.len() >= max_messages {
                info!("Reached max_messages for {}", channel);
                break;
            }

            tokio::time::sleep(self.policy.page_delay).await;
        }

        messages
    }

    fn retries_exhausted(&self, failures: u32) -> bool {
        matches!(self.policy.max_retries, Some(max) if failures > max)
    }

    /// Path a photo for `message_id` is stored under
    pub fn image_path(&self, channel: &str, message_id: i64) -> PathBuf {
        self.image_root
            .join(channel)
            .join(format!("{}.jpg", message_id))
    }

    async fn build_record(
        &self,
        channel: &str,
        handle: &ChannelHandle,
        msg: &ChannelMessage,
    ) -> MessageRecord {
        let mut image_path = None;

        if msg.has_photo {
            let dest = self.image_path(channel, msg.id);
            match self.client.download_photo(handle, msg, &dest).await {
                Ok(()) => {
                    info!("Downloaded image: {}", dest.display());
                    image_path = Some(dest.to_string_lossy().to_string());
                }
                Err(e) => {
                    error!("Failed to download image for msg {}: {}", msg.id, e);
                }
            }
        }

        MessageRecord {
            channel_name: channel.to_string(),
            message_id: msg.id,
            message_date: msg.date,
            message_text: msg.text.clone(),
            has_media: msg.has_media || msg.has_photo,
            image_path,
            views: msg.views,
            forwards: msg.forwards,
        }
    }
}

/// `now - days_back`, clamped to the earliest representable date.
pub fn cutoff_before(now: DateTime<Utc>, days_back: u32) -> DateTime<Utc> {
    now.checked_sub_signed(ChronoDuration::days(i64::from(days_back)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
